use std::fmt::{Display, Write as _};

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{infer_columns, resolve_columns, Column};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::report::{Row, Value};

/// Rows buffered before a streaming export sends a chunk.
pub const STREAM_FLUSH_ROWS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvConfig {
    pub delimiter: char,
    pub quote: char,
    pub use_crlf: bool,
    pub include_header: bool,
    /// strftime pattern for dates.
    pub date_format: String,
    /// strftime pattern appended to the date for non-midnight datetimes.
    pub time_format: String,
    pub null_value: String,
}

impl Default for CsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote: '"',
            use_crlf: true,
            include_header: true,
            date_format: "%Y-%m-%d".into(),
            time_format: "%H:%M:%S".into(),
            null_value: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CsvExporter {
    config: CsvConfig,
}

impl CsvExporter {
    pub fn new(config: CsvConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CsvConfig {
        &self.config
    }

    /// Encode all rows at once. With no declared columns, the first row's
    /// keys are used.
    pub fn export(&self, rows: &[Row], columns: &[Column]) -> Result<Vec<u8>> {
        let columns = resolve_columns(columns, rows);
        let mut out = String::new();
        if self.config.include_header && !columns.is_empty() {
            self.write_header(&mut out, &columns);
        }
        for row in rows {
            self.write_row(&mut out, row, &columns)?;
        }
        Ok(out.into_bytes())
    }

    /// Encode rows as they arrive, sending byte chunks downstream.
    ///
    /// The header goes out as its own chunk: immediately when columns are
    /// declared, otherwise once the first row fixes them. Rows are sent in
    /// chunks of [`STREAM_FLUSH_ROWS`], with any remainder sent when the
    /// input closes. Cancellation is checked before every row; a cancelled
    /// export returns [`Error::Cancelled`] without sending its buffered rows.
    ///
    /// The concatenated chunks equal [`CsvExporter::export`] on the same
    /// rows. Returns the number of rows written.
    pub async fn export_stream(
        &self,
        mut rows: mpsc::Receiver<Row>,
        columns: Vec<Column>,
        out: mpsc::Sender<Vec<u8>>,
        mut cancel: CancelToken,
    ) -> Result<u64> {
        let mut columns = columns;
        let mut infer = columns.is_empty();
        let mut header_pending = self.config.include_header;
        if header_pending && !columns.is_empty() {
            let mut header = String::new();
            self.write_header(&mut header, &columns);
            send(&out, header).await?;
            header_pending = false;
        }

        let mut buf = String::new();
        let mut buffered = 0usize;
        let mut written = 0u64;

        loop {
            let row = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    log::info!("csv stream cancelled after {written} rows");
                    return Err(Error::Cancelled);
                }
                row = rows.recv() => row,
            };
            let Some(row) = row else { break };

            // Columns are fixed by the first row, as in `export`.
            if infer {
                columns = infer_columns(&row);
                infer = false;
            }
            if header_pending {
                if !columns.is_empty() {
                    let mut header = String::new();
                    self.write_header(&mut header, &columns);
                    send(&out, header).await?;
                }
                header_pending = false;
            }

            self.write_row(&mut buf, &row, &columns)?;
            buffered += 1;
            written += 1;

            if buffered >= STREAM_FLUSH_ROWS {
                send(&out, std::mem::take(&mut buf)).await?;
                buffered = 0;
            }
        }

        if !buf.is_empty() {
            send(&out, buf).await?;
        }
        log::debug!("csv stream finished: {written} rows");
        Ok(written)
    }

    fn write_header(&self, out: &mut String, columns: &[Column]) {
        let fields: Vec<String> = columns.iter().map(|c| self.escape(&c.label)).collect();
        self.write_record(out, &fields);
    }

    fn write_row(&self, out: &mut String, row: &Row, columns: &[Column]) -> Result<()> {
        let fields = columns
            .iter()
            .map(|c| {
                let text = match row.get(&c.key) {
                    Some(v) => self.format_value(v)?,
                    None => self.config.null_value.clone(),
                };
                Ok(self.escape(&text))
            })
            .collect::<Result<Vec<String>>>()?;
        self.write_record(out, &fields);
        Ok(())
    }

    fn write_record(&self, out: &mut String, fields: &[String]) {
        let mut delim = [0u8; 4];
        let sep: &str = self.config.delimiter.encode_utf8(&mut delim);
        out.push_str(&fields.join(sep));
        out.push_str(if self.config.use_crlf { "\r\n" } else { "\n" });
    }

    /// Cell text for a value. Fails with [`Error::Render`] when the
    /// configured date or time pattern cannot format it.
    pub fn format_value(&self, value: &Value) -> Result<String> {
        Ok(match value {
            Value::Null => self.config.null_value.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(x) => x.to_string(),
            Value::Text(s) => s.clone(),
            Value::Date(d) => strftime(d.format(&self.config.date_format))?,
            Value::DateTime(dt) => self.format_datetime(dt)?,
            Value::List(items) => items
                .iter()
                .map(|v| self.format_value(v))
                .collect::<Result<Vec<_>>>()?
                .join(", "),
        })
    }

    fn format_datetime(&self, dt: &NaiveDateTime) -> Result<String> {
        let date = strftime(dt.format(&self.config.date_format))?;
        if dt.time() == NaiveTime::MIN {
            Ok(date)
        } else {
            let time = strftime(dt.format(&self.config.time_format))?;
            Ok(format!("{date} {time}"))
        }
    }

    /// Quote a field when it contains the delimiter, the quote character or
    /// a line break; embedded quotes are doubled.
    fn escape(&self, s: &str) -> String {
        let q = self.config.quote;
        if s.contains(self.config.delimiter) || s.contains(q) || s.contains('\n') || s.contains('\r')
        {
            let doubled: String = [q, q].iter().collect();
            format!("{q}{}{q}", s.replace(q, &doubled))
        } else {
            s.to_string()
        }
    }
}

// chrono reports a bad pattern as a fmt::Error, which `to_string` turns
// into a panic.
fn strftime(formatted: impl Display) -> Result<String> {
    let mut text = String::new();
    write!(text, "{formatted}")
        .map_err(|_| Error::Render("invalid csv date or time format".into()))?;
    Ok(text)
}

async fn send(out: &mpsc::Sender<Vec<u8>>, chunk: String) -> Result<()> {
    out.send(chunk.into_bytes())
        .await
        .map_err(|_| Error::Render("csv output receiver dropped".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use chrono::NaiveDate;

    fn sample_rows() -> Vec<Row> {
        vec![
            Row::new()
                .with("name", "Amazon, Block A")
                .with("credits", 1250)
                .with("price", 12.5)
                .with("verified", true),
            Row::new()
                .with("name", "Say \"hi\"")
                .with("credits", Value::Null)
                .with("price", 0.1)
                .with("verified", false),
        ]
    }

    #[test]
    fn test_export_with_inferred_columns() {
        let out = CsvExporter::default().export(&sample_rows(), &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "name,credits,price,verified\r\n\
             \"Amazon, Block A\",1250,12.5,true\r\n\
             \"Say \"\"hi\"\"\",,0.1,false\r\n"
        );
    }

    #[test]
    fn test_export_with_labels_and_lf() {
        let exporter = CsvExporter::new(CsvConfig {
            use_crlf: false,
            null_value: "N/A".into(),
            ..Default::default()
        });
        let cols = vec![
            Column::labeled("credits", "Credits Issued"),
            Column::labeled("missing", "Missing"),
        ];
        let out = exporter.export(&sample_rows(), &cols).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Credits Issued,Missing\n1250,N/A\nN/A,N/A\n"
        );
    }

    #[test]
    fn test_custom_delimiter_and_quote() {
        let exporter = CsvExporter::new(CsvConfig {
            delimiter: ';',
            quote: '\'',
            include_header: false,
            use_crlf: false,
            ..Default::default()
        });
        let rows = vec![Row::new().with("a", "x;y").with("b", "it's").with("c", "a,b")];
        let out = exporter.export(&rows, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "'x;y';'it''s';a,b\n");
    }

    #[test]
    fn test_datetime_formatting() {
        let exporter = CsvExporter::default();
        let midnight = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let afternoon = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(14, 30, 5)
            .unwrap();
        assert_eq!(
            exporter.format_value(&Value::DateTime(midnight)).unwrap(),
            "2024-05-01"
        );
        assert_eq!(
            exporter.format_value(&Value::DateTime(afternoon)).unwrap(),
            "2024-05-01 14:30:05"
        );
        assert_eq!(
            exporter
                .format_value(&Value::Date(NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()))
                .unwrap(),
            "2023-12-31"
        );
    }

    #[test]
    fn test_float_shortest_repr() {
        let exporter = CsvExporter::default();
        let fmt = |x: f64| exporter.format_value(&Value::Float(x)).unwrap();
        assert_eq!(fmt(1.0), "1");
        assert_eq!(fmt(0.30000000000000004), "0.30000000000000004");
        assert_eq!(fmt(-2.75), "-2.75");
    }

    #[test]
    fn test_empty_input() {
        let exporter = CsvExporter::default();
        assert!(exporter.export(&[], &[]).unwrap().is_empty());
        let header_only = exporter.export(&[], &[Column::new("a")]).unwrap();
        assert_eq!(header_only, b"a\r\n");
    }

    fn numbered_rows(n: usize) -> Vec<Row> {
        (0..n)
            .map(|i| Row::new().with("id", i as i64).with("label", format!("row {i}")))
            .collect()
    }

    async fn run_stream(
        rows: Vec<Row>,
        columns: Vec<Column>,
    ) -> (Result<u64>, Vec<Vec<u8>>) {
        let (row_tx, row_rx) = mpsc::channel(64);
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let exporter = CsvExporter::default();
        let task = tokio::spawn(async move {
            exporter
                .export_stream(row_rx, columns, out_tx, CancelToken::never())
                .await
        });
        tokio::spawn(async move {
            for row in rows {
                if row_tx.send(row).await.is_err() {
                    break;
                }
            }
        });
        let mut chunks = Vec::new();
        while let Some(chunk) = out_rx.recv().await {
            chunks.push(chunk);
        }
        (task.await.unwrap(), chunks)
    }

    #[tokio::test]
    async fn test_stream_matches_batch_output() {
        let rows = numbered_rows(2500);
        let expected = CsvExporter::default().export(&rows, &[]).unwrap();

        let (res, chunks) = run_stream(rows, Vec::new()).await;
        assert_eq!(res.unwrap(), 2500);
        // header, 1000, 1000, 500
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), expected);
    }

    #[tokio::test]
    async fn test_stream_flushes_every_thousand_rows() {
        let rows = numbered_rows(2000);
        let (res, chunks) = run_stream(rows, vec![Column::new("id")]).await;
        assert_eq!(res.unwrap(), 2000);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], b"id\r\n");
        let lines = |c: &Vec<u8>| c.iter().filter(|b| **b == b'\n').count();
        assert_eq!(lines(&chunks[1]), 1000);
        assert_eq!(lines(&chunks[2]), 1000);
    }

    #[tokio::test]
    async fn test_stream_emits_declared_header_before_rows() {
        let (row_tx, row_rx) = mpsc::channel::<Row>(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let exporter = CsvExporter::default();
        let task = tokio::spawn(async move {
            exporter
                .export_stream(row_rx, vec![Column::new("a")], out_tx, CancelToken::never())
                .await
        });
        let header = out_rx.recv().await.unwrap();
        assert_eq!(header, b"a\r\n");
        drop(row_tx);
        assert_eq!(task.await.unwrap().unwrap(), 0);
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_cancellation() {
        let (row_tx, row_rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        let source = CancelSource::new();
        let exporter = CsvExporter::default();
        let token = source.token();
        let task = tokio::spawn(async move {
            exporter
                .export_stream(row_rx, Vec::new(), out_tx, token)
                .await
        });

        row_tx.send(Row::new().with("a", 1)).await.unwrap();
        // header chunk for the inferred columns
        assert_eq!(out_rx.recv().await.unwrap(), b"a\r\n");
        source.cancel();

        let res = task.await.unwrap();
        assert!(matches!(res, Err(Error::Cancelled)));
        // the buffered row is never sent
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_keyless_first_row_matches_batch_output() {
        let rows = vec![Row::new(), Row::new().with("a", 1)];
        let expected = CsvExporter::default().export(&rows, &[]).unwrap();
        assert_eq!(expected, b"\r\n\r\n");

        let (res, chunks) = run_stream(rows, Vec::new()).await;
        assert_eq!(res.unwrap(), 2);
        assert_eq!(chunks.concat(), expected);
    }

    #[test]
    fn test_bad_date_pattern_is_render_error() {
        let exporter = CsvExporter::new(CsvConfig {
            date_format: "%Y-%".into(),
            ..Default::default()
        });
        let rows = vec![Row::new().with("d", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())];
        assert!(matches!(exporter.export(&rows, &[]), Err(Error::Render(_))));

        // %z needs an offset, which a naive datetime never has
        let exporter = CsvExporter::new(CsvConfig {
            time_format: "%H:%M %z".into(),
            ..Default::default()
        });
        let dt = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 15, 0)
            .unwrap();
        assert!(matches!(
            exporter.format_value(&Value::DateTime(dt)),
            Err(Error::Render(_))
        ));
        let midnight = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            exporter.format_value(&Value::DateTime(midnight)).unwrap(),
            "2024-01-02"
        );
    }

    #[tokio::test]
    async fn test_stream_bad_date_pattern_is_render_error() {
        let (row_tx, row_rx) = mpsc::channel(4);
        let (out_tx, mut out_rx) = mpsc::channel(4);
        let exporter = CsvExporter::new(CsvConfig {
            date_format: "%Y-%".into(),
            ..Default::default()
        });
        let task = tokio::spawn(async move {
            exporter
                .export_stream(row_rx, Vec::new(), out_tx, CancelToken::never())
                .await
        });
        row_tx
            .send(Row::new().with("d", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()))
            .await
            .unwrap();
        drop(row_tx);

        assert!(matches!(task.await.unwrap(), Err(Error::Render(_))));
        assert_eq!(out_rx.recv().await.unwrap(), b"d\r\n");
        assert!(out_rx.recv().await.is_none());
    }

    /// Minimal RFC 4180 reader: quoted fields may hold the delimiter, line
    /// breaks and doubled quotes.
    fn parse_csv(text: &str, delimiter: char, quote: char) -> Vec<Vec<String>> {
        let mut records = Vec::new();
        let mut record = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quotes {
                if c == quote {
                    if chars.peek() == Some(&quote) {
                        field.push(quote);
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(c);
                }
            } else if c == quote {
                in_quotes = true;
            } else if c == delimiter {
                record.push(std::mem::take(&mut field));
            } else if c == '\r' && chars.peek() == Some(&'\n') {
                // CRLF terminator; the \n closes the record
            } else if c == '\n' {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            } else {
                field.push(c);
            }
        }
        assert!(!in_quotes, "unterminated quoted field");
        assert!(field.is_empty() && record.is_empty(), "missing final terminator");
        records
    }

    #[test]
    fn test_output_parses_back_to_cell_text() {
        let rows = vec![
            Row::new()
                .with("name", "Amazon, Block A")
                .with("notes", "line one\nline two")
                .with("credits", 1250)
                .with("price", 12.5)
                .with("verified", true),
            Row::new()
                .with("name", "Say \"hi\"")
                .with("notes", "crlf\r\ninside")
                .with("credits", -3)
                .with("price", 0.1)
                .with("verified", false),
            Row::new()
                .with("name", "\"\"")
                .with("notes", "")
                .with("credits", Value::Null)
                .with("price", 1e21)
                .with("verified", Value::Null),
        ];
        let expected = vec![
            vec!["name", "notes", "credits", "price", "verified"],
            vec!["Amazon, Block A", "line one\nline two", "1250", "12.5", "true"],
            vec!["Say \"hi\"", "crlf\r\ninside", "-3", "0.1", "false"],
            vec!["\"\"", "", "", "1000000000000000000000", ""],
        ];

        let out = CsvExporter::default().export(&rows, &[]).unwrap();
        let parsed = parse_csv(&String::from_utf8(out).unwrap(), ',', '"');
        assert_eq!(parsed, expected);

        let exporter = CsvExporter::new(CsvConfig {
            delimiter: '\t',
            quote: '\'',
            use_crlf: false,
            ..Default::default()
        });
        let out = exporter.export(&rows, &[]).unwrap();
        let parsed = parse_csv(&String::from_utf8(out).unwrap(), '\t', '\'');
        assert_eq!(parsed, expected);
    }
}
