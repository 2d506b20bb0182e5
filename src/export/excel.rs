use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use rust_xlsxwriter::{
    Color, DocProperties, ExcelDateTime, Format, FormatAlign, FormatBorder, Workbook, Worksheet,
};
use serde::{Deserialize, Serialize};

use super::{resolve_columns, Column};
use crate::error::Result;
use crate::report::{Row, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderStyle {
    pub bold: bool,
    pub italic: bool,
    pub font_size: f64,
    /// 0xRRGGBB
    pub font_color: u32,
    pub fill_color: u32,
    pub center: bool,
    pub border: bool,
    pub border_color: u32,
}

impl Default for HeaderStyle {
    fn default() -> Self {
        Self {
            bold: true,
            italic: false,
            font_size: 11.0,
            font_color: 0xFFFFFF,
            fill_color: 0x4472C4,
            center: true,
            border: true,
            border_color: 0x000000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataStyle {
    pub border: bool,
    pub border_color: u32,
    /// Excel number format applied to numeric cells, e.g. `#,##0.00`.
    pub number_format: Option<String>,
}

impl Default for DataStyle {
    fn default() -> Self {
        Self {
            border: true,
            border_color: 0xD3D3D3,
            number_format: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcelConfig {
    pub sheet_name: String,
    pub include_header: bool,
    pub header_style: HeaderStyle,
    pub data_style: DataStyle,
    pub default_column_width: f64,
    /// Width overrides keyed by column key.
    pub column_widths: BTreeMap<String, f64>,
    pub auto_filter: bool,
    pub freeze_header: bool,
    pub date_format: String,
    pub datetime_format: String,
    /// Stamped into the workbook properties. Fixed so that output is
    /// reproducible.
    pub created_at: Option<NaiveDateTime>,
}

impl Default for ExcelConfig {
    fn default() -> Self {
        Self {
            sheet_name: "Report".into(),
            include_header: true,
            header_style: HeaderStyle::default(),
            data_style: DataStyle::default(),
            default_column_width: 15.0,
            column_widths: BTreeMap::new(),
            auto_filter: true,
            freeze_header: true,
            date_format: "yyyy-mm-dd".into(),
            datetime_format: "yyyy-mm-dd hh:mm:ss".into(),
            created_at: None,
        }
    }
}

/// One worksheet's worth of data for [`ExcelExporter::export_sheets`].
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

struct Formats {
    header: Format,
    text: Format,
    number: Format,
    date: Format,
    datetime: Format,
}

#[derive(Debug, Clone, Default)]
pub struct ExcelExporter {
    config: ExcelConfig,
}

impl ExcelExporter {
    pub fn new(config: ExcelConfig) -> Self {
        Self { config }
    }

    /// Single-sheet workbook named after `sheet_name`.
    pub fn export(&self, rows: &[Row], columns: &[Column]) -> Result<Vec<u8>> {
        let mut workbook = self.workbook()?;
        let formats = self.formats();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&self.config.sheet_name)?;
        self.write_sheet(worksheet, rows, columns, &formats)?;
        Ok(workbook.save_to_buffer()?)
    }

    /// Workbook with one sheet per entry, in the given order.
    pub fn export_sheets(&self, sheets: &[Sheet]) -> Result<Vec<u8>> {
        let mut workbook = self.workbook()?;
        let formats = self.formats();
        for sheet in sheets {
            let worksheet = workbook.add_worksheet();
            worksheet.set_name(&sheet.name)?;
            self.write_sheet(worksheet, &sheet.rows, &sheet.columns, &formats)?;
        }
        Ok(workbook.save_to_buffer()?)
    }

    fn workbook(&self) -> Result<Workbook> {
        let stamp = self.config.created_at.unwrap_or_else(|| {
            NaiveDate::from_ymd_opt(2000, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .unwrap_or_default()
        });
        let created = ExcelDateTime::from_ymd(
            stamp.year() as u16,
            stamp.month() as u8,
            stamp.day() as u8,
        )?
        .and_hms(stamp.hour() as u16, stamp.minute() as u8, stamp.second())?;

        let mut workbook = Workbook::new();
        let properties = DocProperties::new().set_creation_datetime(&created);
        workbook.set_properties(&properties);
        Ok(workbook)
    }

    fn formats(&self) -> Formats {
        let h = &self.config.header_style;
        let mut header = Format::new()
            .set_font_size(h.font_size)
            .set_font_color(Color::RGB(h.font_color))
            .set_background_color(Color::RGB(h.fill_color));
        if h.bold {
            header = header.set_bold();
        }
        if h.italic {
            header = header.set_italic();
        }
        if h.center {
            header = header.set_align(FormatAlign::Center);
        }
        if h.border {
            header = header
                .set_border(FormatBorder::Thin)
                .set_border_color(Color::RGB(h.border_color));
        }

        let d = &self.config.data_style;
        let mut base = Format::new();
        if d.border {
            base = base
                .set_border(FormatBorder::Thin)
                .set_border_color(Color::RGB(d.border_color));
        }
        let number = match d.number_format {
            Some(ref fmt) => base.clone().set_num_format(fmt),
            None => base.clone(),
        };

        Formats {
            header,
            date: base.clone().set_num_format(&self.config.date_format),
            datetime: base.clone().set_num_format(&self.config.datetime_format),
            number,
            text: base,
        }
    }

    fn write_sheet(
        &self,
        worksheet: &mut Worksheet,
        rows: &[Row],
        columns: &[Column],
        formats: &Formats,
    ) -> Result<()> {
        let columns = resolve_columns(columns, rows);
        if columns.is_empty() {
            return Ok(());
        }

        let mut row_idx: u32 = 0;
        if self.config.include_header {
            for (col, c) in columns.iter().enumerate() {
                worksheet.write_string_with_format(0, col as u16, &c.label, &formats.header)?;
            }
            row_idx = 1;
        }

        for row in rows {
            for (col, c) in columns.iter().enumerate() {
                let value = row.get(&c.key).unwrap_or(&Value::Null);
                write_cell(worksheet, row_idx, col as u16, value, formats)?;
            }
            row_idx += 1;
        }

        for (col, c) in columns.iter().enumerate() {
            let width = self
                .config
                .column_widths
                .get(&c.key)
                .copied()
                .unwrap_or(self.config.default_column_width);
            worksheet.set_column_width(col as u16, width)?;
        }

        if self.config.include_header {
            let last_col = (columns.len() - 1) as u16;
            if self.config.auto_filter && !rows.is_empty() {
                worksheet.autofilter(0, 0, rows.len() as u32, last_col)?;
            }
            if self.config.freeze_header {
                worksheet.set_freeze_panes(1, 0)?;
            }
        }
        Ok(())
    }
}

fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    value: &Value,
    formats: &Formats,
) -> Result<()> {
    match value {
        Value::Null => {
            worksheet.write_blank(row, col, &formats.text)?;
        }
        Value::Bool(b) => {
            worksheet.write_boolean_with_format(row, col, *b, &formats.text)?;
        }
        Value::Int(i) => {
            worksheet.write_number_with_format(row, col, *i as f64, &formats.number)?;
        }
        Value::Float(x) => {
            worksheet.write_number_with_format(row, col, *x, &formats.number)?;
        }
        Value::Text(s) => {
            worksheet.write_string_with_format(row, col, s, &formats.text)?;
        }
        Value::Date(d) => {
            let dt = ExcelDateTime::from_ymd(d.year() as u16, d.month() as u8, d.day() as u8)?;
            worksheet.write_datetime_with_format(row, col, &dt, &formats.date)?;
        }
        Value::DateTime(ndt) => {
            let dt = ExcelDateTime::from_ymd(
                ndt.year() as u16,
                ndt.month() as u8,
                ndt.day() as u8,
            )?
            .and_hms(ndt.hour() as u16, ndt.minute() as u8, ndt.second())?;
            worksheet.write_datetime_with_format(row, col, &dt, &formats.datetime)?;
        }
        Value::List(_) => {
            worksheet.write_string_with_format(row, col, value.to_string(), &formats.text)?;
        }
    }
    Ok(())
}
