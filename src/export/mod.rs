//! Export codecs turning result rows into CSV, XLSX and PDF bytes.
//!
//! Every codec writes rows in input order and produces identical bytes for
//! identical input and configuration.

pub mod csv;
pub mod excel;
pub mod pdf;

use serde::{Deserialize, Serialize};

use crate::report::{FieldConfig, Row};

pub use self::csv::{CsvConfig, CsvExporter};
pub use self::excel::{ExcelConfig, ExcelExporter, Sheet};
pub use self::pdf::{Orientation, PageSize, PdfConfig, PdfExporter, ReportSection};

/// One output column: the row key to read and the header label to print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub label: String,
}

impl Column {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
        }
    }

    pub fn labeled(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
        }
    }
}

/// Columns for a report's visible fields, ordered by `sort_order` then
/// declaration order.
pub fn columns_for_fields(fields: &[FieldConfig]) -> Vec<Column> {
    let mut visible: Vec<(usize, &FieldConfig)> =
        fields.iter().enumerate().filter(|(_, f)| !f.is_hidden).collect();
    visible.sort_by_key(|(idx, f)| (f.sort_order, *idx));
    visible
        .into_iter()
        .map(|(_, f)| Column::new(f.output_key()))
        .collect()
}

/// The declared columns, or, when none are declared, the first row's keys
/// in that row's insertion order.
pub(crate) fn resolve_columns(columns: &[Column], rows: &[Row]) -> Vec<Column> {
    if !columns.is_empty() {
        return columns.to_vec();
    }
    rows.first().map(infer_columns).unwrap_or_default()
}

pub(crate) fn infer_columns(row: &Row) -> Vec<Column> {
    row.keys().map(Column::new).collect()
}
