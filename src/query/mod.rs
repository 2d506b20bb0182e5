//! Report query compilation and the dataset catalog it is validated against.

pub mod catalog;
pub mod compiler;

use async_trait::async_trait;

use crate::error::Result;
use crate::report::{Row, Value};

pub use catalog::{dataset, datasets, validate, DatasetMetadata, FieldMetadata, FieldType};
pub use compiler::{compile, compile_count, CompiledQuery};

/// Upstream store that runs compiled queries.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    /// Runs a `SELECT COUNT(*)` query.
    async fn count(&self, sql: &str, args: &[Value]) -> Result<u64>;
}

/// Source that ignores the query and serves a fixed result set. Used for
/// offline exports of rows captured elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    rows: Vec<Row>,
}

impl StaticSource {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }
}

#[async_trait]
impl DataSource for StaticSource {
    async fn execute(&self, sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
        log::debug!("Serving {} fixed rows for: {sql}", self.rows.len());
        Ok(self.rows.clone())
    }

    async fn count(&self, _sql: &str, _args: &[Value]) -> Result<u64> {
        Ok(self.rows.len() as u64)
    }
}
