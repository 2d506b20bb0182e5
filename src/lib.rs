pub mod benchmark;
pub mod cancel;
pub mod dashboard;
pub mod error;
pub mod export;
pub mod query;
pub mod report;
pub mod service;
pub mod settings;
pub mod storage;

pub use benchmark::{
    analyze_trend, compare, BenchmarkDataset, BenchmarkMetric, BenchmarkQuery, ComparisonResult,
    MetricsProvider, PeerProject, TrendAnalysis,
};
pub use cancel::{CancelSource, CancelToken};
pub use dashboard::{Aggregator, AggregatorConfig, DashboardSource, DashboardSummary};
pub use error::{Error, Result};
pub use export::{Column, CsvExporter, ExcelExporter, PdfExporter};
pub use query::{compile, compile_count, CompiledQuery, DataSource, StaticSource};
pub use report::{
    ExecutionStatus, ExportFormat, ReportConfig, ReportDefinition, ReportExecution, Row, Value,
};
pub use service::{ExecutionOutput, NewBenchmark, NewReport, NewSchedule, ReportService, ReportUpdate};
pub use settings::EngineSettings;
pub use storage::Database;
