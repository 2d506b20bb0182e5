//! Report model: declarative query configuration, stored definitions and
//! the dynamic values that flow through compilation and export.

pub mod config;
pub mod definition;
pub mod value;

pub use config::{
    AggregateFunction, CalculationConfig, FieldConfig, FilterConfig, FilterLogic, FilterOperator,
    GroupConfig, ReportConfig, SortConfig, TimeGrain,
};
pub use definition::{
    DashboardWidget, DeliveryMethod, ExecutionStatus, ExportFormat, ReportCategory,
    ReportDefinition, ReportExecution, ReportSchedule, Visibility, WidgetSize, WidgetType,
};
pub use value::{Row, Value};
