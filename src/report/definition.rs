use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::ReportConfig;
use crate::error::{Error, Result};

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum whose
/// wire names are given explicitly.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::InvalidConfig(format!(
                        "unknown {}: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportCategory {
    Financial,
    Operational,
    Compliance,
    #[default]
    Custom,
}

string_enum!(ReportCategory {
    Financial => "financial",
    Operational => "operational",
    Compliance => "compliance",
    Custom => "custom",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Shared,
    Public,
}

string_enum!(Visibility {
    Private => "private",
    Shared => "shared",
    Public => "public",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Excel,
    Pdf,
    Json,
}

string_enum!(ExportFormat {
    Csv => "csv",
    Excel => "excel",
    Pdf => "pdf",
    Json => "json",
});

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Json => "json",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: ReportCategory,
    pub config: ReportConfig,
    pub created_by: Option<Uuid>,
    pub visibility: Visibility,
    pub version: i64,
    pub is_template: bool,
    pub based_on_template_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

// ── Executions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

string_enum!(ExecutionStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
    Failed => "failed",
});

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }

    /// pending -> processing -> completed | failed. A pending execution may
    /// also fail directly (cancelled before it started). Terminal states are
    /// final.
    pub fn can_transition_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }

    pub fn check_transition(self, next: ExecutionStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportExecution {
    pub id: Uuid,
    pub report_definition_id: Option<Uuid>,
    pub triggered_by: Option<Uuid>,
    pub status: ExecutionStatus,
    pub format: ExportFormat,
    pub record_count: Option<i64>,
    pub file_size_bytes: Option<i64>,
    pub file_key: Option<String>,
    pub error_message: Option<String>,
    pub triggered_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ── Schedules ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMethod {
    #[default]
    Email,
    S3,
    Webhook,
}

string_enum!(DeliveryMethod {
    Email => "email",
    S3 => "s3",
    Webhook => "webhook",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSchedule {
    pub id: Uuid,
    pub report_definition_id: Uuid,
    pub name: String,
    pub cron_expression: String,
    pub timezone: String,
    pub is_active: bool,
    pub format: ExportFormat,
    pub delivery_method: DeliveryMethod,
    pub recipient_emails: Vec<String>,
    pub webhook_url: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Dashboard widgets ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetType {
    Chart,
    Metric,
    Table,
    Gauge,
}

string_enum!(WidgetType {
    Chart => "chart",
    Metric => "metric",
    Table => "table",
    Gauge => "gauge",
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetSize {
    Small,
    #[default]
    Medium,
    Large,
    Full,
}

string_enum!(WidgetSize {
    Small => "small",
    Medium => "medium",
    Large => "large",
    Full => "full",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardWidget {
    /// Nil for a widget that has not been saved yet.
    #[serde(default)]
    pub id: Uuid,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub dashboard_section: String,
    pub widget_type: WidgetType,
    pub title: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub size: WidgetSize,
    #[serde(default)]
    pub position: i64,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_seconds: i64,
    #[serde(default = "default_visible")]
    pub is_visible: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_refresh_interval() -> i64 {
    300
}

fn default_visible() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_transitions() {
        use ExecutionStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Completed));
        assert!(matches!(
            Completed.check_transition(Failed),
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_string_enum_round_trip() {
        assert_eq!("excel".parse::<ExportFormat>().unwrap(), ExportFormat::Excel);
        assert_eq!(ExportFormat::Excel.extension(), "xlsx");
        assert_eq!(Visibility::Shared.to_string(), "shared");
        assert!("nope".parse::<ReportCategory>().is_err());
    }
}
