//! Dashboard summaries assembled from many small upstream queries, cached
//! with per-entry TTLs.

pub mod aggregator;
pub mod cache;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub use aggregator::{timeseries_ttl, Aggregator, AggregatorConfig};
pub use cache::{CacheConfig, TtlCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricTrend {
    Up,
    Down,
    Stable,
}

/// Current and previous value of a metric over a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricData {
    pub current_value: f64,
    pub previous_value: f64,
    pub period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub value: f64,
    pub change: f64,
    pub change_percent: f64,
    pub period: String,
    /// Unset when there is no positive previous value to compare against.
    pub trend: Option<MetricTrend>,
}

impl MetricSummary {
    pub fn from_data(data: MetricData) -> Self {
        let mut summary = Self {
            value: data.current_value,
            change: 0.0,
            change_percent: 0.0,
            period: data.period,
            trend: None,
        };
        if data.previous_value > 0.0 {
            summary.change = data.current_value - data.previous_value;
            summary.change_percent = summary.change / data.previous_value * 100.0;
            summary.trend = Some(if summary.change_percent > 5.0 {
                MetricTrend::Up
            } else if summary.change_percent < -5.0 {
                MetricTrend::Down
            } else {
                MetricTrend::Stable
            });
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub user_id: Option<Uuid>,
    #[serde(default)]
    pub entity_id: Option<Uuid>,
    #[serde(default)]
    pub entity_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSummary {
    pub total_projects: u64,
    pub total_credits: f64,
    pub total_revenue: f64,
    pub active_monitoring_areas: u64,
    pub recent_activity: Vec<ActivityItem>,
    pub performance_metrics: BTreeMap<String, MetricSummary>,
    #[serde(default)]
    pub time_series_data: BTreeMap<String, Vec<TimeSeriesPoint>>,
    pub cached_at: DateTime<Utc>,
}

impl DashboardSummary {
    pub fn empty(cached_at: DateTime<Utc>) -> Self {
        Self {
            total_projects: 0,
            total_credits: 0.0,
            total_revenue: 0.0,
            active_monitoring_areas: 0,
            recent_activity: Vec::new(),
            performance_metrics: BTreeMap::new(),
            time_series_data: BTreeMap::new(),
            cached_at,
        }
    }
}

/// Upstream queries behind a dashboard. `user` scopes a query to one
/// owner; `None` means portfolio-wide.
#[async_trait]
pub trait DashboardSource: Send + Sync {
    async fn project_count(&self, user: Option<Uuid>) -> Result<u64>;

    async fn total_credits(&self, user: Option<Uuid>) -> Result<f64>;

    async fn total_revenue(&self, user: Option<Uuid>) -> Result<f64>;

    async fn active_monitoring_areas(&self, user: Option<Uuid>) -> Result<u64>;

    async fn recent_activity(&self, user: Option<Uuid>, limit: usize) -> Result<Vec<ActivityItem>>;

    async fn metric_value(&self, metric: &str, period: &str) -> Result<MetricData>;

    async fn time_series(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &str,
    ) -> Result<Vec<TimeSeriesPoint>>;
}
