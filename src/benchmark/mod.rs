//! Benchmark comparison: how a project's metrics sit against percentile
//! baselines for its category, methodology and region.

pub mod comparator;
pub mod stats;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub use comparator::{compare, Comparator};
pub use stats::{analyze_trend, peer_percentile, percentile_rank, TrendAnalysis, TrendDirection};

/// Distribution of one metric across a benchmark sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetric {
    pub metric: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(alias = "percentile_25")]
    pub p25: f64,
    #[serde(alias = "percentile_50")]
    pub p50: f64,
    #[serde(alias = "percentile_75")]
    pub p75: f64,
    #[serde(alias = "percentile_90")]
    pub p90: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub sample_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkDataset {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub methodology: Option<String>,
    pub region: Option<String>,
    pub year: i32,
    pub source: Option<String>,
    pub confidence_score: Option<f64>,
    pub is_active: bool,
    pub metrics: Vec<BenchmarkMetric>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lookup key for a benchmark. Empty methodology/region and a zero year
/// match any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkQuery {
    pub category: String,
    #[serde(default)]
    pub methodology: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
}

impl std::fmt::Display for BenchmarkQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "category={}", self.category)?;
        if let Some(ref m) = self.methodology {
            write!(f, " methodology={m}")?;
        }
        if let Some(ref r) = self.region {
            write!(f, " region={r}")?;
        }
        if let Some(y) = self.year {
            write!(f, " year={y}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceLevel {
    Excellent,
    Above,
    At,
    Below,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricComparison {
    pub metric: String,
    pub project_value: f64,
    pub benchmark_median: f64,
    pub benchmark_p25: f64,
    pub benchmark_p75: f64,
    pub difference: f64,
    pub difference_percent: f64,
    pub performance_level: PerformanceLevel,
    pub unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapAnalysisItem {
    pub metric: String,
    pub current_value: f64,
    pub target_value: f64,
    pub gap: f64,
    pub gap_percent: f64,
    pub priority: Priority,
    pub impact: Impact,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub project_id: Uuid,
    pub benchmark_id: Option<Uuid>,
    pub project_metrics: BTreeMap<String, f64>,
    pub comparisons: Vec<MetricComparison>,
    pub percentile_ranks: BTreeMap<String, f64>,
    pub gap_analysis: Vec<GapAnalysisItem>,
    pub overall_score: f64,
    pub performance_rank: String,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerProject {
    pub project_id: Uuid,
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub methodology: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Source of live project metrics.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn project_metrics(&self, project_id: Uuid) -> Result<BTreeMap<String, f64>>;

    async fn peer_group(&self, methodology: &str, region: &str) -> Result<Vec<PeerProject>>;
}

/// Source of benchmark datasets.
#[async_trait]
pub trait BenchmarkRepository: Send + Sync {
    /// Most recent active dataset matching the query, if any.
    async fn find_benchmark(&self, query: &BenchmarkQuery) -> Result<Option<BenchmarkDataset>>;
}
