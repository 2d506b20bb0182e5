use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinSet;
use uuid::Uuid;

use super::cache::{CacheConfig, Sweeper, TtlCache};
use super::{ActivityItem, DashboardSource, DashboardSummary, MetricSummary, TimeSeriesPoint};
use crate::error::Result;

const GLOBAL_SUMMARY_KEY: &str = "dashboard_summary";

/// Metrics summarised on every dashboard.
pub const DEFAULT_METRICS: &[&str] = &[
    "credits_issued",
    "revenue",
    "verification_rate",
    "monitoring_coverage",
];

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub cache: CacheConfig,
    pub summary_ttl: Duration,
    /// TTL for time series whose window ends within the last 24 hours.
    pub recent_ttl: Duration,
    pub historical_ttl: Duration,
    pub activity_limit: usize,
    pub metrics: Vec<String>,
    pub metric_period: String,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            summary_ttl: Duration::from_secs(5 * 60),
            recent_ttl: Duration::from_secs(5 * 60),
            historical_ttl: Duration::from_secs(60 * 60),
            activity_limit: 10,
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
            metric_period: "30d".into(),
        }
    }
}

#[derive(Clone)]
enum Cached {
    Summary(Arc<DashboardSummary>),
    Series(Arc<Vec<TimeSeriesPoint>>),
}

/// Result of one fan-out query, merged by the task that spawned it.
enum SummaryPart {
    Projects(u64),
    Credits(f64),
    Revenue(f64),
    Areas(u64),
    Activity(Vec<ActivityItem>),
    Metric(String, MetricSummary),
}

pub struct Aggregator {
    source: Arc<dyn DashboardSource>,
    cache: Arc<TtlCache<Cached>>,
    config: AggregatorConfig,
}

impl Aggregator {
    pub fn new(source: Arc<dyn DashboardSource>, config: AggregatorConfig) -> Self {
        Self {
            source,
            cache: Arc::new(TtlCache::new(config.cache)),
            config,
        }
    }

    /// Start the periodic cache sweep. Call [`Sweeper::shutdown`] on exit.
    pub fn start_sweeper(&self) -> Sweeper {
        self.cache.spawn_sweeper()
    }

    pub async fn get_summary(&self, user: Option<Uuid>) -> Result<Arc<DashboardSummary>> {
        let key = summary_key(user);
        if let Some(Cached::Summary(summary)) = self.cache.get(&key) {
            return Ok(summary);
        }

        let summary = Arc::new(self.build_summary(user).await);
        self.cache.set(
            key,
            Cached::Summary(Arc::clone(&summary)),
            self.config.summary_ttl,
        );
        Ok(summary)
    }

    async fn build_summary(&self, user: Option<Uuid>) -> DashboardSummary {
        let mut tasks: JoinSet<(String, Result<SummaryPart>)> = JoinSet::new();

        let source = Arc::clone(&self.source);
        tasks.spawn(async move {
            let r = source.project_count(user).await.map(SummaryPart::Projects);
            ("project_count".to_string(), r)
        });
        let source = Arc::clone(&self.source);
        tasks.spawn(async move {
            let r = source.total_credits(user).await.map(SummaryPart::Credits);
            ("total_credits".to_string(), r)
        });
        let source = Arc::clone(&self.source);
        tasks.spawn(async move {
            let r = source.total_revenue(user).await.map(SummaryPart::Revenue);
            ("total_revenue".to_string(), r)
        });
        let source = Arc::clone(&self.source);
        tasks.spawn(async move {
            let r = source
                .active_monitoring_areas(user)
                .await
                .map(SummaryPart::Areas);
            ("active_monitoring_areas".to_string(), r)
        });
        let source = Arc::clone(&self.source);
        let limit = self.config.activity_limit;
        tasks.spawn(async move {
            let r = source
                .recent_activity(user, limit)
                .await
                .map(SummaryPart::Activity);
            ("recent_activity".to_string(), r)
        });
        for metric in &self.config.metrics {
            let source = Arc::clone(&self.source);
            let metric = metric.clone();
            let period = self.config.metric_period.clone();
            tasks.spawn(async move {
                let r = source
                    .metric_value(&metric, &period)
                    .await
                    .map(|data| SummaryPart::Metric(metric.clone(), MetricSummary::from_data(data)));
                (format!("metric {metric}"), r)
            });
        }

        let mut summary = DashboardSummary::empty(Utc::now());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(part))) => merge(&mut summary, part),
                Ok((name, Err(e))) => log::warn!("Dashboard query {name} failed: {e}"),
                Err(e) => log::warn!("Dashboard query task failed: {e}"),
            }
        }
        summary
    }

    /// Time series for `metric`, cached for a shorter time when the window
    /// reaches into the last day.
    pub async fn get_time_series(
        &self,
        metric: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        interval: &str,
    ) -> Result<Arc<Vec<TimeSeriesPoint>>> {
        let key = format!(
            "timeseries_{metric}_{interval}_{}_{}",
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        );
        if let Some(Cached::Series(points)) = self.cache.get(&key) {
            return Ok(points);
        }

        let points = Arc::new(self.source.time_series(metric, start, end, interval).await?);
        let ttl = timeseries_ttl(end, Utc::now(), &self.config);
        self.cache.set(key, Cached::Series(Arc::clone(&points)), ttl);
        Ok(points)
    }

    pub fn invalidate_user(&self, user: Uuid) {
        self.cache.delete(&summary_key(Some(user)));
    }

    /// Drop everything cached and rebuild the portfolio-wide summary.
    pub async fn refresh(&self) -> Result<Arc<DashboardSummary>> {
        self.cache.clear();
        self.get_summary(None).await
    }
}

fn summary_key(user: Option<Uuid>) -> String {
    match user {
        Some(id) => format!("{GLOBAL_SUMMARY_KEY}_{id}"),
        None => GLOBAL_SUMMARY_KEY.to_string(),
    }
}

fn merge(summary: &mut DashboardSummary, part: SummaryPart) {
    match part {
        SummaryPart::Projects(n) => summary.total_projects = n,
        SummaryPart::Credits(v) => summary.total_credits = v,
        SummaryPart::Revenue(v) => summary.total_revenue = v,
        SummaryPart::Areas(n) => summary.active_monitoring_areas = n,
        SummaryPart::Activity(items) => summary.recent_activity = items,
        SummaryPart::Metric(name, m) => {
            summary.performance_metrics.insert(name, m);
        }
    }
}

/// Recent TTL when `end` falls after `now - 24h`, historical TTL otherwise.
pub fn timeseries_ttl(end: DateTime<Utc>, now: DateTime<Utc>, config: &AggregatorConfig) -> Duration {
    if end > now - chrono::Duration::hours(24) {
        config.recent_ttl
    } else {
        config.historical_ttl
    }
}
