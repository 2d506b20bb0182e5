use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use super::stats::{peer_percentile, percentile_rank};
use super::{
    BenchmarkDataset, BenchmarkMetric, BenchmarkQuery, BenchmarkRepository, ComparisonResult,
    GapAnalysisItem, Impact, MetricComparison, MetricsProvider, PerformanceLevel, Priority,
};
use crate::error::{Error, Result};

const HIGH_IMPACT_METRICS: [&str; 4] = [
    "carbon_sequestration_rate",
    "total_credits_issued",
    "revenue_per_hectare",
    "verification_success_rate",
];

const RECOMMENDATIONS: [(&str, &str); 6] = [
    (
        "carbon_sequestration_rate",
        "Consider implementing enhanced forest management practices, optimizing species composition, or improving soil management techniques.",
    ),
    (
        "total_credits_issued",
        "Focus on increasing monitoring coverage and documentation quality to maximize credit issuance potential.",
    ),
    (
        "revenue_per_hectare",
        "Explore premium certification programs, direct buyer relationships, or bundled credit offerings to improve revenue.",
    ),
    (
        "verification_success_rate",
        "Review documentation processes, ensure alignment with methodology requirements, and consider third-party pre-verification.",
    ),
    (
        "monitoring_coverage",
        "Deploy additional IoT sensors, increase satellite imagery frequency, or implement drone-based monitoring.",
    ),
    (
        "biomass_growth_rate",
        "Evaluate current species selection, soil amendments, and silvicultural practices for optimization opportunities.",
    ),
];

/// Compare project metrics against a benchmark dataset.
///
/// Only metrics present in both the project and the benchmark are compared,
/// in benchmark order.
pub fn compare(
    project_id: Uuid,
    project_metrics: &BTreeMap<String, f64>,
    dataset: &BenchmarkDataset,
) -> ComparisonResult {
    let mut comparisons = Vec::new();
    let mut percentile_ranks = BTreeMap::new();
    let mut gap_analysis = Vec::new();

    for bm in &dataset.metrics {
        let Some(&value) = project_metrics.get(&bm.metric) else {
            continue;
        };
        let comparison = compare_metric(value, bm);
        percentile_ranks.insert(bm.metric.clone(), percentile_rank(value, bm));
        if comparison.performance_level == PerformanceLevel::Below {
            gap_analysis.push(analyze_gap(value, bm));
        }
        comparisons.push(comparison);
    }

    let overall_score = if percentile_ranks.is_empty() {
        0.0
    } else {
        percentile_ranks.values().sum::<f64>() / percentile_ranks.len() as f64
    };

    let summary = summarize(&comparisons, &gap_analysis, overall_score);

    ComparisonResult {
        project_id,
        benchmark_id: Some(dataset.id),
        project_metrics: project_metrics.clone(),
        comparisons,
        percentile_ranks,
        gap_analysis,
        overall_score,
        performance_rank: rank_label(overall_score).to_string(),
        summary,
    }
}

pub fn performance_level(value: f64, bm: &BenchmarkMetric) -> PerformanceLevel {
    if value >= bm.p75 {
        PerformanceLevel::Excellent
    } else if value >= bm.p50 {
        PerformanceLevel::Above
    } else if value >= bm.p25 {
        PerformanceLevel::At
    } else {
        PerformanceLevel::Below
    }
}

fn compare_metric(value: f64, bm: &BenchmarkMetric) -> MetricComparison {
    let difference = value - bm.p50;
    let difference_percent = if bm.p50 != 0.0 {
        difference / bm.p50 * 100.0
    } else {
        0.0
    };
    MetricComparison {
        metric: bm.metric.clone(),
        project_value: value,
        benchmark_median: bm.p50,
        benchmark_p25: bm.p25,
        benchmark_p75: bm.p75,
        difference,
        difference_percent,
        performance_level: performance_level(value, bm),
        unit: bm.unit.clone(),
    }
}

fn analyze_gap(value: f64, bm: &BenchmarkMetric) -> GapAnalysisItem {
    let target = bm.p50;
    let gap = target - value;
    let gap_percent = if target != 0.0 {
        gap / target * 100.0
    } else {
        0.0
    };

    let priority = if gap_percent > 30.0 {
        Priority::High
    } else if gap_percent > 15.0 {
        Priority::Medium
    } else {
        Priority::Low
    };

    let impact = if HIGH_IMPACT_METRICS.contains(&bm.metric.as_str()) {
        Impact::High
    } else {
        Impact::Medium
    };

    GapAnalysisItem {
        metric: bm.metric.clone(),
        current_value: value,
        target_value: target,
        gap,
        gap_percent,
        priority,
        impact,
        recommendation: recommendation(&bm.metric, gap_percent),
    }
}

pub fn recommendation(metric: &str, gap_percent: f64) -> String {
    RECOMMENDATIONS
        .iter()
        .find(|(m, _)| *m == metric)
        .map(|(_, text)| text.to_string())
        .unwrap_or_else(|| {
            format!(
                "Review current practices for {metric} and consult with technical advisors \
                 for improvement strategies. Gap: {gap_percent:.1}%"
            )
        })
}

pub fn rank_label(score: f64) -> &'static str {
    if score >= 90.0 {
        "Top Performer"
    } else if score >= 75.0 {
        "Above Average"
    } else if score >= 50.0 {
        "Average"
    } else if score >= 25.0 {
        "Below Average"
    } else {
        "Needs Improvement"
    }
}

fn summarize(comparisons: &[MetricComparison], gaps: &[GapAnalysisItem], score: f64) -> String {
    let count = |level: PerformanceLevel| {
        comparisons
            .iter()
            .filter(|c| c.performance_level == level)
            .count()
    };
    let excellent = count(PerformanceLevel::Excellent);
    let above = count(PerformanceLevel::Above);
    let below = count(PerformanceLevel::Below);
    let high_priority = gaps.iter().filter(|g| g.priority == Priority::High).count();

    let mut summary = format!("Overall performance score: {score:.1}%. ");
    if excellent > 0 {
        summary.push_str(&format!("{excellent} metrics in top quartile. "));
    }
    if above > 0 {
        summary.push_str(&format!("{above} metrics above median. "));
    }
    if below > 0 {
        summary.push_str(&format!("{below} metrics require attention. "));
    }
    if high_priority > 0 {
        summary.push_str(&format!(
            "{high_priority} high-priority improvement areas identified."
        ));
    }
    summary
}

// ── Comparator service ─────────────────────────────────────────────

/// Fetches project metrics and benchmark data, then runs [`compare`].
pub struct Comparator {
    benchmarks: Arc<dyn BenchmarkRepository>,
    metrics: Arc<dyn MetricsProvider>,
}

impl Comparator {
    pub fn new(benchmarks: Arc<dyn BenchmarkRepository>, metrics: Arc<dyn MetricsProvider>) -> Self {
        Self {
            benchmarks,
            metrics,
        }
    }

    /// Fails fast: a missing benchmark or a metrics fetch error aborts the
    /// comparison.
    pub async fn compare(&self, project_id: Uuid, query: &BenchmarkQuery) -> Result<ComparisonResult> {
        let project_metrics = self.metrics.project_metrics(project_id).await?;
        let dataset = self
            .benchmarks
            .find_benchmark(query)
            .await?
            .ok_or_else(|| Error::BenchmarkNotFound(query.to_string()))?;
        log::debug!(
            "comparing project {project_id} against benchmark {} ({} metrics)",
            dataset.name,
            dataset.metrics.len()
        );
        Ok(compare(project_id, &project_metrics, &dataset))
    }

    /// Percentile of `project_id` for `metric` among its peer group.
    pub async fn peer_percentile(
        &self,
        project_id: Uuid,
        metric: &str,
        methodology: &str,
        region: &str,
    ) -> Result<f64> {
        let peers = self.metrics.peer_group(methodology, region).await?;

        let mut values = Vec::with_capacity(peers.len());
        let mut project_value = None;
        for peer in &peers {
            if let Some(&v) = peer.metrics.get(metric) {
                values.push(v);
                if peer.project_id == project_id {
                    project_value = Some(v);
                }
            }
        }

        match project_value {
            Some(v) if !values.is_empty() => Ok(peer_percentile(v, &values)),
            _ => Err(Error::NotFound(format!(
                "metric {metric} for project {project_id} in peer group"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::PeerProject;
    use async_trait::async_trait;
    use chrono::Utc;

    fn bm(metric: &str) -> BenchmarkMetric {
        BenchmarkMetric {
            metric: metric.into(),
            value: 20.0,
            unit: "t/ha".into(),
            p25: 10.0,
            p50: 20.0,
            p75: 30.0,
            p90: 40.0,
            min: 0.0,
            max: 50.0,
            sample_size: 40,
        }
    }

    fn dataset(metrics: Vec<BenchmarkMetric>) -> BenchmarkDataset {
        BenchmarkDataset {
            id: Uuid::nil(),
            name: "Reforestation 2024".into(),
            description: None,
            category: "reforestation".into(),
            methodology: None,
            region: None,
            year: 2024,
            source: None,
            confidence_score: None,
            is_active: true,
            metrics,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn metrics(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_performance_level_boundaries() {
        let b = bm("m");
        assert_eq!(performance_level(30.0, &b), PerformanceLevel::Excellent);
        assert_eq!(performance_level(29.0, &b), PerformanceLevel::Above);
        assert_eq!(performance_level(20.0, &b), PerformanceLevel::Above);
        assert_eq!(performance_level(19.9, &b), PerformanceLevel::At);
        assert_eq!(performance_level(10.0, &b), PerformanceLevel::At);
        assert_eq!(performance_level(9.9, &b), PerformanceLevel::Below);
    }

    #[test]
    fn test_compare_single_metric_above_median() {
        let ds = dataset(vec![bm("carbon_sequestration_rate")]);
        let result = compare(
            Uuid::nil(),
            &metrics(&[("carbon_sequestration_rate", 25.0)]),
            &ds,
        );
        let c = &result.comparisons[0];
        assert_eq!(c.performance_level, PerformanceLevel::Above);
        assert_eq!(c.difference, 5.0);
        assert_eq!(c.difference_percent, 25.0);
        let rank = result.percentile_ranks["carbon_sequestration_rate"];
        assert!((rank - 62.5).abs() < 1e-9);
        assert!(result.gap_analysis.is_empty());
        assert_eq!(result.performance_rank, "Average");
    }

    #[test]
    fn test_gap_analysis_priority_and_impact() {
        let ds = dataset(vec![bm("carbon_sequestration_rate"), bm("soil_depth")]);
        let result = compare(
            Uuid::nil(),
            &metrics(&[("carbon_sequestration_rate", 5.0), ("soil_depth", 9.0)]),
            &ds,
        );
        assert_eq!(result.gap_analysis.len(), 2);

        let first = &result.gap_analysis[0];
        assert_eq!(first.target_value, 20.0);
        assert_eq!(first.gap, 15.0);
        assert_eq!(first.gap_percent, 75.0);
        assert_eq!(first.priority, Priority::High);
        assert_eq!(first.impact, Impact::High);
        assert!(first.recommendation.starts_with("Consider implementing"));

        let second = &result.gap_analysis[1];
        assert_eq!(second.impact, Impact::Medium);
        assert_eq!(second.priority, Priority::High);
        assert_eq!(
            second.recommendation,
            "Review current practices for soil_depth and consult with technical advisors \
             for improvement strategies. Gap: 55.0%"
        );
    }

    #[test]
    fn test_gap_priority_thresholds() {
        let mut b = bm("x");
        b.p25 = 100.0;
        b.p50 = 100.0;
        b.max = 200.0;
        assert_eq!(analyze_gap(69.0, &b).priority, Priority::High);
        assert_eq!(analyze_gap(70.0, &b).priority, Priority::Medium);
        assert_eq!(analyze_gap(85.0, &b).priority, Priority::Low);
    }

    #[test]
    fn test_zero_median_difference_percent() {
        let mut b = bm("x");
        b.p25 = 0.0;
        b.p50 = 0.0;
        let c = compare_metric(3.0, &b);
        assert_eq!(c.difference_percent, 0.0);
    }

    #[test]
    fn test_rank_labels() {
        assert_eq!(rank_label(95.0), "Top Performer");
        assert_eq!(rank_label(90.0), "Top Performer");
        assert_eq!(rank_label(75.0), "Above Average");
        assert_eq!(rank_label(50.0), "Average");
        assert_eq!(rank_label(25.0), "Below Average");
        assert_eq!(rank_label(24.9), "Needs Improvement");
    }

    #[test]
    fn test_no_overlap_scores_zero() {
        let ds = dataset(vec![bm("a")]);
        let result = compare(Uuid::nil(), &metrics(&[("b", 1.0)]), &ds);
        assert!(result.comparisons.is_empty());
        assert_eq!(result.overall_score, 0.0);
        assert_eq!(result.performance_rank, "Needs Improvement");
        assert_eq!(result.summary, "Overall performance score: 0.0%. ");
    }

    #[test]
    fn test_summary_text() {
        let ds = dataset(vec![bm("a"), bm("b"), bm("total_credits_issued")]);
        let result = compare(
            Uuid::nil(),
            &metrics(&[("a", 35.0), ("b", 22.0), ("total_credits_issued", 2.0)]),
            &ds,
        );
        assert!(result.summary.contains("1 metrics in top quartile. "));
        assert!(result.summary.contains("1 metrics above median. "));
        assert!(result.summary.contains("1 metrics require attention. "));
        assert!(result
            .summary
            .ends_with("1 high-priority improvement areas identified."));
    }

    struct FixedMetrics {
        project: BTreeMap<String, f64>,
        peers: Vec<PeerProject>,
    }

    #[async_trait]
    impl MetricsProvider for FixedMetrics {
        async fn project_metrics(&self, _project_id: Uuid) -> Result<BTreeMap<String, f64>> {
            Ok(self.project.clone())
        }

        async fn peer_group(&self, _methodology: &str, _region: &str) -> Result<Vec<PeerProject>> {
            Ok(self.peers.clone())
        }
    }

    struct FixedBenchmarks(Option<BenchmarkDataset>);

    #[async_trait]
    impl BenchmarkRepository for FixedBenchmarks {
        async fn find_benchmark(&self, _query: &BenchmarkQuery) -> Result<Option<BenchmarkDataset>> {
            Ok(self.0.clone())
        }
    }

    fn peer(id: u128, value: f64) -> PeerProject {
        PeerProject {
            project_id: Uuid::from_u128(id),
            metrics: metrics(&[("revenue_per_hectare", value)]),
            methodology: None,
            region: None,
        }
    }

    #[tokio::test]
    async fn test_comparator_missing_benchmark() {
        let comparator = Comparator::new(
            Arc::new(FixedBenchmarks(None)),
            Arc::new(FixedMetrics {
                project: metrics(&[("a", 1.0)]),
                peers: vec![],
            }),
        );
        let query = BenchmarkQuery {
            category: "reforestation".into(),
            ..Default::default()
        };
        let err = comparator.compare(Uuid::nil(), &query).await.unwrap_err();
        assert!(matches!(err, Error::BenchmarkNotFound(_)));
    }

    #[tokio::test]
    async fn test_comparator_compares_fetched_data() {
        let comparator = Comparator::new(
            Arc::new(FixedBenchmarks(Some(dataset(vec![bm("a")])))),
            Arc::new(FixedMetrics {
                project: metrics(&[("a", 30.0)]),
                peers: vec![],
            }),
        );
        let result = comparator
            .compare(Uuid::from_u128(7), &BenchmarkQuery::default())
            .await
            .unwrap();
        assert_eq!(result.project_id, Uuid::from_u128(7));
        assert_eq!(result.percentile_ranks["a"], 75.0);
    }

    #[tokio::test]
    async fn test_peer_percentile_lookup() {
        let comparator = Comparator::new(
            Arc::new(FixedBenchmarks(None)),
            Arc::new(FixedMetrics {
                project: BTreeMap::new(),
                peers: vec![peer(1, 10.0), peer(2, 30.0), peer(3, 20.0), peer(4, 40.0)],
            }),
        );
        let pct = comparator
            .peer_percentile(Uuid::from_u128(2), "revenue_per_hectare", "VM0047", "LATAM")
            .await
            .unwrap();
        assert_eq!(pct, 75.0);

        let missing = comparator
            .peer_percentile(Uuid::from_u128(99), "revenue_per_hectare", "VM0047", "LATAM")
            .await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        let no_metric = comparator
            .peer_percentile(Uuid::from_u128(1), "nope", "VM0047", "LATAM")
            .await;
        assert!(no_metric.is_err());
    }
}
