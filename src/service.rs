//! Report lifecycle orchestration over the SQLite store, a [`DataSource`]
//! and the export codecs.

use std::sync::{Arc, LazyLock};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::benchmark::{
    BenchmarkDataset, BenchmarkMetric, BenchmarkQuery, Comparator, ComparisonResult,
    MetricsProvider,
};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::export::{
    columns_for_fields, Column, CsvExporter, ExcelConfig, ExcelExporter, PdfConfig, PdfExporter,
};
use crate::query::{self, CompiledQuery, DataSource, DatasetMetadata};
use crate::report::{
    DashboardWidget, DeliveryMethod, ExecutionStatus, ExportFormat, ReportCategory, ReportConfig,
    ReportDefinition, ReportExecution, ReportSchedule, Row, Value, Visibility,
};
use crate::settings::EngineSettings;
use crate::storage::repository;
use crate::storage::{BenchmarkFilter, Database, ExecutionFilter, Page, ReportFilter};

static CRON_FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z*/,\-?]+$").unwrap());

const CANCELLED_BY_USER: &str = "Cancelled by user";

// ── Requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NewReport {
    pub name: String,
    pub description: Option<String>,
    pub category: ReportCategory,
    pub config: ReportConfig,
    pub created_by: Option<Uuid>,
    pub visibility: Visibility,
    pub is_template: bool,
}

/// Partial update; unset fields keep their stored value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<ReportCategory>,
    pub config: Option<ReportConfig>,
    pub visibility: Option<Visibility>,
    pub is_template: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSchedule {
    pub report_definition_id: Uuid,
    pub name: String,
    pub cron_expression: String,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default)]
    pub delivery_method: DeliveryMethod,
    #[serde(default)]
    pub recipient_emails: Vec<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBenchmark {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    #[serde(default)]
    pub methodology: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    pub year: i32,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub metrics: Vec<BenchmarkMetric>,
}

fn default_true() -> bool {
    true
}

/// A finished execution and the rendered report bytes.
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub execution: ReportExecution,
    pub data: Vec<u8>,
}

// ── Service ────────────────────────────────────────────────────────

pub struct ReportService {
    db: Database,
    source: Arc<dyn DataSource>,
    metrics: Arc<dyn MetricsProvider>,
}

impl ReportService {
    pub fn new(db: Database, source: Arc<dyn DataSource>, metrics: Arc<dyn MetricsProvider>) -> Self {
        Self {
            db,
            source,
            metrics,
        }
    }

    /// Access the database (for direct queries in the CLI).
    pub fn db(&self) -> &Database {
        &self.db
    }

    // ── Report definitions ─────────────────────────────────────────

    pub async fn create_report(&self, req: NewReport) -> Result<ReportDefinition> {
        if req.name.trim().is_empty() {
            return Err(Error::InvalidConfig("report name is required".into()));
        }
        query::validate(&req.config)?;

        let now = Utc::now();
        let report = ReportDefinition {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            category: req.category,
            config: req.config,
            created_by: req.created_by,
            visibility: req.visibility,
            version: 1,
            is_template: req.is_template,
            based_on_template_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.db
            .writer()
            .call({
                let report = report.clone();
                move |conn| repository::insert_report(conn, &report)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        log::info!("Created report {} ({})", report.id, report.name);
        Ok(report)
    }

    pub async fn get_report(&self, id: Uuid) -> Result<ReportDefinition> {
        self.db
            .reader()
            .call(move |conn| repository::get_report(conn, &id))
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("report {id}")))
    }

    /// Apply `update` and bump the version.
    pub async fn update_report(&self, id: Uuid, update: ReportUpdate) -> Result<ReportDefinition> {
        let mut report = self.get_report(id).await?;
        if let Some(ref config) = update.config {
            query::validate(config)?;
        }
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(Error::InvalidConfig("report name is required".into()));
            }
            report.name = name;
        }
        if update.description.is_some() {
            report.description = update.description;
        }
        if let Some(category) = update.category {
            report.category = category;
        }
        if let Some(config) = update.config {
            report.config = config;
        }
        if let Some(visibility) = update.visibility {
            report.visibility = visibility;
        }
        if let Some(is_template) = update.is_template {
            report.is_template = is_template;
        }
        report.version += 1;
        report.updated_at = Utc::now();

        let updated = self
            .db
            .writer()
            .call({
                let report = report.clone();
                move |conn| repository::update_report(conn, &report)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !updated {
            return Err(Error::NotFound(format!("report {id}")));
        }
        Ok(report)
    }

    /// Soft delete. The row stays for execution history but is no longer
    /// visible.
    pub async fn delete_report(&self, id: Uuid) -> Result<()> {
        let now = Utc::now();
        let deleted = self
            .db
            .writer()
            .call(move |conn| repository::soft_delete_report(conn, &id, &now))
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !deleted {
            return Err(Error::NotFound(format!("report {id}")));
        }
        log::info!("Deleted report {id}");
        Ok(())
    }

    pub async fn list_reports(&self, filter: ReportFilter) -> Result<Page<ReportDefinition>> {
        let page = filter.page.max(1);
        let page_size = if filter.page_size == 0 {
            repository::DEFAULT_PAGE_SIZE
        } else {
            filter.page_size
        };
        let (items, total) = self
            .db
            .reader()
            .call(move |conn| repository::list_reports(conn, &filter))
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(Page::new(items, total, page, page_size))
    }

    pub async fn list_templates(&self) -> Result<Vec<ReportDefinition>> {
        self.db
            .reader()
            .call(|conn| repository::list_templates(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Private copy of `id` at version 1, linked back to its source.
    pub async fn clone_report(
        &self,
        id: Uuid,
        name: &str,
        owner: Option<Uuid>,
    ) -> Result<ReportDefinition> {
        let source = self.get_report(id).await?;
        let now = Utc::now();
        let copy = ReportDefinition {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: source.description.clone(),
            category: source.category,
            config: source.config.clone(),
            created_by: owner,
            visibility: Visibility::Private,
            version: 1,
            is_template: false,
            based_on_template_id: Some(source.id),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.db
            .writer()
            .call({
                let copy = copy.clone();
                move |conn| repository::insert_report(conn, &copy)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(copy)
    }

    pub fn datasets(&self) -> &'static [DatasetMetadata] {
        query::datasets()
    }

    // ── Executions ─────────────────────────────────────────────────

    /// Run a stored report end to end and record the execution.
    ///
    /// The execution moves `pending -> processing -> completed`; any error,
    /// including cancellation, leaves it `failed` with the message.
    pub async fn execute_report(
        &self,
        report_id: Uuid,
        format: ExportFormat,
        triggered_by: Option<Uuid>,
        cancel: CancelToken,
    ) -> Result<ExecutionOutput> {
        let report = self.get_report(report_id).await?;
        self.execute(
            Some(report.id),
            &report.name,
            report.description.as_deref(),
            &report.config,
            format,
            triggered_by,
            cancel,
        )
        .await
    }

    /// Run an unsaved configuration. The execution has no definition id.
    pub async fn execute_adhoc(
        &self,
        config: &ReportConfig,
        title: &str,
        format: ExportFormat,
        triggered_by: Option<Uuid>,
        cancel: CancelToken,
    ) -> Result<ExecutionOutput> {
        self.execute(None, title, None, config, format, triggered_by, cancel)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        report_id: Option<Uuid>,
        title: &str,
        description: Option<&str>,
        config: &ReportConfig,
        format: ExportFormat,
        triggered_by: Option<Uuid>,
        cancel: CancelToken,
    ) -> Result<ExecutionOutput> {
        // A config that cannot compile never creates an execution.
        query::validate(config)?;
        let queries = Queries {
            data: query::compile(config)?,
            count: query::compile_count(config)?,
        };
        log::debug!("Compiled report query: {}", queries.data.sql);

        let execution = ReportExecution {
            id: Uuid::new_v4(),
            report_definition_id: report_id,
            triggered_by,
            status: ExecutionStatus::Pending,
            format,
            record_count: None,
            file_size_bytes: None,
            file_key: None,
            error_message: None,
            triggered_at: Utc::now(),
            completed_at: None,
        };
        self.db
            .writer()
            .call({
                let execution = execution.clone();
                move |conn| repository::insert_execution(conn, &execution)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        let exec_id = execution.id;

        self.transition(exec_id, ExecutionStatus::Processing, |_| {})
            .await?;

        let columns = report_columns(config);
        match self
            .produce(title, description, &queries, &columns, format, cancel)
            .await
        {
            Ok((data, record_count)) => {
                let size = data.len() as i64;
                let file_key = format!("reports/{exec_id}.{}", format.extension());
                let execution = self
                    .transition(exec_id, ExecutionStatus::Completed, |e| {
                        e.record_count = Some(record_count as i64);
                        e.file_size_bytes = Some(size);
                        e.file_key = Some(file_key);
                        e.completed_at = Some(Utc::now());
                    })
                    .await
                    .map_err(|e| match e {
                        Error::InvalidTransition { .. } => Error::Cancelled,
                        other => other,
                    })?;
                log::info!(
                    "Execution {exec_id} completed: {record_count} records, {size} bytes as {format}"
                );
                Ok(ExecutionOutput { execution, data })
            }
            Err(err) => {
                log::error!("Execution {exec_id} failed: {err}");
                let message = err.to_string();
                if let Err(e) = self
                    .transition(exec_id, ExecutionStatus::Failed, |e| {
                        e.error_message = Some(message);
                        e.completed_at = Some(Utc::now());
                    })
                    .await
                {
                    log::warn!("Could not mark execution {exec_id} failed: {e}");
                }
                Err(err)
            }
        }
    }

    /// Fetch and render. Returns the bytes and the total matching record
    /// count.
    async fn produce(
        &self,
        title: &str,
        description: Option<&str>,
        queries: &Queries,
        columns: &[Column],
        format: ExportFormat,
        mut cancel: CancelToken,
    ) -> Result<(Vec<u8>, u64)> {
        let fetch = async {
            tokio::try_join!(
                self.source.execute(&queries.data.sql, &queries.data.args),
                self.source.count(&queries.count.sql, &queries.count.args),
            )
        };
        let (rows, total) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            fetched = fetch => fetched?,
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let settings = self.settings().await?;
        let data = render(&settings, format, title, description, &rows, columns)?;
        Ok((data, total))
    }

    /// Load, check and apply a status change, then persist it.
    async fn transition(
        &self,
        id: Uuid,
        next: ExecutionStatus,
        apply: impl FnOnce(&mut ReportExecution),
    ) -> Result<ReportExecution> {
        let mut execution = self.get_execution(id).await?;
        execution.status.check_transition(next)?;
        execution.status = next;
        apply(&mut execution);
        self.db
            .writer()
            .call({
                let execution = execution.clone();
                move |conn| repository::update_execution(conn, &execution)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(execution)
    }

    pub async fn get_execution(&self, id: Uuid) -> Result<ReportExecution> {
        self.db
            .reader()
            .call(move |conn| repository::get_execution(conn, &id))
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("execution {id}")))
    }

    pub async fn list_executions(&self, filter: ExecutionFilter) -> Result<Vec<ReportExecution>> {
        self.db
            .reader()
            .call(move |conn| repository::list_executions(conn, &filter))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Mark a pending or processing execution failed. Finished executions
    /// are rejected with [`Error::InvalidTransition`].
    pub async fn cancel_execution(&self, id: Uuid) -> Result<ReportExecution> {
        let execution = self
            .transition(id, ExecutionStatus::Failed, |e| {
                e.error_message = Some(CANCELLED_BY_USER.into());
                e.completed_at = Some(Utc::now());
            })
            .await?;
        log::info!("Cancelled execution {id}");
        Ok(execution)
    }

    // ── Schedules ──────────────────────────────────────────────────

    pub async fn create_schedule(&self, req: NewSchedule) -> Result<ReportSchedule> {
        self.get_report(req.report_definition_id).await?;
        validate_cron(&req.cron_expression)?;
        if req.name.trim().is_empty() {
            return Err(Error::InvalidConfig("schedule name is required".into()));
        }
        if req.delivery_method == DeliveryMethod::Webhook
            && req.webhook_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(Error::InvalidConfig(
                "webhook delivery requires a webhook_url".into(),
            ));
        }

        let now = Utc::now();
        let schedule = ReportSchedule {
            id: Uuid::new_v4(),
            report_definition_id: req.report_definition_id,
            name: req.name,
            cron_expression: req.cron_expression.trim().to_string(),
            timezone: req
                .timezone
                .filter(|tz| !tz.is_empty())
                .unwrap_or_else(|| "UTC".into()),
            is_active: true,
            format: req.format,
            delivery_method: req.delivery_method,
            recipient_emails: req.recipient_emails,
            webhook_url: req.webhook_url,
            created_by: req.created_by,
            created_at: now,
            updated_at: now,
        };
        self.db
            .writer()
            .call({
                let schedule = schedule.clone();
                move |conn| repository::insert_schedule(conn, &schedule)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(schedule)
    }

    pub async fn list_schedules(&self, report_id: Option<Uuid>) -> Result<Vec<ReportSchedule>> {
        self.db
            .reader()
            .call(move |conn| repository::list_schedules(conn, report_id.as_ref()))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn toggle_schedule(&self, id: Uuid, active: bool) -> Result<()> {
        let now = Utc::now();
        let found = self
            .db
            .writer()
            .call(move |conn| repository::set_schedule_active(conn, &id, active, &now))
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !found {
            return Err(Error::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    pub async fn delete_schedule(&self, id: Uuid) -> Result<()> {
        let found = self
            .db
            .writer()
            .call(move |conn| repository::delete_schedule(conn, &id))
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !found {
            return Err(Error::NotFound(format!("schedule {id}")));
        }
        Ok(())
    }

    // ── Benchmarks ─────────────────────────────────────────────────

    pub async fn create_benchmark(&self, req: NewBenchmark) -> Result<BenchmarkDataset> {
        validate_benchmark(&req)?;
        let now = Utc::now();
        let dataset = BenchmarkDataset {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            category: req.category,
            methodology: req.methodology,
            region: req.region,
            year: req.year,
            source: req.source,
            confidence_score: req.confidence_score,
            is_active: req.is_active,
            metrics: req.metrics,
            created_at: now,
            updated_at: now,
        };
        self.db
            .writer()
            .call({
                let dataset = dataset.clone();
                move |conn| repository::insert_benchmark(conn, &dataset)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        log::info!("Created benchmark {} ({})", dataset.id, dataset.name);
        Ok(dataset)
    }

    /// Replace every descriptive field and the metrics of an existing
    /// benchmark.
    pub async fn update_benchmark(&self, id: Uuid, req: NewBenchmark) -> Result<BenchmarkDataset> {
        validate_benchmark(&req)?;
        let existing = self.get_benchmark(id).await?;
        let dataset = BenchmarkDataset {
            name: req.name,
            description: req.description,
            category: req.category,
            methodology: req.methodology,
            region: req.region,
            year: req.year,
            source: req.source,
            confidence_score: req.confidence_score,
            is_active: req.is_active,
            metrics: req.metrics,
            updated_at: Utc::now(),
            ..existing
        };
        self.db
            .writer()
            .call({
                let dataset = dataset.clone();
                move |conn| repository::update_benchmark(conn, &dataset)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(dataset)
    }

    pub async fn get_benchmark(&self, id: Uuid) -> Result<BenchmarkDataset> {
        self.db
            .reader()
            .call(move |conn| repository::get_benchmark(conn, &id))
            .await
            .map_err(|e| Error::Database(e.to_string()))?
            .ok_or_else(|| Error::NotFound(format!("benchmark {id}")))
    }

    pub async fn delete_benchmark(&self, id: Uuid) -> Result<()> {
        let found = self
            .db
            .writer()
            .call(move |conn| repository::delete_benchmark(conn, &id))
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !found {
            return Err(Error::NotFound(format!("benchmark {id}")));
        }
        Ok(())
    }

    pub async fn list_benchmarks(&self, filter: BenchmarkFilter) -> Result<Vec<BenchmarkDataset>> {
        self.db
            .reader()
            .call(move |conn| repository::list_benchmarks(conn, &filter))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn compare_project(
        &self,
        project_id: Uuid,
        query: &BenchmarkQuery,
    ) -> Result<ComparisonResult> {
        self.comparator().compare(project_id, query).await
    }

    pub async fn peer_percentile(
        &self,
        project_id: Uuid,
        metric: &str,
        methodology: &str,
        region: &str,
    ) -> Result<f64> {
        self.comparator()
            .peer_percentile(project_id, metric, methodology, region)
            .await
    }

    fn comparator(&self) -> Comparator {
        Comparator::new(Arc::new(self.db.clone()), Arc::clone(&self.metrics))
    }

    // ── Widgets ────────────────────────────────────────────────────

    /// Insert a widget (nil id) or update an existing one, keeping its
    /// creation time.
    pub async fn save_widget(&self, mut widget: DashboardWidget) -> Result<DashboardWidget> {
        if widget.title.trim().is_empty() {
            return Err(Error::InvalidConfig("widget title is required".into()));
        }
        if widget.refresh_interval_seconds < 0 {
            return Err(Error::InvalidConfig(
                "refresh_interval_seconds must not be negative".into(),
            ));
        }
        let now = Utc::now();
        if widget.id.is_nil() {
            widget.id = Uuid::new_v4();
            widget.created_at = now;
        } else {
            let id = widget.id;
            let existing = self
                .db
                .reader()
                .call(move |conn| repository::get_widget(conn, &id))
                .await
                .map_err(|e| Error::Database(e.to_string()))?;
            match existing {
                Some(prev) => widget.created_at = prev.created_at,
                None => widget.created_at = now,
            }
        }
        widget.updated_at = now;

        self.db
            .writer()
            .call({
                let widget = widget.clone();
                move |conn| repository::upsert_widget(conn, &widget)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(widget)
    }

    /// A section's widgets when `section` is given, otherwise the user's.
    pub async fn list_widgets(
        &self,
        user: Option<Uuid>,
        section: Option<&str>,
    ) -> Result<Vec<DashboardWidget>> {
        let section = section.map(str::to_string);
        self.db
            .reader()
            .call(move |conn| match section {
                Some(ref s) => repository::list_widgets(conn, None, Some(s)),
                None => repository::list_widgets(conn, user.as_ref(), None),
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn reorder_widgets(&self, user: Uuid, positions: Vec<(Uuid, i64)>) -> Result<usize> {
        let now = Utc::now();
        self.db
            .writer()
            .call(move |conn| repository::update_widget_positions(conn, &user, &positions, &now))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn delete_widget(&self, id: Uuid) -> Result<()> {
        let found = self
            .db
            .writer()
            .call(move |conn| repository::delete_widget(conn, &id))
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        if !found {
            return Err(Error::NotFound(format!("widget {id}")));
        }
        Ok(())
    }

    // ── Config commands ────────────────────────────────────────────

    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        self.db
            .reader()
            .call({
                let key = key.to_string();
                move |conn| repository::get_config(conn, &key)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    /// Store a setting after checking that it parses.
    pub async fn config_set(&self, key: &str, value: &str) -> Result<()> {
        EngineSettings::validate(key, value)?;
        self.db
            .writer()
            .call({
                let key = key.to_string();
                let value = value.to_string();
                move |conn| repository::set_config(conn, &key, &value)
            })
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn config_list(&self) -> Result<Vec<(String, String)>> {
        self.db
            .reader()
            .call(|conn| repository::list_config(conn))
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    pub async fn settings(&self) -> Result<EngineSettings> {
        let pairs = self.config_list().await?;
        EngineSettings::from_pairs(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Data and count queries compiled from one report config.
struct Queries {
    data: CompiledQuery,
    count: CompiledQuery,
}

/// Visible fields in display order followed by calculated fields.
pub fn report_columns(config: &ReportConfig) -> Vec<Column> {
    let mut columns = columns_for_fields(&config.fields);
    columns.extend(config.calculations.iter().map(|c| Column::new(c.name.as_str())));
    columns
}

fn render(
    settings: &EngineSettings,
    format: ExportFormat,
    title: &str,
    description: Option<&str>,
    rows: &[Row],
    columns: &[Column],
) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => CsvExporter::new(settings.csv_config()).export(rows, columns),
        ExportFormat::Excel => ExcelExporter::new(ExcelConfig::default()).export(rows, columns),
        ExportFormat::Pdf => {
            let config = PdfConfig {
                title: title.to_string(),
                subtitle: description.map(str::to_string),
                generated_at: Some(Utc::now().naive_utc()),
                ..settings.pdf_config()
            };
            PdfExporter::new(config).export(rows, columns)
        }
        ExportFormat::Json => {
            let projected: Vec<Row> = rows
                .iter()
                .map(|row| {
                    if columns.is_empty() {
                        return row.clone();
                    }
                    columns.iter().fold(Row::new(), |out, c| {
                        out.with(c.key.as_str(), row.get(&c.key).cloned().unwrap_or(Value::Null))
                    })
                })
                .collect();
            Ok(serde_json::to_vec_pretty(&projected)?)
        }
    }
}

/// Five whitespace-separated fields (minute, hour, day of month, month,
/// day of week).
pub fn validate_cron(expr: &str) -> Result<()> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(Error::InvalidConfig(format!(
            "cron expression must have 5 fields, got {}: {expr:?}",
            fields.len()
        )));
    }
    if let Some(bad) = fields.iter().find(|f| !CRON_FIELD_RE.is_match(f)) {
        return Err(Error::InvalidConfig(format!(
            "invalid cron field {bad:?} in {expr:?}"
        )));
    }
    Ok(())
}

fn validate_benchmark(req: &NewBenchmark) -> Result<()> {
    if req.name.trim().is_empty() || req.category.trim().is_empty() {
        return Err(Error::InvalidConfig(
            "benchmark name and category are required".into(),
        ));
    }
    for m in &req.metrics {
        let anchors = [m.min, m.p25, m.p50, m.p75, m.p90, m.max];
        if anchors.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidConfig(format!(
                "benchmark metric {} must satisfy min <= p25 <= p50 <= p75 <= p90 <= max",
                m.metric
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::benchmark::PeerProject;
    use crate::cancel::CancelSource;
    use crate::query::StaticSource;
    use crate::report::{AggregateFunction, FieldConfig, GroupConfig, WidgetSize, WidgetType};

    struct FixedMetrics(BTreeMap<String, f64>);

    #[async_trait]
    impl MetricsProvider for FixedMetrics {
        async fn project_metrics(&self, _project_id: Uuid) -> Result<BTreeMap<String, f64>> {
            Ok(self.0.clone())
        }

        async fn peer_group(&self, _methodology: &str, _region: &str) -> Result<Vec<PeerProject>> {
            Ok(Vec::new())
        }
    }

    struct FailingSource;

    #[async_trait]
    impl DataSource for FailingSource {
        async fn execute(&self, _sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
            Err(Error::DataSource("connection refused".into()))
        }

        async fn count(&self, _sql: &str, _args: &[Value]) -> Result<u64> {
            Ok(0)
        }
    }

    /// Blocks until released so a test can cancel mid-fetch.
    struct GatedSource(Arc<Notify>);

    #[async_trait]
    impl DataSource for GatedSource {
        async fn execute(&self, _sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
            self.0.notified().await;
            Ok(Vec::new())
        }

        async fn count(&self, _sql: &str, _args: &[Value]) -> Result<u64> {
            Ok(0)
        }
    }

    /// Runs compiled queries against an in-memory SQLite table, so result
    /// column names come from the store rather than the test.
    struct SqliteSource(tokio_rusqlite::Connection);

    impl SqliteSource {
        async fn credits() -> Self {
            let conn = tokio_rusqlite::Connection::open_in_memory().await.unwrap();
            conn.call(|conn| {
                conn.execute_batch(
                    "CREATE TABLE carbon_credits (vintage_year INTEGER, quantity REAL);
                     INSERT INTO carbon_credits VALUES (2022, 1000), (2022, 500), (2023, 2250.5);",
                )
            })
            .await
            .unwrap();
            Self(conn)
        }
    }

    #[async_trait]
    impl DataSource for SqliteSource {
        async fn execute(&self, sql: &str, _args: &[Value]) -> Result<Vec<Row>> {
            let sql = sql.to_string();
            self.0
                .call(move |conn| {
                    let mut stmt = conn.prepare(&sql)?;
                    let names: Vec<String> =
                        stmt.column_names().iter().map(|n| n.to_string()).collect();
                    let rows = stmt.query_map([], |r| {
                        let mut row = Row::new();
                        for (i, name) in names.iter().enumerate() {
                            let value = match r.get::<_, rusqlite::types::Value>(i)? {
                                rusqlite::types::Value::Integer(n) => Value::Int(n),
                                rusqlite::types::Value::Real(x) => Value::Float(x),
                                rusqlite::types::Value::Text(t) => Value::Text(t),
                                _ => Value::Null,
                            };
                            row.insert(name.as_str(), value);
                        }
                        Ok(row)
                    })?;
                    rows.collect::<std::result::Result<Vec<_>, rusqlite::Error>>()
                })
                .await
                .map_err(|e| Error::DataSource(e.to_string()))
        }

        async fn count(&self, sql: &str, _args: &[Value]) -> Result<u64> {
            let sql = sql.to_string();
            self.0
                .call(move |conn| conn.query_row(&sql, [], |r| r.get::<_, i64>(0)))
                .await
                .map(|n| n as u64)
                .map_err(|e| Error::DataSource(e.to_string()))
        }
    }

    fn credit_rows() -> Vec<Row> {
        vec![
            Row::new().with("vintage_year", 2022).with("total", 1500.0),
            Row::new().with("vintage_year", 2023).with("total", 2250.5),
        ]
    }

    async fn service_with(source: Arc<dyn DataSource>) -> ReportService {
        let db = Database::open_memory().await.unwrap();
        let mut metrics = BTreeMap::new();
        metrics.insert("carbon_sequestration_rate".to_string(), 25.0);
        ReportService::new(db, source, Arc::new(FixedMetrics(metrics)))
    }

    async fn service() -> ReportService {
        service_with(Arc::new(StaticSource::new(credit_rows()))).await
    }

    fn credits_config() -> ReportConfig {
        ReportConfig {
            dataset: "carbon_credits".into(),
            fields: vec![
                FieldConfig::new("vintage_year"),
                FieldConfig::new("quantity")
                    .aggregate(AggregateFunction::Sum)
                    .alias("total"),
            ],
            groupings: vec![GroupConfig {
                field: "vintage_year".into(),
                time_grain: Default::default(),
            }],
            ..Default::default()
        }
    }

    fn new_report(name: &str) -> NewReport {
        NewReport {
            name: name.into(),
            category: ReportCategory::Financial,
            config: credits_config(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_update_delete_report() {
        let svc = service().await;
        let report = svc.create_report(new_report("Vintage totals")).await.unwrap();
        assert_eq!(report.version, 1);

        let updated = svc
            .update_report(
                report.id,
                ReportUpdate {
                    name: Some("Vintage totals (all)".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
        let updated = svc
            .update_report(report.id, ReportUpdate::default())
            .await
            .unwrap();
        assert_eq!(updated.version, 3);
        assert_eq!(svc.get_report(report.id).await.unwrap().version, 3);

        svc.delete_report(report.id).await.unwrap();
        assert!(matches!(
            svc.get_report(report.id).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            svc.delete_report(report.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_field() {
        let svc = service().await;
        let mut req = new_report("Broken");
        req.config.fields.push(FieldConfig::new("no_such_column"));
        assert!(matches!(
            svc.create_report(req).await,
            Err(Error::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_list_templates_and_clone() {
        let svc = service().await;
        let mut template = new_report("Standard issuance");
        template.is_template = true;
        template.visibility = Visibility::Public;
        let template = svc.create_report(template).await.unwrap();
        svc.create_report(new_report("Private")).await.unwrap();

        let templates = svc.list_templates().await.unwrap();
        assert_eq!(templates.len(), 1);

        let owner = Uuid::new_v4();
        let copy = svc
            .clone_report(template.id, "My issuance", Some(owner))
            .await
            .unwrap();
        assert_eq!(copy.based_on_template_id, Some(template.id));
        assert_eq!(copy.visibility, Visibility::Private);
        assert!(!copy.is_template);
        assert_eq!(copy.config, template.config);

        let page = svc
            .list_reports(ReportFilter {
                page_size: 2,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn test_execute_report_completes() {
        let svc = service().await;
        let report = svc.create_report(new_report("Vintages")).await.unwrap();

        let out = svc
            .execute_report(report.id, ExportFormat::Csv, None, CancelToken::never())
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out.data.clone()).unwrap(),
            "vintage_year,total\r\n2022,1500\r\n2023,2250.5\r\n"
        );
        let exec = &out.execution;
        assert_eq!(exec.status, ExecutionStatus::Completed);
        assert_eq!(exec.record_count, Some(2));
        assert_eq!(exec.file_size_bytes, Some(out.data.len() as i64));
        assert_eq!(exec.file_key, Some(format!("reports/{}.csv", exec.id)));
        assert!(exec.completed_at.is_some());

        let stored = svc.get_execution(exec.id).await.unwrap();
        assert_eq!(&stored, exec);

        assert!(matches!(
            svc.cancel_execution(exec.id).await,
            Err(Error::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_unaliased_aggregate_keeps_values() {
        let svc = service_with(Arc::new(SqliteSource::credits().await)).await;
        let mut config = credits_config();
        config.fields[1].alias = None;
        config.sorts = vec![crate::report::SortConfig {
            field: "vintage_year".into(),
            direction: "asc".into(),
        }];
        let report = svc
            .create_report(NewReport {
                config,
                ..new_report("Unaliased")
            })
            .await
            .unwrap();

        let out = svc
            .execute_report(report.id, ExportFormat::Csv, None, CancelToken::never())
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out.data).unwrap(),
            "vintage_year,SUM(quantity)\r\n2022,1500\r\n2023,2250.5\r\n"
        );
        assert_eq!(out.execution.record_count, Some(3));
    }

    #[tokio::test]
    async fn test_invalid_config_never_starts_execution() {
        let svc = service().await;
        let config = ReportConfig {
            dataset: "no_such_dataset".into(),
            ..credits_config()
        };
        let err = svc
            .execute_adhoc(&config, "Broken", ExportFormat::Csv, None, CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));

        let mut no_fields = credits_config();
        no_fields.fields.clear();
        assert!(svc
            .execute_adhoc(&no_fields, "Empty", ExportFormat::Csv, None, CancelToken::never())
            .await
            .is_err());

        let execs = svc.list_executions(ExecutionFilter::default()).await.unwrap();
        assert!(execs.is_empty());
    }

    #[tokio::test]
    async fn test_execute_other_formats() {
        let svc = service().await;
        let report = svc.create_report(new_report("Vintages")).await.unwrap();

        let json = svc
            .execute_report(report.id, ExportFormat::Json, None, CancelToken::never())
            .await
            .unwrap();
        let parsed: Vec<Row> = serde_json::from_slice(&json.data).unwrap();
        assert_eq!(parsed, credit_rows());

        let xlsx = svc
            .execute_report(report.id, ExportFormat::Excel, None, CancelToken::never())
            .await
            .unwrap();
        assert_eq!(&xlsx.data[..2], b"PK");
        assert!(xlsx.execution.file_key.unwrap().ends_with(".xlsx"));

        let pdf = svc
            .execute_report(report.id, ExportFormat::Pdf, None, CancelToken::never())
            .await
            .unwrap();
        assert!(pdf.data.starts_with(b"%PDF"));
    }

    #[tokio::test]
    async fn test_execute_uses_configured_delimiter() {
        let svc = service().await;
        svc.config_set("export.csv.delimiter", ";").await.unwrap();
        let out = svc
            .execute_adhoc(
                &credits_config(),
                "Ad hoc",
                ExportFormat::Csv,
                None,
                CancelToken::never(),
            )
            .await
            .unwrap();
        assert!(out.data.starts_with(b"vintage_year;total\r\n"));
        assert_eq!(out.execution.report_definition_id, None);
    }

    #[tokio::test]
    async fn test_execute_failure_is_recorded() {
        let svc = service_with(Arc::new(FailingSource)).await;
        let report = svc.create_report(new_report("Vintages")).await.unwrap();
        let err = svc
            .execute_report(report.id, ExportFormat::Csv, None, CancelToken::never())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DataSource(_)));

        let execs = svc
            .list_executions(ExecutionFilter {
                report_definition_id: Some(report.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].status, ExecutionStatus::Failed);
        assert!(execs[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_execute_observes_cancellation() {
        let gate = Arc::new(Notify::new());
        let svc = service_with(Arc::new(GatedSource(gate.clone()))).await;
        let report = svc.create_report(new_report("Slow")).await.unwrap();

        let source = CancelSource::new();
        let token = source.token();
        let run = svc.execute_report(report.id, ExportFormat::Csv, None, token);
        let cancel = async {
            tokio::task::yield_now().await;
            source.cancel();
        };
        let (result, _) = tokio::join!(run, cancel);
        assert!(matches!(result, Err(Error::Cancelled)));

        let execs = svc.list_executions(ExecutionFilter::default()).await.unwrap();
        assert_eq!(execs[0].status, ExecutionStatus::Failed);
        assert_eq!(execs[0].error_message.as_deref(), Some("Operation cancelled"));
    }

    #[tokio::test]
    async fn test_schedule_validation_and_toggle() {
        let svc = service().await;
        let report = svc.create_report(new_report("Monthly")).await.unwrap();
        let req = |cron: &str| NewSchedule {
            report_definition_id: report.id,
            name: "Monthly run".into(),
            cron_expression: cron.into(),
            timezone: None,
            format: ExportFormat::Pdf,
            delivery_method: DeliveryMethod::Email,
            recipient_emails: vec!["finance@example.org".into()],
            webhook_url: None,
            created_by: None,
        };

        assert!(svc.create_schedule(req("")).await.is_err());
        assert!(svc.create_schedule(req("0 6 1 *")).await.is_err());
        assert!(svc.create_schedule(req("0 6 1 * * *")).await.is_err());
        assert!(svc.create_schedule(req("0 6 $ * *")).await.is_err());

        let mut webhook = req("*/15 * * * 1-5");
        webhook.delivery_method = DeliveryMethod::Webhook;
        assert!(svc.create_schedule(webhook).await.is_err());

        let schedule = svc.create_schedule(req("0 6 1 * *")).await.unwrap();
        assert_eq!(schedule.timezone, "UTC");
        assert!(schedule.is_active);

        svc.toggle_schedule(schedule.id, false).await.unwrap();
        let listed = svc.list_schedules(Some(report.id)).await.unwrap();
        assert!(!listed[0].is_active);

        svc.delete_schedule(schedule.id).await.unwrap();
        assert!(matches!(
            svc.toggle_schedule(schedule.id, true).await,
            Err(Error::NotFound(_))
        ));
    }

    fn new_benchmark(year: i32) -> NewBenchmark {
        NewBenchmark {
            name: format!("Forestry {year}"),
            description: None,
            category: "forestry".into(),
            methodology: Some("VM0015".into()),
            region: Some("latam".into()),
            year,
            source: None,
            confidence_score: Some(0.8),
            is_active: true,
            metrics: vec![BenchmarkMetric {
                metric: "carbon_sequestration_rate".into(),
                value: 0.0,
                unit: "tCO2e/ha/yr".into(),
                p25: 10.0,
                p50: 20.0,
                p75: 30.0,
                p90: 40.0,
                min: 0.0,
                max: 50.0,
                sample_size: 80,
            }],
        }
    }

    #[tokio::test]
    async fn test_benchmark_compare() {
        let svc = service().await;
        let query = BenchmarkQuery {
            category: "forestry".into(),
            ..Default::default()
        };
        assert!(matches!(
            svc.compare_project(Uuid::new_v4(), &query).await,
            Err(Error::BenchmarkNotFound(_))
        ));

        svc.create_benchmark(new_benchmark(2023)).await.unwrap();
        let latest = svc.create_benchmark(new_benchmark(2024)).await.unwrap();

        let project = Uuid::new_v4();
        let result = svc.compare_project(project, &query).await.unwrap();
        assert_eq!(result.benchmark_id, Some(latest.id));
        assert_eq!(result.comparisons.len(), 1);
        assert_eq!(result.percentile_ranks["carbon_sequestration_rate"], 62.5);

        let mut bad = new_benchmark(2025);
        bad.metrics[0].p25 = 99.0;
        assert!(matches!(
            svc.create_benchmark(bad).await,
            Err(Error::InvalidConfig(_))
        ));

        let mut renamed = new_benchmark(2024);
        renamed.name = "Forestry 2024 rev".into();
        let updated = svc.update_benchmark(latest.id, renamed).await.unwrap();
        assert_eq!(updated.created_at, latest.created_at);
        assert_eq!(svc.get_benchmark(latest.id).await.unwrap().name, "Forestry 2024 rev");
        assert_eq!(svc.list_benchmarks(BenchmarkFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_widgets_save_list_delete() {
        let svc = service().await;
        let user = Uuid::new_v4();
        let widget = DashboardWidget {
            id: Uuid::nil(),
            user_id: Some(user),
            dashboard_section: "overview".into(),
            widget_type: WidgetType::Chart,
            title: "Issuance".into(),
            config: serde_json::json!({"metric": "credits_issued", "interval": "month"}),
            size: WidgetSize::Large,
            position: 0,
            refresh_interval_seconds: 600,
            is_visible: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let saved = svc.save_widget(widget).await.unwrap();
        assert!(!saved.id.is_nil());

        let mut edited = saved.clone();
        edited.title = "Monthly issuance".into();
        let edited = svc.save_widget(edited).await.unwrap();
        assert_eq!(edited.created_at, saved.created_at);

        let mine = svc.list_widgets(Some(user), None).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title, "Monthly issuance");
        assert_eq!(svc.list_widgets(None, Some("overview")).await.unwrap().len(), 1);
        assert!(svc.list_widgets(None, Some("finance")).await.unwrap().is_empty());

        svc.delete_widget(saved.id).await.unwrap();
        assert!(svc.list_widgets(Some(user), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_config_set_validates() {
        let svc = service().await;
        assert!(svc.config_set("dashboard.max_items", "many").await.is_err());
        svc.config_set("dashboard.max_items", "250").await.unwrap();
        assert_eq!(
            svc.config_get("dashboard.max_items").await.unwrap().as_deref(),
            Some("250")
        );
        assert_eq!(svc.settings().await.unwrap().max_items, 250);
    }

    #[test]
    fn test_validate_cron() {
        assert!(validate_cron("0 6 1 * *").is_ok());
        assert!(validate_cron("*/5 0-23 ? JAN MON-FRI").is_ok());
        assert!(validate_cron("  ").is_err());
    }
}
