use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use portal_analytics::export::{Column, CsvConfig, ExcelConfig, PdfConfig};
use portal_analytics::report::{DashboardWidget, ReportCategory, Visibility};
use portal_analytics::storage::{BenchmarkFilter, ExecutionFilter, ReportFilter};
use portal_analytics::{
    BenchmarkQuery, CancelSource, CancelToken, CsvExporter, Database, ExcelExporter,
    ExecutionStatus, ExportFormat, MetricsProvider, NewBenchmark, NewReport, NewSchedule,
    PdfExporter, PeerProject, ReportConfig, ReportService, ReportUpdate, Row, StaticSource,
};

#[derive(Parser)]
#[command(name = "portal-analytics", about = "Reporting and analytics engine CLI")]
struct Cli {
    /// Database path (default: ~/.portal-analytics/analytics.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a report configuration (JSON file) to SQL
    Compile {
        config: PathBuf,
        /// Print the count query instead
        #[arg(long)]
        count: bool,
    },
    /// Export rows from a JSON array file
    Export {
        rows: PathBuf,
        /// csv, excel, pdf or json
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        /// Report configuration whose visible fields select the columns
        #[arg(long)]
        config: Option<PathBuf>,
        /// Document title (PDF)
        #[arg(long)]
        title: Option<String>,
        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Compare a project against the best matching benchmark
    Compare {
        project: Uuid,
        /// JSON file with `metrics` (name -> value) and optional `peers`
        #[arg(long)]
        metrics: PathBuf,
        #[arg(long)]
        category: String,
        #[arg(long)]
        methodology: Option<String>,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        json: bool,
    },
    /// Percentile of a project among its peer group
    Percentile {
        project: Uuid,
        metric: String,
        /// JSON file with `peers`
        #[arg(long)]
        metrics: PathBuf,
        #[arg(long, default_value = "")]
        methodology: String,
        #[arg(long, default_value = "")]
        region: String,
    },
    /// Least-squares trend over an evenly spaced series
    Trend {
        #[arg(required = true, allow_negative_numbers = true)]
        values: Vec<f64>,
        #[arg(long)]
        json: bool,
    },
    /// Manage report definitions and run them
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },
    /// Manage report schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
    /// Manage benchmark datasets
    Benchmark {
        #[command(subcommand)]
        action: BenchmarkAction,
    },
    /// Manage dashboard widgets
    Widget {
        #[command(subcommand)]
        action: WidgetAction,
    },
    /// List the datasets reports can query
    Datasets {
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show store status
    Status,
}

#[derive(Subcommand)]
enum ReportAction {
    /// Create a report from a JSON definition
    Create { file: PathBuf },
    /// List reports
    List {
        /// Reports owned by this user plus public ones
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long)]
        category: Option<ReportCategory>,
        #[arg(long)]
        visibility: Option<Visibility>,
        #[arg(long)]
        templates: bool,
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "20")]
        page_size: u32,
        #[arg(long)]
        json: bool,
    },
    /// Show a report definition
    Show { id: Uuid },
    /// Apply a partial update from a JSON file
    Update { id: Uuid, file: PathBuf },
    /// Delete a report
    Delete { id: Uuid },
    /// Copy a report into a new private report
    Clone {
        id: Uuid,
        name: String,
        #[arg(long)]
        owner: Option<Uuid>,
    },
    /// List public templates
    Templates,
    /// Run a report against rows from a JSON file
    Run {
        id: Uuid,
        #[arg(long)]
        rows: PathBuf,
        #[arg(long, default_value = "csv")]
        format: ExportFormat,
        #[arg(long)]
        triggered_by: Option<Uuid>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// List executions
    Executions {
        #[arg(long)]
        report: Option<Uuid>,
        #[arg(long)]
        status: Option<ExecutionStatus>,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// Cancel a pending or processing execution
    Cancel { execution: Uuid },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Create a schedule from a JSON file
    Create { file: PathBuf },
    /// List schedules
    List {
        #[arg(long)]
        report: Option<Uuid>,
    },
    /// Enable a schedule
    Enable { id: Uuid },
    /// Disable a schedule
    Disable { id: Uuid },
    /// Delete a schedule
    Delete { id: Uuid },
}

#[derive(Subcommand)]
enum BenchmarkAction {
    /// Import one benchmark or an array of them from a JSON file
    Import { file: PathBuf },
    /// Replace a benchmark from a JSON file
    Update { id: Uuid, file: PathBuf },
    /// List benchmarks
    List {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        json: bool,
    },
    /// Show a benchmark
    Show { id: Uuid },
    /// Delete a benchmark
    Delete { id: Uuid },
}

#[derive(Subcommand)]
enum WidgetAction {
    /// Insert or update a widget from a JSON file
    Save { file: PathBuf },
    /// List widgets for a user or a dashboard section
    List {
        #[arg(long)]
        user: Option<Uuid>,
        #[arg(long)]
        section: Option<String>,
    },
    /// Delete a widget
    Delete { id: Uuid },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

/// Project metrics and peer groups loaded from a JSON file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MetricsFile {
    metrics: BTreeMap<String, f64>,
    peers: Vec<PeerProject>,
}

#[async_trait]
impl MetricsProvider for MetricsFile {
    async fn project_metrics(
        &self,
        _project_id: Uuid,
    ) -> portal_analytics::Result<BTreeMap<String, f64>> {
        Ok(self.metrics.clone())
    }

    async fn peer_group(
        &self,
        methodology: &str,
        region: &str,
    ) -> portal_analytics::Result<Vec<PeerProject>> {
        let matches = |want: &str, have: &Option<String>| {
            want.is_empty() || have.as_deref().is_none_or(|h| h == want)
        };
        Ok(self
            .peers
            .iter()
            .filter(|p| matches(methodology, &p.methodology) && matches(region, &p.region))
            .cloned()
            .collect())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn write_output(out: Option<&Path>, data: &[u8]) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("Wrote {} bytes to {}", data.len(), path.display());
        }
        None => std::io::stdout().write_all(data)?,
    }
    Ok(())
}

fn make_service(db: Database, rows: Vec<Row>, metrics: MetricsFile) -> ReportService {
    ReportService::new(db, Arc::new(StaticSource::new(rows)), Arc::new(metrics))
}

/// A cancel source that fires on Ctrl-C. Abort the returned handle once
/// the guarded work is done.
fn cancel_on_ctrl_c() -> (CancelToken, tokio::task::JoinHandle<()>) {
    let source = CancelSource::new();
    let token = source.token();
    let handle = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, cancelling");
            source.cancel();
        }
    });
    (token, handle)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // Commands that never touch the store.
    match &cli.command {
        Commands::Compile { config, count } => return handle_compile(config, *count),
        Commands::Trend { values, json } => return handle_trend(values, *json),
        Commands::Datasets { json } => return handle_datasets(*json),
        _ => {}
    }

    let db = match &cli.db {
        Some(path) => Database::open_at(path).await?,
        None => Database::open().await?,
    };

    match cli.command {
        Commands::Compile { .. } | Commands::Trend { .. } | Commands::Datasets { .. } => {}
        Commands::Status => {
            print_status(&db).await?;
        }
        Commands::Config { action } => {
            handle_config(&make_service(db, Vec::new(), MetricsFile::default()), action).await?;
        }
        Commands::Export {
            rows,
            format,
            config,
            title,
            out,
        } => {
            let svc = make_service(db, Vec::new(), MetricsFile::default());
            handle_export(&svc, &rows, format, config.as_deref(), title, out.as_deref()).await?;
        }
        Commands::Compare {
            project,
            metrics,
            category,
            methodology,
            region,
            year,
            json,
        } => {
            let svc = make_service(db, Vec::new(), read_json(&metrics)?);
            let query = BenchmarkQuery {
                category,
                methodology,
                region,
                year,
            };
            let result = svc.compare_project(project, &query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Project {} vs benchmark", result.project_id);
                for c in &result.comparisons {
                    println!(
                        "  {:<32} {:>12.2} {} (median {:.2}, {:+.1}%) {:?}",
                        c.metric,
                        c.project_value,
                        c.unit,
                        c.benchmark_median,
                        c.difference_percent,
                        c.performance_level
                    );
                }
                println!(
                    "  Overall: {:.1} ({})",
                    result.overall_score, result.performance_rank
                );
                for gap in &result.gap_analysis {
                    println!("  Gap {:?}: {} {}", gap.priority, gap.metric, gap.recommendation);
                }
                println!("{}", result.summary);
            }
        }
        Commands::Percentile {
            project,
            metric,
            metrics,
            methodology,
            region,
        } => {
            let svc = make_service(db, Vec::new(), read_json(&metrics)?);
            let pct = svc
                .peer_percentile(project, &metric, &methodology, &region)
                .await?;
            println!("{pct:.1}");
        }
        Commands::Report { action } => {
            handle_report(db, action).await?;
        }
        Commands::Schedule { action } => {
            handle_schedule(&make_service(db, Vec::new(), MetricsFile::default()), action).await?;
        }
        Commands::Benchmark { action } => {
            handle_benchmark(&make_service(db, Vec::new(), MetricsFile::default()), action).await?;
        }
        Commands::Widget { action } => {
            handle_widget(&make_service(db, Vec::new(), MetricsFile::default()), action).await?;
        }
    }

    Ok(())
}

fn handle_compile(path: &Path, count: bool) -> anyhow::Result<()> {
    let config: ReportConfig = read_json(path)?;
    portal_analytics::query::validate(&config)?;
    let compiled = if count {
        portal_analytics::compile_count(&config)?
    } else {
        portal_analytics::compile(&config)?
    };
    println!("{}", compiled.sql);
    for (i, arg) in compiled.args.iter().enumerate() {
        println!("  arg {}: {}", i + 1, serde_json::to_string(arg)?);
    }
    Ok(())
}

fn handle_trend(values: &[f64], json: bool) -> anyhow::Result<()> {
    let trend = portal_analytics::analyze_trend(values)
        .ok_or_else(|| anyhow::anyhow!("a trend needs at least two values"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&trend)?);
    } else {
        println!("Trend: {:?}", trend.direction);
        println!("  Slope:     {:.4}", trend.slope);
        println!("  Current:   {:.2}", trend.current_value);
        println!("  Change:    {:+.1}%", trend.change_rate);
        println!("  Projected: {:.2}", trend.projected_next);
        println!("  Points:    {}", trend.data_points);
    }
    Ok(())
}

fn handle_datasets(json: bool) -> anyhow::Result<()> {
    let datasets = portal_analytics::query::datasets();
    if json {
        println!("{}", serde_json::to_string_pretty(datasets)?);
        return Ok(());
    }
    for ds in datasets {
        println!("{} - {}", ds.name, ds.display_name);
        for f in &ds.fields {
            let mut caps = Vec::new();
            if f.aggregatable {
                caps.push("agg");
            }
            if f.filterable {
                caps.push("filter");
            }
            if f.groupable {
                caps.push("group");
            }
            println!("  {:<24} {:?} [{}]", f.name, f.data_type, caps.join(","));
        }
        if !ds.join_with.is_empty() {
            println!("  joins: {}", ds.join_with.join(", "));
        }
    }
    Ok(())
}

async fn handle_export(
    svc: &ReportService,
    rows_path: &Path,
    format: ExportFormat,
    config_path: Option<&Path>,
    title: Option<String>,
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let rows: Vec<Row> = read_json(rows_path)?;
    let columns = match config_path {
        Some(path) => portal_analytics::service::report_columns(&read_json::<ReportConfig>(path)?),
        None => Vec::new(),
    };
    let settings = svc.settings().await?;

    let data = match format {
        ExportFormat::Csv => {
            let sink = open_sink(out)?;
            let (token, ctrl_c) = cancel_on_ctrl_c();
            let result = stream_csv(rows, columns, settings.csv_config(), sink, token).await;
            ctrl_c.abort();
            log::info!("Exported {} rows", result?);
            return Ok(());
        }
        ExportFormat::Excel => ExcelExporter::new(ExcelConfig::default()).export(&rows, &columns)?,
        ExportFormat::Pdf => PdfExporter::new(PdfConfig {
            title: title.unwrap_or_else(|| "Report".into()),
            generated_at: Some(chrono::Utc::now().naive_utc()),
            ..settings.pdf_config()
        })
        .export(&rows, &columns)?,
        ExportFormat::Json => serde_json::to_vec_pretty(&rows)?,
    };
    write_output(out, &data)
}

fn open_sink(out: Option<&Path>) -> anyhow::Result<Box<dyn Write>> {
    Ok(match out {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout()),
    })
}

/// Feed rows through the streaming CSV encoder, writing each chunk as it
/// arrives. A cancelled export writes no partial trailing chunk.
async fn stream_csv(
    rows: Vec<Row>,
    columns: Vec<Column>,
    config: CsvConfig,
    mut sink: Box<dyn Write>,
    token: CancelToken,
) -> anyhow::Result<u64> {
    let (row_tx, row_rx) = mpsc::channel(256);
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(16);
    let exporter = CsvExporter::new(config);

    let feed = async move {
        for row in rows {
            if row_tx.send(row).await.is_err() {
                break;
            }
        }
    };
    // Owns the receiver so a write error closes the channel and stops the
    // encoder instead of leaving it blocked on a full buffer.
    let write = async move {
        while let Some(chunk) = chunk_rx.recv().await {
            sink.write_all(&chunk)?;
        }
        sink.flush()
    };
    let (written, (), io) = tokio::join!(
        exporter.export_stream(row_rx, columns, chunk_tx, token),
        feed,
        write
    );
    io?;
    Ok(written?)
}

async fn handle_report(db: Database, action: ReportAction) -> anyhow::Result<()> {
    // Only `run` reads rows; everything else works on an empty source.
    let rows: Vec<Row> = match &action {
        ReportAction::Run { rows, .. } => read_json(rows)?,
        _ => Vec::new(),
    };
    let svc = make_service(db, rows, MetricsFile::default());

    match action {
        ReportAction::Create { file } => {
            let req: NewReport = read_json(&file)?;
            let report = svc.create_report(req).await?;
            println!("Created report {} ({})", report.id, report.name);
        }
        ReportAction::List {
            user,
            category,
            visibility,
            templates,
            search,
            page,
            page_size,
            json,
        } => {
            let filter = ReportFilter {
                user_id: user,
                category,
                visibility,
                is_template: templates.then_some(true),
                search,
                page,
                page_size,
            };
            let page = svc.list_reports(filter).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else if page.items.is_empty() {
                println!("No reports found.");
            } else {
                for r in &page.items {
                    println!(
                        "{} {} [{}/{}] v{}",
                        r.id, r.name, r.category, r.visibility, r.version
                    );
                }
                println!(
                    "\nPage {}/{} ({} reports)",
                    page.page, page.total_pages, page.total
                );
            }
        }
        ReportAction::Show { id } => {
            let report = svc.get_report(id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ReportAction::Update { id, file } => {
            let update: ReportUpdate = read_json(&file)?;
            let report = svc.update_report(id, update).await?;
            println!("Updated report {} to version {}", report.id, report.version);
        }
        ReportAction::Delete { id } => {
            svc.delete_report(id).await?;
            println!("Deleted: {id}");
        }
        ReportAction::Clone { id, name, owner } => {
            let copy = svc.clone_report(id, &name, owner).await?;
            println!("Created report {} ({}) from {id}", copy.id, copy.name);
        }
        ReportAction::Templates => {
            let templates = svc.list_templates().await?;
            if templates.is_empty() {
                println!("No templates.");
            }
            for t in templates {
                println!("{} {} [{}]", t.id, t.name, t.category);
            }
        }
        ReportAction::Run {
            id,
            format,
            triggered_by,
            out,
            ..
        } => {
            let (token, ctrl_c) = cancel_on_ctrl_c();
            let result = svc.execute_report(id, format, triggered_by, token).await;
            ctrl_c.abort();
            let output = result?;
            let exec = &output.execution;
            eprintln!(
                "Execution {} {}: {} records, {} bytes ({})",
                exec.id,
                exec.status,
                exec.record_count.unwrap_or(0),
                exec.file_size_bytes.unwrap_or(0),
                exec.file_key.as_deref().unwrap_or("-"),
            );
            write_output(out.as_deref(), &output.data)?;
        }
        ReportAction::Executions {
            report,
            status,
            limit,
        } => {
            let execs = svc
                .list_executions(ExecutionFilter {
                    report_definition_id: report,
                    status,
                    limit,
                })
                .await?;
            if execs.is_empty() {
                println!("No executions.");
            }
            for e in execs {
                println!(
                    "{} {:<10} {:<5} {} records  {}{}",
                    e.id,
                    e.status,
                    e.format,
                    e.record_count.unwrap_or(0),
                    e.triggered_at.format("%Y-%m-%d %H:%M:%S"),
                    e.error_message
                        .as_deref()
                        .map(|m| format!("  ({m})"))
                        .unwrap_or_default()
                );
            }
        }
        ReportAction::Cancel { execution } => {
            svc.cancel_execution(execution).await?;
            println!("Cancelled: {execution}");
        }
    }
    Ok(())
}

async fn handle_schedule(svc: &ReportService, action: ScheduleAction) -> anyhow::Result<()> {
    match action {
        ScheduleAction::Create { file } => {
            let req: NewSchedule = read_json(&file)?;
            let s = svc.create_schedule(req).await?;
            println!("Created schedule {} ({} {})", s.id, s.cron_expression, s.timezone);
        }
        ScheduleAction::List { report } => {
            let schedules = svc.list_schedules(report).await?;
            if schedules.is_empty() {
                println!("No schedules.");
            }
            for s in schedules {
                let state = if s.is_active { "active" } else { "paused" };
                println!(
                    "{} {} [{state}] {} {} -> {} {}",
                    s.id, s.name, s.cron_expression, s.timezone, s.format, s.delivery_method
                );
            }
        }
        ScheduleAction::Enable { id } => {
            svc.toggle_schedule(id, true).await?;
            println!("Enabled: {id}");
        }
        ScheduleAction::Disable { id } => {
            svc.toggle_schedule(id, false).await?;
            println!("Disabled: {id}");
        }
        ScheduleAction::Delete { id } => {
            svc.delete_schedule(id).await?;
            println!("Deleted: {id}");
        }
    }
    Ok(())
}

async fn handle_benchmark(svc: &ReportService, action: BenchmarkAction) -> anyhow::Result<()> {
    match action {
        BenchmarkAction::Import { file } => {
            let reqs = match read_json::<OneOrMany<NewBenchmark>>(&file)? {
                OneOrMany::Many(v) => v,
                OneOrMany::One(b) => vec![b],
            };
            for req in reqs {
                let b = svc.create_benchmark(req).await?;
                println!("Imported benchmark {} ({}, {})", b.id, b.name, b.year);
            }
        }
        BenchmarkAction::Update { id, file } => {
            let req: NewBenchmark = read_json(&file)?;
            let b = svc.update_benchmark(id, req).await?;
            println!("Updated benchmark {} ({})", b.id, b.name);
        }
        BenchmarkAction::List {
            category,
            year,
            json,
        } => {
            let list = svc
                .list_benchmarks(BenchmarkFilter {
                    category,
                    year,
                    ..Default::default()
                })
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("No benchmarks.");
            } else {
                for b in list {
                    println!(
                        "{} {} [{} {} {} {}] {} metrics{}",
                        b.id,
                        b.name,
                        b.category,
                        b.methodology.as_deref().unwrap_or("*"),
                        b.region.as_deref().unwrap_or("*"),
                        b.year,
                        b.metrics.len(),
                        if b.is_active { "" } else { " (inactive)" }
                    );
                }
            }
        }
        BenchmarkAction::Show { id } => {
            let b = svc.get_benchmark(id).await?;
            println!("{}", serde_json::to_string_pretty(&b)?);
        }
        BenchmarkAction::Delete { id } => {
            svc.delete_benchmark(id).await?;
            println!("Deleted: {id}");
        }
    }
    Ok(())
}

async fn handle_widget(svc: &ReportService, action: WidgetAction) -> anyhow::Result<()> {
    match action {
        WidgetAction::Save { file } => {
            let widget: DashboardWidget = read_json(&file)?;
            let saved = svc.save_widget(widget).await?;
            println!("Saved widget {} ({})", saved.id, saved.title);
        }
        WidgetAction::List { user, section } => {
            let widgets = svc.list_widgets(user, section.as_deref()).await?;
            if widgets.is_empty() {
                println!("No widgets.");
            }
            for w in widgets {
                println!(
                    "{:>3} {} {} [{} {}] {}",
                    w.position, w.id, w.title, w.widget_type, w.size, w.dashboard_section
                );
            }
        }
        WidgetAction::Delete { id } => {
            svc.delete_widget(id).await?;
            println!("Deleted: {id}");
        }
    }
    Ok(())
}

async fn handle_config(svc: &ReportService, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match svc.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            svc.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = svc.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

async fn print_status(db: &Database) -> anyhow::Result<()> {
    let stats = db
        .reader()
        .call(|conn| {
            let count = |sql: &str| conn.query_row(sql, [], |row| row.get::<_, i64>(0));
            let reports = count("SELECT COUNT(*) FROM report_definitions WHERE deleted_at IS NULL")?;
            let templates = count(
                "SELECT COUNT(*) FROM report_definitions WHERE deleted_at IS NULL AND is_template = 1",
            )?;
            let schedules = count("SELECT COUNT(*) FROM report_schedules WHERE is_active = 1")?;
            let executions = count("SELECT COUNT(*) FROM report_executions")?;
            let failed = count("SELECT COUNT(*) FROM report_executions WHERE status = 'failed'")?;
            let benchmarks = count("SELECT COUNT(*) FROM benchmark_datasets WHERE is_active = 1")?;
            let widgets = count("SELECT COUNT(*) FROM dashboard_widgets")?;
            let last_run: Option<String> = conn
                .query_row(
                    "SELECT MAX(completed_at) FROM report_executions WHERE status = 'completed'",
                    [],
                    |row| row.get(0),
                )
                .ok()
                .flatten();
            Ok::<_, rusqlite::Error>((
                reports, templates, schedules, executions, failed, benchmarks, widgets, last_run,
            ))
        })
        .await?;

    let (reports, templates, schedules, executions, failed, benchmarks, widgets, last_run) = stats;
    println!("Analytics Store Status");
    println!("  Reports:    {reports} ({templates} templates)");
    println!("  Schedules:  {schedules} active");
    println!("  Executions: {executions} ({failed} failed)");
    println!("  Benchmarks: {benchmarks} active");
    println!("  Widgets:    {widgets}");
    println!(
        "  Last run:   {}",
        last_run.unwrap_or_else(|| "never".to_string())
    );
    Ok(())
}
