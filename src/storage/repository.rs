use std::fmt::Display;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row as SqlRow};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::benchmark::{BenchmarkDataset, BenchmarkQuery};
use crate::report::{
    DashboardWidget, ExecutionStatus, ReportCategory, ReportDefinition, ReportExecution,
    ReportSchedule, Visibility,
};

// ── Filters and pages ──────────────────────────────────────────────

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportFilter {
    /// Reports owned by this user plus every public report.
    pub user_id: Option<Uuid>,
    pub category: Option<ReportCategory>,
    pub visibility: Option<Visibility>,
    pub is_template: Option<bool>,
    /// Case-insensitive substring of the name or description.
    pub search: Option<String>,
    /// 1-based; 0 is treated as 1.
    pub page: u32,
    /// 0 selects [`DEFAULT_PAGE_SIZE`].
    pub page_size: u32,
}

impl ReportFilter {
    fn page(&self) -> u32 {
        self.page.max(1)
    }

    fn page_size(&self) -> u32 {
        if self.page_size == 0 {
            DEFAULT_PAGE_SIZE
        } else {
            self.page_size
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionFilter {
    pub report_definition_id: Option<Uuid>,
    pub status: Option<ExecutionStatus>,
    pub limit: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkFilter {
    pub category: Option<String>,
    pub methodology: Option<String>,
    pub region: Option<String>,
    pub year: Option<i32>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u32, page_size: u32) -> Self {
        let total_pages = total.div_ceil(u64::from(page_size.max(1))) as u32;
        Self {
            items,
            total,
            page,
            page_size,
            total_pages,
        }
    }
}

/// Accumulates `WHERE` conditions and their positional arguments.
#[derive(Default)]
struct Conditions {
    clauses: Vec<String>,
    args: Vec<SqlValue>,
}

impl Conditions {
    fn push(&mut self, clause: &str, args: impl IntoIterator<Item = SqlValue>) {
        self.clauses.push(clause.to_string());
        self.args.extend(args);
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn text(s: impl Into<String>) -> SqlValue {
    SqlValue::Text(s.into())
}

// ── Report definitions ─────────────────────────────────────────────

const REPORT_COLUMNS: &str = "id, name, description, category, config, created_by, visibility, \
     version, is_template, based_on_template_id, created_at, updated_at, deleted_at";

pub fn insert_report(conn: &Connection, report: &ReportDefinition) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO report_definitions (id, name, description, category, config, created_by,
           visibility, version, is_template, based_on_template_id, created_at, updated_at, deleted_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            report.id.to_string(),
            report.name,
            report.description,
            report.category.as_str(),
            to_json(&report.config)?,
            report.created_by.map(|u| u.to_string()),
            report.visibility.as_str(),
            report.version,
            report.is_template,
            report.based_on_template_id.map(|u| u.to_string()),
            fmt_ts(&report.created_at),
            fmt_ts(&report.updated_at),
            report.deleted_at.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(())
}

/// Live (not soft-deleted) report by id.
pub fn get_report(conn: &Connection, id: &Uuid) -> Result<Option<ReportDefinition>, rusqlite::Error> {
    conn.query_row(
        &format!(
            "SELECT {REPORT_COLUMNS} FROM report_definitions WHERE id = ?1 AND deleted_at IS NULL"
        ),
        params![id.to_string()],
        map_report,
    )
    .optional()
}

/// Overwrite every mutable column. Returns false when the report is
/// missing or deleted.
pub fn update_report(conn: &Connection, report: &ReportDefinition) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE report_definitions SET name = ?2, description = ?3, category = ?4, config = ?5,
           visibility = ?6, version = ?7, is_template = ?8, updated_at = ?9
         WHERE id = ?1 AND deleted_at IS NULL",
        params![
            report.id.to_string(),
            report.name,
            report.description,
            report.category.as_str(),
            to_json(&report.config)?,
            report.visibility.as_str(),
            report.version,
            report.is_template,
            fmt_ts(&report.updated_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn soft_delete_report(
    conn: &Connection,
    id: &Uuid,
    at: &DateTime<Utc>,
) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE report_definitions SET deleted_at = ?2 WHERE id = ?1 AND deleted_at IS NULL",
        params![id.to_string(), fmt_ts(at)],
    )?;
    Ok(count > 0)
}

/// Matching live reports, most recently updated first, and the total match
/// count before pagination.
pub fn list_reports(
    conn: &Connection,
    filter: &ReportFilter,
) -> Result<(Vec<ReportDefinition>, u64), rusqlite::Error> {
    let mut cond = Conditions::default();
    cond.push("deleted_at IS NULL", []);
    if let Some(user) = filter.user_id {
        cond.push("(created_by = ? OR visibility = 'public')", [text(user.to_string())]);
    }
    if let Some(category) = filter.category {
        cond.push("category = ?", [text(category.as_str())]);
    }
    if let Some(visibility) = filter.visibility {
        cond.push("visibility = ?", [text(visibility.as_str())]);
    }
    if let Some(is_template) = filter.is_template {
        cond.push("is_template = ?", [SqlValue::Integer(i64::from(is_template))]);
    }
    if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
        let pattern = format!("%{search}%");
        cond.push(
            "(name LIKE ? OR description LIKE ?)",
            [text(pattern.clone()), text(pattern)],
        );
    }
    let where_sql = cond.sql();

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM report_definitions{where_sql}"),
        params_from_iter(cond.args.iter()),
        |row| row.get(0),
    )?;

    let page_size = filter.page_size();
    let offset = (filter.page() - 1) * page_size;
    let mut args = cond.args;
    args.push(SqlValue::Integer(i64::from(page_size)));
    args.push(SqlValue::Integer(i64::from(offset)));

    let mut stmt = conn.prepare(&format!(
        "SELECT {REPORT_COLUMNS} FROM report_definitions{where_sql}
         ORDER BY updated_at DESC, id LIMIT ? OFFSET ?"
    ))?;
    let rows = stmt.query_map(params_from_iter(args.iter()), map_report)?;
    let items = rows.collect::<Result<Vec<_>, _>>()?;
    Ok((items, total as u64))
}

/// Public templates ordered by name.
pub fn list_templates(conn: &Connection) -> Result<Vec<ReportDefinition>, rusqlite::Error> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {REPORT_COLUMNS} FROM report_definitions
         WHERE is_template = 1 AND visibility = 'public' AND deleted_at IS NULL
         ORDER BY name"
    ))?;
    let rows = stmt.query_map([], map_report)?;
    rows.collect()
}

fn map_report(row: &SqlRow<'_>) -> Result<ReportDefinition, rusqlite::Error> {
    Ok(ReportDefinition {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: parse_col(row, 3)?,
        config: json_col(row, 4)?,
        created_by: opt_uuid_col(row, 5)?,
        visibility: parse_col(row, 6)?,
        version: row.get(7)?,
        is_template: row.get(8)?,
        based_on_template_id: opt_uuid_col(row, 9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
        deleted_at: opt_ts_col(row, 12)?,
    })
}

// ── Executions ─────────────────────────────────────────────────────

const EXECUTION_COLUMNS: &str = "id, report_definition_id, triggered_by, status, format, \
     record_count, file_size_bytes, file_key, error_message, triggered_at, completed_at";

pub fn insert_execution(conn: &Connection, exec: &ReportExecution) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO report_executions (id, report_definition_id, triggered_by, status, format,
           record_count, file_size_bytes, file_key, error_message, triggered_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            exec.id.to_string(),
            exec.report_definition_id.map(|u| u.to_string()),
            exec.triggered_by.map(|u| u.to_string()),
            exec.status.as_str(),
            exec.format.as_str(),
            exec.record_count,
            exec.file_size_bytes,
            exec.file_key,
            exec.error_message,
            fmt_ts(&exec.triggered_at),
            exec.completed_at.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(())
}

pub fn get_execution(conn: &Connection, id: &Uuid) -> Result<Option<ReportExecution>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {EXECUTION_COLUMNS} FROM report_executions WHERE id = ?1"),
        params![id.to_string()],
        map_execution,
    )
    .optional()
}

/// Persist status and outcome columns.
pub fn update_execution(conn: &Connection, exec: &ReportExecution) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE report_executions SET status = ?2, record_count = ?3, file_size_bytes = ?4,
           file_key = ?5, error_message = ?6, completed_at = ?7
         WHERE id = ?1",
        params![
            exec.id.to_string(),
            exec.status.as_str(),
            exec.record_count,
            exec.file_size_bytes,
            exec.file_key,
            exec.error_message,
            exec.completed_at.as_ref().map(fmt_ts),
        ],
    )?;
    Ok(count > 0)
}

/// Newest first.
pub fn list_executions(
    conn: &Connection,
    filter: &ExecutionFilter,
) -> Result<Vec<ReportExecution>, rusqlite::Error> {
    let mut cond = Conditions::default();
    if let Some(report_id) = filter.report_definition_id {
        cond.push("report_definition_id = ?", [text(report_id.to_string())]);
    }
    if let Some(status) = filter.status {
        cond.push("status = ?", [text(status.as_str())]);
    }
    let limit = if filter.limit == 0 {
        i64::from(DEFAULT_PAGE_SIZE)
    } else {
        i64::from(filter.limit)
    };
    let mut args = cond.args.clone();
    args.push(SqlValue::Integer(limit));

    let mut stmt = conn.prepare(&format!(
        "SELECT {EXECUTION_COLUMNS} FROM report_executions{}
         ORDER BY triggered_at DESC, id LIMIT ?",
        cond.sql()
    ))?;
    let rows = stmt.query_map(params_from_iter(args.iter()), map_execution)?;
    rows.collect()
}

fn map_execution(row: &SqlRow<'_>) -> Result<ReportExecution, rusqlite::Error> {
    Ok(ReportExecution {
        id: uuid_col(row, 0)?,
        report_definition_id: opt_uuid_col(row, 1)?,
        triggered_by: opt_uuid_col(row, 2)?,
        status: parse_col(row, 3)?,
        format: parse_col(row, 4)?,
        record_count: row.get(5)?,
        file_size_bytes: row.get(6)?,
        file_key: row.get(7)?,
        error_message: row.get(8)?,
        triggered_at: ts_col(row, 9)?,
        completed_at: opt_ts_col(row, 10)?,
    })
}

// ── Schedules ──────────────────────────────────────────────────────

const SCHEDULE_COLUMNS: &str = "id, report_definition_id, name, cron_expression, timezone, \
     is_active, format, delivery_method, recipient_emails, webhook_url, created_by, created_at, \
     updated_at";

pub fn insert_schedule(conn: &Connection, s: &ReportSchedule) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO report_schedules (id, report_definition_id, name, cron_expression, timezone,
           is_active, format, delivery_method, recipient_emails, webhook_url, created_by,
           created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            s.id.to_string(),
            s.report_definition_id.to_string(),
            s.name,
            s.cron_expression,
            s.timezone,
            s.is_active,
            s.format.as_str(),
            s.delivery_method.as_str(),
            to_json(&s.recipient_emails)?,
            s.webhook_url,
            s.created_by.map(|u| u.to_string()),
            fmt_ts(&s.created_at),
            fmt_ts(&s.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_schedule(conn: &Connection, id: &Uuid) -> Result<Option<ReportSchedule>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {SCHEDULE_COLUMNS} FROM report_schedules WHERE id = ?1"),
        params![id.to_string()],
        map_schedule,
    )
    .optional()
}

pub fn list_schedules(
    conn: &Connection,
    report_id: Option<&Uuid>,
) -> Result<Vec<ReportSchedule>, rusqlite::Error> {
    let mut cond = Conditions::default();
    if let Some(id) = report_id {
        cond.push("report_definition_id = ?", [text(id.to_string())]);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {SCHEDULE_COLUMNS} FROM report_schedules{} ORDER BY created_at, id",
        cond.sql()
    ))?;
    let rows = stmt.query_map(params_from_iter(cond.args.iter()), map_schedule)?;
    rows.collect()
}

pub fn set_schedule_active(
    conn: &Connection,
    id: &Uuid,
    active: bool,
    at: &DateTime<Utc>,
) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE report_schedules SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
        params![id.to_string(), active, fmt_ts(at)],
    )?;
    Ok(count > 0)
}

pub fn delete_schedule(conn: &Connection, id: &Uuid) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "DELETE FROM report_schedules WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(count > 0)
}

fn map_schedule(row: &SqlRow<'_>) -> Result<ReportSchedule, rusqlite::Error> {
    Ok(ReportSchedule {
        id: uuid_col(row, 0)?,
        report_definition_id: uuid_col(row, 1)?,
        name: row.get(2)?,
        cron_expression: row.get(3)?,
        timezone: row.get(4)?,
        is_active: row.get(5)?,
        format: parse_col(row, 6)?,
        delivery_method: parse_col(row, 7)?,
        recipient_emails: json_col(row, 8)?,
        webhook_url: row.get(9)?,
        created_by: opt_uuid_col(row, 10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

// ── Benchmarks ─────────────────────────────────────────────────────

const BENCHMARK_COLUMNS: &str = "id, name, description, category, methodology, region, year, \
     source, confidence_score, is_active, metrics, created_at, updated_at";

pub fn insert_benchmark(conn: &Connection, b: &BenchmarkDataset) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO benchmark_datasets (id, name, description, category, methodology, region,
           year, source, confidence_score, is_active, metrics, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            b.id.to_string(),
            b.name,
            b.description,
            b.category,
            b.methodology,
            b.region,
            b.year,
            b.source,
            b.confidence_score,
            b.is_active,
            to_json(&b.metrics)?,
            fmt_ts(&b.created_at),
            fmt_ts(&b.updated_at),
        ],
    )?;
    Ok(())
}

pub fn update_benchmark(conn: &Connection, b: &BenchmarkDataset) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "UPDATE benchmark_datasets SET name = ?2, description = ?3, category = ?4,
           methodology = ?5, region = ?6, year = ?7, source = ?8, confidence_score = ?9,
           is_active = ?10, metrics = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            b.id.to_string(),
            b.name,
            b.description,
            b.category,
            b.methodology,
            b.region,
            b.year,
            b.source,
            b.confidence_score,
            b.is_active,
            to_json(&b.metrics)?,
            fmt_ts(&b.updated_at),
        ],
    )?;
    Ok(count > 0)
}

pub fn get_benchmark(conn: &Connection, id: &Uuid) -> Result<Option<BenchmarkDataset>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {BENCHMARK_COLUMNS} FROM benchmark_datasets WHERE id = ?1"),
        params![id.to_string()],
        map_benchmark,
    )
    .optional()
}

pub fn delete_benchmark(conn: &Connection, id: &Uuid) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "DELETE FROM benchmark_datasets WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(count > 0)
}

/// Newest year first, then category.
pub fn list_benchmarks(
    conn: &Connection,
    filter: &BenchmarkFilter,
) -> Result<Vec<BenchmarkDataset>, rusqlite::Error> {
    let mut cond = Conditions::default();
    if let Some(ref category) = filter.category {
        cond.push("category = ?", [text(category.as_str())]);
    }
    if let Some(ref methodology) = filter.methodology {
        cond.push("methodology = ?", [text(methodology.as_str())]);
    }
    if let Some(ref region) = filter.region {
        cond.push("region = ?", [text(region.as_str())]);
    }
    if let Some(year) = filter.year {
        cond.push("year = ?", [SqlValue::Integer(i64::from(year))]);
    }
    if let Some(active) = filter.is_active {
        cond.push("is_active = ?", [SqlValue::Integer(i64::from(active))]);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {BENCHMARK_COLUMNS} FROM benchmark_datasets{} ORDER BY year DESC, category, name",
        cond.sql()
    ))?;
    let rows = stmt.query_map(params_from_iter(cond.args.iter()), map_benchmark)?;
    rows.collect()
}

/// Most recent active dataset for the category. Methodology, region and
/// year narrow the match only when given.
pub fn find_benchmark(
    conn: &Connection,
    query: &BenchmarkQuery,
) -> Result<Option<BenchmarkDataset>, rusqlite::Error> {
    let mut cond = Conditions::default();
    cond.push("category = ?", [text(query.category.as_str())]);
    cond.push("is_active = 1", []);
    if let Some(m) = query.methodology.as_deref().filter(|m| !m.is_empty()) {
        cond.push("methodology = ?", [text(m)]);
    }
    if let Some(r) = query.region.as_deref().filter(|r| !r.is_empty()) {
        cond.push("region = ?", [text(r)]);
    }
    if let Some(year) = query.year.filter(|y| *y > 0) {
        cond.push("year = ?", [SqlValue::Integer(i64::from(year))]);
    }
    conn.query_row(
        &format!(
            "SELECT {BENCHMARK_COLUMNS} FROM benchmark_datasets{}
             ORDER BY year DESC, updated_at DESC LIMIT 1",
            cond.sql()
        ),
        params_from_iter(cond.args.iter()),
        map_benchmark,
    )
    .optional()
}

fn map_benchmark(row: &SqlRow<'_>) -> Result<BenchmarkDataset, rusqlite::Error> {
    Ok(BenchmarkDataset {
        id: uuid_col(row, 0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        methodology: row.get(4)?,
        region: row.get(5)?,
        year: row.get(6)?,
        source: row.get(7)?,
        confidence_score: row.get(8)?,
        is_active: row.get(9)?,
        metrics: json_col(row, 10)?,
        created_at: ts_col(row, 11)?,
        updated_at: ts_col(row, 12)?,
    })
}

// ── Dashboard widgets ──────────────────────────────────────────────

const WIDGET_COLUMNS: &str = "id, user_id, dashboard_section, widget_type, title, config, size, \
     position, refresh_interval_seconds, is_visible, created_at, updated_at";

/// Insert, or overwrite everything but `created_at` when the id exists.
pub fn upsert_widget(conn: &Connection, w: &DashboardWidget) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO dashboard_widgets (id, user_id, dashboard_section, widget_type, title, config,
           size, position, refresh_interval_seconds, is_visible, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT(id) DO UPDATE SET
           user_id = excluded.user_id,
           dashboard_section = excluded.dashboard_section,
           widget_type = excluded.widget_type,
           title = excluded.title,
           config = excluded.config,
           size = excluded.size,
           position = excluded.position,
           refresh_interval_seconds = excluded.refresh_interval_seconds,
           is_visible = excluded.is_visible,
           updated_at = excluded.updated_at",
        params![
            w.id.to_string(),
            w.user_id.map(|u| u.to_string()),
            w.dashboard_section,
            w.widget_type.as_str(),
            w.title,
            to_json(&w.config)?,
            w.size.as_str(),
            w.position,
            w.refresh_interval_seconds,
            w.is_visible,
            fmt_ts(&w.created_at),
            fmt_ts(&w.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_widget(conn: &Connection, id: &Uuid) -> Result<Option<DashboardWidget>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT {WIDGET_COLUMNS} FROM dashboard_widgets WHERE id = ?1"),
        params![id.to_string()],
        map_widget,
    )
    .optional()
}

/// Widgets for a user (including shared widgets with no owner) and/or a
/// section, ordered by position.
pub fn list_widgets(
    conn: &Connection,
    user_id: Option<&Uuid>,
    section: Option<&str>,
) -> Result<Vec<DashboardWidget>, rusqlite::Error> {
    let mut cond = Conditions::default();
    if let Some(user) = user_id {
        cond.push("(user_id = ? OR user_id IS NULL)", [text(user.to_string())]);
    }
    if let Some(section) = section {
        cond.push("dashboard_section = ?", [text(section)]);
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {WIDGET_COLUMNS} FROM dashboard_widgets{} ORDER BY position, id",
        cond.sql()
    ))?;
    let rows = stmt.query_map(params_from_iter(cond.args.iter()), map_widget)?;
    rows.collect()
}

pub fn delete_widget(conn: &Connection, id: &Uuid) -> Result<bool, rusqlite::Error> {
    let count = conn.execute(
        "DELETE FROM dashboard_widgets WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(count > 0)
}

/// Reposition a user's widgets atomically. Widgets owned by someone else
/// are left untouched.
pub fn update_widget_positions(
    conn: &mut Connection,
    user_id: &Uuid,
    positions: &[(Uuid, i64)],
    at: &DateTime<Utc>,
) -> Result<usize, rusqlite::Error> {
    let tx = conn.transaction()?;
    let mut updated = 0;
    for (id, position) in positions {
        updated += tx.execute(
            "UPDATE dashboard_widgets SET position = ?3, updated_at = ?4
             WHERE id = ?1 AND user_id = ?2",
            params![id.to_string(), user_id.to_string(), position, fmt_ts(at)],
        )?;
    }
    tx.commit()?;
    Ok(updated)
}

fn map_widget(row: &SqlRow<'_>) -> Result<DashboardWidget, rusqlite::Error> {
    Ok(DashboardWidget {
        id: uuid_col(row, 0)?,
        user_id: opt_uuid_col(row, 1)?,
        dashboard_section: row.get(2)?,
        widget_type: parse_col(row, 3)?,
        title: row.get(4)?,
        config: json_col(row, 5)?,
        size: parse_col(row, 6)?,
        position: row.get(7)?,
        refresh_interval_seconds: row.get(8)?,
        is_visible: row.get(9)?,
        created_at: ts_col(row, 10)?,
        updated_at: ts_col(row, 11)?,
    })
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

// ── Helpers ────────────────────────────────────────────────────────

pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn conversion_error(idx: usize, e: impl Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.to_string().into())
}

fn to_json<T: Serialize>(value: &T) -> Result<String, rusqlite::Error> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn json_col<T: serde::de::DeserializeOwned>(row: &SqlRow<'_>, idx: usize) -> Result<T, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn parse_col<T>(row: &SqlRow<'_>, idx: usize) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: Display,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn uuid_col(row: &SqlRow<'_>, idx: usize) -> Result<Uuid, rusqlite::Error> {
    parse_col(row, idx)
}

fn opt_uuid_col(row: &SqlRow<'_>, idx: usize) -> Result<Option<Uuid>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, e)))
        .transpose()
}

fn parse_ts(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn ts_col(row: &SqlRow<'_>, idx: usize) -> Result<DateTime<Utc>, rusqlite::Error> {
    let raw: String = row.get(idx)?;
    parse_ts(idx, &raw)
}

fn opt_ts_col(row: &SqlRow<'_>, idx: usize) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_ts(idx, &s)).transpose()
}
