use serde::Serialize;

use crate::error::{Error, Result};
use crate::report::{FilterConfig, FilterLogic, FilterOperator, ReportConfig, Value};

/// Query text with positional `?` placeholders and the arguments bound to
/// them, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Compile a report configuration into an aggregation query.
///
/// Output is a pure function of the input: identical configs always yield
/// identical text and arguments. Field and group names are emitted as given;
/// callers are expected to have validated them against the dataset catalog.
pub fn compile(config: &ReportConfig) -> Result<CompiledQuery> {
    check_compilable(config)?;

    let mut select = Vec::with_capacity(config.fields.len() + config.calculations.len());
    for field in &config.fields {
        let mut expr = field.select_expr().into_owned();
        if let Some(ref alias) = field.alias {
            expr.push_str(" AS ");
            expr.push_str(alias);
        }
        select.push(expr);
    }
    for calc in &config.calculations {
        select.push(format!("({}) AS {}", calc.expression, calc.name));
    }

    let mut sql = format!("SELECT {} FROM {}", select.join(", "), config.dataset);

    let (wheres, args) = build_where(&config.filters);
    if !wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&wheres.join(" AND "));
    }

    if !config.groupings.is_empty() {
        let groups: Vec<String> = config
            .groupings
            .iter()
            .map(|g| match g.time_grain.unit() {
                Some(unit) => format!("date_trunc('{unit}', {})", g.field),
                None => g.field.clone(),
            })
            .collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&groups.join(", "));
    }

    if !config.sorts.is_empty() {
        let sorts: Vec<String> = config
            .sorts
            .iter()
            .map(|s| {
                let dir = if s.is_descending() { "DESC" } else { "ASC" };
                format!("{} {dir}", s.field)
            })
            .collect();
        sql.push_str(" ORDER BY ");
        sql.push_str(&sorts.join(", "));
    }

    if config.limit > 0 {
        sql.push_str(&format!(" LIMIT {}", config.limit));
    }

    Ok(CompiledQuery { sql, args })
}

/// Compile the matching row-count query: same dataset, same filters, same
/// arguments.
pub fn compile_count(config: &ReportConfig) -> Result<CompiledQuery> {
    if config.dataset.trim().is_empty() {
        return Err(Error::InvalidConfig("dataset is required".into()));
    }
    check_logic(&config.filters)?;

    let mut sql = format!("SELECT COUNT(*) FROM {}", config.dataset);
    let (wheres, args) = build_where(&config.filters);
    if !wheres.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&wheres.join(" AND "));
    }
    Ok(CompiledQuery { sql, args })
}

fn check_compilable(config: &ReportConfig) -> Result<()> {
    if config.dataset.trim().is_empty() {
        return Err(Error::InvalidConfig("dataset is required".into()));
    }
    if config.fields.is_empty() && config.calculations.is_empty() {
        return Err(Error::InvalidConfig(
            "at least one field or calculation is required".into(),
        ));
    }
    check_logic(&config.filters)
}

// Only conjunction is supported; an OR request is rejected rather than
// silently compiled as AND.
fn check_logic(filters: &[FilterConfig]) -> Result<()> {
    match filters.iter().find(|f| f.logic == Some(FilterLogic::Or)) {
        Some(f) => Err(Error::InvalidConfig(format!(
            "OR filter logic is not supported (filter on {})",
            f.field
        ))),
        None => Ok(()),
    }
}

fn build_where(filters: &[FilterConfig]) -> (Vec<String>, Vec<Value>) {
    let mut wheres = Vec::new();
    let mut args = Vec::new();
    for filter in filters {
        if let Some((condition, mut filter_args)) = build_condition(filter) {
            wheres.push(condition);
            args.append(&mut filter_args);
        }
    }
    (wheres, args)
}

/// A single WHERE condition and its arguments, or `None` when the filter's
/// value has the wrong shape for its operator.
fn build_condition(filter: &FilterConfig) -> Option<(String, Vec<Value>)> {
    let field = &filter.field;
    let simple = |op: &str| Some((format!("{field} {op} ?"), vec![filter.value.clone()]));

    match filter.operator {
        FilterOperator::Eq | FilterOperator::Unknown => simple("="),
        FilterOperator::Ne => simple("!="),
        FilterOperator::Gt => simple(">"),
        FilterOperator::Gte => simple(">="),
        FilterOperator::Lt => simple("<"),
        FilterOperator::Lte => simple("<="),
        FilterOperator::Like => Some((
            format!("{field} ILIKE ?"),
            vec![Value::Text(format!("%{}%", filter.value))],
        )),
        FilterOperator::In => {
            let items = filter.value.as_list()?;
            Some((
                format!("{field} = ANY(?)"),
                vec![Value::List(items.to_vec())],
            ))
        }
        FilterOperator::Between => match filter.value.as_list()? {
            [low, high] => Some((
                format!("{field} BETWEEN ? AND ?"),
                vec![low.clone(), high.clone()],
            )),
            _ => None,
        },
        FilterOperator::IsNull => Some((format!("{field} IS NULL"), Vec::new())),
        FilterOperator::IsNotNull => Some((format!("{field} IS NOT NULL"), Vec::new())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{
        AggregateFunction, CalculationConfig, FieldConfig, GroupConfig, SortConfig, TimeGrain,
    };

    fn credits_total() -> ReportConfig {
        ReportConfig {
            dataset: "credits".into(),
            fields: vec![FieldConfig::new("amount")
                .aggregate(AggregateFunction::Sum)
                .alias("total")],
            filters: vec![FilterConfig::new("year", FilterOperator::Eq, 2024)],
            ..Default::default()
        }
    }

    #[test]
    fn test_compile_sum_with_filter() {
        let q = compile(&credits_total()).unwrap();
        assert_eq!(q.sql, "SELECT SUM(amount) AS total FROM credits WHERE year = ?");
        assert_eq!(q.args, vec![Value::Int(2024)]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let cfg = credits_total();
        assert_eq!(compile(&cfg).unwrap(), compile(&cfg).unwrap());
    }

    #[test]
    fn test_compile_full_shape() {
        let cfg = ReportConfig {
            dataset: "transactions".into(),
            fields: vec![
                FieldConfig::new("currency"),
                FieldConfig::new("amount").aggregate(AggregateFunction::Avg),
            ],
            calculations: vec![CalculationConfig {
                name: "margin".into(),
                expression: "SUM(amount) - SUM(cost)".into(),
                data_type: None,
            }],
            groupings: vec![
                GroupConfig {
                    field: "currency".into(),
                    time_grain: TimeGrain::None,
                },
                GroupConfig {
                    field: "created_at".into(),
                    time_grain: TimeGrain::Quarter,
                },
            ],
            sorts: vec![
                SortConfig {
                    field: "currency".into(),
                    direction: "asc".into(),
                },
                SortConfig {
                    field: "margin".into(),
                    direction: "Desc".into(),
                },
            ],
            limit: 25,
            ..Default::default()
        };
        let q = compile(&cfg).unwrap();
        assert_eq!(
            q.sql,
            "SELECT currency, AVG(amount), (SUM(amount) - SUM(cost)) AS margin FROM transactions \
             GROUP BY currency, date_trunc('quarter', created_at) \
             ORDER BY currency ASC, margin DESC LIMIT 25"
        );
        assert!(q.args.is_empty());
    }

    #[test]
    fn test_operator_mapping() {
        let cases = [
            (FilterOperator::Ne, "x != ?"),
            (FilterOperator::Gt, "x > ?"),
            (FilterOperator::Gte, "x >= ?"),
            (FilterOperator::Lt, "x < ?"),
            (FilterOperator::Lte, "x <= ?"),
            (FilterOperator::Unknown, "x = ?"),
        ];
        for (op, expected) in cases {
            let cfg = ReportConfig {
                dataset: "d".into(),
                fields: vec![FieldConfig::new("x")],
                filters: vec![FilterConfig::new("x", op, 5)],
                ..Default::default()
            };
            let q = compile(&cfg).unwrap();
            assert_eq!(q.sql, format!("SELECT x FROM d WHERE {expected}"), "{op:?}");
            assert_eq!(q.args, vec![Value::Int(5)]);
        }
    }

    #[test]
    fn test_like_in_between_and_null_checks() {
        let cfg = ReportConfig {
            dataset: "projects".into(),
            fields: vec![FieldConfig::new("name")],
            filters: vec![
                FilterConfig::new("name", FilterOperator::Like, "forest"),
                FilterConfig::new("status", FilterOperator::In, vec!["active", "pending"]),
                FilterConfig::new("area", FilterOperator::Between, vec![10, 20]),
                FilterConfig::new("region", FilterOperator::IsNull, Value::Null),
                FilterConfig::new("methodology", FilterOperator::IsNotNull, Value::Null),
            ],
            ..Default::default()
        };
        let q = compile(&cfg).unwrap();
        assert_eq!(
            q.sql,
            "SELECT name FROM projects WHERE name ILIKE ? AND status = ANY(?) \
             AND area BETWEEN ? AND ? AND region IS NULL AND methodology IS NOT NULL"
        );
        assert_eq!(
            q.args,
            vec![
                Value::Text("%forest%".into()),
                Value::List(vec![Value::Text("active".into()), Value::Text("pending".into())]),
                Value::Int(10),
                Value::Int(20),
            ]
        );
    }

    #[test]
    fn test_malformed_between_and_in_are_skipped() {
        let cfg = ReportConfig {
            dataset: "d".into(),
            fields: vec![FieldConfig::new("x")],
            filters: vec![
                FilterConfig::new("a", FilterOperator::Between, vec![1, 2, 3]),
                FilterConfig::new("b", FilterOperator::Between, 7),
                FilterConfig::new("c", FilterOperator::In, "scalar"),
                FilterConfig::new("d", FilterOperator::Eq, 1),
            ],
            ..Default::default()
        };
        let q = compile(&cfg).unwrap();
        assert_eq!(q.sql, "SELECT x FROM d WHERE d = ?");
        assert_eq!(q.args, vec![Value::Int(1)]);
    }

    #[test]
    fn test_zero_limit_omitted() {
        let mut cfg = credits_total();
        cfg.limit = 0;
        assert!(!compile(&cfg).unwrap().sql.contains("LIMIT"));
        cfg.limit = -3;
        assert!(!compile(&cfg).unwrap().sql.contains("LIMIT"));
    }

    #[test]
    fn test_compile_count_shares_filters() {
        let cfg = credits_total();
        let q = compile_count(&cfg).unwrap();
        assert_eq!(q.sql, "SELECT COUNT(*) FROM credits WHERE year = ?");
        assert_eq!(q.args, compile(&cfg).unwrap().args);

        let bare = ReportConfig {
            dataset: "credits".into(),
            ..Default::default()
        };
        assert_eq!(compile_count(&bare).unwrap().sql, "SELECT COUNT(*) FROM credits");
    }

    #[test]
    fn test_compile_rejects_bad_configs() {
        let empty_dataset = ReportConfig {
            fields: vec![FieldConfig::new("x")],
            ..Default::default()
        };
        assert!(matches!(compile(&empty_dataset), Err(Error::InvalidConfig(_))));

        let no_select = ReportConfig {
            dataset: "d".into(),
            ..Default::default()
        };
        assert!(matches!(compile(&no_select), Err(Error::InvalidConfig(_))));

        let mut or_logic = credits_total();
        or_logic.filters[0].logic = Some(FilterLogic::Or);
        assert!(matches!(compile(&or_logic), Err(Error::InvalidConfig(_))));
        assert!(matches!(compile_count(&or_logic), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_explicit_and_logic_compiles() {
        let mut cfg = credits_total();
        cfg.filters[0].logic = Some(FilterLogic::And);
        assert!(compile(&cfg).is_ok());
    }
}
