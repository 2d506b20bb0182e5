use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Declarative description of an aggregation query over one dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    pub dataset: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    #[serde(default)]
    pub groupings: Vec<GroupConfig>,
    #[serde(default)]
    pub sorts: Vec<SortConfig>,
    #[serde(default)]
    pub calculations: Vec<CalculationConfig>,
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateFunction>,
    #[serde(default)]
    pub sort_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl FieldConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn aggregate(mut self, agg: AggregateFunction) -> Self {
        self.aggregate = Some(agg);
        self
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The select-list expression for this field, without its alias.
    pub fn select_expr(&self) -> Cow<'_, str> {
        match self.aggregate {
            Some(agg) => Cow::Owned(format!("{}({})", agg.as_sql(), self.name)),
            None => Cow::Borrowed(&self.name),
        }
    }

    /// The column key this field produces in result rows: the alias when
    /// set, otherwise the select expression the store names the column by.
    pub fn output_key(&self) -> Cow<'_, str> {
        match self.alias {
            Some(ref alias) => Cow::Borrowed(alias),
            None => self.select_expr(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Count,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            AggregateFunction::Sum => "SUM",
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default = "null_value")]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logic: Option<FilterLogic>,
}

fn null_value() -> Value {
    Value::Null
}

impl FilterConfig {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            logic: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    Between,
    IsNull,
    IsNotNull,
    /// Any operator name this build does not recognise. Compiles as `=`.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilterLogic {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupConfig {
    pub field: String,
    #[serde(default)]
    pub time_grain: TimeGrain,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGrain {
    #[default]
    None,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGrain {
    /// The `date_trunc` unit, or `None` when no truncation applies.
    pub fn unit(self) -> Option<&'static str> {
        match self {
            TimeGrain::None => None,
            TimeGrain::Hour => Some("hour"),
            TimeGrain::Day => Some("day"),
            TimeGrain::Week => Some("week"),
            TimeGrain::Month => Some("month"),
            TimeGrain::Quarter => Some("quarter"),
            TimeGrain::Year => Some("year"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortConfig {
    pub field: String,
    #[serde(default)]
    pub direction: String,
}

impl SortConfig {
    pub fn is_descending(&self) -> bool {
        self.direction.eq_ignore_ascii_case("desc")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    pub name: String,
    pub expression: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_full_config() {
        let json = r#"{
            "dataset": "credits",
            "fields": [{"name": "amount", "aggregate": "SUM", "alias": "total"}],
            "filters": [{"field": "year", "operator": "eq", "value": 2024}],
            "groupings": [{"field": "issued_at", "time_grain": "month"}],
            "sorts": [{"field": "total", "direction": "desc"}],
            "limit": 10
        }"#;
        let cfg: ReportConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.dataset, "credits");
        assert_eq!(cfg.fields[0].aggregate, Some(AggregateFunction::Sum));
        assert_eq!(cfg.fields[0].output_key(), "total");
        assert_eq!(cfg.filters[0].operator, FilterOperator::Eq);
        assert_eq!(cfg.filters[0].value, Value::Int(2024));
        assert_eq!(cfg.groupings[0].time_grain, TimeGrain::Month);
        assert!(cfg.sorts[0].is_descending());
        assert_eq!(cfg.limit, 10);
    }

    #[test]
    fn test_output_key_follows_select_expression() {
        let plain = FieldConfig::new("vintage_year");
        assert_eq!(plain.output_key(), "vintage_year");

        let summed = FieldConfig::new("quantity").aggregate(AggregateFunction::Sum);
        assert_eq!(summed.select_expr(), "SUM(quantity)");
        assert_eq!(summed.output_key(), "SUM(quantity)");

        let aliased = summed.alias("total");
        assert_eq!(aliased.select_expr(), "SUM(quantity)");
        assert_eq!(aliased.output_key(), "total");
    }

    #[test]
    fn test_unknown_operator_deserializes() {
        let f: FilterConfig =
            serde_json::from_str(r#"{"field": "x", "operator": "regex", "value": "a"}"#).unwrap();
        assert_eq!(f.operator, FilterOperator::Unknown);
    }

    #[test]
    fn test_missing_filter_value_is_null() {
        let f: FilterConfig =
            serde_json::from_str(r#"{"field": "x", "operator": "is_null"}"#).unwrap();
        assert_eq!(f.value, Value::Null);
    }

    #[test]
    fn test_sort_direction_case_insensitive() {
        let s = SortConfig {
            field: "a".into(),
            direction: "DESC".into(),
        };
        assert!(s.is_descending());
        let s = SortConfig {
            field: "a".into(),
            direction: "sideways".into(),
        };
        assert!(!s.is_descending());
    }
}
