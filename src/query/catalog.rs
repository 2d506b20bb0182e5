use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::report::{AggregateFunction, FilterOperator, ReportConfig, Value};

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Date,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldMetadata {
    pub name: &'static str,
    pub display_name: &'static str,
    pub data_type: FieldType,
    pub aggregatable: bool,
    pub filterable: bool,
    pub groupable: bool,
    pub allowed_values: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetMetadata {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub fields: Vec<FieldMetadata>,
    pub join_with: &'static [&'static str],
}

impl DatasetMetadata {
    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.iter().find(|f| f.name == name)
    }
}

fn field(
    name: &'static str,
    display_name: &'static str,
    data_type: FieldType,
    flags: (bool, bool, bool),
) -> FieldMetadata {
    FieldMetadata {
        name,
        display_name,
        data_type,
        aggregatable: flags.0,
        filterable: flags.1,
        groupable: flags.2,
        allowed_values: &[],
    }
}

fn with_values(mut f: FieldMetadata, values: &'static [&'static str]) -> FieldMetadata {
    f.allowed_values = values;
    f
}

// (aggregatable, filterable, groupable)
const AGG: (bool, bool, bool) = (true, false, false);
const FILTER: (bool, bool, bool) = (false, true, false);
const FILTER_GROUP: (bool, bool, bool) = (false, true, true);

static CATALOG: LazyLock<Vec<DatasetMetadata>> = LazyLock::new(|| {
    use FieldType::*;
    vec![
        DatasetMetadata {
            name: "projects",
            display_name: "Projects",
            description: "Carbon credit projects including details, status, and metrics",
            fields: vec![
                field("id", "Project ID", String, FILTER_GROUP),
                field("name", "Project Name", String, FILTER),
                with_values(
                    field("status", "Status", String, FILTER_GROUP),
                    &["active", "pending", "completed", "cancelled"],
                ),
                field("methodology", "Methodology", String, FILTER_GROUP),
                field("region", "Region", String, FILTER_GROUP),
                field("total_area_hectares", "Total Area (ha)", Number, AGG),
                field("estimated_credits", "Estimated Credits", Number, AGG),
                field("created_at", "Created Date", Date, FILTER_GROUP),
            ],
            join_with: &["carbon_credits", "monitoring_data"],
        },
        DatasetMetadata {
            name: "carbon_credits",
            display_name: "Carbon Credits",
            description: "Issued and traded carbon credits",
            fields: vec![
                field("id", "Credit ID", String, FILTER),
                field("project_id", "Project ID", String, FILTER_GROUP),
                field("quantity", "Quantity", Number, AGG),
                field("vintage_year", "Vintage Year", Number, FILTER_GROUP),
                with_values(
                    field("status", "Status", String, FILTER_GROUP),
                    &["issued", "retired", "transferred", "pending"],
                ),
                field("price_per_credit", "Price per Credit", Number, AGG),
                field("issued_at", "Issued Date", Date, FILTER_GROUP),
            ],
            join_with: &["projects", "transactions"],
        },
        DatasetMetadata {
            name: "transactions",
            display_name: "Transactions",
            description: "Financial transactions and revenue",
            fields: vec![
                field("id", "Transaction ID", String, FILTER),
                with_values(
                    field("type", "Type", String, FILTER_GROUP),
                    &["sale", "purchase", "retirement", "transfer"],
                ),
                field("amount", "Amount", Number, AGG),
                field("currency", "Currency", String, FILTER_GROUP),
                field("status", "Status", String, FILTER_GROUP),
                field("created_at", "Date", Date, FILTER_GROUP),
            ],
            join_with: &["carbon_credits"],
        },
        DatasetMetadata {
            name: "monitoring_data",
            display_name: "Monitoring Data",
            description: "Environmental monitoring measurements",
            fields: vec![
                field("id", "Reading ID", String, FILTER),
                field("project_id", "Project ID", String, FILTER_GROUP),
                field("metric_type", "Metric Type", String, FILTER_GROUP),
                field("value", "Value", Number, AGG),
                field("unit", "Unit", String, FILTER),
                field("recorded_at", "Recorded Date", Date, FILTER_GROUP),
            ],
            join_with: &["projects"],
        },
    ]
});

/// All built-in datasets, in display order.
pub fn datasets() -> &'static [DatasetMetadata] {
    &CATALOG
}

pub fn dataset(name: &str) -> Option<&'static DatasetMetadata> {
    CATALOG.iter().find(|d| d.name == name)
}

/// Check a report configuration against the catalog before it is compiled.
///
/// The compiler trusts names verbatim, so this is the gate that keeps
/// unknown datasets and fields out of generated query text.
pub fn validate(config: &ReportConfig) -> Result<()> {
    if config.dataset.trim().is_empty() {
        return Err(Error::InvalidConfig("dataset is required".into()));
    }
    if config.fields.is_empty() {
        return Err(Error::InvalidConfig("at least one field is required".into()));
    }
    let ds = dataset(&config.dataset)
        .ok_or_else(|| Error::InvalidConfig(format!("unknown dataset: {}", config.dataset)))?;

    let lookup = |name: &str| {
        ds.field(name).ok_or_else(|| {
            Error::InvalidConfig(format!("unknown field {name} in dataset {}", ds.name))
        })
    };

    let mut output_names: Vec<Cow<'_, str>> = Vec::new();

    for f in &config.fields {
        let meta = lookup(&f.name)?;
        match f.aggregate {
            Some(AggregateFunction::Count) | None => {}
            Some(agg) if !meta.aggregatable => {
                return Err(Error::InvalidConfig(format!(
                    "field {} cannot be aggregated with {}",
                    f.name,
                    agg.as_sql()
                )));
            }
            Some(_) => {}
        }
        if let Some(ref alias) = f.alias {
            check_identifier(alias)?;
        }
        output_names.push(f.output_key());
    }

    for calc in &config.calculations {
        check_identifier(&calc.name)?;
        if calc.expression.trim().is_empty() {
            return Err(Error::InvalidConfig(format!(
                "calculation {} has an empty expression",
                calc.name
            )));
        }
        output_names.push(Cow::Borrowed(&calc.name));
    }

    for filter in &config.filters {
        let meta = lookup(&filter.field)?;
        if !meta.filterable {
            return Err(Error::InvalidConfig(format!(
                "field {} is not filterable",
                filter.field
            )));
        }
        check_allowed_values(meta, filter.operator, &filter.value)?;
    }

    for group in &config.groupings {
        let meta = lookup(&group.field)?;
        if !meta.groupable {
            return Err(Error::InvalidConfig(format!(
                "field {} is not groupable",
                group.field
            )));
        }
        if group.time_grain.unit().is_some() && meta.data_type != FieldType::Date {
            return Err(Error::InvalidConfig(format!(
                "time grain requires a date field, {} is {:?}",
                group.field, meta.data_type
            )));
        }
    }

    for sort in &config.sorts {
        if ds.field(&sort.field).is_none() && !output_names.iter().any(|n| **n == *sort.field) {
            return Err(Error::InvalidConfig(format!(
                "sort field {} is neither a dataset field nor an output column",
                sort.field
            )));
        }
    }

    Ok(())
}

fn check_identifier(name: &str) -> Result<()> {
    if IDENTIFIER_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidConfig(format!("invalid identifier: {name}")))
    }
}

fn check_allowed_values(meta: &FieldMetadata, op: FilterOperator, value: &Value) -> Result<()> {
    if meta.allowed_values.is_empty() {
        return Ok(());
    }
    let candidates: Vec<&Value> = match (op, value) {
        (FilterOperator::Eq | FilterOperator::Ne, v) => vec![v],
        (FilterOperator::In, Value::List(items)) => items.iter().collect(),
        _ => return Ok(()),
    };
    for v in candidates {
        if let Value::Text(s) = v {
            if !meta.allowed_values.contains(&s.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "value {s} is not allowed for {} (expected one of: {})",
                    meta.name,
                    meta.allowed_values.join(", ")
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{FieldConfig, FilterConfig, GroupConfig, SortConfig, TimeGrain};

    fn base() -> ReportConfig {
        ReportConfig {
            dataset: "carbon_credits".into(),
            fields: vec![
                FieldConfig::new("status"),
                FieldConfig::new("quantity")
                    .aggregate(AggregateFunction::Sum)
                    .alias("total_quantity"),
            ],
            groupings: vec![GroupConfig {
                field: "status".into(),
                time_grain: TimeGrain::None,
            }],
            sorts: vec![SortConfig {
                field: "total_quantity".into(),
                direction: "desc".into(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_catalog_lists_builtin_datasets() {
        let names: Vec<&str> = datasets().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            vec!["projects", "carbon_credits", "transactions", "monitoring_data"]
        );
        assert!(dataset("transactions").unwrap().field("amount").unwrap().aggregatable);
    }

    #[test]
    fn test_validate_accepts_well_formed_config() {
        validate(&base()).unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_dataset_and_field() {
        let mut cfg = base();
        cfg.dataset = "widgets".into();
        assert!(validate(&cfg).is_err());

        let mut cfg = base();
        cfg.fields.push(FieldConfig::new("nope"));
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn test_validate_rejects_aggregating_text() {
        let mut cfg = base();
        cfg.fields.push(FieldConfig::new("status").aggregate(AggregateFunction::Sum));
        assert!(validate(&cfg).is_err());

        let mut cfg = base();
        cfg.fields.push(FieldConfig::new("status").aggregate(AggregateFunction::Count));
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_validate_checks_allowed_values() {
        let mut cfg = base();
        cfg.filters
            .push(FilterConfig::new("status", FilterOperator::In, vec!["issued", "burned"]));
        assert!(validate(&cfg).is_err());

        let mut cfg = base();
        cfg.filters
            .push(FilterConfig::new("status", FilterOperator::Eq, "retired"));
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_validate_time_grain_requires_date() {
        let mut cfg = base();
        cfg.groupings[0].time_grain = TimeGrain::Month;
        assert!(validate(&cfg).is_err());

        let mut cfg = base();
        cfg.groupings.push(GroupConfig {
            field: "issued_at".into(),
            time_grain: TimeGrain::Month,
        });
        validate(&cfg).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_alias() {
        let mut cfg = base();
        cfg.fields[1].alias = Some("total; DROP TABLE x".into());
        assert!(validate(&cfg).is_err());
    }
}
