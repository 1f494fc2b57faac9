//! Query construction.
//!
//! Turns a [`QueryRequest`] into SQL text plus positional parameters. Column
//! names are never interpolated unless they appear in the table's schema,
//! and every user-supplied value travels as a `$n` parameter.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Table queried when none is configured.
pub const DEFAULT_TABLE: &str = "mvr";

pub const MAX_GROUP_BY_COLUMNS: usize = 5;
pub const MAX_FILTERS: usize = 10;
pub const GROUPED_LIMIT_RANGE: (u32, u32) = (10, 10_000);
pub const RAW_LIMIT_RANGE: (u32, u32) = (10, 5_000);

/// Rendered in place of NULL group keys.
pub const NULL_LABEL: &str = "(null)";

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("Invalid column name detected: {0}")]
    UnknownColumn(String),

    #[error("Please select at least one column to group by")]
    NoGroupColumns,

    #[error("Select at most 5 columns to group by (got {0})")]
    TooManyGroupColumns(usize),

    #[error("No columns selected for raw mode")]
    NoDisplayColumns,

    #[error("At most 10 filters are supported (got {0})")]
    TooManyFilters(usize),

    #[error("Limit {limit} is outside the allowed range {min}-{max}")]
    LimitOutOfRange { limit: u32, min: u32, max: u32 },

    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Which shape of query to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QueryMode {
    /// Counts rows per distinct combination of the group-by columns.
    Grouped,
    /// Returns individual records.
    Raw,
}

/// Comparison applied by a single filter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterOp {
    Equals,
    Contains,
    IsOneOf,
    Gt,
    Lt,
    Gte,
    Lte,
    IsNull,
    NotNull,
}

impl FilterOp {
    pub const ALL: [FilterOp; 9] = [
        FilterOp::Equals,
        FilterOp::Contains,
        FilterOp::IsOneOf,
        FilterOp::Gt,
        FilterOp::Lt,
        FilterOp::Gte,
        FilterOp::Lte,
        FilterOp::IsNull,
        FilterOp::NotNull,
    ];

    /// Label shown in the dashboard and accepted from the form.
    pub fn label(self) -> &'static str {
        match self {
            FilterOp::Equals => "equals",
            FilterOp::Contains => "contains",
            FilterOp::IsOneOf => "is one of",
            FilterOp::Gt => ">",
            FilterOp::Lt => "<",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
            FilterOp::IsNull => "is null",
            FilterOp::NotNull => "not null",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.label() == label)
    }

    /// Whether the operator reads the filter's value at all.
    pub fn takes_value(self) -> bool {
        !matches!(self, FilterOp::IsNull | FilterOp::NotNull)
    }

    fn comparison(self) -> Option<&'static str> {
        match self {
            FilterOp::Gt => Some(">"),
            FilterOp::Lt => Some("<"),
            FilterOp::Gte => Some(">="),
            FilterOp::Lte => Some("<="),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Option<String>,
}

impl Filter {
    pub fn new(column: impl Into<String>, op: FilterOp, value: Option<&str>) -> Self {
        Filter {
            column: column.into(),
            op,
            value: value.map(str::to_string),
        }
    }

    /// A filter is active once it has a value, or needs none.
    pub fn is_active(&self) -> bool {
        !self.op.takes_value() || self.value.as_deref().is_some_and(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    fn sql(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

/// Everything needed to build one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub mode: QueryMode,
    pub group_by: Vec<String>,
    /// `None` or `Some("*")` counts every row in the group.
    pub count_column: Option<String>,
    pub columns: Vec<String>,
    pub sort: Option<(String, SortOrder)>,
    pub filters: Vec<Filter>,
    pub limit: u32,
}

/// A positional query parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Param {
    Text(String),
    Number(f64),
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Param::Number(n) => write!(f, "{n}"),
        }
    }
}

impl duckdb::ToSql for Param {
    fn to_sql(&self) -> duckdb::Result<duckdb::types::ToSqlOutput<'_>> {
        match self {
            Param::Text(s) => s.to_sql(),
            Param::Number(n) => n.to_sql(),
        }
    }
}

/// SQL text and the parameters its `$n` placeholders refer to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<Param>,
}

// ============================================================================
// BUILDING
// ============================================================================

/// Check that `table` is a plain, optionally dotted, SQL identifier path.
pub fn validate_table_name(table: &str) -> Result<(), QueryError> {
    let valid = !table.is_empty()
        && table.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(QueryError::InvalidTable(table.to_string()))
    }
}

/// Parse `value` as a finite number, if it is one. `inf` and `nan` stay
/// text, so comparisons against them fall back to VARCHAR ordering.
fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Split an "is one of" value on newlines and commas, dropping blanks.
pub fn split_values(value: &str) -> Vec<String> {
    value
        .split(['\n', ','])
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn quote(column: &str) -> String {
    format!("\"{}\"", column.replace('"', "\"\""))
}

fn check_columns<'a>(
    columns: impl IntoIterator<Item = &'a str>,
    available: &[String],
) -> Result<(), QueryError> {
    for column in columns {
        if !available.iter().any(|c| c == column) {
            return Err(QueryError::UnknownColumn(column.to_string()));
        }
    }
    Ok(())
}

/// Build the SQL condition for one filter, appending its parameters.
///
/// Returns `None` when the filter contributes nothing (e.g. an empty
/// "is one of" list).
fn filter_condition(filter: &Filter, params: &mut Vec<Param>) -> Option<String> {
    let col = quote(&filter.column);
    let value = filter.value.as_deref().unwrap_or("");

    match filter.op {
        FilterOp::IsNull => Some(format!("{col} IS NULL")),
        FilterOp::NotNull => Some(format!("{col} IS NOT NULL")),
        FilterOp::Contains => {
            params.push(Param::Text(format!("%{value}%")));
            Some(format!("CAST({col} AS VARCHAR) ILIKE ${}", params.len()))
        }
        FilterOp::Equals => {
            params.push(Param::Text(value.to_string()));
            Some(format!("CAST({col} AS VARCHAR) = ${}", params.len()))
        }
        FilterOp::IsOneOf => {
            let values = split_values(value);
            if values.is_empty() {
                return None;
            }
            let placeholders: Vec<String> = values
                .into_iter()
                .map(|v| {
                    params.push(Param::Text(v));
                    format!("${}", params.len())
                })
                .collect();
            Some(format!(
                "CAST({col} AS VARCHAR) IN ({})",
                placeholders.join(", ")
            ))
        }
        FilterOp::Gt | FilterOp::Lt | FilterOp::Gte | FilterOp::Lte => {
            let op = filter.op.comparison()?;
            match parse_number(value) {
                Some(n) => {
                    params.push(Param::Number(n));
                    Some(format!("TRY_CAST({col} AS DOUBLE) {op} ${}", params.len()))
                }
                None => {
                    params.push(Param::Text(value.to_string()));
                    Some(format!("CAST({col} AS VARCHAR) {op} ${}", params.len()))
                }
            }
        }
    }
}

fn check_limit(limit: u32, (min, max): (u32, u32)) -> Result<(), QueryError> {
    if (min..=max).contains(&limit) {
        Ok(())
    } else {
        Err(QueryError::LimitOutOfRange { limit, min, max })
    }
}

/// Build a parameterised query against `table`.
///
/// `available` is the table's column list; any other column name is
/// rejected before any SQL is produced.
pub fn build_query(
    table: &str,
    request: &QueryRequest,
    available: &[String],
) -> Result<BuiltQuery, QueryError> {
    validate_table_name(table)?;

    if request.filters.len() > MAX_FILTERS {
        return Err(QueryError::TooManyFilters(request.filters.len()));
    }

    let count_column = request.count_column.as_deref().filter(|c| *c != "*");
    let sort_column = request.sort.as_ref().map(|(c, _)| c.as_str());
    check_columns(
        request
            .group_by
            .iter()
            .map(String::as_str)
            .chain(count_column)
            .chain(request.columns.iter().map(String::as_str))
            .chain(sort_column)
            .chain(request.filters.iter().map(|f| f.column.as_str())),
        available,
    )?;

    let mut params = Vec::new();
    let conditions: Vec<String> = request
        .filters
        .iter()
        .filter(|f| f.is_active())
        .filter_map(|f| filter_condition(f, &mut params))
        .collect();
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("\nWHERE {}", conditions.join(" AND "))
    };

    let sql = match request.mode {
        QueryMode::Grouped => {
            if request.group_by.is_empty() {
                return Err(QueryError::NoGroupColumns);
            }
            if request.group_by.len() > MAX_GROUP_BY_COLUMNS {
                return Err(QueryError::TooManyGroupColumns(request.group_by.len()));
            }
            check_limit(request.limit, GROUPED_LIMIT_RANGE)?;

            // NULL keys become a readable label; COUNT(*) still counts those rows.
            let keys: Vec<String> = request
                .group_by
                .iter()
                .map(|c| format!("COALESCE(CAST({} AS VARCHAR), '{NULL_LABEL}')", quote(c)))
                .collect();
            let select: Vec<String> = keys
                .iter()
                .zip(&request.group_by)
                .map(|(key, c)| format!("{key} AS {}", quote(c)))
                .collect();

            // Keys break count ties so the cut at LIMIT is stable across runs.
            format!(
                "SELECT {}, COUNT(*) AS count\nFROM {table}{where_clause}\nGROUP BY {keys}\nORDER BY count DESC, {keys}\nLIMIT {}",
                select.join(", "),
                request.limit,
                keys = keys.join(", "),
            )
        }
        QueryMode::Raw => {
            if request.columns.is_empty() {
                return Err(QueryError::NoDisplayColumns);
            }
            check_limit(request.limit, RAW_LIMIT_RANGE)?;

            let columns: Vec<String> = request.columns.iter().map(|c| quote(c)).collect();
            let order_clause = request
                .sort
                .as_ref()
                .map(|(c, order)| format!("\nORDER BY {} {}", quote(c), order.sql()))
                .unwrap_or_default();

            format!(
                "SELECT {}\nFROM {table}{where_clause}{order_clause}\nLIMIT {}",
                columns.join(", "),
                request.limit
            )
        }
    };

    Ok(BuiltQuery { sql, params })
}
