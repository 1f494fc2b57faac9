//! Dashboard view state.
//!
//! The sidebar is a plain GET form, so the whole view state travels in the
//! query string. Multi-selects repeat their key (`group_by=MAKE&group_by=MODEL`)
//! and filter rows are indexed (`filter_col_0`, `filter_op_0`, `filter_val_0`).

use crate::query::{Filter, FilterOp, QueryMode, QueryRequest, SortOrder, MAX_FILTERS};
use std::collections::HashMap;
use thiserror::Error;
use url::form_urlencoded;

/// Columns shown in raw mode on first visit, when the table has them.
pub const DEFAULT_RAW_COLUMNS: [&str; 7] = [
    "MAKE",
    "MODEL",
    "VEHICLE_YEAR",
    "MOTIVE_POWER",
    "VEHICLE_TYPE",
    "BODY_TYPE",
    "TLA",
];

/// Grouped mode groups by this column on first visit, when present.
pub const DEFAULT_GROUP_COLUMN: &str = "MOTIVE_POWER";

pub const DEFAULT_LIMIT: u32 = 100;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewError {
    #[error("Unknown query mode: {0}")]
    UnknownMode(String),

    #[error("Unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("Unknown sort order: {0}")]
    UnknownSortOrder(String),

    #[error("{field} must be a whole number, got '{value}'")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Number of filters must be between 0 and 10 (got {0})")]
    TooManyFilters(usize),
}

/// Which sidebar button submitted the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Re-render the builder and SQL preview without querying.
    Preview,
    Run,
    AddFilter,
    RemoveFilter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub mode: QueryMode,
    pub group_by: Vec<String>,
    pub count_column: String,
    pub columns: Vec<String>,
    pub sort: Option<(String, SortOrder)>,
    /// Every filter row in the sidebar, including ones still missing a value.
    pub filters: Vec<Filter>,
    /// Each mode keeps its own limit, so switching modes never carries a
    /// grouped limit into the smaller raw range.
    pub grouped_limit: u32,
    pub raw_limit: u32,
    pub action: Action,
}

pub fn mode_key(mode: QueryMode) -> &'static str {
    match mode {
        QueryMode::Grouped => "grouped",
        QueryMode::Raw => "raw",
    }
}

pub fn order_key(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Ascending => "asc",
        SortOrder::Descending => "desc",
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ViewError> {
    value.trim().parse().map_err(|_| ViewError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

impl ViewState {
    /// The view a first-time visitor sees.
    pub fn initial(available: &[String]) -> Self {
        let group_by = available
            .iter()
            .find(|c| *c == DEFAULT_GROUP_COLUMN)
            .or_else(|| available.first())
            .cloned()
            .into_iter()
            .collect();

        let mut columns: Vec<String> = DEFAULT_RAW_COLUMNS
            .iter()
            .filter(|c| available.iter().any(|a| a == *c))
            .map(|c| c.to_string())
            .collect();
        if columns.is_empty() {
            columns = available.iter().take(7).cloned().collect();
        }

        ViewState {
            mode: QueryMode::Grouped,
            group_by,
            count_column: "*".to_string(),
            columns,
            sort: None,
            filters: Vec::new(),
            grouped_limit: DEFAULT_LIMIT,
            raw_limit: DEFAULT_LIMIT,
            action: Action::Preview,
        }
    }

    /// Parse a submitted form. A missing or empty query string is a first visit.
    pub fn parse(query: Option<&str>, available: &[String]) -> Result<Self, ViewError> {
        let query = query.unwrap_or("");
        let mut single: HashMap<String, String> = HashMap::new();
        let mut group_by = Vec::new();
        let mut columns = Vec::new();
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "group_by" => group_by.push(value.into_owned()),
                "columns" => columns.push(value.into_owned()),
                _ => {
                    single.insert(key.into_owned(), value.into_owned());
                }
            }
        }

        let Some(mode) = single.get("mode") else {
            return Ok(Self::initial(available));
        };
        let mode = match mode.as_str() {
            "grouped" => QueryMode::Grouped,
            "raw" => QueryMode::Raw,
            other => return Err(ViewError::UnknownMode(other.to_string())),
        };

        let action = match single.get("action").map(String::as_str) {
            Some("run") => Action::Run,
            Some("add_filter") => Action::AddFilter,
            Some("remove_filter") => Action::RemoveFilter,
            _ => Action::Preview,
        };

        let filter_count: usize = match single.get("filters") {
            Some(v) if !v.trim().is_empty() => parse_number("Number of filters", v)?,
            _ => 0,
        };
        if filter_count > MAX_FILTERS {
            return Err(ViewError::TooManyFilters(filter_count));
        }

        let mut filters = Vec::with_capacity(filter_count);
        for i in 0..filter_count {
            let column = single
                .get(&format!("filter_col_{i}"))
                .cloned()
                .or_else(|| available.first().cloned())
                .unwrap_or_default();
            let op = match single.get(&format!("filter_op_{i}")) {
                Some(label) => FilterOp::from_label(label)
                    .ok_or_else(|| ViewError::UnknownOperator(label.clone()))?,
                None => FilterOp::Equals,
            };
            let value = single
                .get(&format!("filter_val_{i}"))
                .filter(|_| op.takes_value())
                .map(String::as_str);
            filters.push(Filter::new(column, op, value));
        }

        match action {
            Action::AddFilter if filters.len() < MAX_FILTERS => {
                filters.push(Filter::new(
                    available.first().cloned().unwrap_or_default(),
                    FilterOp::Equals,
                    None,
                ));
            }
            Action::RemoveFilter => {
                filters.pop();
            }
            _ => {}
        }

        let sort = match single.get("sort").map(String::as_str) {
            None | Some("") => None,
            Some(column) => {
                let order = match single.get("order").map(String::as_str) {
                    None | Some("asc") => SortOrder::Ascending,
                    Some("desc") => SortOrder::Descending,
                    Some(other) => return Err(ViewError::UnknownSortOrder(other.to_string())),
                };
                Some((column.to_string(), order))
            }
        };

        let limit = |key: &str| match single.get(key) {
            Some(v) => parse_number("Maximum results", v),
            None => Ok(DEFAULT_LIMIT),
        };
        let grouped_limit = limit("grouped_limit")?;
        let raw_limit = limit("raw_limit")?;

        Ok(ViewState {
            mode,
            group_by,
            count_column: single
                .get("count")
                .cloned()
                .unwrap_or_else(|| "*".to_string()),
            columns,
            sort,
            filters,
            grouped_limit,
            raw_limit,
            action,
        })
    }

    pub fn to_request(&self) -> QueryRequest {
        QueryRequest {
            mode: self.mode,
            group_by: self.group_by.clone(),
            count_column: Some(self.count_column.clone()),
            columns: self.columns.clone(),
            sort: self.sort.clone(),
            filters: self.filters.clone(),
            limit: self.limit(),
        }
    }

    /// The limit of the selected mode.
    pub fn limit(&self) -> u32 {
        match self.mode {
            QueryMode::Grouped => self.grouped_limit,
            QueryMode::Raw => self.raw_limit,
        }
    }

    /// Form field holding the limit of the selected mode.
    pub fn limit_key(&self) -> &'static str {
        match self.mode {
            QueryMode::Grouped => "grouped_limit",
            QueryMode::Raw => "raw_limit",
        }
    }

    /// Serialise back into the form encoding `parse` reads.
    pub fn to_query_string(&self) -> String {
        let mut out = form_urlencoded::Serializer::new(String::new());
        out.append_pair("mode", mode_key(self.mode));
        for column in &self.group_by {
            out.append_pair("group_by", column);
        }
        out.append_pair("count", &self.count_column);
        for column in &self.columns {
            out.append_pair("columns", column);
        }
        if let Some((column, order)) = &self.sort {
            out.append_pair("sort", column);
            out.append_pair("order", order_key(*order));
        }
        out.append_pair("filters", &self.filters.len().to_string());
        for (i, filter) in self.filters.iter().enumerate() {
            out.append_pair(&format!("filter_col_{i}"), &filter.column);
            out.append_pair(&format!("filter_op_{i}"), filter.op.label());
            if let Some(value) = &filter.value {
                out.append_pair(&format!("filter_val_{i}"), value);
            }
        }
        out.append_pair("grouped_limit", &self.grouped_limit.to_string());
        out.append_pair("raw_limit", &self.raw_limit.to_string());
        out.finish()
    }
}
