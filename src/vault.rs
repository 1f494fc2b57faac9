//! The Vault: remote data store access
//!
//! Owns the single DuckDB connection the dashboard queries through. In
//! production that connection points at MotherDuck (`md:` URLs); tests and
//! local runs use an in-memory database.
//!
//! Architecture:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         VAULT                                    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  DuckDB connection (Mutex)                                       │
//! │  └── md:<database>?motherduck_token=...  → <table>              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Schema Cache (1h)                                               │
//! │  ├── columns: DESCRIBE <table>                                  │
//! │  └── row_count: SELECT COUNT(*)                                 │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Result Cache (5m)                                               │
//! │  └── (sql, params) → ResultSet                                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use crate::query::{validate_table_name, BuiltQuery, Param};
use crate::secrets::Credential;
use chrono::{DateTime, NaiveDate, NaiveTime};
use duckdb::types::{TimeUnit, Value, ValueRef};
use duckdb::{params_from_iter, Connection};
use log::{debug, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long the column list and row count are reused.
pub const SCHEMA_TTL: Duration = Duration::from_secs(3600);

/// How long a successful query result is reused.
pub const RESULT_TTL: Duration = Duration::from_secs(300);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Failed to connect to MotherDuck: {0}")]
    ConnectionError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    #[error("Table {0} has no columns. Have you uploaded your data and named it {0}?")]
    EmptySchema(String),
}

impl From<duckdb::Error> for VaultError {
    fn from(e: duckdb::Error) -> Self {
        VaultError::DatabaseError(e.to_string())
    }
}

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// A single value in a result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    /// Numeric view of the cell, used for counts and chart bars.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(v) => Some(*v as f64),
            Cell::Float(v) => Some(*v),
            _ => None,
        }
    }

    fn from_value_ref(value: ValueRef<'_>) -> Cell {
        Cell::scalar(value).unwrap_or_else(|| Cell::Text(value_text(&Value::from(value))))
    }

    /// Cells for single values. `None` for containers and types with no
    /// readable rendering here.
    fn scalar(value: ValueRef<'_>) -> Option<Cell> {
        let cell = match value {
            ValueRef::Null => Cell::Null,
            ValueRef::Boolean(v) => Cell::Bool(v),
            ValueRef::TinyInt(v) => Cell::Int(v.into()),
            ValueRef::SmallInt(v) => Cell::Int(v.into()),
            ValueRef::Int(v) => Cell::Int(v.into()),
            ValueRef::BigInt(v) => Cell::Int(v),
            ValueRef::UTinyInt(v) => Cell::Int(v.into()),
            ValueRef::USmallInt(v) => Cell::Int(v.into()),
            ValueRef::UInt(v) => Cell::Int(v.into()),
            ValueRef::UBigInt(v) => match i64::try_from(v) {
                Ok(v) => Cell::Int(v),
                Err(_) => Cell::Float(v as f64),
            },
            ValueRef::HugeInt(v) => match i64::try_from(v) {
                Ok(v) => Cell::Int(v),
                Err(_) => Cell::Float(v as f64),
            },
            ValueRef::Float(v) => Cell::Float(v.into()),
            ValueRef::Double(v) => Cell::Float(v),
            ValueRef::Decimal(v) => Cell::Text(v.to_string()),
            ValueRef::Text(bytes) => Cell::Text(String::from_utf8_lossy(bytes).into_owned()),
            ValueRef::Blob(bytes) => Cell::Text(blob_text(bytes)),
            ValueRef::Date32(days) => date_text(days).map_or(Cell::Int(days.into()), Cell::Text),
            ValueRef::Timestamp(unit, v) => timestamp_text(unit, v).map_or(Cell::Int(v), Cell::Text),
            ValueRef::Time64(unit, v) => time_text(unit, v).map_or(Cell::Int(v), Cell::Text),
            ValueRef::Interval { months, days, nanos } => {
                Cell::Text(interval_text(months, days, nanos))
            }
            _ => return None,
        };
        Some(cell)
    }
}

// ============================================================================
// VALUE RENDERING
// ============================================================================

/// Days from 0001-01-01 to 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn micros(unit: TimeUnit, value: i64) -> Option<i64> {
    match unit {
        TimeUnit::Second => value.checked_mul(1_000_000),
        TimeUnit::Millisecond => value.checked_mul(1_000),
        TimeUnit::Microsecond => Some(value),
        TimeUnit::Nanosecond => Some(value / 1_000),
    }
}

fn date_text(days: i32) -> Option<String> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(UNIX_EPOCH_DAYS_FROM_CE)?)
        .map(|d| d.to_string())
}

fn timestamp_text(unit: TimeUnit, value: i64) -> Option<String> {
    DateTime::from_timestamp_micros(micros(unit, value)?).map(|t| t.naive_utc().to_string())
}

fn time_text(unit: TimeUnit, value: i64) -> Option<String> {
    let us = micros(unit, value)?;
    let secs = u32::try_from(us.div_euclid(1_000_000)).ok()?;
    let nanos = u32::try_from(us.rem_euclid(1_000_000) * 1_000).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nanos).map(|t| t.to_string())
}

/// `1 year 2 months 3 days 04:05:06`, dropping zero parts.
fn interval_text(months: i32, days: i32, nanos: i64) -> String {
    let mut parts = Vec::new();
    for (n, unit) in [(months / 12, "year"), (months % 12, "month"), (days, "day")] {
        if n != 0 {
            let plural = if n.abs() == 1 { "" } else { "s" };
            parts.push(format!("{n} {unit}{plural}"));
        }
    }
    if nanos != 0 || parts.is_empty() {
        let sign = if nanos < 0 { "-" } else { "" };
        let us = (nanos / 1_000).unsigned_abs();
        let mut clock = format!(
            "{sign}{:02}:{:02}:{:02}",
            us / 3_600_000_000,
            us / 60_000_000 % 60,
            us / 1_000_000 % 60
        );
        let fraction = us % 1_000_000;
        if fraction != 0 {
            clock.push_str(format!(".{fraction:06}").trim_end_matches('0'));
        }
        parts.push(clock);
    }
    parts.join(" ")
}

/// Printable ASCII as-is, every other byte as `\xNN`.
fn blob_text(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b == b' ' || (b.is_ascii_graphic() && b != b'\\') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("\\x{b:02X}"));
        }
    }
    out
}

/// Text for values with no scalar cell: enums, lists, structs, maps, unions.
fn value_text(value: &Value) -> String {
    let join = |items: Vec<String>| items.join(", ");
    match value {
        Value::Null => "NULL".to_string(),
        Value::Enum(label) => label.clone(),
        Value::List(items) | Value::Array(items) => {
            format!("[{}]", join(items.iter().map(value_text).collect()))
        }
        Value::Struct(fields) => format!(
            "{{{}}}",
            join(fields.iter().map(|(k, v)| format!("'{k}': {}", value_text(v))).collect())
        ),
        Value::Map(entries) => format!(
            "{{{}}}",
            join(entries.iter().map(|(k, v)| format!("{}={}", value_text(k), value_text(v))).collect())
        ),
        Value::Union(inner) => value_text(inner),
        other => Cell::scalar(ValueRef::from(other))
            .map(|cell| cell.to_string())
            .unwrap_or_else(|| format!("{other:?}")),
    }
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Null => Ok(()),
            Cell::Bool(v) => write!(f, "{v}"),
            Cell::Int(v) => write!(f, "{v}"),
            Cell::Float(v) => write!(f, "{v}"),
            Cell::Text(v) => f.write_str(v),
        }
    }
}

/// Tabular query output, in the order the database returned it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// A value plus the moment it was fetched.
struct Cached<T> {
    value: T,
    fetched_at: Instant,
}

impl<T: Clone> Cached<T> {
    fn new(value: T) -> Self {
        Cached {
            value,
            fetched_at: Instant::now(),
        }
    }

    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.fetched_at.elapsed() < ttl).then(|| self.value.clone())
    }
}

#[derive(Default)]
struct Caches {
    columns: Option<Cached<Vec<String>>>,
    row_count: Option<Cached<i64>>,
    results: HashMap<String, Cached<ResultSet>>,
}

fn cache_key(query: &BuiltQuery) -> String {
    let params: Vec<String> = query.params.iter().map(Param::to_string).collect();
    format!("{}\u{0}{}", query.sql, params.join("\u{0}"))
}

// ============================================================================
// THE VAULT
// ============================================================================

pub struct Vault {
    /// DuckDB connection (MotherDuck or in-memory)
    conn: Mutex<Connection>,
    /// Fully qualified table every query reads from
    table: String,
    caches: Mutex<Caches>,
}

impl Vault {
    /// Connect to MotherDuck with the loaded credential.
    ///
    /// `database` may be empty to use the account's default database.
    pub fn connect_motherduck(
        credential: &Credential,
        database: &str,
        table: &str,
    ) -> Result<Self, VaultError> {
        let url = format!("md:{}?motherduck_token={}", database, credential.expose());
        let conn = Connection::open(&url)
            .map_err(|e| VaultError::ConnectionError(e.to_string().replace(credential.expose(), "<redacted>")))?;
        info!(
            "Connected to MotherDuck database '{}'",
            if database.is_empty() { "(default)" } else { database }
        );
        Self::from_connection(conn, table)
    }

    pub fn from_connection(conn: Connection, table: &str) -> Result<Self, VaultError> {
        validate_table_name(table).map_err(|_| VaultError::InvalidTable(table.to_string()))?;
        Ok(Vault {
            conn: Mutex::new(conn),
            table: table.to_string(),
            caches: Mutex::new(Caches::default()),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, VaultError> {
        self.conn
            .lock()
            .map_err(|e| VaultError::DatabaseError(e.to_string()))
    }

    fn caches(&self) -> Result<MutexGuard<'_, Caches>, VaultError> {
        self.caches
            .lock()
            .map_err(|e| VaultError::DatabaseError(e.to_string()))
    }

    /// Column names of the table, in declaration order.
    pub fn columns(&self) -> Result<Vec<String>, VaultError> {
        if let Some(columns) = self.caches()?.columns.as_ref().and_then(|c| c.fresh(SCHEMA_TTL)) {
            return Ok(columns);
        }

        let columns = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!("DESCRIBE {}", self.table))?;
            let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
            names.collect::<Result<Vec<String>, _>>()?
        };

        if columns.is_empty() {
            return Err(VaultError::EmptySchema(self.table.clone()));
        }

        debug!("Schema for {}: {} columns", self.table, columns.len());
        self.caches()?.columns = Some(Cached::new(columns.clone()));
        Ok(columns)
    }

    /// Total number of rows in the table.
    pub fn row_count(&self) -> Result<i64, VaultError> {
        if let Some(count) = self.caches()?.row_count.as_ref().and_then(|c| c.fresh(SCHEMA_TTL)) {
            return Ok(count);
        }

        let count: i64 = self
            .conn()?
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| row.get(0))?;

        self.caches()?.row_count = Some(Cached::new(count));
        Ok(count)
    }

    /// Execute a built query, reusing a recent identical result.
    pub fn run(&self, query: &BuiltQuery) -> Result<ResultSet, VaultError> {
        let key = cache_key(query);
        if let Some(result) = self.caches()?.results.get(&key).and_then(|c| c.fresh(RESULT_TTL)) {
            debug!("Result cache hit ({} rows)", result.len());
            return Ok(result);
        }

        debug!("Executing SQL: {}", query.sql);
        let started = Instant::now();
        let result = self.execute(query)?;
        info!(
            "Query returned {} rows in {:.2}s",
            result.len(),
            started.elapsed().as_secs_f64()
        );

        let mut caches = self.caches()?;
        caches.results.retain(|_, c| c.fetched_at.elapsed() < RESULT_TTL);
        caches.results.insert(key, Cached::new(result.clone()));
        Ok(result)
    }

    fn execute(&self, query: &BuiltQuery) -> Result<ResultSet, VaultError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&query.sql)?;
        let mut rows = stmt.query(params_from_iter(query.params.iter()))?;

        let columns: Vec<String> = rows
            .as_ref()
            .map(|stmt| stmt.column_names())
            .unwrap_or_default();

        let mut results = Vec::new();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                cells.push(Cell::from_value_ref(row.get_ref(i)?));
            }
            results.push(cells);
        }

        Ok(ResultSet {
            columns,
            rows: results,
        })
    }

    /// Drop every cached schema and result entry.
    pub fn clear_cache(&self) -> Result<(), VaultError> {
        *self.caches()? = Caches::default();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::query::{build_query, Filter, FilterOp, QueryMode, QueryRequest, SortOrder};

    /// A small register with a known shape: 4 Toyotas, 3 Fords, 1 Honda,
    /// one vehicle with no make.
    pub(crate) fn seeded_vault() -> Vault {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
                r#"
                CREATE TABLE mvr (
                    "MAKE" VARCHAR,
                    "MODEL" VARCHAR,
                    "VEHICLE_YEAR" INTEGER,
                    "MOTIVE_POWER" VARCHAR,
                    "BODY_TYPE" VARCHAR,
                    "NUMBER_OF_SEATS" INTEGER
                );
                INSERT INTO mvr VALUES
                    ('Toyota', 'Corolla', 2018, 'PETROL', 'SEDAN', 5),
                    ('Toyota', 'Hilux', 2021, 'DIESEL', 'UTILITY', 5),
                    ('Toyota', 'Prius', 2015, 'PETROL HYBRID', 'HATCHBACK', 5),
                    ('Toyota', 'Hiace', 2022, 'DIESEL', 'VAN', 12),
                    ('Ford', 'Ranger', 2020, 'DIESEL', 'UTILITY', 5),
                    ('Ford', 'Ranger', 2023, 'DIESEL', 'UTILITY', 5),
                    ('Ford', 'Focus', 2012, 'PETROL', 'HATCHBACK', 5),
                    ('Honda', 'Jazz', 2010, 'PETROL', 'HATCHBACK', 5),
                    (NULL, 'Trailer', 1999, NULL, 'TRAILER', NULL);
            "#,
        )
        .unwrap();
        Vault::from_connection(conn, "mvr").unwrap()
    }

    fn empty_vault() -> Vault {
        Vault::from_connection(Connection::open_in_memory().unwrap(), "mvr").unwrap()
    }

    fn raw_request(filters: Vec<Filter>) -> QueryRequest {
        QueryRequest {
            mode: QueryMode::Raw,
            group_by: Vec::new(),
            count_column: None,
            columns: vec!["MAKE".into(), "MODEL".into(), "VEHICLE_YEAR".into()],
            sort: None,
            filters,
            limit: 5_000,
        }
    }

    fn run(vault: &Vault, request: &QueryRequest) -> ResultSet {
        let columns = vault.columns().unwrap();
        let built = build_query(vault.table(), request, &columns).unwrap();
        vault.run(&built).unwrap()
    }

    #[test]
    fn test_vault_creation() {
        let vault = empty_vault();
        assert_eq!(vault.table(), "mvr");
        let conn = Connection::open_in_memory().unwrap();
        assert!(matches!(
            Vault::from_connection(conn, "mvr; DROP TABLE mvr"),
            Err(VaultError::InvalidTable(_))
        ));
    }

    #[test]
    fn describes_columns_in_order() {
        let vault = seeded_vault();
        let columns = vault.columns().unwrap();
        assert_eq!(columns.first().map(String::as_str), Some("MAKE"));
        assert_eq!(columns.len(), 6);
        assert_eq!(vault.row_count().unwrap(), 9);
    }

    #[test]
    fn missing_table_is_a_database_error() {
        let vault = empty_vault();
        assert!(matches!(vault.columns(), Err(VaultError::DatabaseError(_))));
    }

    #[test]
    fn empty_filter_set_returns_every_row() {
        let vault = seeded_vault();
        let result = run(&vault, &raw_request(vec![]));
        assert_eq!(result.len() as i64, vault.row_count().unwrap());
    }

    #[test]
    fn make_equals_toyota_returns_only_toyotas() {
        let vault = seeded_vault();
        let filters = vec![Filter::new("MAKE", FilterOp::Equals, Some("Toyota"))];
        let result = run(&vault, &raw_request(filters));
        assert_eq!(result.len(), 4);
        let make = result.column_index("MAKE").unwrap();
        assert!(result
            .rows
            .iter()
            .all(|row| row[make] == Cell::Text("Toyota".into())));

        // Cleared filter goes back to the full table.
        assert_eq!(run(&vault, &raw_request(vec![])).len(), 9);
    }

    #[test]
    fn repeated_queries_are_identical() {
        let vault = seeded_vault();
        let request = raw_request(vec![Filter::new("VEHICLE_YEAR", FilterOp::Gte, Some("2015"))]);
        let first = run(&vault, &request);
        vault.clear_cache().unwrap();
        let second = run(&vault, &request);
        assert_eq!(first, second);
        assert_eq!(first.len(), 6);
    }

    #[test]
    fn grouped_counts_include_null_keys() {
        let vault = seeded_vault();
        let request = QueryRequest {
            mode: QueryMode::Grouped,
            group_by: vec!["MAKE".into()],
            count_column: Some("*".into()),
            columns: Vec::new(),
            sort: None,
            filters: Vec::new(),
            limit: 100,
        };
        let result = run(&vault, &request);
        assert_eq!(result.columns, vec!["MAKE".to_string(), "count".to_string()]);
        assert_eq!(result.rows[0], vec![Cell::Text("Toyota".into()), Cell::Int(4)]);
        assert!(result
            .rows
            .iter()
            .any(|row| row[0] == Cell::Text("(null)".into()) && row[1] == Cell::Int(1)));
        let total: f64 = result.rows.iter().filter_map(|r| r[1].as_f64()).sum();
        assert_eq!(total, 9.0);
    }

    #[test]
    fn filter_operators_against_real_data() {
        let vault = seeded_vault();
        let count = |filter: Filter| run(&vault, &raw_request(vec![filter])).len();

        assert_eq!(count(Filter::new("MODEL", FilterOp::Contains, Some("RANG"))), 2);
        assert_eq!(count(Filter::new("MAKE", FilterOp::IsOneOf, Some("Ford, Honda"))), 4);
        assert_eq!(count(Filter::new("NUMBER_OF_SEATS", FilterOp::Gte, Some("7"))), 1);
        assert_eq!(count(Filter::new("MAKE", FilterOp::IsNull, None)), 1);
        assert_eq!(count(Filter::new("MOTIVE_POWER", FilterOp::NotNull, None)), 8);
        assert_eq!(count(Filter::new("MAKE", FilterOp::Lt, Some("G"))), 3);
    }

    #[test]
    fn failed_queries_surface_database_errors() {
        let vault = seeded_vault();
        let bad = BuiltQuery {
            sql: "SELECT nope FROM mvr".into(),
            params: Vec::new(),
        };
        assert!(matches!(vault.run(&bad), Err(VaultError::DatabaseError(_))));
        // The connection stays usable afterwards.
        assert_eq!(vault.row_count().unwrap(), 9);
    }

    #[test]
    fn temporal_decimal_and_nested_values_render_as_text() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TYPE registration_status AS ENUM ('active', 'cancelled');
            CREATE TABLE typed (
                "MAKE" VARCHAR,
                "REG_DATE" DATE,
                "POWER" DECIMAL(6,1),
                "FIRST_SEEN" TIMESTAMP,
                "INSPECTED_AT" TIME,
                "WOF_PERIOD" INTERVAL,
                "TAGS" VARCHAR[],
                "STATUS" registration_status,
                "PLATE" BLOB
            );
            INSERT INTO typed VALUES (
                'Toyota', DATE '2021-03-04', 88.5, TIMESTAMP '2021-03-04 10:30:00',
                TIME '08:15:00', INTERVAL '1 year 2 months 3 days 4 hours',
                ['import', 'ute'], 'active', 'AB\x01'::BLOB
            ), (
                'Ford', DATE '1965-07-01', -0.5, NULL, NULL, NULL, NULL, NULL, NULL
            );
            "#,
        )
        .unwrap();
        let vault = Vault::from_connection(conn, "typed").unwrap();
        let columns = vault.columns().unwrap();
        let mut request = raw_request(vec![]);
        request.columns = columns.clone();
        request.sort = Some(("MAKE".into(), SortOrder::Descending));
        let result = run(&vault, &request);

        let text = |s: &str| Cell::Text(s.to_string());
        assert_eq!(
            result.rows[0],
            vec![
                text("Toyota"),
                text("2021-03-04"),
                text("88.5"),
                text("2021-03-04 10:30:00"),
                text("08:15:00"),
                text("1 year 2 months 3 days 04:00:00"),
                text("[import, ute]"),
                text("active"),
                text("AB\\x01"),
            ]
        );
        assert_eq!(result.rows[1][1], text("1965-07-01"));
        assert_eq!(result.rows[1][2], text("-0.5"));
        assert_eq!(result.rows[1][3], Cell::Null);
    }

    #[test]
    fn interval_and_blob_text() {
        assert_eq!(interval_text(0, 0, 0), "00:00:00");
        assert_eq!(interval_text(1, 1, 0), "1 month 1 day");
        assert_eq!(interval_text(-1, 0, 1_500_000_000), "-1 month 00:00:01.5");
        assert_eq!(blob_text(b"a b\\\xff"), "a b\\x5C\\xFF");
    }

    #[test]
    fn tied_groups_cut_at_the_limit_are_stable() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            SET threads = 8;
            CREATE TABLE mvr AS
                SELECT 'M' || (i % 50000) AS "MODEL" FROM range(100000) t(i);
            "#,
        )
        .unwrap();
        let vault = Vault::from_connection(conn, "mvr").unwrap();
        let request = QueryRequest {
            mode: QueryMode::Grouped,
            group_by: vec!["MODEL".into()],
            count_column: None,
            columns: Vec::new(),
            sort: None,
            filters: Vec::new(),
            limit: 10,
        };

        let first = run(&vault, &request);
        assert_eq!(first.rows[0], vec![Cell::Text("M0".into()), Cell::Int(2)]);
        assert_eq!(first.rows[1], vec![Cell::Text("M1".into()), Cell::Int(2)]);
        for _ in 0..5 {
            vault.clear_cache().unwrap();
            assert_eq!(run(&vault, &request), first);
        }
    }
}
