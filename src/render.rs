//! HTML and CSV output.
//!
//! The page is server-rendered: a sidebar form that submits the view state
//! back to `/`, an SQL preview, and the results section. No client script.

use crate::query::{
    BuiltQuery, FilterOp, QueryMode, SortOrder, GROUPED_LIMIT_RANGE, MAX_FILTERS, RAW_LIMIT_RANGE,
};
use crate::vault::{Cell, ResultSet};
use crate::view::{mode_key, order_key, ViewState};
use chrono::{DateTime, Local};
use std::time::Duration;

/// Groups drawn in the bar chart.
pub const CHART_MAX_BARS: usize = 50;

const DATA_DICTIONARY_URL: &str =
    "https://docs.google.com/spreadsheets/d/10OqmyPzWYq6Eai9qsuEMZAAgL3cWrLorIpjSGbW3d2g/edit?gid=649340362#gid=649340362";

const STYLE: &str = r#"
body { font-family: system-ui, sans-serif; margin: 0; display: flex; color: #262730; }
aside { width: 22rem; min-height: 100vh; background: #f0f2f6; padding: 1rem; box-sizing: border-box; }
main { flex: 1; padding: 1.5rem 2rem; overflow-x: auto; }
fieldset { border: 1px solid #d0d3da; margin: 0 0 1rem; }
label { display: block; margin: .4rem 0 .1rem; font-size: .9rem; }
select, input, textarea { width: 100%; box-sizing: border-box; }
.filter { display: grid; grid-template-columns: 2fr 1fr 2fr; gap: .25rem; }
.banner { padding: .6rem .9rem; border-radius: .4rem; margin: .5rem 0; }
.success { background: #dff5e3; } .info { background: #e1ecf9; }
.warning { background: #fff6d6; } .error { background: #fde2e2; }
.metrics { display: flex; gap: 2rem; } .metric b { display: block; font-size: 1.6rem; }
table { border-collapse: collapse; font-size: .85rem; }
th, td { border: 1px solid #e0e0e0; padding: .2rem .5rem; text-align: left; }
.chart td.bar div { background: #ff4b4b; height: .9rem; }
pre { background: #f6f8fa; padding: .8rem; overflow-x: auto; }
"#;

// ============================================================================
// PAGE MODEL
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Success(String),
    Info(String),
    Warning(String),
    Error(String),
}

/// What happened to the query on this interaction.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Builder shown, nothing executed.
    NotRun,
    /// The view could not be turned into a query.
    Invalid(String),
    /// The database rejected or failed the query.
    Failed(String),
    Completed {
        result: ResultSet,
        elapsed: Duration,
        finished_at: DateTime<Local>,
    },
}

#[derive(Debug, Clone)]
pub struct Page {
    pub table: String,
    pub columns: Vec<String>,
    pub total_rows: Option<i64>,
    pub notices: Vec<Notice>,
    pub view: ViewState,
    pub query: Option<BuiltQuery>,
    pub outcome: Outcome,
}

// ============================================================================
// HELPERS
// ============================================================================

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `1234567` → `1,234,567`.
pub fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::new();
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if n < 0 {
        out.insert(0, '-');
    }
    out
}

fn notice(out: &mut String, notice: &Notice) {
    let (class, text) = match notice {
        Notice::Success(t) => ("success", t),
        Notice::Info(t) => ("info", t),
        Notice::Warning(t) => ("warning", t),
        Notice::Error(t) => ("error", t),
    };
    out.push_str(&format!(r#"<div class="banner {class}">{}</div>"#, escape(text)));
}

fn option(out: &mut String, value: &str, label: &str, selected: bool) {
    out.push_str(&format!(
        r#"<option value="{}"{}>{}</option>"#,
        escape(value),
        if selected { " selected" } else { "" },
        escape(label)
    ));
}

fn column_select(out: &mut String, name: &str, columns: &[String], selected: &[String], multiple: bool) {
    out.push_str(&format!(
        r#"<select name="{name}"{}>"#,
        if multiple { r#" multiple size="6""# } else { "" }
    ));
    for column in columns {
        option(out, column, column, selected.contains(column));
    }
    out.push_str("</select>");
}

// ============================================================================
// SIDEBAR
// ============================================================================

fn sidebar(out: &mut String, page: &Page) {
    let view = &page.view;
    out.push_str("<aside><form method=\"get\" action=\"/\">");
    // Enter in a text field submits this first button, not "Add filter".
    out.push_str(r#"<button name="action" value="preview" style="display:none" tabindex="-1"></button>"#);
    if let Some(total) = page.total_rows {
        notice(out, &Notice::Success(format!("✅ Total vehicles: {}", thousands(total))));
    }
    out.push_str("<h2>Query builder</h2>");

    out.push_str("<fieldset><legend>Query mode</legend>");
    for (mode, label) in [
        (QueryMode::Grouped, "Grouped (summary)"),
        (QueryMode::Raw, "Raw (individual records)"),
    ] {
        out.push_str(&format!(
            r#"<label><input type="radio" name="mode" value="{}"{}> {label}</label>"#,
            mode_key(mode),
            if view.mode == mode { " checked" } else { "" }
        ));
    }
    out.push_str("</fieldset>");

    // Filters
    out.push_str(&format!(
        r#"<fieldset><legend>Filters (optional)</legend><input type="hidden" name="filters" value="{}">"#,
        view.filters.len()
    ));
    if view.mode == QueryMode::Grouped {
        out.push_str("<small>Filter data before grouping for faster results</small>");
    }
    for (i, filter) in view.filters.iter().enumerate() {
        out.push_str(r#"<div class="filter">"#);
        column_select(out, &format!("filter_col_{i}"), &page.columns, std::slice::from_ref(&filter.column), false);
        out.push_str(&format!(r#"<select name="filter_op_{i}">"#));
        for op in FilterOp::ALL {
            option(out, op.label(), op.label(), op == filter.op);
        }
        out.push_str("</select>");
        let value = escape(filter.value.as_deref().unwrap_or(""));
        if filter.op == FilterOp::IsOneOf {
            out.push_str(&format!(
                r#"<textarea name="filter_val_{i}" rows="2" placeholder="FORD&#10;TOYOTA&#10;HONDA">{value}</textarea>"#
            ));
        } else if filter.op.takes_value() {
            out.push_str(&format!(
                r#"<input name="filter_val_{i}" value="{value}" placeholder="Value">"#
            ));
        } else {
            out.push_str("<span></span>");
        }
        out.push_str("</div>");
    }
    if view.filters.len() < MAX_FILTERS {
        out.push_str(r#"<button name="action" value="add_filter">+ Add filter</button> "#);
    }
    if !view.filters.is_empty() {
        out.push_str(r#"<button name="action" value="remove_filter">− Remove filter</button>"#);
    }
    out.push_str("</fieldset>");

    // Grouped options
    out.push_str("<fieldset><legend>Grouped options</legend>");
    out.push_str("<label>Group by (select 1-5 columns):</label>");
    column_select(out, "group_by", &page.columns, &view.group_by, true);
    out.push_str("<label>Count column (or * for all):</label><select name=\"count\">");
    option(out, "*", "*", view.count_column == "*");
    for column in &page.columns {
        option(out, column, column, view.count_column == *column);
    }
    out.push_str("</select></fieldset>");

    // Raw options
    out.push_str("<fieldset><legend>Raw options</legend>");
    out.push_str("<label>Columns to display:</label>");
    column_select(out, "columns", &page.columns, &view.columns, true);
    out.push_str("<label>Sort by:</label><select name=\"sort\">");
    let sort_column = view.sort.as_ref().map(|(c, _)| c.as_str());
    option(out, "", "(no sorting)", sort_column.is_none());
    for column in &page.columns {
        option(out, column, column, sort_column == Some(column.as_str()));
    }
    out.push_str("</select><label>Sort order:</label><select name=\"order\">");
    let order = view.sort.as_ref().map(|(_, o)| *o).unwrap_or(SortOrder::Ascending);
    option(out, order_key(SortOrder::Ascending), "Ascending", order == SortOrder::Ascending);
    option(out, order_key(SortOrder::Descending), "Descending", order == SortOrder::Descending);
    out.push_str("</select></fieldset>");

    let (min, max) = match view.mode {
        QueryMode::Grouped => GROUPED_LIMIT_RANGE,
        QueryMode::Raw => RAW_LIMIT_RANGE,
    };
    out.push_str(&format!(
        r#"<fieldset><legend>Display options</legend><label>Maximum results to show ({min}-{max}):</label><input type="number" name="{}" min="{min}" max="{max}" value="{}"></fieldset>"#,
        view.limit_key(),
        view.limit()
    ));
    let (other_key, other_limit) = match view.mode {
        QueryMode::Grouped => ("raw_limit", view.raw_limit),
        QueryMode::Raw => ("grouped_limit", view.grouped_limit),
    };
    out.push_str(&format!(r#"<input type="hidden" name="{other_key}" value="{other_limit}">"#));

    out.push_str(r#"<button name="action" value="preview">Update</button> "#);
    out.push_str(r#"<button name="action" value="run"><b>🔍 Run Query</b></button>"#);
    out.push_str("</form><hr><small>☁️ Powered by MotherDuck<br>Built with DuckDB + Rust</small></aside>");
}

// ============================================================================
// RESULTS
// ============================================================================

fn sql_preview(out: &mut String, query: &BuiltQuery) {
    out.push_str("<details><summary>📝 View SQL query</summary>");
    out.push_str(&format!("<pre>{}</pre>", escape(&query.sql)));
    if !query.params.is_empty() {
        out.push_str("<p>Parameters:</p><pre>");
        for (i, param) in query.params.iter().enumerate() {
            out.push_str(&format!("${}: {}\n", i + 1, escape(&param.to_string())));
        }
        out.push_str("</pre>");
    }
    out.push_str("</details>");
}

fn table(out: &mut String, result: &ResultSet) {
    out.push_str("<table><thead><tr>");
    for column in &result.columns {
        out.push_str(&format!("<th>{}</th>", escape(column)));
    }
    out.push_str("</tr></thead><tbody>");
    for row in &result.rows {
        out.push_str("<tr>");
        for cell in row {
            match cell {
                Cell::Null => out.push_str("<td><i>None</i></td>"),
                other => {
                    out.push_str(&format!("<td>{}</td>", escape(&other.to_string())));
                }
            }
        }
        out.push_str("</tr>");
    }
    out.push_str("</tbody></table>");
}

/// Summary figures for a grouped result.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub total: i64,
    pub groups: usize,
    pub average: f64,
}

pub fn summarize_groups(result: &ResultSet) -> Option<GroupSummary> {
    let count = result.column_index("count")?;
    let total: f64 = result.rows.iter().filter_map(|r| r.get(count)?.as_f64()).sum();
    let groups = result.len();
    let average = if groups == 0 { 0.0 } else { total / groups as f64 };
    Some(GroupSummary {
        total: total as i64,
        groups,
        average,
    })
}

/// `(label, count)` pairs for the chart, key columns joined with ` | `.
pub fn chart_bars(result: &ResultSet) -> Vec<(String, f64)> {
    let Some(count) = result.column_index("count") else {
        return Vec::new();
    };
    result
        .rows
        .iter()
        .take(CHART_MAX_BARS)
        .map(|row| {
            let label = row
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != count)
                .map(|(_, cell)| cell.to_string())
                .collect::<Vec<_>>()
                .join(" | ");
            let value = row.get(count).and_then(Cell::as_f64).unwrap_or(0.0);
            (label, value)
        })
        .collect()
}

fn chart(out: &mut String, result: &ResultSet) {
    let bars = chart_bars(result);
    let max = bars.iter().map(|(_, v)| *v).fold(0.0_f64, f64::max);
    out.push_str("<h3>Visualisation</h3>");
    if result.len() > CHART_MAX_BARS {
        notice(
            out,
            &Notice::Info(format!(
                "📊 Showing top {CHART_MAX_BARS} of {} groups in chart (sorted by count, descending)",
                result.len()
            )),
        );
    }
    out.push_str(r#"<table class="chart">"#);
    for (label, value) in bars {
        let width = if max > 0.0 { value / max * 100.0 } else { 0.0 };
        out.push_str(&format!(
            r#"<tr><td>{}</td><td class="bar" style="width:40rem"><div style="width:{width:.1}%"></div></td><td>{}</td></tr>"#,
            escape(&label),
            thousands(value as i64)
        ));
    }
    out.push_str("</table>");
}

fn results(out: &mut String, page: &Page) {
    match &page.outcome {
        Outcome::NotRun => {}
        Outcome::Invalid(message) => {
            notice(out, &Notice::Error(format!("❌ Query building error: {message}")));
        }
        Outcome::Failed(message) => {
            notice(out, &Notice::Error(format!("❌ {message}")));
            out.push_str(
                "<p>💡 Troubleshooting tips:</p><ul>\
                 <li>Try a simpler query first (fewer filters, lower limit)</li>\
                 <li>Ensure filter values don't contain special characters that could cause issues</li>\
                 <li>Check that numeric comparisons use valid numbers (e.g. no negatives)</li></ul>",
            );
        }
        Outcome::Completed { result, .. } if result.is_empty() => {
            notice(out, &Notice::Warning("No results found. Try adjusting your filters.".into()));
        }
        Outcome::Completed {
            result,
            elapsed,
            finished_at,
        } => {
            notice(
                out,
                &Notice::Success(format!(
                    "✅ Query completed in {:.2} seconds! ({})",
                    elapsed.as_secs_f64(),
                    finished_at.format("%H:%M:%S")
                )),
            );
            match page.view.mode {
                QueryMode::Grouped => {
                    out.push_str(&format!("<h2>Results: {} groups</h2>", thousands(result.len() as i64)));
                    if let Some(summary) = summarize_groups(result) {
                        out.push_str(&format!(
                            r#"<div class="metrics"><div class="metric">Total vehicles matched<b>{}</b></div><div class="metric">Unique groups<b>{}</b></div><div class="metric">Average per group<b>{:.0}</b></div></div>"#,
                            thousands(summary.total),
                            thousands(summary.groups as i64),
                            summary.average
                        ));
                    }
                    table(out, result);
                    chart(out, result);
                }
                QueryMode::Raw => {
                    out.push_str(&format!(
                        r#"<h2>Results</h2><div class="metrics"><div class="metric">Records returned<b>{}</b></div></div>"#,
                        thousands(result.len() as i64)
                    ));
                    table(out, result);
                }
            }
            out.push_str(&format!(
                r#"<p><a href="/results.csv?{}">📥 Download results as CSV</a></p>"#,
                escape(&page.view.to_query_string())
            ));
        }
    }
}

fn help(out: &mut String) {
    out.push_str(&format!(
        r#"<details><summary>ℹ️ How to use this tool</summary>
<h3>Query modes</h3>
<p><b>Grouped (summary)</b>: counts vehicles per distinct value of up to five columns, e.g. by make or fuel type (<code>MOTIVE_POWER</code>). Null values are included and shown as '(null)'.</p>
<p><b>Raw (individual records)</b>: shows actual vehicle records, limited to 5,000 rows.</p>
<h3>Filter operators</h3>
<ul>
<li><b>contains</b>: case-insensitive partial match ("TOY" matches "TOYOTA")</li>
<li><b>equals</b>: exact match (case-sensitive)</li>
<li><b>is one of</b>: one value per line, or comma separated</li>
<li><b>&gt;, &lt;, &gt;=, &lt;=</b>: numeric comparison when the value is a number, otherwise alphabetical</li>
<li><b>is null / not null</b>: missing or present values</li>
</ul>
<p>See the <a href="{DATA_DICTIONARY_URL}">MVR Data Dictionary</a> for columns and their values.</p>
</details>"#
    ));
}

/// Render the full dashboard.
pub fn render_page(page: &Page) -> String {
    let mut out = String::with_capacity(16 * 1024);
    out.push_str(&format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>NZ Vehicle Register Query</title><style>{STYLE}</style></head><body>"
    ));
    sidebar(&mut out, page);
    out.push_str("<main><h1>🚗 NZ Motor Vehicle Register Query Tool</h1>");
    for n in &page.notices {
        notice(&mut out, n);
    }
    out.push_str(&format!(
        r#"<p>📋 Querying <code>{}</code>. Available columns in dataset: <a href="{DATA_DICTIONARY_URL}">MVR Data Dictionary</a></p>"#,
        escape(&page.table)
    ));
    if let Some(query) = &page.query {
        sql_preview(&mut out, query);
    }
    results(&mut out, page);
    help(&mut out);
    out.push_str("</main></body></html>");
    out
}

/// Page shown when the table itself cannot be read.
pub fn render_unavailable(table: &str, error: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>NZ Vehicle Register Query</title><style>{STYLE}</style></head><body><main><h1>🚗 NZ Motor Vehicle Register Query Tool</h1>"
    ));
    notice(&mut out, &Notice::Error(format!("❌ Could not read table from MotherDuck: {error}")));
    notice(
        &mut out,
        &Notice::Info(format!("Have you uploaded your data and named it {table}?")),
    );
    out.push_str("</main></body></html>");
    out
}

// ============================================================================
// CSV
// ============================================================================

pub fn csv_filename(mode: QueryMode) -> &'static str {
    match mode {
        QueryMode::Grouped => "grouped_query_results.csv",
        QueryMode::Raw => "raw_query_results.csv",
    }
}

/// Serialise a result with a header row. NULL becomes an empty field.
pub fn to_csv(result: &ResultSet) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&result.columns)?;
    for row in &result.rows {
        writer.write_record(row.iter().map(Cell::to_string))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}
