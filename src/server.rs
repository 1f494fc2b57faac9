//! HTTP surface.
//!
//! Every interaction is one GET carrying the whole view state. The handler
//! re-reads the (cached) schema, rebuilds the query, and runs it only when
//! the "Run Query" button submitted the form.

use crate::query::{build_query, BuiltQuery, QueryError};
use crate::render::{self, Notice, Outcome, Page};
use crate::vault::{ResultSet, Vault, VaultError};
use crate::view::{Action, ViewError, ViewState};
use axum::extract::{RawQuery, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Local;
use log::{info, warn};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub vault: Arc<Vault>,
    /// Human-readable name of what the vault is connected to
    pub source: Arc<str>,
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Could not read table: {0}")]
    Schema(VaultError),

    #[error("Invalid dashboard input: {0}")]
    View(#[from] ViewError),

    #[error("Query building error: {0}")]
    Query(#[from] QueryError),

    #[error("{0}")]
    Database(VaultError),

    #[error("Query worker failed: {0}")]
    Worker(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match self {
            ServerError::View(_) | ServerError::Query(_) => StatusCode::BAD_REQUEST,
            ServerError::Database(_) => StatusCode::BAD_GATEWAY,
            ServerError::Schema(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Worker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

// ============================================================================
// INTERACTION
// ============================================================================

/// Build the full dashboard for one submission. Never fails: every error
/// becomes part of the rendered page.
fn dashboard_page(vault: &Vault, source: &str, query: Option<&str>) -> String {
    let columns = match vault.columns() {
        Ok(columns) => columns,
        Err(e) => {
            warn!("Could not read schema of {}: {}", vault.table(), e);
            return render::render_unavailable(vault.table(), &e.to_string());
        }
    };

    let mut notices = vec![
        Notice::Success(format!("✅ Connected to {source}")),
        Notice::Info("💡 Queries should take 1-5 seconds".to_string()),
    ];

    let total_rows = match vault.row_count() {
        Ok(count) => Some(count),
        Err(e) => {
            warn!("Could not retrieve row count: {}", e);
            notices.push(Notice::Warning(format!("Could not retrieve row count: {e}")));
            None
        }
    };

    let (view, view_error) = match ViewState::parse(query, &columns) {
        Ok(view) => (view, None),
        Err(e) => (ViewState::initial(&columns), Some(e.to_string())),
    };

    let built = build_query(vault.table(), &view.to_request(), &columns);
    let outcome = match (&view_error, &built) {
        (Some(message), _) => Outcome::Invalid(message.clone()),
        (None, Err(e)) => Outcome::Invalid(e.to_string()),
        (None, Ok(query)) if view.action == Action::Run => run_timed(vault, query),
        (None, Ok(_)) => Outcome::NotRun,
    };

    render::render_page(&Page {
        table: vault.table().to_string(),
        columns,
        total_rows,
        notices,
        view,
        query: built.ok(),
        outcome,
    })
}

fn run_timed(vault: &Vault, query: &BuiltQuery) -> Outcome {
    let started = Instant::now();
    match vault.run(query) {
        Ok(result) => Outcome::Completed {
            result,
            elapsed: started.elapsed(),
            finished_at: Local::now(),
        },
        Err(e) => {
            warn!("Query failed: {}", e);
            Outcome::Failed(e.to_string())
        }
    }
}

/// Parse, build and run without rendering, for the download and API routes.
fn execute_view(
    vault: &Vault,
    query: Option<&str>,
) -> Result<(ViewState, BuiltQuery, ResultSet), ServerError> {
    let columns = vault.columns().map_err(ServerError::Schema)?;
    let view = ViewState::parse(query, &columns)?;
    let built = build_query(vault.table(), &view.to_request(), &columns)?;
    let result = vault.run(&built).map_err(ServerError::Database)?;
    Ok((view, built, result))
}

async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ServerError>
where
    T: Send + 'static,
    F: FnOnce(&Vault) -> T + Send + 'static,
{
    let vault = Arc::clone(&state.vault);
    tokio::task::spawn_blocking(move || f(&vault))
        .await
        .map_err(|e| ServerError::Worker(e.to_string()))
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn dashboard(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Html<String>, ServerError> {
    let source = Arc::clone(&state.source);
    let html = blocking(&state, move |vault| {
        dashboard_page(vault, &source, query.as_deref())
    })
    .await?;
    Ok(Html(html))
}

async fn download_csv(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Response, ServerError> {
    let (view, _, result) = blocking(&state, move |vault| execute_view(vault, query.as_deref())).await??;
    let body = render::to_csv(&result).map_err(|e| ServerError::Worker(e.to_string()))?;
    info!("CSV export: {} rows", result.len());

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", render::csv_filename(view.mode)),
            ),
        ],
        body,
    )
        .into_response())
}

async fn query_json(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>, ServerError> {
    let (view, built, result) = blocking(&state, move |vault| execute_view(vault, query.as_deref())).await??;
    Ok(Json(json!({
        "mode": view.mode,
        "query": built,
        "row_count": result.len(),
        "result": result,
    })))
}

async fn refresh(State(state): State<AppState>) -> Result<Redirect, ServerError> {
    blocking(&state, |vault| vault.clear_cache())
        .await?
        .map_err(ServerError::Database)?;
    info!("Caches cleared");
    Ok(Redirect::to("/"))
}

async fn healthz() -> &'static str {
    "ok"
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/results.csv", get(download_csv))
        .route("/api/query", get(query_json))
        .route("/refresh", get(refresh))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(state: AppState, addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Dashboard listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::tests::seeded_vault;
    use axum::body::Body;
    use axum::http::Request;
    use duckdb::Connection;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app() -> Router {
        router(AppState {
            vault: Arc::new(seeded_vault()),
            source: Arc::from("test database"),
        })
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    const TOYOTA_RAW: &str = "mode=raw&columns=MAKE&columns=MODEL&filters=1\
        &filter_col_0=MAKE&filter_op_0=equals&filter_val_0=Toyota&raw_limit=100";

    #[tokio::test]
    async fn first_visit_renders_builder_without_running() {
        let (status, html) = get(app(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Query builder"));
        assert!(html.contains("Connected to test database"));
        assert!(html.contains("Total vehicles: 9"));
        assert!(html.contains("View SQL query"));
        assert!(!html.contains("Query completed"));
    }

    #[tokio::test]
    async fn run_renders_only_matching_rows() {
        let (status, html) = get(app(), &format!("/?{TOYOTA_RAW}&action=run")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Records returned<b>4</b>"));
        assert!(html.contains("<td>Hilux</td>"));
        assert!(!html.contains("<td>Ranger</td>"));
    }

    #[tokio::test]
    async fn grouped_run_renders_metrics() {
        let (_, html) = get(app(), "/?mode=grouped&group_by=MAKE&count=*&filters=0&grouped_limit=100&action=run").await;
        assert!(html.contains("Results: 4 groups"));
        assert!(html.contains("Total vehicles matched<b>9</b>"));
        assert!(html.contains("Visualisation"));
    }

    #[tokio::test]
    async fn invalid_input_is_rendered_not_fatal() {
        let (status, html) = get(
            app(),
            "/?mode=raw&columns=MAKE&filters=1&filter_col_0=COLOUR&filter_op_0=equals&filter_val_0=RED&action=run",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Invalid column name detected: COLOUR"));

        let (status, html) = get(app(), "/?mode=pivot").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Unknown query mode: pivot"));
    }

    #[tokio::test]
    async fn missing_table_renders_unavailable_page() {
        let vault = Vault::from_connection(Connection::open_in_memory().unwrap(), "mvr").unwrap();
        let app = router(AppState {
            vault: Arc::new(vault),
            source: Arc::from("empty"),
        });
        let (status, html) = get(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(html.contains("Have you uploaded your data and named it mvr?"));
    }

    #[tokio::test]
    async fn csv_download_has_attachment_headers() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri(format!("/results.csv?{TOYOTA_RAW}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"raw_query_results.csv\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.starts_with("MAKE,MODEL\n"));
        assert_eq!(text.lines().count(), 5);
    }

    #[tokio::test]
    async fn csv_rejects_bad_columns() {
        let (status, body) = get(app(), "/results.csv?mode=raw&columns=NOPE").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("NOPE"));
    }

    #[tokio::test]
    async fn json_query_is_deterministic() {
        let uri = format!("/api/query?{TOYOTA_RAW}");
        let (status, first) = get(app(), &uri).await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&first).unwrap();
        assert_eq!(value["row_count"], 4);
        assert_eq!(value["query"]["params"][0], "Toyota");

        let app = app();
        let (_, a) = get(app.clone(), &uri).await;
        let (_, b) = get(app, &uri).await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn healthz_and_refresh() {
        let (status, body) = get(app(), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, _) = get(app(), "/refresh").await;
        assert_eq!(status, StatusCode::SEE_OTHER);
    }
}
