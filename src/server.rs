//!
//! sqlgate HTTP server
//! -------------------
//! Axum routes in front of the SQL gateway.
//!
//! Responsibilities:
//! - Bearer-token authentication through the injected `IdentityProvider`.
//! - `/execute`, `/tables` and `/export` (plus the deprecated `/query` when enabled).
//! - One tracing span per request carrying a request id and the caller's username.
//! - Uniform JSON error bodies; handler panics become 500 responses.

use std::future::Future;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, info_span, warn, Instrument, Span};

use crate::config::GatewayConfig;
use crate::db::PgSessionProvider;
use crate::error::{AppError, AppResult};
use crate::export::{render_xlsx, XLSX_CONTENT_TYPE};
use crate::gateway::{BindParams, Gateway, QueryRequest, QueryResult};
use crate::identity::{bearer_token, IdentityProvider, RequestContext, StaticTokenProvider};

const EXPORT_DISPOSITION: &str = "attachment; filename=\"export.xlsx\"";

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub identity: Arc<dyn IdentityProvider>,
}

#[derive(Debug, Deserialize)]
struct ExecutePayload {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    params: Option<BindParams>,
}

#[derive(Debug, Deserialize)]
struct ExportPayload {
    #[serde(default)]
    sql: Option<String>,
    #[serde(default)]
    params: Option<BindParams>,
}

#[derive(Serialize)]
struct LegacyResponse {
    #[serde(flatten)]
    result: QueryResult,
    query: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "status": "error",
            "code": self.code_str(),
            "kind": self.kind().as_str(),
            "message": self.message(),
            "retriable": self.retriable(),
        });
        (status, Json(body)).into_response()
    }
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> AppResult<RequestContext> {
    let token = bearer_token(headers).ok_or_else(|| AppError::unauthenticated("no_credentials", "Not authenticated"))?;
    let principal = state
        .identity
        .resolve(&token)
        .ok_or_else(|| AppError::unauthenticated("invalid_credentials", "Could not validate credentials"))?;
    if !principal.is_active {
        return Err(AppError::unauthenticated("inactive_user", "Inactive user"));
    }
    Ok(RequestContext::new(principal))
}

fn request_span(ctx: &RequestContext, route: &'static str) -> Span {
    info_span!("request", request_id = %ctx.request_id, user = %ctx.principal.username, route)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(p)| p)
        .map_err(|rej| AppError::validation("invalid_body".to_string(), format!("Invalid request body: {}", rej.body_text())))
}

/// Awaits a handler body; errors and panics are rendered as JSON error responses.
async fn guarded<F, T>(fut: F) -> Response
where
    F: Future<Output = AppResult<T>>,
    T: IntoResponse,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => value.into_response(),
        Ok(Err(e)) => e.into_response(),
        Err(panic_payload) => {
            let msg = if let Some(s) = panic_payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "panic".to_string()
            };
            error!(target: "sqlgate::server", panic = %msg, "handler panicked");
            AppError::internal("internal_panic".to_string(), format!("Internal error: {}", msg)).into_response()
        }
    }
}

async fn execute_handler(State(state): State<AppState>, headers: HeaderMap, payload: Result<Json<ExecutePayload>, JsonRejection>) -> Response {
    let ctx = match authenticate(&state, &headers) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let span = request_span(&ctx, "/execute");
    guarded(
        async move {
            let p = body(payload)?;
            let request = QueryRequest::new(p.query.unwrap_or_default(), p.params);
            state.gateway.execute(&ctx.principal, &request).await.map(Json)
        }
        .instrument(span),
    )
    .await
}

async fn tables_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let ctx = match authenticate(&state, &headers) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let span = request_span(&ctx, "/tables");
    guarded(
        async move {
            let tables = state.gateway.list_tables(&ctx.principal).await?;
            Ok(Json(json!({ "tables": tables })))
        }
        .instrument(span),
    )
    .await
}

async fn export_handler(State(state): State<AppState>, headers: HeaderMap, payload: Result<Json<ExportPayload>, JsonRejection>) -> Response {
    let ctx = match authenticate(&state, &headers) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let span = request_span(&ctx, "/export");
    guarded(
        async move {
            let p = body(payload)?;
            let request = QueryRequest::new(p.sql.unwrap_or_default(), p.params);
            let result = state.gateway.export(&ctx.principal, &request).await?;
            let bytes = render_xlsx(&result)?;
            info!(target: "sqlgate::server", rows = result.row_count, bytes = bytes.len(), "export rendered");
            Ok(([(header::CONTENT_TYPE, XLSX_CONTENT_TYPE), (header::CONTENT_DISPOSITION, EXPORT_DISPOSITION)], bytes))
        }
        .instrument(span),
    )
    .await
}

async fn legacy_query_handler(State(state): State<AppState>, headers: HeaderMap, payload: Result<Json<ExecutePayload>, JsonRejection>) -> Response {
    let ctx = match authenticate(&state, &headers) {
        Ok(c) => c,
        Err(e) => return e.into_response(),
    };
    let span = request_span(&ctx, "/query");
    guarded(
        async move {
            let p = body(payload)?;
            let request = QueryRequest::new(p.query.unwrap_or_default(), p.params);
            let result = state.gateway.execute_legacy(&ctx.principal, &request).await?;
            Ok(Json(LegacyResponse { result, query: request.raw_text }))
        }
        .instrument(span),
    )
    .await
}

/// All routes; `/query` only when the legacy endpoint is enabled.
pub fn router(state: AppState, legacy_query: bool) -> Router {
    let mut app = Router::new()
        .route("/", get(|| async { "sqlgate ok" }))
        .route("/execute", post(execute_handler))
        .route("/tables", get(tables_handler))
        .route("/export", post(export_handler));
    if legacy_query {
        app = app.route("/query", post(legacy_query_handler));
    }
    app.with_state(state)
}

pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    info!(target: "startup", config = %serde_json::to_string(&config).unwrap_or_default(), "sqlgate starting");

    let provider = PgSessionProvider::connect(&config.pool_settings()).context("While building the connection pool")?;
    let identity: Arc<dyn IdentityProvider> = match &config.tokens_file {
        Some(path) => Arc::new(
            StaticTokenProvider::from_file(path).with_context(|| format!("While loading token file {}", path.display()))?,
        ),
        None => {
            warn!(target: "startup", "no token file configured; every request will be rejected as unauthenticated");
            Arc::new(StaticTokenProvider::new())
        }
    };
    if config.legacy_query {
        warn!(target: "startup", "deprecated POST /query endpoint is enabled");
    }

    let gateway = Gateway::new(Arc::new(provider), &config.gateway_settings());
    let app = router(AppState { gateway: Arc::new(gateway), identity }, config.legacy_query);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.http_port).parse()?;
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
