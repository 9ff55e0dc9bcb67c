//! Control plane: live introspection and reconfiguration over HTTP
//!
//! Every running agent serves one GET route. Requests are flat
//! query-string key/value sets: introspection keys (`list_queue`,
//! `show_opts`, `show_context`) return JSON, anything else is treated
//! as an option mutation and answered with the literal `True`. Stop
//! keys also drop the stop marker so a loop blocked mid-download still
//! sees the request.

use crate::config::{AgentConfig, SharedConfig, StopSignal};
use crate::context::Context;
use crate::runfiles;
use crate::store::Store;
use crate::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::path::PathBuf;

/// State shared with the request handlers
///
/// The handler opens its own store connection per request; the crawl
/// loop's connection is never shared across threads.
#[derive(Clone)]
pub struct AppState {
    pub shared: SharedConfig,
    pub context: Context,
    pub db_path: PathBuf,
}

pub fn create_router(state: AppState) -> Router {
    Router::new().route("/", get(handle)).with_state(state)
}

/// Binds and serves the control plane until the process exits
pub async fn serve(state: AppState, config: &AgentConfig) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.api_addr, config.api_port)
        .parse()
        .map_err(|e| crate::TrawlerError::Storage(format!("bad api address: {e}")))?;
    let app = create_router(state);

    tracing::info!("control plane listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    match dispatch(&state, params) {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("control plane request failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn dispatch(state: &AppState, params: Vec<(String, String)>) -> Result<Response> {
    let has = |key: &str| params.iter().any(|(k, _)| k == key);

    if has("list_queue") {
        let store = Store::open(&state.db_path)?;
        let listing = store.list_queue()?;
        return Ok(Json(listing).into_response());
    }
    if has("show_opts") {
        let snapshot = state.shared.snapshot();
        return Ok(Json(snapshot).into_response());
    }
    if has("show_context") {
        let snapshot = state.context.snapshot();
        return Ok(Json(snapshot).into_response());
    }

    let mut stop = None;
    for (key, value) in &params {
        match key.as_str() {
            "stop" => stop = Some(StopSignal::Stop),
            "hard_stop" => stop = Some(StopSignal::HardStop),
            "abort" => stop = Some(StopSignal::Abort),
            _ => {
                if let Err(e) = state.shared.set_option(key, value) {
                    return Ok((StatusCode::BAD_REQUEST, e.to_string()).into_response());
                }
                tracing::info!("option {} set via control plane", key);
            }
        }
    }

    if let Some(signal) = stop {
        state.shared.request_stop(signal);
        runfiles::create_stop_file(&state.shared.snapshot(), signal)?;
        tracing::warn!("{:?} requested via control plane", signal);
    }

    Ok("True".into_response())
}
