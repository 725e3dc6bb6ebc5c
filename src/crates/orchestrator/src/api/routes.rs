//! Router assembly: health check, session WebSocket, and the model listing
//! proxy, wired the way the teacher's `create_router` composes routes and
//! middleware layers.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::api::ws::ws_handler;
use crate::config::Config;
use crate::session::Upstreams;

/// Shared state every handler needs: the upstream clients sessions run
/// against, and the configured worker concurrency.
#[derive(Clone)]
pub struct AppState {
    pub upstreams: Arc<Upstreams>,
    pub concurrency: usize,
    pub gateway_base_url: String,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        AppState {
            upstreams: Arc::new(Upstreams::build(&config.gateway, &config.search)),
            concurrency: config.concurrency,
            gateway_base_url: config.gateway.base_url.clone(),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .route("/models", get(list_models))
        .layer(crate::api::middleware::logging_layer())
        .layer(crate::api::middleware::cors_layer())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "version": crate::version() }))
}

#[derive(Debug, Deserialize)]
struct ModelsQuery {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

/// Proxies the configured model gateway's `/models` listing, so clients
/// can populate a model picker without holding the gateway's own key.
async fn list_models(State(state): State<AppState>, Query(query): Query<ModelsQuery>) -> impl IntoResponse {
    let url = format!("{}/models", state.gateway_base_url.trim_end_matches('/'));
    let client = reqwest::Client::new();
    let mut request = client.get(&url);
    if let Some(api_key) = query.api_key {
        request = request.bearer_auth(api_key);
    }
    match request.send().await {
        Ok(response) => {
            let status = response.status();
            match response.json::<serde_json::Value>().await {
                Ok(body) => (status, Json(body)).into_response(),
                Err(err) => {
                    (axum::http::StatusCode::BAD_GATEWAY, Json(json!({ "error": err.to_string() })))
                        .into_response()
                }
            }
        }
        Err(err) => {
            (axum::http::StatusCode::BAD_GATEWAY, Json(json!({ "error": err.to_string() }))).into_response()
        }
    }
}
