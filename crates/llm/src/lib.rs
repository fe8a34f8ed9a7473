//! The cco proxy core: canonical wire types, provider adapters, the
//! streaming transcoder, and the dispatcher that ties them together behind
//! a single HTTP surface.

pub mod adapter;
pub mod dispatcher;
pub mod error;
pub mod http_client;
pub mod messages;
pub mod pump;
pub mod stream_state;
pub mod token;
pub mod unknown_fields;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::CONTENT_TYPE},
    response::{IntoResponse, Response, Sse},
    routing::post,
};
use config::Config;

use dispatcher::{DispatchOutcome, ProviderRegistry};
use error::LlmError;

#[derive(Clone)]
struct AppState {
    registry: Arc<ProviderRegistry>,
    request_timeout: Duration,
    idle_timeout: Duration,
    api_key: Option<String>,
}

/// Build the axum router exposing `POST /v1/messages`.
pub fn router(config: &Config) -> Router {
    let state = AppState {
        registry: Arc::new(ProviderRegistry::new(config.providers.clone())),
        request_timeout: Duration::from_secs(config.request_timeout_secs),
        idle_timeout: Duration::from_secs(config.stream_idle_timeout_secs),
        api_key: std::env::var("CCO_API_KEY").ok().filter(|v| !v.is_empty()),
    };

    Router::new().route("/v1/messages", post(handle_messages)).with_state(state)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<(), LlmError> {
    let Some(expected) = &state.api_key else {
        return Ok(());
    };

    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(LlmError::AuthenticationFailed("missing or invalid x-api-key".to_string()))
    }
}

async fn handle_messages(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(e) = authenticate(&state, &headers) {
        return e.into_response();
    }

    match dispatcher::dispatch(&state.registry, state.request_timeout, body).await {
        Ok(DispatchOutcome::Json { status, body }) => {
            (status, [(CONTENT_TYPE, "application/json")], body).into_response()
        }
        Ok(DispatchOutcome::Stream { adapter, upstream }) => {
            let stream = pump::pump(adapter, upstream, state.idle_timeout);
            Sse::new(stream).into_response()
        }
        Err(e) => e.into_response(),
    }
}
