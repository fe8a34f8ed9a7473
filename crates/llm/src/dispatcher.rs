//! Provider selection, credential injection, and upstream invocation.

use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::{body::Bytes, http::StatusCode};
use config::{ProviderConfig, ProviderType, ProvidersConfig};
use serde::Deserialize;

use crate::{
    adapter::{self, Adapter, anthropic::AnthropicAdapter, gemini::GeminiAdapter, openai::OpenAiAdapter},
    error::LlmError,
    http_client::http_client,
    token,
};

/// Status sent to the client for a non-2xx upstream response: the literal
/// upstream status when it's already 4xx/5xx, so it agrees with the
/// translated canonical error envelope in the body; 502 otherwise, which
/// shouldn't happen from a real HTTP response but is the safe fallback for
/// a transport-level failure.
fn client_facing_status(upstream: u16) -> StatusCode {
    StatusCode::from_u16(upstream)
        .ok()
        .filter(|s| s.is_client_error() || s.is_server_error())
        .unwrap_or(StatusCode::BAD_GATEWAY)
}

fn default_base_url(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::Anthropic => "https://api.anthropic.com",
        ProviderType::OpenAi => "https://api.openai.com/v1",
        ProviderType::Google => "https://generativelanguage.googleapis.com/v1beta",
    }
}

fn build_adapter(name: &str, config: &ProviderConfig) -> Arc<dyn Adapter> {
    let base_url = config
        .base_url
        .clone()
        .unwrap_or_else(|| default_base_url(config.provider_type).to_string());

    match config.provider_type {
        ProviderType::Anthropic => Arc::new(AnthropicAdapter::new(base_url)),
        ProviderType::OpenAi => Arc::new(OpenAiAdapter::new(name.to_string(), base_url)),
        ProviderType::Google => Arc::new(GeminiAdapter::new(base_url)),
    }
}

/// Read-only after construction: model-prefix routing table plus one
/// adapter instance per configured provider.
pub struct ProviderRegistry {
    providers: ProvidersConfig,
    adapters: HashMap<String, Arc<dyn Adapter>>,
}

impl ProviderRegistry {
    pub fn new(providers: ProvidersConfig) -> Self {
        let adapters = providers
            .providers
            .iter()
            .map(|(name, config)| (name.clone(), build_adapter(name, config)))
            .collect();
        Self { providers, adapters }
    }

    /// Longest matching model-name prefix wins; `None` surfaces as
    /// `no_provider`.
    pub fn resolve(&self, model: &str) -> Option<(Arc<dyn Adapter>, &ProviderConfig)> {
        let (name, config) = self.providers.resolve(model)?;
        Some((self.adapters.get(name)?.clone(), config))
    }
}

#[derive(Debug, Deserialize)]
struct RequestProbe {
    model: String,
    #[serde(default)]
    stream: Option<bool>,
}

/// Outcome of dispatching one client request to its resolved provider.
pub enum DispatchOutcome {
    /// Non-streaming: a fully buffered canonical JSON body (success or
    /// error — both already pass through `TransformResponse`).
    Json { status: StatusCode, body: Vec<u8> },
    /// Streaming: hand the upstream response to the pump.
    Stream { adapter: Arc<dyn Adapter>, upstream: reqwest::Response },
}

pub async fn dispatch(
    registry: &ProviderRegistry,
    request_timeout: Duration,
    body: Bytes,
) -> Result<DispatchOutcome, LlmError> {
    let probe: RequestProbe = sonic_rs::from_slice(&body)
        .map_err(|e| LlmError::InvalidRequest(format!("malformed request body: {e}")))?;
    let streaming = probe.stream.unwrap_or(false);

    let (adapter, provider_config) = registry
        .resolve(&probe.model)
        .ok_or_else(|| LlmError::NoProvider(probe.model.clone()))?;

    let key = token::resolve(adapter.name(), provider_config.api_key.as_ref())?;
    let provider_body = adapter.transform_request(&body)?;
    let url = adapter.request_url(&probe.model, streaming, &key);

    let mut builder = http_client()
        .post(&url)
        .timeout(request_timeout)
        .header(reqwest::header::CONTENT_TYPE, "application/json");

    for (name, value) in adapter.auth_headers(&key) {
        builder = builder.header(name, value);
    }
    for header in &provider_config.headers {
        builder = builder.header(header.name.as_str(), header.value.as_str());
    }
    if streaming {
        builder = builder.header(reqwest::header::ACCEPT, "text/event-stream");
    }

    let response = builder
        .body(provider_body)
        .send()
        .await
        .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        let canonical_body = adapter.transform_response(status.as_u16(), &body);
        return Ok(DispatchOutcome::Json { status: client_facing_status(status.as_u16()), body: canonical_body });
    }

    if adapter::is_streaming(response.headers()) {
        return Ok(DispatchOutcome::Stream { adapter, upstream: response });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| LlmError::ConnectionError(e.to_string()))?;
    let canonical_body = adapter.transform_response(status.as_u16(), &body);
    Ok(DispatchOutcome::Json { status: StatusCode::OK, body: canonical_body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::ProviderType;

    #[test]
    fn default_base_urls_are_distinct() {
        assert_ne!(default_base_url(ProviderType::Anthropic), default_base_url(ProviderType::OpenAi));
        assert_ne!(default_base_url(ProviderType::OpenAi), default_base_url(ProviderType::Google));
    }

    #[test]
    fn client_facing_status_carries_literal_upstream_status() {
        // Values outside `LlmError::from_upstream_status`'s match table must
        // still pass through unchanged, not collapse to 500.
        assert_eq!(client_facing_status(402), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(client_facing_status(409), StatusCode::CONFLICT);
        assert_eq!(client_facing_status(422), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(client_facing_status(451), StatusCode::from_u16(451).unwrap());
        assert_eq!(client_facing_status(504), StatusCode::GATEWAY_TIMEOUT);

        // Values already in the table still pass through as themselves too.
        assert_eq!(client_facing_status(401), StatusCode::UNAUTHORIZED);
        assert_eq!(client_facing_status(503), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn client_facing_status_falls_back_to_bad_gateway_outside_4xx_5xx() {
        assert_eq!(client_facing_status(200), StatusCode::BAD_GATEWAY);
        assert_eq!(client_facing_status(301), StatusCode::BAD_GATEWAY);
    }
}
