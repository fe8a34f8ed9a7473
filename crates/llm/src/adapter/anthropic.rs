//! Anthropic-compatible adapter: pass-through in both directions,
//! still routed through the pipeline to normalize framing and error shape.

use secrecy::{ExposeSecret, SecretString};

use super::Adapter;
use crate::{
    messages::anthropic::{ErrorEnvelope, Response, StreamEvent},
    stream_state::StreamState,
};

pub struct AnthropicAdapter {
    pub base_url: String,
    pub api_version: String,
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_version: "2023-06-01".to_string(),
        }
    }
}

impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn endpoint(&self, _model: &str, _streaming: bool) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }

    fn auth_headers(&self, key: &SecretString) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", key.expose_secret().to_string()),
            ("anthropic-version", self.api_version.clone()),
        ]
    }

    fn transform_request(&self, canonical: &[u8]) -> Result<Vec<u8>, crate::error::LlmError> {
        // Round-trip through the typed struct to reject malformed input and
        // normalize field ordering/presence, without changing semantics.
        let request: crate::messages::anthropic::Request = sonic_rs::from_slice(canonical)
            .map_err(|e| crate::error::LlmError::InvalidRequest(format!("malformed request body: {e}")))?;
        sonic_rs::to_vec(&request)
            .map_err(|e| crate::error::LlmError::InvalidRequest(format!("failed to encode request: {e}")))
    }

    fn transform_response(&self, status: u16, body: &[u8]) -> Vec<u8> {
        if !(200..300).contains(&status) {
            if let Ok(envelope) = sonic_rs::from_slice::<ErrorEnvelope>(body) {
                return sonic_rs::to_vec(&envelope).unwrap_or_default();
            }
            let text = String::from_utf8_lossy(body).to_string();
            let error = crate::error::LlmError::from_upstream_status(status, text).into_envelope();
            return sonic_rs::to_vec(&error).unwrap_or_default();
        }

        match sonic_rs::from_slice::<Response>(body) {
            Ok(response) => sonic_rs::to_vec(&response).unwrap_or_default(),
            Err(e) => {
                let error = ErrorEnvelope::new("api_error", format!("malformed upstream response: {e}"));
                sonic_rs::to_vec(&error).unwrap_or_default()
            }
        }
    }

    fn transform_stream(&self, _event_name: &str, data: &str, state: &mut StreamState) -> Vec<StreamEvent> {
        let Ok(event) = sonic_rs::from_str::<StreamEvent>(data) else {
            log::debug!("dropping malformed upstream SSE event: {data}");
            return Vec::new();
        };

        match &event {
            StreamEvent::MessageStart { .. } => state.message_start_sent = true,
            StreamEvent::MessageStop => state.finish_sent = true,
            _ => {}
        }

        vec![event]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_round_trip_is_a_no_op() {
        let adapter = AnthropicAdapter::new("https://api.anthropic.com");
        let body = indoc::indoc! {r#"
            {
              "id": "msg_1", "type": "message", "role": "assistant", "model": "claude-3-opus",
              "content": [{"type": "text", "text": "hi"}],
              "stop_reason": "end_turn", "stop_sequence": null,
              "usage": {"input_tokens": 3, "output_tokens": 1}
            }
        "#};

        let once = adapter.transform_response(200, body.as_bytes());
        let twice = adapter.transform_response(200, &once);
        assert_eq!(once, twice);
    }

    #[test]
    fn malformed_request_is_rejected() {
        let adapter = AnthropicAdapter::new("https://api.anthropic.com");
        assert!(adapter.transform_request(b"not json").is_err());
    }
}
