//! The provider adapter contract and the four concrete adapters.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use reqwest::header::HeaderMap;
use secrecy::SecretString;

use crate::{error::LlmError, stream_state::StreamState};

/// Per-provider pair of total translation functions plus an incremental
/// streaming translator with per-connection state.
///
/// Adapters are immutable after construction and may be invoked concurrently
/// from many request-handling tasks.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Upstream URL for this request. `streaming` matters for Gemini, which
    /// encodes `generateContent` vs `streamGenerateContent` in the path.
    fn endpoint(&self, model: &str, streaming: bool) -> String;

    /// Headers carrying the resolved credential, merged onto the upstream
    /// request. Empty for adapters (Gemini) that carry the credential in
    /// the URL instead — see [`Adapter::request_url`].
    fn auth_headers(&self, key: &SecretString) -> Vec<(&'static str, String)>;

    /// Full request URL, given the resolved credential. Defaults to
    /// [`Adapter::endpoint`]; Gemini overrides this to append `?key=`.
    fn request_url(&self, model: &str, streaming: bool, _key: &SecretString) -> String {
        self.endpoint(model, streaming)
    }

    /// `canonical_bytes -> provider_bytes`. Total: fails only with
    /// `invalid_request_error` when the input doesn't parse as a
    /// `CanonicalRequest`.
    fn transform_request(&self, canonical: &[u8]) -> Result<Vec<u8>, LlmError>;

    /// `provider_bytes -> canonical_bytes`. Total: provider-shaped error
    /// bodies are translated into a canonical error envelope rather than
    /// failing.
    fn transform_response(&self, status: u16, body: &[u8]) -> Vec<u8>;

    /// Feed one upstream SSE event (`event_name` may be empty) into the
    /// per-connection state machine, returning zero or more canonical
    /// streaming events ready to frame and write to the client.
    fn transform_stream(
        &self,
        event_name: &str,
        data: &str,
        state: &mut StreamState,
    ) -> Vec<crate::messages::anthropic::StreamEvent>;
}

/// True iff the upstream response is SSE- or chunked-framed.
pub fn is_streaming(headers: &HeaderMap) -> bool {
    let content_type = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.contains("text/event-stream") || content_type.contains("stream") {
        return true;
    }

    headers
        .get(reqwest::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
}

/// If `content_blocks` with `start_sent && !stop_sent` exist, emit their
/// `content_block_stop` events in ascending index order, then the terminal
/// `message_delta`/`message_stop` pair. Shared by the OpenAI and Gemini
/// streaming translators.
pub fn finish_stream(
    state: &mut StreamState,
    stop_reason: crate::messages::anthropic::StopReason,
    usage: crate::messages::anthropic::Usage,
) -> Vec<crate::messages::anthropic::StreamEvent> {
    use crate::messages::anthropic::{MessageDeltaPayload, StreamEvent};

    let mut events = Vec::new();

    for (&index, block) in state.content_blocks.iter_mut() {
        if block.start_sent && !block.stop_sent {
            block.stop_sent = true;
            events.push(StreamEvent::ContentBlockStop { index });
        }
    }

    events.push(StreamEvent::MessageDelta {
        delta: MessageDeltaPayload {
            stop_reason: Some(stop_reason),
            stop_sequence: None,
        },
        usage,
    });
    events.push(StreamEvent::MessageStop);
    state.finish_sent = true;

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_streaming_detects_event_stream() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
        assert!(is_streaming(&headers));
    }

    #[test]
    fn is_streaming_detects_chunked_transfer_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::TRANSFER_ENCODING, "chunked".parse().unwrap());
        assert!(is_streaming(&headers));
    }

    #[test]
    fn is_streaming_false_for_plain_json() {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert!(!is_streaming(&headers));
    }
}
