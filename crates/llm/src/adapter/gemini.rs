//! Google Gemini adapter: model in the URL path, credential as a
//! query parameter, and a content/part mapping distinct enough from OpenAI's
//! to warrant its own request and response builders.

use std::collections::HashMap;

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use uuid::Uuid;

use super::Adapter;
use crate::{
    error::LlmError,
    messages::{
        anthropic::{
            self as canonical, ContentBlock, ContentDelta, MessageContent, ResponseBlock, ResponseKind, Role,
            StopReason, StreamEvent, StreamMessageStart, TextBlock, ToolUseBlock, Usage,
        },
        gemini::{self, Content, ErrorResponse, FunctionCall, FunctionDeclaration, GenerationConfig, Part, Request,
            Response, SystemInstruction, ToolDeclarations},
    },
    stream_state::{StreamState, argument_delta},
};

pub struct GeminiAdapter {
    pub base_url: String,
}

impl GeminiAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into() }
    }
}

impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        "google"
    }

    fn endpoint(&self, model: &str, streaming: bool) -> String {
        let method = if streaming { "streamGenerateContent" } else { "generateContent" };
        format!("{}/models/{model}:{method}", self.base_url.trim_end_matches('/'))
    }

    fn auth_headers(&self, _key: &SecretString) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn request_url(&self, model: &str, streaming: bool, key: &SecretString) -> String {
        let alt = if streaming { "&alt=sse" } else { "" };
        format!("{}?key={}{alt}", self.endpoint(model, streaming), key.expose_secret())
    }

    fn transform_request(&self, canonical_bytes: &[u8]) -> Result<Vec<u8>, LlmError> {
        let request: canonical::Request = sonic_rs::from_slice(canonical_bytes)
            .map_err(|e| LlmError::InvalidRequest(format!("malformed request body: {e}")))?;
        let rewritten = build_gemini_request(request);
        sonic_rs::to_vec(&rewritten).map_err(|e| LlmError::InvalidRequest(format!("failed to encode request: {e}")))
    }

    fn transform_response(&self, status: u16, body: &[u8]) -> Vec<u8> {
        if !(200..300).contains(&status) {
            let envelope = match sonic_rs::from_slice::<ErrorResponse>(body) {
                Ok(error) => {
                    let kind = gemini_status_to_kind(error.error.status.as_deref());
                    canonical::ErrorEnvelope::new(kind, error.error.message)
                }
                Err(_) => LlmError::from_upstream_status(status, String::from_utf8_lossy(body).to_string()).into_envelope(),
            };
            return sonic_rs::to_vec(&envelope).unwrap_or_default();
        }

        match sonic_rs::from_slice::<Response>(body) {
            Ok(response) => sonic_rs::to_vec(&build_canonical_response(response)).unwrap_or_default(),
            Err(e) => {
                let error = canonical::ErrorEnvelope::new("api_error", format!("malformed upstream response: {e}"));
                sonic_rs::to_vec(&error).unwrap_or_default()
            }
        }
    }

    fn transform_stream(&self, _event_name: &str, data: &str, state: &mut StreamState) -> Vec<StreamEvent> {
        let trimmed = data.trim().trim_start_matches('[').trim_end_matches(']').trim_matches(',');
        if trimmed.is_empty() {
            return Vec::new();
        }

        let chunk: Response = match sonic_rs::from_str(trimmed) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("dropping malformed Gemini stream chunk: {e}");
                return Vec::new();
            }
        };

        translate_chunk(chunk, state)
    }
}

fn gemini_status_to_kind(status: Option<&str>) -> &'static str {
    match status {
        Some("INVALID_ARGUMENT") => "invalid_request_error",
        Some("UNAUTHENTICATED") => "authentication_error",
        Some("PERMISSION_DENIED") => "permission_error",
        Some("NOT_FOUND") => "not_found_error",
        Some("RESOURCE_EXHAUSTED") | Some("DEADLINE_EXCEEDED") => "rate_limit_error",
        Some("INTERNAL") => "api_error",
        Some("UNAVAILABLE") => "overloaded_error",
        _ => "api_error",
    }
}

fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("STOP") => StopReason::EndTurn,
        Some("MAX_TOKENS") => StopReason::MaxTokens,
        Some("SAFETY") | Some("RECITATION") | Some("LANGUAGE") | Some("BLOCKLIST") | Some("PROHIBITED_CONTENT")
        | Some("SPII") => StopReason::StopSequence,
        Some("MALFORMED_FUNCTION_CALL") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

fn build_gemini_request(request: canonical::Request) -> Request {
    // Tool-result blocks carry only an id; recover the originating function
    // name from the matching tool_use block earlier in the conversation.
    let mut tool_names: HashMap<String, String> = HashMap::new();
    for message in &request.messages {
        if let MessageContent::Blocks(blocks) = &message.content {
            for block in blocks {
                if let ContentBlock::ToolUse(tool_use) = block {
                    tool_names.insert(tool_use.id.clone(), tool_use.name.clone());
                }
            }
        }
    }

    let system_instruction = request.system.as_ref().map(|s| s.as_text()).filter(|t| !t.is_empty()).map(|text| {
        SystemInstruction { parts: vec![Part::text(text)] }
    });

    let contents = request.messages.into_iter().map(|m| rewrite_message(m, &tool_names)).collect();

    let tools = request.tools.map(|tools| {
        vec![ToolDeclarations {
            function_declarations: tools
                .into_iter()
                .map(|tool| FunctionDeclaration {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                })
                .collect(),
        }]
    });

    let generation_config = GenerationConfig {
        max_output_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: request.top_k,
        stop_sequences: request.stop_sequences,
    };

    Request {
        system_instruction,
        contents,
        tools,
        generation_config: Some(generation_config),
    }
}

fn rewrite_message(message: canonical::Message, tool_names: &HashMap<String, String>) -> Content {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "model",
    };

    let parts = match message.content {
        MessageContent::Text(text) => vec![Part::text(text)],
        MessageContent::Blocks(blocks) => blocks
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text(t) => Some(Part::text(t.text)),
                ContentBlock::ToolUse(tool_use) => Some(Part {
                    text: None,
                    function_call: Some(FunctionCall { name: tool_use.name, args: tool_use.input }),
                    function_response: None,
                }),
                ContentBlock::ToolResult(result) => {
                    let name = tool_names.get(&result.tool_use_id).cloned().unwrap_or(result.tool_use_id);
                    let response = match result.content {
                        Some(Value::Object(map)) => Value::Object(map),
                        Some(other) => serde_json::json!({ "result": other }),
                        None => serde_json::json!({}),
                    };
                    Some(Part { text: None, function_call: None, function_response: Some(gemini::FunctionResponse { name, response }) })
                }
                _ => None,
            })
            .collect(),
    };

    Content { role: role.to_string(), parts }
}

fn build_canonical_response(response: Response) -> canonical::Response {
    let candidate = response.candidates.into_iter().next();
    let parts = candidate.as_ref().and_then(|c| c.content.as_ref()).map(|c| c.parts.clone()).unwrap_or_default();

    let mut content: Vec<ResponseBlock> = Vec::new();
    for part in parts {
        if let Some(text) = part.text {
            if !text.is_empty() {
                content.push(ResponseBlock::Text(TextBlock { text, unknown_fields: Default::default() }));
            }
        } else if let Some(call) = part.function_call {
            content.push(ResponseBlock::ToolUse(ToolUseBlock {
                id: format!("toolu_{}", Uuid::new_v4()),
                name: call.name,
                input: call.args,
                unknown_fields: Default::default(),
            }));
        }
    }
    if content.is_empty() {
        content.push(ResponseBlock::empty_text());
    }

    let usage = response.usage_metadata.map(|u| Usage {
        input_tokens: u.prompt_token_count,
        output_tokens: u.candidates_token_count,
        cache_read_input_tokens: None,
        cache_creation_input_tokens: None,
    }).unwrap_or_default();

    canonical::Response {
        id: response.response_id.unwrap_or_default(),
        kind: ResponseKind::Message,
        role: Role::Assistant,
        model: response.model_version.unwrap_or_default(),
        content,
        stop_reason: Some(map_finish_reason(candidate.and_then(|c| c.finish_reason).as_deref())),
        stop_sequence: None,
        usage,
        unknown_fields: Default::default(),
    }
}

fn translate_chunk(chunk: Response, state: &mut StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if !state.message_start_sent {
        let id = chunk.response_id.clone().unwrap_or_else(|| format!("msg_{}", Uuid::new_v4()));
        let model = chunk.model_version.clone().unwrap_or_default();
        state.message_id = Some(id.clone());
        state.model = Some(model.clone());
        state.message_start_sent = true;

        events.push(StreamEvent::MessageStart {
            message: StreamMessageStart {
                id,
                kind: ResponseKind::Message,
                role: Role::Assistant,
                content: Vec::new(),
                model,
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: chunk.usage_metadata.as_ref().map(|u| u.prompt_token_count).unwrap_or(0),
                    output_tokens: 1,
                    cache_read_input_tokens: None,
                    cache_creation_input_tokens: None,
                },
            },
        });
    }

    let Some(candidate) = chunk.candidates.into_iter().next() else {
        return events;
    };

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
    for (part_index, part) in parts.into_iter().enumerate() {
        let part_index = part_index as u32;

        if let Some(call) = part.function_call {
            let allocation_key = format!("gemini:{part_index}");
            let Some(index) = state.tool_block_index(Some(part_index), Some(&allocation_key)) else {
                continue;
            };
            let block = state.content_blocks.get_mut(&index).expect("just resolved");
            block.tool_call_index = Some(part_index);
            block.tool_name = Some(call.name.clone());
            if block.tool_call_id.is_none() {
                block.tool_call_id = Some(format!("toolu_{}", Uuid::new_v4()));
            }

            if !block.start_sent {
                block.start_sent = true;
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseBlock::ToolUse(ToolUseBlock {
                        id: block.tool_call_id.clone().expect("set above"),
                        name: call.name,
                        input: Value::Object(Default::default()),
                        unknown_fields: Default::default(),
                    }),
                });
            }

            let new_full = serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string());
            let block = state.content_blocks.get_mut(&index).expect("just resolved");
            let delta = argument_delta(&block.arguments, &new_full);
            block.arguments = new_full;
            if !delta.is_empty() {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::InputJsonDelta { partial_json: delta },
                });
            }
        } else if let Some(text) = part.text {
            if !text.is_empty() {
                let index = state.text_block_index();
                let block = state.content_blocks.get_mut(&index).expect("just created");
                if !block.start_sent {
                    block.start_sent = true;
                    events.push(StreamEvent::ContentBlockStart {
                        index,
                        content_block: ResponseBlock::empty_text(),
                    });
                }
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: ContentDelta::TextDelta { text },
                });
            }
        }
    }

    if let Some(finish_reason) = candidate.finish_reason {
        let usage = chunk.usage_metadata.map(|u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            cache_read_input_tokens: None,
            cache_creation_input_tokens: None,
        }).unwrap_or_default();
        events.extend(super::finish_stream(state, map_finish_reason(Some(&finish_reason)), usage));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_table() {
        assert_eq!(map_finish_reason(Some("STOP")), StopReason::EndTurn);
        assert_eq!(map_finish_reason(Some("SAFETY")), StopReason::StopSequence);
        assert_eq!(map_finish_reason(Some("MALFORMED_FUNCTION_CALL")), StopReason::ToolUse);
        assert_eq!(map_finish_reason(Some("FINISH_REASON_UNSPECIFIED")), StopReason::EndTurn);
        assert_eq!(map_finish_reason(None), StopReason::EndTurn);
    }

    #[test]
    fn error_status_table() {
        assert_eq!(gemini_status_to_kind(Some("UNAUTHENTICATED")), "authentication_error");
        assert_eq!(gemini_status_to_kind(Some("UNAVAILABLE")), "overloaded_error");
        assert_eq!(gemini_status_to_kind(Some("WEIRD")), "api_error");
        assert_eq!(gemini_status_to_kind(None), "api_error");
    }

    #[test]
    fn empty_candidate_content_yields_empty_text_block() {
        let response = Response { response_id: Some("r1".into()), model_version: Some("gemini-pro".into()), candidates: vec![gemini::Candidate { content: None, finish_reason: Some("STOP".into()) }], usage_metadata: None };
        let canonical = build_canonical_response(response);
        assert_eq!(canonical.content.len(), 1);
        assert!(matches!(canonical.content[0], ResponseBlock::Text(ref t) if t.text.is_empty()));
    }

    #[test]
    fn non_streaming_tool_call_response_gets_a_synthetic_id() {
        let raw = indoc::indoc! {r#"
            {
              "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "get_weather", "args": {"location": "San Francisco", "unit": "celsius"}}}]},
                "finishReason": "STOP"
              }]
            }
        "#};

        let response: Response = sonic_rs::from_str(raw).unwrap();
        let canonical = build_canonical_response(response);

        assert_eq!(canonical.stop_reason, Some(StopReason::EndTurn));
        match &canonical.content[..] {
            [ResponseBlock::ToolUse(tool_use)] => {
                assert!(tool_use.id.starts_with("toolu_"));
                assert_eq!(tool_use.name, "get_weather");
                assert_eq!(tool_use.input["location"], "San Francisco");
            }
            other => panic!("expected a single tool_use block, got {other:?}"),
        }
    }

    #[test]
    fn error_body_maps_unauthenticated_to_authentication_error() {
        let raw = indoc::indoc! {r#"
            {"error": {"code": 400, "message": "Invalid API key", "status": "UNAUTHENTICATED"}}
        "#};

        let error: ErrorResponse = sonic_rs::from_str(raw).unwrap();
        let kind = gemini_status_to_kind(error.error.status.as_deref());
        let envelope = canonical::ErrorEnvelope::new(kind, error.error.message);

        assert_eq!(envelope.error.kind, "authentication_error");
        assert_eq!(envelope.error.message, "Invalid API key");
    }

    #[test]
    fn tool_result_recovers_function_name_from_history() {
        let raw = indoc::indoc! {r#"
            {
              "model": "gemini-pro",
              "max_tokens": 32,
              "messages": [
                {"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_abc", "name": "get_weather", "input": {}}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_abc", "content": "72F"}]}
              ]
            }
        "#};

        let request: canonical::Request = sonic_rs::from_str(raw).unwrap();
        let rewritten = build_gemini_request(request);

        let function_response =
            rewritten.contents[1].parts[0].function_response.as_ref().expect("functionResponse part");
        assert_eq!(function_response.name, "get_weather");
    }
}
