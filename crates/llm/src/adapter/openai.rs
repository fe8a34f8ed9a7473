//! OpenAI-compatible adapter, shared by the direct OpenAI provider
//! kind and the OpenAI-compatible aggregator — they differ only in
//! `base_url` and default model prefix, not in wire shape.

use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use super::Adapter;
use crate::{
    error::LlmError,
    messages::{
        anthropic::{
            self as canonical, ContentBlock, ContentDelta, MessageContent, ResponseBlock, ResponseKind, Role,
            StopReason, StreamEvent, StreamMessageStart, TextBlock, ToolUseBlock, Usage,
        },
        openai::{self, FunctionCall, FunctionDeclaration, Message, Request, StreamChunk, ToolCall, ToolDeclaration, ToolKind},
    },
    stream_state::{StreamState, to_anthropic_tool_id, to_openai_tool_id},
};

pub struct OpenAiAdapter {
    pub name: String,
    pub base_url: String,
}

impl OpenAiAdapter {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
        }
    }
}

impl Adapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self, _model: &str, _streaming: bool) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn auth_headers(&self, key: &SecretString) -> Vec<(&'static str, String)> {
        vec![("authorization", format!("Bearer {}", key.expose_secret()))]
    }

    fn transform_request(&self, canonical_bytes: &[u8]) -> Result<Vec<u8>, LlmError> {
        let request: canonical::Request = sonic_rs::from_slice(canonical_bytes)
            .map_err(|e| LlmError::InvalidRequest(format!("malformed request body: {e}")))?;
        let rewritten = build_openai_request(request);
        sonic_rs::to_vec(&rewritten).map_err(|e| LlmError::InvalidRequest(format!("failed to encode request: {e}")))
    }

    fn transform_response(&self, status: u16, body: &[u8]) -> Vec<u8> {
        if !(200..300).contains(&status) {
            let message = sonic_rs::from_slice::<UpstreamError>(body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string());
            let error = LlmError::from_upstream_status(status, message).into_envelope();
            return sonic_rs::to_vec(&error).unwrap_or_default();
        }

        match sonic_rs::from_slice::<openai::Response>(body) {
            Ok(response) => sonic_rs::to_vec(&build_canonical_response(response)).unwrap_or_default(),
            Err(e) => {
                let error = canonical::ErrorEnvelope::new("api_error", format!("malformed upstream response: {e}"));
                sonic_rs::to_vec(&error).unwrap_or_default()
            }
        }
    }

    fn transform_stream(&self, _event_name: &str, data: &str, state: &mut StreamState) -> Vec<StreamEvent> {
        if data.trim() == "[DONE]" {
            return Vec::new();
        }

        let chunk: StreamChunk = match sonic_rs::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("dropping malformed OpenAI stream chunk: {e}");
                return Vec::new();
            }
        };

        translate_chunk(chunk, state)
    }
}

#[derive(Debug, serde::Deserialize)]
struct UpstreamError {
    error: UpstreamErrorDetail,
}

#[derive(Debug, serde::Deserialize)]
struct UpstreamErrorDetail {
    message: String,
}

/// Remove `cache_control` keys at any nesting depth.
fn strip_cache_control(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("cache_control");
            for v in map.values_mut() {
                strip_cache_control(v);
            }
        }
        Value::Array(items) => {
            for v in items {
                strip_cache_control(v);
            }
        }
        _ => {}
    }
}

fn build_openai_request(request: canonical::Request) -> Request {
    let mut messages = Vec::new();

    if let Some(system) = &request.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(Message {
                role: "system".to_string(),
                content: Some(text),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for message in request.messages {
        messages.extend(rewrite_message(message));
    }

    let has_tools = request.tools.as_ref().is_some_and(|tools| !tools.is_empty());

    let tools = request.tools.map(|tools| {
        tools
            .into_iter()
            .map(|tool| {
                let mut parameters = tool.input_schema;
                strip_cache_control(&mut parameters);
                ToolDeclaration {
                    kind: ToolKind::Function,
                    function: FunctionDeclaration {
                        name: tool.name,
                        description: tool.description,
                        parameters,
                    },
                }
            })
            .collect()
    });

    let tool_choice = if has_tools {
        request.tool_choice.map(|mut v| {
            strip_cache_control(&mut v);
            v
        })
    } else {
        None
    };

    let store = request
        .metadata
        .as_ref()
        .and_then(|m| m.get("store"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut unknown_fields = crate::unknown_fields::UnknownFields::default();
    if store {
        if let Some(metadata) = request.metadata {
            unknown_fields = serde_json::from_value(serde_json::json!({ "metadata": metadata })).unwrap_or_default();
        }
    }

    Request {
        model: request.model,
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences,
        stream: request.stream.unwrap_or(false),
        tools,
        tool_choice,
        unknown_fields,
    }
}

/// Rewrite a single canonical message into zero or more OpenAI messages:
/// `tool_result` blocks become standalone `role:"tool"`
/// messages; remaining text is flushed as a single message at each boundary.
fn rewrite_message(message: canonical::Message) -> Vec<Message> {
    let blocks = match message.content {
        MessageContent::Text(text) => {
            return vec![Message {
                role: role_str(message.role).to_string(),
                content: Some(text),
                tool_calls: None,
                tool_call_id: None,
            }];
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    match message.role {
        Role::User => rewrite_user_blocks(blocks),
        Role::Assistant => vec![rewrite_assistant_blocks(blocks)],
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn rewrite_user_blocks(blocks: Vec<ContentBlock>) -> Vec<Message> {
    let mut out = Vec::new();
    let mut pending_text = String::new();

    let flush_text = |pending: &mut String, out: &mut Vec<Message>| {
        if !pending.is_empty() {
            out.push(Message {
                role: "user".to_string(),
                content: Some(std::mem::take(pending)),
                tool_calls: None,
                tool_call_id: None,
            });
        }
    };

    for block in blocks {
        match block {
            ContentBlock::ToolResult(result) => {
                flush_text(&mut pending_text, &mut out);
                let content = match &result.content {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => serde_json::to_string(other).unwrap_or_default(),
                    None => String::new(),
                };
                out.push(Message {
                    role: "tool".to_string(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(to_openai_tool_id(&result.tool_use_id)),
                });
            }
            ContentBlock::Text(text) => pending_text.push_str(&text.text),
            _ => {}
        }
    }

    flush_text(&mut pending_text, &mut out);
    out
}

fn rewrite_assistant_blocks(blocks: Vec<ContentBlock>) -> Message {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text(t) => text.push_str(&t.text),
            ContentBlock::ToolUse(tool_use) => tool_calls.push(ToolCall {
                id: to_openai_tool_id(&tool_use.id),
                kind: ToolKind::Function,
                function: FunctionCall {
                    name: tool_use.name,
                    arguments: serde_json::to_string(&tool_use.input).unwrap_or_else(|_| "{}".to_string()),
                },
            }),
            _ => {}
        }
    }

    Message {
        role: "assistant".to_string(),
        content: if text.is_empty() { None } else { Some(text) },
        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
        tool_call_id: None,
    }
}

fn map_finish_reason(reason: Option<&str>) -> StopReason {
    match reason {
        Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some("tool_calls") | Some("function_call") => StopReason::ToolUse,
        Some("content_filter") => StopReason::StopSequence,
        _ => StopReason::EndTurn,
    }
}

fn parse_arguments(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Map::new()))
}

fn build_canonical_response(response: openai::Response) -> canonical::Response {
    let choice = response.choices.into_iter().next();
    let message = choice.as_ref().map(|c| &c.message);

    let mut content = Vec::new();
    if let Some(message) = message {
        if let Some(text) = &message.content {
            if !text.is_empty() {
                let mut unknown_fields = crate::unknown_fields::UnknownFields::default();
                if let Some(annotations) = &message.annotations {
                    unknown_fields =
                        serde_json::from_value(serde_json::json!({ "annotations": annotations })).unwrap_or_default();
                }
                content.push(ResponseBlock::Text(TextBlock {
                    text: text.clone(),
                    unknown_fields,
                }));
            }
        }
        for tool_call in message.tool_calls.iter().flatten() {
            content.push(ResponseBlock::ToolUse(ToolUseBlock {
                id: to_anthropic_tool_id(&tool_call.id),
                name: tool_call.function.name.clone(),
                input: parse_arguments(&tool_call.function.arguments),
                unknown_fields: Default::default(),
            }));
        }
    }
    if content.is_empty() {
        content.push(ResponseBlock::empty_text());
    }

    let usage = response.usage.map(build_usage).unwrap_or_default();

    canonical::Response {
        id: response.id,
        kind: ResponseKind::Message,
        role: Role::Assistant,
        model: response.model.unwrap_or_default(),
        content,
        stop_reason: Some(map_finish_reason(choice.as_ref().and_then(|c| c.finish_reason.as_deref()))),
        stop_sequence: None,
        usage,
        unknown_fields: Default::default(),
    }
}

fn build_usage(usage: openai::Usage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_read_input_tokens: usage.prompt_tokens_details.and_then(|d| d.cached_tokens),
        cache_creation_input_tokens: usage.cache_creation_input_tokens,
    }
}

fn translate_chunk(chunk: StreamChunk, state: &mut StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    if !state.message_start_sent {
        let id = chunk.id.clone().unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4()));
        let model = chunk.model.clone().unwrap_or_default();
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
                    input_tokens: chunk.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
                    output_tokens: 1,
                    cache_read_input_tokens: None,
                    cache_creation_input_tokens: None,
                },
            },
        });
    }

    let Some(choice) = chunk.choices.into_iter().next() else {
        return events;
    };

    if let Some(tool_calls) = choice.delta.tool_calls {
        for delta in tool_calls {
            let Some(index) = state.tool_block_index(Some(delta.index), delta.id.as_deref()) else {
                continue;
            };
            let block = state.content_blocks.get_mut(&index).expect("just resolved");
            block.tool_call_index = Some(delta.index);
            if delta.id.is_some() {
                block.tool_call_id = delta.id;
            }

            if let Some(function) = &delta.function {
                if let Some(name) = &function.name {
                    block.tool_name = Some(name.clone());
                }
            }

            if !block.start_sent {
                if let (Some(id), Some(name)) = (block.tool_call_id.clone(), block.tool_name.clone()) {
                    block.start_sent = true;
                    events.push(StreamEvent::ContentBlockStart {
                        index,
                        content_block: ResponseBlock::ToolUse(ToolUseBlock {
                            id: to_anthropic_tool_id(&id),
                            name,
                            input: Value::Object(Map::new()),
                            unknown_fields: Default::default(),
                        }),
                    });
                }
            }

            if let Some(fragment) = delta.function.and_then(|f| f.arguments) {
                if !fragment.is_empty() {
                    let block = state.content_blocks.get_mut(&index).expect("just resolved");
                    block.arguments.push_str(&fragment);
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: ContentDelta::InputJsonDelta { partial_json: fragment },
                    });
                }
            }
        }
    } else if let Some(text) = choice.delta.content {
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

    if let Some(finish_reason) = choice.finish_reason {
        let usage = chunk.usage.map(build_usage).unwrap_or_default();
        events.extend(super::finish_stream(state, map_finish_reason(Some(&finish_reason)), usage));
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_cache_control_removes_nested_keys() {
        let mut value = serde_json::json!({
            "a": {"cache_control": {"type": "ephemeral"}, "b": 1},
            "list": [{"cache_control": "x"}, 2],
        });
        strip_cache_control(&mut value);
        assert_eq!(value, serde_json::json!({"a": {"b": 1}, "list": [{}, 2]}));
    }

    #[test]
    fn malformed_arguments_become_empty_object() {
        assert_eq!(parse_arguments("not json"), Value::Object(Map::new()));
    }

    #[test]
    fn finish_reason_table() {
        assert_eq!(map_finish_reason(Some("stop")), StopReason::EndTurn);
        assert_eq!(map_finish_reason(Some("length")), StopReason::MaxTokens);
        assert_eq!(map_finish_reason(Some("tool_calls")), StopReason::ToolUse);
        assert_eq!(map_finish_reason(Some("content_filter")), StopReason::StopSequence);
        assert_eq!(map_finish_reason(None), StopReason::EndTurn);
        assert_eq!(map_finish_reason(Some("bogus")), StopReason::EndTurn);
    }

    #[test]
    fn non_streaming_text_response_round_trips_to_canonical() {
        let raw = indoc::indoc! {r#"
            {
              "id": "cmpl_1",
              "model": "gpt-4",
              "choices": [{"message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}],
              "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            }
        "#};

        let response: openai::Response = sonic_rs::from_str(raw).unwrap();
        let canonical = build_canonical_response(response);

        assert_eq!(canonical.id, "cmpl_1");
        assert_eq!(canonical.model, "gpt-4");
        assert_eq!(canonical.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(canonical.usage.input_tokens, 3);
        assert_eq!(canonical.usage.output_tokens, 1);
        match &canonical.content[..] {
            [ResponseBlock::Text(text)] => assert_eq!(text.text, "hi"),
            other => panic!("expected a single text block, got {other:?}"),
        }
    }

    #[test]
    fn tool_result_message_becomes_tool_role_with_converted_id() {
        let raw = indoc::indoc! {r#"
            {
              "model": "gpt-4",
              "max_tokens": 32,
              "messages": [{
                "role": "user",
                "content": [{"type": "tool_result", "tool_use_id": "toolu_abc", "content": "42"}]
              }],
              "tools": [{"name": "get_weather", "input_schema": {"type": "object"}}]
            }
        "#};

        let request: canonical::Request = sonic_rs::from_str(raw).unwrap();
        let rewritten = build_openai_request(request);

        assert_eq!(rewritten.tools.as_ref().unwrap().len(), 1);
        assert_eq!(rewritten.messages.len(), 1);
        let message = &rewritten.messages[0];
        assert_eq!(message.role, "tool");
        assert_eq!(message.tool_call_id.as_deref(), Some("call_abc"));
        assert_eq!(message.content.as_deref(), Some("42"));
    }

    #[test]
    fn streaming_text_deltas_accumulate_and_close_cleanly() {
        let mut state = StreamState::new();
        let chunks = [
            r#"{"id":"x","model":"m","choices":[{"delta":{"role":"assistant","content":"A"}}]}"#,
            r#"{"choices":[{"delta":{"content":"B"},"finish_reason":null}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":2,"completion_tokens":2}}"#,
        ];

        let mut text = String::new();
        let mut saw_stop = false;
        for raw in chunks {
            let chunk: StreamChunk = sonic_rs::from_str(raw).unwrap();
            for event in translate_chunk(chunk, &mut state) {
                match event {
                    StreamEvent::ContentBlockDelta { delta: ContentDelta::TextDelta { text: fragment }, .. } => {
                        text.push_str(&fragment)
                    }
                    StreamEvent::MessageDelta { delta, usage } => {
                        assert_eq!(delta.stop_reason, Some(StopReason::EndTurn));
                        assert_eq!(usage.output_tokens, 2);
                        saw_stop = true;
                    }
                    _ => {}
                }
            }
        }

        assert_eq!(text, "AB");
        assert!(saw_stop);
        assert!(state.finish_sent);
    }

    #[test]
    fn streaming_tool_call_accumulates_fragments() {
        let mut state = StreamState::new();
        let chunks = [
            r#"{"id":"x","model":"m","choices":[{"delta":{"role":"assistant"}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"get_weather","arguments":""}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"lo"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"cation"}}]}}]}"#,
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"\":\"SF\"}"}}]}}]}"#,
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
        ];

        let mut accumulated = String::new();
        for raw in chunks {
            let chunk: StreamChunk = sonic_rs::from_str(raw).unwrap();
            for event in translate_chunk(chunk, &mut state) {
                if let StreamEvent::ContentBlockDelta {
                    delta: ContentDelta::InputJsonDelta { partial_json },
                    ..
                } = event
                {
                    accumulated.push_str(&partial_json);
                }
            }
        }

        assert_eq!(accumulated, "{\"location\":\"SF\"}");
        assert!(state.finish_sent);
    }
}
