//! Per-connection mutable state for the streaming translator.

use std::collections::BTreeMap;

/// Tagged kind of a tracked content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
    Thinking,
}

/// Bookkeeping for a single content block observed mid-stream.
#[derive(Debug, Clone)]
pub struct ContentBlockState {
    pub kind: BlockKind,
    pub start_sent: bool,
    pub stop_sent: bool,

    /// Upstream ordinal identifying this tool call across chunks (OpenAI
    /// `tool_calls[].index`, or the Gemini part index).
    pub tool_call_index: Option<u32>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    /// Accumulated JSON string prefix for `input_json_delta` diffing.
    pub arguments: String,
}

impl ContentBlockState {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            start_sent: false,
            stop_sent: false,
            tool_call_index: None,
            tool_call_id: None,
            tool_name: None,
            arguments: String::new(),
        }
    }
}

/// Per-upstream-connection state, owned exclusively by the streaming pump
/// task that created it: no cross-request sharing.
#[derive(Debug, Default)]
pub struct StreamState {
    pub message_id: Option<String>,
    pub model: Option<String>,
    pub message_start_sent: bool,
    pub finish_sent: bool,

    /// Canonical block index -> state. `BTreeMap` keeps emission order
    /// contiguous and iterable in ascending index order.
    pub content_blocks: BTreeMap<u32, ContentBlockState>,
    pub next_index: u32,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the canonical text block, creating its bookkeeping entry
    /// (without marking `start_sent`) if this is the first text seen.
    pub fn text_block_index(&mut self) -> u32 {
        const TEXT_INDEX: u32 = 0;

        self.content_blocks
            .entry(TEXT_INDEX)
            .or_insert_with(|| ContentBlockState::new(BlockKind::Text));

        if self.next_index <= TEXT_INDEX {
            self.next_index = TEXT_INDEX + 1;
        }

        TEXT_INDEX
    }

    /// Find the tool-call block matching `index` (preferred) or `id`,
    /// allocating a new one if neither matches and `id` is present.
    pub fn tool_block_index(&mut self, upstream_index: Option<u32>, id: Option<&str>) -> Option<u32> {
        if let Some(upstream_index) = upstream_index
            && let Some((&canonical_index, _)) = self
                .content_blocks
                .iter()
                .find(|(_, state)| state.tool_call_index == Some(upstream_index))
        {
            return Some(canonical_index);
        }

        if let Some(id) = id
            && let Some((&canonical_index, _)) = self
                .content_blocks
                .iter()
                .find(|(_, state)| state.tool_call_id.as_deref() == Some(id))
        {
            return Some(canonical_index);
        }

        if id.is_none() {
            return None;
        }

        let canonical_index = self.next_index;
        self.next_index += 1;

        let mut state = ContentBlockState::new(BlockKind::ToolUse);
        state.tool_call_index = upstream_index;
        self.content_blocks.insert(canonical_index, state);

        Some(canonical_index)
    }
}

/// OpenAI `call_XXX` <-> canonical `toolu_XXX`. Strings already carrying
/// either prefix are recognized as-is.
pub fn to_anthropic_tool_id(id: &str) -> String {
    match id.strip_prefix("call_") {
        Some(rest) => format!("toolu_{rest}"),
        None if id.starts_with("toolu_") => id.to_string(),
        None => format!("toolu_{id}"),
    }
}

pub fn to_openai_tool_id(id: &str) -> String {
    match id.strip_prefix("toolu_") {
        Some(rest) => format!("call_{rest}"),
        None if id.starts_with("call_") => id.to_string(),
        None => format!("call_{id}"),
    }
}

/// Compute the incremental fragment to emit for an `input_json_delta` given
/// the previously accumulated prefix and the newly observed full string.
/// When `new` doesn't extend `accumulated` as a prefix, treat it as a full
/// replacement.
pub fn argument_delta(accumulated: &str, new: &str) -> String {
    if let Some(suffix) = new.strip_prefix(accumulated) {
        suffix.to_string()
    } else {
        new.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_id_round_trips() {
        assert_eq!(to_anthropic_tool_id("call_1"), "toolu_1");
        assert_eq!(to_openai_tool_id("toolu_1"), "call_1");
        assert_eq!(to_anthropic_tool_id("toolu_1"), "toolu_1");
        assert_eq!(to_anthropic_tool_id("bare"), "toolu_bare");
        assert_eq!(to_openai_tool_id("bare"), "call_bare");
    }

    #[test]
    fn argument_delta_extends_prefix() {
        assert_eq!(argument_delta("{\"lo", "{\"location"), "cation");
        assert_eq!(argument_delta("", "{\"lo"), "{\"lo");
    }

    #[test]
    fn argument_delta_falls_back_to_replacement() {
        assert_eq!(argument_delta("{\"a\":1", "{\"b\":2"), "{\"b\":2");
    }

    #[test]
    fn tool_block_lookup_creates_then_reuses() {
        let mut state = StreamState::new();
        let first = state.tool_block_index(Some(0), Some("call_1")).unwrap();
        let again = state.tool_block_index(Some(0), None).unwrap();
        assert_eq!(first, again);
        assert!(state.tool_block_index(None, None).is_none());
    }
}
