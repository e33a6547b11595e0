//! Cuts a chunk stream into windows and folds each window into one chunk.
//!
//! Ordinary content chunks are windows of one. Once a tool call starts, every
//! chunk up to and including the one whose finish reason is `tool_calls`
//! belongs to the same window, so the arguments of that call are emitted
//! complete rather than fragment by fragment.

use crate::api::ChatCompletionChunk;
use crate::error::ProviderError;
use crate::merge::{is_tool_call_chunk, is_tool_call_finished, merge};

/// Per-stream windowing state. Never shared between streams.
#[derive(Debug, Default)]
pub struct ChunkWindower {
    inside_tool: bool,
    accumulator: Option<ChatCompletionChunk>,
    pending: usize,
}

impl ChunkWindower {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk in arrival order.
    ///
    /// Returns the folded window when this chunk closes one. A protocol
    /// violation leaves the open window discarded.
    pub fn push(&mut self, chunk: ChatCompletionChunk) -> Result<Option<ChatCompletionChunk>, ProviderError> {
        if is_tool_call_chunk(&chunk) {
            self.inside_tool = true;
        }

        let closes_window = if self.inside_tool && is_tool_call_finished(&chunk) {
            self.inside_tool = false;
            true
        } else {
            !self.inside_tool
        };

        // Every window folds from an empty seed.
        let seed = self.accumulator.take().unwrap_or_default();
        let folded = match merge(Some(&seed), &chunk) {
            Ok(folded) => folded,
            Err(e) => {
                self.reset();
                return Err(e);
            }
        };

        if closes_window {
            self.pending = 0;
            Ok(Some(folded))
        } else {
            self.pending += 1;
            self.accumulator = Some(folded);
            Ok(None)
        }
    }

    /// True while a tool call is streaming and its window is still open.
    pub fn is_inside_tool(&self) -> bool {
        self.inside_tool
    }

    /// Number of chunks folded into the open window.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Drop any open window. Returns how many chunks were discarded.
    pub fn reset(&mut self) -> usize {
        let discarded = self.pending;
        self.inside_tool = false;
        self.accumulator = None;
        self.pending = 0;
        discarded
    }
}

/// Window a complete, already-received chunk sequence.
///
/// An open window left at the end is discarded, matching the streaming path.
pub fn window_chunks<I>(chunks: I) -> Result<Vec<ChatCompletionChunk>, ProviderError>
where
    I: IntoIterator<Item = ChatCompletionChunk>,
{
    let mut windower = ChunkWindower::new();
    let mut windows = Vec::new();
    for chunk in chunks {
        if let Some(window) = windower.push(chunk)? {
            windows.push(window);
        }
    }
    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ChatCompletionMessage, ChunkChoice, FinishReason, Role, ToolCall};

    fn chunk(delta: ChatCompletionMessage, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: Some("resp-1".to_string()),
            model: Some("SkyChat-MegaVerse".to_string()),
            choices: vec![ChunkChoice {
                index: Some(0),
                delta,
                finish_reason,
            }],
            ..Default::default()
        }
    }

    fn content(text: &str) -> ChatCompletionChunk {
        chunk(ChatCompletionMessage::new(text, Role::Assistant), None)
    }

    fn tool(call: ToolCall, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        chunk(
            ChatCompletionMessage {
                tool_calls: vec![call],
                ..Default::default()
            },
            finish_reason,
        )
    }

    #[test]
    fn test_content_chunks_are_single_windows() {
        let windows = window_chunks(vec![content("a"), content("b"), content("c")]).unwrap();

        assert_eq!(windows.len(), 3);
        let texts: Vec<_> = windows
            .iter()
            .map(|w| w.choices[0].delta.content.as_deref().unwrap())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tool_call_span_is_one_window() {
        let windows = window_chunks(vec![
            content("Let me check."),
            tool(ToolCall::new("x", "weather", ""), None),
            tool(ToolCall::fragment("1"), None),
            tool(ToolCall::fragment("2"), Some(FinishReason::ToolCalls)),
        ])
        .unwrap();

        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].choices[0].delta.content.as_deref(), Some("Let me check."));

        let choice = &windows[1].choices[0];
        assert_eq!(choice.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(choice.delta.tool_calls.len(), 1);
        let call = &choice.delta.tool_calls[0];
        assert_eq!(call.id.as_deref(), Some("x"));
        assert_eq!(call.function.name.as_deref(), Some("weather"));
        assert_eq!(call.function.arguments.as_deref(), Some("12"));
    }

    #[test]
    fn test_window_gets_identifier_when_vendor_omits_it() {
        let mut first = ToolCall::fragment("{\"q\":");
        first.function.name = Some("search".to_string());
        let windows = window_chunks(vec![
            tool(first, None),
            tool(ToolCall::fragment("\"rust\"}"), Some(FinishReason::ToolCalls)),
        ])
        .unwrap();

        let call = &windows[0].choices[0].delta.tool_calls[0];
        assert!(call.id.is_some());
        assert_eq!(call.function.arguments.as_deref(), Some("{\"q\":\"rust\"}"));
        assert_eq!(windows[0].choices[0].delta.role, Some(Role::Assistant));
    }

    #[test]
    fn test_content_after_tool_window_is_emitted_again() {
        let windows = window_chunks(vec![
            tool(ToolCall::new("x", "f", "{}"), Some(FinishReason::ToolCalls)),
            content("done"),
        ])
        .unwrap();

        assert_eq!(windows.len(), 2);
        assert!(windows[1].choices[0].delta.tool_calls.is_empty());
        assert_eq!(windows[1].choices[0].delta.content.as_deref(), Some("done"));
    }

    #[test]
    fn test_open_window_is_not_emitted() {
        let mut windower = ChunkWindower::new();
        assert!(windower.push(tool(ToolCall::new("x", "f", "{"), None)).unwrap().is_none());
        assert!(windower.push(tool(ToolCall::fragment("}"), None)).unwrap().is_none());
        assert!(windower.is_inside_tool());
        assert_eq!(windower.pending(), 2);
        assert_eq!(windower.reset(), 2);
        assert!(!windower.is_inside_tool());
    }

    #[test]
    fn test_multiple_tool_calls_halts_stream() {
        let double = chunk(
            ChatCompletionMessage {
                tool_calls: vec![ToolCall::new("a", "f", "{}"), ToolCall::new("b", "g", "{}")],
                ..Default::default()
            },
            Some(FinishReason::ToolCalls),
        );

        let err = window_chunks(vec![content("before"), double, content("after")]).unwrap_err();
        assert!(matches!(err, ProviderError::ProtocolViolation(_)));
    }
}
