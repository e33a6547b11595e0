pub mod api;
pub mod chat;
pub mod error;
pub mod function;
pub mod image;
pub mod merge;
pub mod mock;
pub mod options;
pub mod retry;
mod streaming;
pub mod window;

pub use api::image::{ImageApi, ImageRequest, TiangongImageApi};
pub use api::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionMessage, ChatCompletionRequest, FinishReason, Role,
    TiangongApi, ToolCall, ToolCallDelta,
};
pub use chat::TiangongChatClient;
pub use error::ProviderError;
pub use function::{FunctionCallback, FunctionCallbackWrapper, FunctionRegistry};
pub use image::{ImagePrompt, ImageResponse, TiangongImageClient};
pub use merge::{is_tool_call_chunk, is_tool_call_finished, merge};
pub use options::{ChatOptions, ImageOptions};
pub use retry::RetryPolicy;
pub use streaming::{decode_utf8_streaming, SseDecoder, SseFrame};
pub use window::{window_chunks, ChunkWindower};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stream of finished chunk windows, one item per window.
pub type ChunkStream = tokio_stream::wrappers::ReceiverStream<Result<ChatCompletionChunk>>;

/// Transport seam for chat completions.
#[async_trait::async_trait]
pub trait ChatApi: Send + Sync {
    /// Blocking-style completion; the request must not be streaming.
    async fn chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletion>;

    /// Streamed completion. Each item is one folded window.
    async fn chat_completion_stream(&self, request: ChatCompletionRequest) -> Result<ChunkStream>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    System,
    User,
    Assistant,
    Tool,
}

impl From<MessageType> for Role {
    fn from(message_type: MessageType) -> Self {
        match message_type {
            MessageType::System => Role::System,
            MessageType::User => Role::User,
            MessageType::Assistant => Role::Assistant,
            MessageType::Tool => Role::Tool,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub message_type: MessageType,
    pub content: String,
}

impl PromptMessage {
    pub fn new(message_type: MessageType, content: impl Into<String>) -> Self {
        Self {
            message_type,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageType::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageType::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageType::Assistant, content)
    }
}

/// Messages plus optional per-call options.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub messages: Vec<PromptMessage>,
    pub options: Option<ChatOptions>,
}

impl Prompt {
    pub fn new(messages: Vec<PromptMessage>) -> Self {
        Self {
            messages,
            options: None,
        }
    }

    /// A single user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(vec![PromptMessage::user(content)])
    }

    pub fn with_options(mut self, options: ChatOptions) -> Self {
        self.options = Some(options);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub finish_reason: String,
}

/// One choice of a response. `properties` carries `id`, `role` and
/// `finishReason` as reported by the vendor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    pub properties: HashMap<String, String>,
    pub metadata: Option<GenerationMetadata>,
}

impl Generation {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn finish_reason(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.finish_reason.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub generations: Vec<Generation>,
}

impl ChatResponse {
    pub fn new(generations: Vec<Generation>) -> Self {
        Self { generations }
    }

    pub fn first(&self) -> Option<&Generation> {
        self.generations.first()
    }

    /// Concatenated content of all generations.
    pub fn content(&self) -> String {
        self.generations.iter().map(|g| g.content.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_maps_to_role() {
        assert_eq!(Role::from(MessageType::System), Role::System);
        assert_eq!(Role::from(MessageType::Tool), Role::Tool);
    }

    #[test]
    fn test_prompt_user_shortcut() {
        let prompt = Prompt::user("Hello");
        assert_eq!(prompt.messages, vec![PromptMessage::user("Hello")]);
        assert!(prompt.options.is_none());
    }

    #[test]
    fn test_chat_response_content_joins_generations() {
        let response = ChatResponse::new(vec![
            Generation {
                content: "Hello, ".to_string(),
                ..Default::default()
            },
            Generation {
                content: "world!".to_string(),
                ..Default::default()
            },
        ]);
        assert_eq!(response.content(), "Hello, world!");
        assert!(response.first().and_then(|g| g.finish_reason()).is_none());
    }
}
