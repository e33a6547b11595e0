//! Mock transports for testing
//!
//! [`MockChatApi`] returns queued replies in order and records every request
//! it receives. Raw chunk replies go through the same windowing as the real
//! HTTP stream, so tests see exactly what callers of [`ChatApi`] would see.
//!
//! # Example
//!
//! ```rust,ignore
//! use tiangong_providers::mock::{MockChatApi, MockReply};
//!
//! let api = MockChatApi::new()
//!     .with_reply(MockReply::tool_call("call_1", "weather", r#"{"city":"Paris"}"#))
//!     .with_reply(MockReply::text("It is sunny."));
//! ```

use anyhow::Result;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::api::image::{ImageApi, ImageApiResponse, ImageData, ImageRequest};
use crate::api::{
    ChatCompletion, ChatCompletionChunk, ChatCompletionMessage, ChatCompletionRequest, Choice, ChunkChoice,
    FinishReason, Role, ToolCall, Usage,
};
use crate::error::ProviderError;
use crate::window::ChunkWindower;
use crate::{ChatApi, ChunkStream};

pub const MOCK_COMPLETION_ID: &str = "mock-completion";
pub const MOCK_MODEL: &str = "mock-model";

/// One canned reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// A complete answer. Streamed as a single chunk.
    Completion(ChatCompletion),
    /// Raw chunks. Windowed when streamed; folded into one completion per
    /// window (last window wins) for a blocking call.
    Chunks(Vec<ChatCompletionChunk>),
    /// An HTTP error status.
    ApiError { status: StatusCode, body: String },
}

impl MockReply {
    pub fn text(content: &str) -> Self {
        MockReply::Completion(completion(
            ChatCompletionMessage::new(content, Role::Assistant),
            FinishReason::Stop,
        ))
    }

    pub fn tool_call(id: &str, name: &str, arguments: &str) -> Self {
        MockReply::Completion(completion(
            ChatCompletionMessage {
                content: None,
                role: Some(Role::Assistant),
                name: None,
                tool_calls: vec![ToolCall::new(id, name, arguments)],
            },
            FinishReason::ToolCalls,
        ))
    }

    /// Content chunks followed by a finishing chunk. Only the first chunk
    /// carries the role, as the vendor does.
    pub fn streaming(parts: Vec<&str>) -> Self {
        let mut chunks: Vec<ChatCompletionChunk> = parts
            .into_iter()
            .enumerate()
            .map(|(i, part)| {
                let role = if i == 0 { Some(Role::Assistant) } else { None };
                content_chunk(part, role, None)
            })
            .collect();
        chunks.push(content_chunk("", None, Some(FinishReason::Stop)));
        MockReply::Chunks(chunks)
    }

    pub fn api_error(status: StatusCode) -> Self {
        MockReply::ApiError {
            status,
            body: format!("{{\"error\":\"{}\"}}", status.canonical_reason().unwrap_or("mock error")),
        }
    }
}

fn completion(message: ChatCompletionMessage, finish_reason: FinishReason) -> ChatCompletion {
    ChatCompletion {
        id: Some(MOCK_COMPLETION_ID.to_string()),
        object: Some("chat.completion".to_string()),
        created: Some(0),
        model: Some(MOCK_MODEL.to_string()),
        choices: vec![Choice {
            index: Some(0),
            message,
            finish_reason: Some(finish_reason),
        }],
        request_id: None,
        usage: Some(Usage {
            prompt_tokens: Some(10),
            total_tokens: Some(20),
            completion_tokens: Some(10),
        }),
    }
}

/// A single-choice chunk carrying text.
pub fn content_chunk(content: &str, role: Option<Role>, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: Some(MOCK_COMPLETION_ID.to_string()),
        object: Some("chat.completion.chunk".to_string()),
        created: Some(0),
        model: Some(MOCK_MODEL.to_string()),
        request_id: None,
        choices: vec![ChunkChoice {
            index: Some(0),
            delta: ChatCompletionMessage {
                content: Some(content.to_string()),
                role,
                name: None,
                tool_calls: Vec::new(),
            },
            finish_reason,
        }],
    }
}

fn completion_to_chunk(completion: ChatCompletion) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: completion.id,
        object: Some("chat.completion.chunk".to_string()),
        created: completion.created,
        model: completion.model,
        request_id: completion.request_id,
        choices: completion
            .choices
            .into_iter()
            .map(|choice| ChunkChoice {
                index: choice.index,
                delta: choice.message,
                finish_reason: choice.finish_reason,
            })
            .collect(),
    }
}

/// Queue-backed [`ChatApi`].
pub struct MockChatApi {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<ChatCompletionRequest>>>,
    default_reply: Option<MockReply>,
}

impl MockChatApi {
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            default_reply: None,
        }
    }

    pub fn with_reply(self, reply: MockReply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_replies(self, replies: Vec<MockReply>) -> Self {
        self.replies.lock().unwrap().extend(replies);
        self
    }

    /// Reply used once the queue is empty.
    pub fn with_default_reply(mut self, reply: MockReply) -> Self {
        self.default_reply = Some(reply);
        self
    }

    pub fn requests(&self) -> Vec<ChatCompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn next_reply(&self, request: ChatCompletionRequest) -> MockReply {
        self.requests.lock().unwrap().push(request);

        let mut replies = self.replies.lock().unwrap();
        replies.pop_front().unwrap_or_else(|| {
            self.default_reply
                .clone()
                .unwrap_or_else(|| MockReply::text("Mock response (no replies configured)"))
        })
    }
}

impl Default for MockChatApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatApi for MockChatApi {
    async fn chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletion> {
        match self.next_reply(request) {
            MockReply::Completion(completion) => Ok(completion),
            MockReply::Chunks(chunks) => {
                let mut windower = ChunkWindower::new();
                let mut last = None;
                for chunk in chunks {
                    if let Some(window) = windower.push(chunk)? {
                        last = Some(window);
                    }
                }
                Ok(last.map(ChatCompletionChunk::into_completion).unwrap_or_default())
            }
            MockReply::ApiError { status, body } => Err(ProviderError::Api { status, body }.into()),
        }
    }

    async fn chat_completion_stream(&self, request: ChatCompletionRequest) -> Result<ChunkStream> {
        let chunks = match self.next_reply(request) {
            MockReply::Completion(completion) => vec![completion_to_chunk(completion)],
            MockReply::Chunks(chunks) => chunks,
            MockReply::ApiError { status, body } => return Err(ProviderError::Api { status, body }.into()),
        };

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut windower = ChunkWindower::new();
            for chunk in chunks {
                match windower.push(chunk) {
                    Ok(Some(window)) => {
                        if tx.send(Ok(window)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
            let discarded = windower.reset();
            if discarded > 0 {
                debug!("Mock stream ended with {} chunks in an open window", discarded);
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Queue-backed [`ImageApi`].
pub struct MockImageApi {
    responses: Arc<Mutex<VecDeque<ImageApiResponse>>>,
    requests: Arc<Mutex<Vec<ImageRequest>>>,
}

impl MockImageApi {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_response(self, response: ImageApiResponse) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    /// Queue a response listing the given image URLs.
    pub fn with_urls(self, created: i64, urls: &[&str]) -> Self {
        self.with_response(ImageApiResponse {
            created: Some(created),
            data: urls
                .iter()
                .map(|url| ImageData {
                    url: Some(url.to_string()),
                })
                .collect(),
            error: None,
        })
    }

    pub fn requests(&self) -> Vec<ImageRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for MockImageApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ImageApi for MockImageApi {
    async fn create_image(&self, request: ImageRequest) -> Result<ImageApiResponse> {
        self.requests.lock().unwrap().push(request);
        Ok(self.responses.lock().unwrap().pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_mock_text_reply() {
        let api = MockChatApi::new().with_reply(MockReply::text("Hello, world!"));

        let completion = api
            .chat_completion(ChatCompletionRequest::new(Vec::new(), false))
            .await
            .unwrap();
        assert_eq!(completion.choices[0].message.content.as_deref(), Some("Hello, world!"));
        assert_eq!(api.request_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_streaming_windows() {
        let api = MockChatApi::new().with_reply(MockReply::streaming(vec!["Hello, ", "world!"]));

        let mut stream = api
            .chat_completion_stream(ChatCompletionRequest::new(Vec::new(), true))
            .await
            .unwrap();

        let mut content = String::new();
        let mut windows = 0;
        while let Some(window) = stream.next().await {
            let window = window.unwrap();
            content.push_str(window.choices[0].delta.content.as_deref().unwrap_or_default());
            windows += 1;
        }

        assert_eq!(content, "Hello, world!");
        assert_eq!(windows, 3);
    }

    #[tokio::test]
    async fn test_mock_multi_turn_and_request_tracking() {
        let api = MockChatApi::new().with_replies(vec![MockReply::text("First"), MockReply::text("Second")]);

        let first = ChatCompletionRequest {
            max_tokens: Some(100),
            ..ChatCompletionRequest::new(Vec::new(), false)
        };
        let second = ChatCompletionRequest {
            max_tokens: Some(200),
            ..ChatCompletionRequest::new(Vec::new(), false)
        };

        let a = api.chat_completion(first).await.unwrap();
        let b = api.chat_completion(second).await.unwrap();
        assert_eq!(a.choices[0].message.content.as_deref(), Some("First"));
        assert_eq!(b.choices[0].message.content.as_deref(), Some("Second"));

        let requests = api.requests();
        assert_eq!(requests[0].max_tokens, Some(100));
        assert_eq!(requests[1].max_tokens, Some(200));
    }

    #[tokio::test]
    async fn test_mock_api_error() {
        let api = MockChatApi::new().with_reply(MockReply::api_error(StatusCode::TOO_MANY_REQUESTS));

        let err = api
            .chat_completion_stream(ChatCompletionRequest::new(Vec::new(), true))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::Api { status, .. }) if *status == StatusCode::TOO_MANY_REQUESTS
        ));
    }
}
