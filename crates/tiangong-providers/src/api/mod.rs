//! Tiangong chat completion wire model and HTTP client.
//!
//! Every record mirrors the vendor JSON shape: snake_case field names, absent
//! fields omitted on the way out and tolerated (including explicit `null`) on
//! the way in.

pub mod image;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use crate::error::ProviderError;
use crate::streaming::forward_chunk_windows;
use crate::{ChatApi, ChunkStream};

pub const DEFAULT_BASE_URL: &str = "https://api.sensenova.cn";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_TEMPERATURE: f32 = 0.95;
pub const DEFAULT_TOP_P: f32 = 0.7;

pub const CHAT_COMPLETIONS_PATH: &str = "/api/paas/v4/chat/completions";

/// Tool type tag; the only kind of tool the vendor supports.
pub const FUNCTION_TYPE: &str = "function";

const STREAM_CHANNEL_CAPACITY: usize = 100;

pub(crate) fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

// ─────────────────────────────────────────────────────────────────────────────
// Models
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatModel {
    #[default]
    SkyChatMegaVerse,
}

impl ChatModel {
    pub fn value(&self) -> &'static str {
        match self {
            ChatModel::SkyChatMegaVerse => "SkyChat-MegaVerse",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// A tool the model may call. Only functions are supported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub name: String,
    pub parameters: serde_json::Value,
}

impl FunctionTool {
    pub fn new(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            tool_type: FUNCTION_TYPE.to_string(),
            function: FunctionDefinition {
                description: Some(description.to_string()),
                name: name.to_string(),
                parameters,
            },
        }
    }
}

/// Builders for the `tool_choice` request field.
pub struct ToolChoice;

impl ToolChoice {
    pub const AUTO: &'static str = "auto";
    pub const NONE: &'static str = "none";

    /// Force the model to call the named function.
    pub fn function(name: &str) -> String {
        json!({ "type": FUNCTION_TYPE, "function": { "name": name } }).to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<FunctionTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ChatCompletionRequest {
    pub fn new(messages: Vec<ChatCompletionMessage>, stream: bool) -> Self {
        Self {
            messages,
            stream,
            ..Default::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Messages
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A chat message, or the partial message (delta) carried by a stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    /// Function name for `tool` messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tool_calls: Vec<ToolCall>,
}

impl ChatCompletionMessage {
    pub fn new(content: impl Into<String>, role: Role) -> Self {
        Self {
            content: Some(content.into()),
            role: Some(role),
            name: None,
            tool_calls: Vec::new(),
        }
    }

    /// Result of a function invocation, fed back into the conversation.
    pub fn tool_response(content: impl Into<String>, function_name: &str) -> Self {
        Self {
            name: Some(function_name.to_string()),
            ..Self::new(content, Role::Tool)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub call_type: Option<String>,
    #[serde(default)]
    pub function: ChatCompletionFunction,
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            call_type: Some(FUNCTION_TYPE.to_string()),
            function: ChatCompletionFunction {
                name: Some(name.to_string()),
                arguments: Some(arguments.to_string()),
            },
        }
    }

    /// A streamed argument fragment without an identifier.
    pub fn fragment(arguments: &str) -> Self {
        Self {
            id: None,
            call_type: None,
            function: ChatCompletionFunction {
                name: None,
                arguments: Some(arguments.to_string()),
            },
        }
    }
}

/// Function name plus its JSON-encoded arguments.
///
/// While streaming, `arguments` holds a raw fragment; the full value only
/// becomes valid JSON once every fragment of the call has been concatenated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionFunction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// How a streamed tool-call entry relates to the call being assembled.
///
/// The vendor only sends the identifier on the first chunk of a tool call, so
/// identifier presence is what separates these two cases.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolCallDelta {
    /// First chunk of a new tool call.
    NewToolCall { id: String, call: ToolCall },
    /// More of the call currently being assembled.
    ContinuationFragment { call: ToolCall },
}

impl ToolCallDelta {
    /// Classify the tool calls of a single delta.
    ///
    /// Returns `None` for a delta without tool calls and a protocol violation
    /// when the delta carries more than one.
    pub fn classify(tool_calls: &[ToolCall]) -> Result<Option<Self>, ProviderError> {
        match tool_calls {
            [] => Ok(None),
            [call] => Ok(Some(match &call.id {
                Some(id) => ToolCallDelta::NewToolCall {
                    id: id.clone(),
                    call: call.clone(),
                },
                None => ToolCallDelta::ContinuationFragment { call: call.clone() },
            })),
            calls => Err(ProviderError::ProtocolViolation(format!(
                "only one tool call is supported per message, got {}",
                calls.len()
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Responses
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    /// Output blocked by the vendor's content filter.
    Sensitive,
    ToolCalls,
    NetworkError,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::Sensitive => "sensitive",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::NetworkError => "network_error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletion {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub message: ChatCompletionMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl ChatCompletion {
    /// True when the first choice asks the host to run a function.
    pub fn is_tool_call(&self) -> bool {
        self.choices
            .first()
            .is_some_and(|choice| !choice.message.tool_calls.is_empty())
    }
}

/// One server-sent frame of a streamed completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    #[serde(default)]
    pub delta: ChatCompletionMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl ChatCompletionChunk {
    /// View a finished window as a regular completion.
    pub fn into_completion(self) -> ChatCompletion {
        ChatCompletion {
            id: self.id,
            object: Some("chat.completion".to_string()),
            created: self.created,
            model: self.model,
            choices: self
                .choices
                .into_iter()
                .map(|choice| Choice {
                    index: choice.index,
                    message: choice.delta,
                    finish_reason: choice.finish_reason,
                })
                .collect(),
            request_id: self.request_id,
            usage: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP client
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer-authenticated JSON client for the chat completion endpoint.
#[derive(Clone)]
pub struct TiangongApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TiangongApi {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), api_key)
    }

    pub fn with_base_url(base_url: String, api_key: String) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(client: Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> RequestBuilder {
        json_post(&self.client, &self.base_url, path, &self.api_key)
    }
}

pub(crate) fn json_post(client: &Client, base_url: &str, path: &str, api_key: &str) -> RequestBuilder {
    client
        .post(format!("{}{}", base_url, path))
        .bearer_auth(api_key)
        .header(CONTENT_TYPE, "application/json")
}

/// Turn a non-2xx response into [`ProviderError::Api`].
pub(crate) async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ProviderError::Api { status, body }.into())
}

#[async_trait]
impl ChatApi for TiangongApi {
    async fn chat_completion(&self, request: ChatCompletionRequest) -> Result<ChatCompletion> {
        if request.stream {
            return Err(ProviderError::InvalidRequest(
                "request must set the stream property to false".to_string(),
            )
            .into());
        }

        debug!(
            "Sending chat completion request: model={:?}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self.post(CHAT_COMPLETIONS_PATH).json(&request).send().await?;
        let completion: ChatCompletion = check_status(response).await?.json().await?;

        debug!(
            "Chat completion received: id={:?}, choices={}",
            completion.id,
            completion.choices.len()
        );
        Ok(completion)
    }

    async fn chat_completion_stream(&self, request: ChatCompletionRequest) -> Result<ChunkStream> {
        if !request.stream {
            return Err(ProviderError::InvalidRequest(
                "request must set the stream property to true".to_string(),
            )
            .into());
        }

        debug!(
            "Sending streaming chat completion request: model={:?}, messages={}",
            request.model,
            request.messages.len()
        );

        let response = self.post(CHAT_COMPLETIONS_PATH).json(&request).send().await?;
        let stream = check_status(response).await?.bytes_stream();
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let windows = forward_chunk_windows(stream, tx).await;
            debug!("Chat completion stream finished after {} windows", windows);
        });

        Ok(ReceiverStream::new(rx))
    }
}
