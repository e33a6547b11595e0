//! Chat client: prompt in, generations out.
//!
//! Builds the vendor request from the prompt and the merged options, resolves
//! function calls by running the registered callbacks and re-asking the model,
//! and turns completions (or streamed windows) into [`ChatResponse`]s.

use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::api::{ChatCompletion, ChatCompletionMessage, ChatCompletionRequest, Role};
use crate::function::FunctionRegistry;
use crate::options::ChatOptions;
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::{ChatApi, ChatResponse, Generation, GenerationMetadata, Prompt};

/// Upper bound on consecutive function-call rounds for one request.
pub const MAX_FUNCTION_CALL_ROUNDS: usize = 10;

const RESPONSE_CHANNEL_CAPACITY: usize = 100;

pub type ChatResponseStream = ReceiverStream<Result<ChatResponse>>;

/// A vendor request together with the callbacks it may invoke.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub request: ChatCompletionRequest,
    pub functions: FunctionRegistry,
}

pub struct TiangongChatClient {
    api: Arc<dyn ChatApi>,
    default_options: ChatOptions,
    retry_policy: RetryPolicy,
}

impl TiangongChatClient {
    pub fn new(api: Arc<dyn ChatApi>) -> Self {
        Self::with_options(api, ChatOptions::vendor_defaults())
    }

    pub fn with_options(api: Arc<dyn ChatApi>, default_options: ChatOptions) -> Self {
        Self {
            api,
            default_options,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn default_options(&self) -> &ChatOptions {
        &self.default_options
    }

    /// Build the vendor request for `prompt`.
    ///
    /// The prompt's runtime options are merged over the client defaults.
    /// Functions named in either set, plus every runtime callback, end up in
    /// the request's `tools`.
    pub fn create_request(&self, prompt: &Prompt, stream: bool) -> Result<PreparedRequest> {
        let messages = prompt
            .messages
            .iter()
            .map(|m| ChatCompletionMessage::new(m.content.clone(), Role::from(m.message_type)))
            .collect();
        let mut request = ChatCompletionRequest::new(messages, stream);

        let options = match &prompt.options {
            Some(runtime) => runtime.merge(&self.default_options),
            None => self.default_options.clone(),
        };
        options.apply_to(&mut request);

        // Only runtime callbacks are enabled on registration; defaults must be named.
        let mut functions = FunctionRegistry::new();
        functions.register_all(&self.default_options.function_callbacks, false);
        let mut enabled = options.functions.clone();
        if let Some(runtime) = &prompt.options {
            enabled.extend(functions.register_all(&runtime.function_callbacks, true));
        }

        if !enabled.is_empty() {
            debug!("Enabling functions for request: {:?}", enabled);
            request.tools = Some(functions.tools_for(&enabled)?);
        }

        Ok(PreparedRequest { request, functions })
    }

    /// Single round trip, running any requested functions before returning.
    pub async fn call(&self, prompt: &Prompt) -> Result<ChatResponse> {
        let prepared = self.create_request(prompt, false)?;

        let completion = retry_with_backoff("chat completion", &self.retry_policy, || self.complete(&prepared)).await?;

        Ok(to_chat_response(&completion))
    }

    async fn complete(&self, prepared: &PreparedRequest) -> Result<ChatCompletion> {
        let completion = self.api.chat_completion(prepared.request.clone()).await?;
        resolve_function_calls(self.api.as_ref(), &prepared.functions, &prepared.request, completion).await
    }

    /// Stream the answer window by window.
    ///
    /// Only establishing the stream is retried. A window that asks for a
    /// function is answered by a regular function-call round and replaced by
    /// its final completion.
    pub async fn stream(&self, prompt: &Prompt) -> Result<ChatResponseStream> {
        let prepared = self.create_request(prompt, true)?;

        let mut windows = retry_with_backoff("chat completion stream", &self.retry_policy, || {
            self.api.chat_completion_stream(prepared.request.clone())
        })
        .await?;

        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        let api = Arc::clone(&self.api);

        tokio::spawn(async move {
            // Only the first window of a response carries the role.
            let mut roles: HashMap<String, Role> = HashMap::new();

            while let Some(window) = windows.next().await {
                let response = match window {
                    Ok(chunk) => {
                        resolve_function_calls(api.as_ref(), &prepared.functions, &prepared.request, chunk.into_completion())
                            .await
                            .map(|completion| to_stream_response(&completion, &mut roles))
                    }
                    Err(e) => Err(e),
                };

                let failed = response.is_err();
                if tx.send(response).await.is_err() {
                    debug!("Chat response receiver dropped, stopping stream");
                    return;
                }
                if failed {
                    return;
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

/// Keep answering tool calls until the model returns a plain message.
async fn resolve_function_calls(
    api: &dyn ChatApi,
    functions: &FunctionRegistry,
    request: &ChatCompletionRequest,
    completion: ChatCompletion,
) -> Result<ChatCompletion> {
    let mut request = request.clone();
    let mut completion = completion;
    let mut rounds = 0;

    while completion.is_tool_call() {
        let Some(choice) = completion.choices.first() else {
            break;
        };

        rounds += 1;
        if rounds > MAX_FUNCTION_CALL_ROUNDS {
            warn!("Model kept calling functions after {} rounds", MAX_FUNCTION_CALL_ROUNDS);
            bail!("function calling did not finish within {} rounds", MAX_FUNCTION_CALL_ROUNDS);
        }

        let mut conversation = request.messages.clone();
        request = functions.tool_response_request(&request, &choice.message, &mut conversation)?;
        completion = api.chat_completion(request.clone()).await?;
    }

    Ok(completion)
}

fn to_chat_response(completion: &ChatCompletion) -> ChatResponse {
    let id = completion.id.clone().unwrap_or_default();

    let generations = completion
        .choices
        .iter()
        .map(|choice| {
            let mut properties = HashMap::new();
            properties.insert("id".to_string(), id.clone());
            if let Some(role) = choice.message.role {
                properties.insert("role".to_string(), role.as_str().to_string());
            }
            if let Some(finish_reason) = choice.finish_reason {
                properties.insert("finishReason".to_string(), finish_reason.as_str().to_string());
            }

            Generation {
                content: choice.message.content.clone().unwrap_or_default(),
                properties,
                metadata: choice.finish_reason.map(|reason| GenerationMetadata {
                    finish_reason: reason.as_str().to_string(),
                }),
            }
        })
        .collect();

    ChatResponse::new(generations)
}

fn to_stream_response(completion: &ChatCompletion, roles: &mut HashMap<String, Role>) -> ChatResponse {
    let id = completion.id.clone().unwrap_or_default();

    let generations = completion
        .choices
        .iter()
        .map(|choice| {
            if let Some(role) = choice.message.role {
                roles.entry(id.clone()).or_insert(role);
            }

            let mut properties = HashMap::new();
            properties.insert("id".to_string(), id.clone());
            if let Some(role) = roles.get(&id) {
                properties.insert("role".to_string(), role.as_str().to_string());
            }
            properties.insert(
                "finishReason".to_string(),
                choice.finish_reason.map(|r| r.as_str()).unwrap_or_default().to_string(),
            );

            Generation {
                content: choice.message.content.clone().unwrap_or_default(),
                properties,
                metadata: choice.finish_reason.map(|reason| GenerationMetadata {
                    finish_reason: reason.as_str().to_string(),
                }),
            }
        })
        .collect();

    ChatResponse::new(generations)
}
