//! Function calling support.
//!
//! The host registers [`FunctionCallback`]s; when the model answers with a
//! tool call, the named callback runs on the assembled argument string and its
//! result goes back to the model as a `tool` message.

use anyhow::Result;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::api::{ChatCompletionMessage, ChatCompletionRequest, FunctionTool};
use crate::error::ProviderError;

/// A function the model may ask the host to run.
pub trait FunctionCallback: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn input_schema(&self) -> serde_json::Value;

    /// Run the function on its JSON-encoded arguments.
    fn call(&self, arguments: &str) -> Result<String>;

    fn to_tool(&self) -> FunctionTool {
        FunctionTool::new(self.name(), self.description(), self.input_schema())
    }
}

type CallbackFn = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Closure-backed [`FunctionCallback`].
#[derive(Clone)]
pub struct FunctionCallbackWrapper {
    name: String,
    description: String,
    input_schema: serde_json::Value,
    function: Arc<CallbackFn>,
}

impl FunctionCallbackWrapper {
    pub fn new<F>(name: &str, description: &str, input_schema: serde_json::Value, function: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
            function: Arc::new(function),
        }
    }
}

impl FunctionCallback for FunctionCallbackWrapper {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> serde_json::Value {
        self.input_schema.clone()
    }

    fn call(&self, arguments: &str) -> Result<String> {
        (self.function)(arguments)
    }
}

impl fmt::Debug for FunctionCallbackWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionCallbackWrapper")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish()
    }
}

/// Callbacks available to one request, keyed by function name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    callbacks: HashMap<String, Arc<dyn FunctionCallback>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: Arc<dyn FunctionCallback>) {
        self.callbacks.insert(callback.name().to_string(), callback);
    }

    /// Register callbacks and return the names that become enabled.
    ///
    /// Callbacks supplied with a single call are enabled right away; default
    /// callbacks are only registered and must be enabled by name.
    pub fn register_all(
        &mut self,
        callbacks: &[Arc<dyn FunctionCallback>],
        enable: bool,
    ) -> BTreeSet<String> {
        let mut enabled = BTreeSet::new();
        for callback in callbacks {
            if enable {
                enabled.insert(callback.name().to_string());
            }
            self.register(Arc::clone(callback));
        }
        enabled
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn FunctionCallback>> {
        self.callbacks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Tool definitions for the given function names, in name order.
    pub fn tools_for(&self, names: &BTreeSet<String>) -> Result<Vec<FunctionTool>> {
        names
            .iter()
            .map(|name| {
                self.get(name)
                    .map(|callback| callback.to_tool())
                    .ok_or_else(|| ProviderError::FunctionNotFound(name.clone()).into())
            })
            .collect()
    }

    /// Run every tool call of `response` and build the follow-up request.
    ///
    /// The assistant message and one `tool` message per call are appended to
    /// `conversation`; the follow-up is never streamed.
    pub fn tool_response_request(
        &self,
        previous: &ChatCompletionRequest,
        response: &ChatCompletionMessage,
        conversation: &mut Vec<ChatCompletionMessage>,
    ) -> Result<ChatCompletionRequest> {
        conversation.push(response.clone());

        for tool_call in &response.tool_calls {
            let name = tool_call.function.name.as_deref().unwrap_or_default();
            let arguments = tool_call.function.arguments.as_deref().unwrap_or_default();

            let callback = self
                .get(name)
                .ok_or_else(|| ProviderError::FunctionNotFound(name.to_string()))?;

            debug!("Calling function '{}' for tool call {:?}", name, tool_call.id);
            let result = callback.call(arguments)?;

            conversation.push(ChatCompletionMessage::tool_response(result, name));
        }

        Ok(ChatCompletionRequest {
            messages: conversation.clone(),
            stream: false,
            ..previous.clone()
        })
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.callbacks.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry").field("functions", &names).finish()
    }
}
