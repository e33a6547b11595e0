//! Per-client defaults and per-call overrides for chat and image requests.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::image::{ImageRequest, DEFAULT_IMAGE_MODEL};
use crate::api::{ChatCompletionRequest, ChatModel, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_P};
use crate::function::FunctionCallback;

/// Chat request options.
///
/// Every field is optional so that a runtime set can be layered over the
/// client defaults with [`ChatOptions::merge`].
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Names of registered functions to enable for the request.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub functions: BTreeSet<String>,
    #[serde(skip)]
    pub function_callbacks: Vec<Arc<dyn FunctionCallback>>,
}

impl ChatOptions {
    pub fn builder() -> ChatOptionsBuilder {
        ChatOptionsBuilder::default()
    }

    /// Vendor defaults used when a client is built without explicit options.
    pub fn vendor_defaults() -> Self {
        Self::builder()
            .model(ChatModel::SkyChatMegaVerse.value())
            .max_tokens(DEFAULT_MAX_TOKENS)
            .do_sample(true)
            .temperature(DEFAULT_TEMPERATURE)
            .top_p(DEFAULT_TOP_P)
            .build()
    }

    /// Field-by-field merge: values set on `self` win, the rest come from
    /// `fallback`. Function names and callbacks from both sides are combined.
    pub fn merge(&self, fallback: &ChatOptions) -> ChatOptions {
        let mut functions = fallback.functions.clone();
        functions.extend(self.functions.iter().cloned());

        let mut function_callbacks = fallback.function_callbacks.clone();
        function_callbacks.extend(self.function_callbacks.iter().cloned());

        ChatOptions {
            model: self.model.clone().or_else(|| fallback.model.clone()),
            max_tokens: self.max_tokens.or(fallback.max_tokens),
            do_sample: self.do_sample.or(fallback.do_sample),
            temperature: self.temperature.or(fallback.temperature),
            top_p: self.top_p.or(fallback.top_p),
            stop: self.stop.clone().or_else(|| fallback.stop.clone()),
            tool_choice: self.tool_choice.clone().or_else(|| fallback.tool_choice.clone()),
            user: self.user.clone().or_else(|| fallback.user.clone()),
            functions,
            function_callbacks,
        }
    }

    /// Copy every set field onto the request, overwriting what is there.
    pub fn apply_to(&self, request: &mut ChatCompletionRequest) {
        if let Some(model) = &self.model {
            request.model = Some(model.clone());
        }
        if let Some(max_tokens) = self.max_tokens {
            request.max_tokens = Some(max_tokens);
        }
        if let Some(do_sample) = self.do_sample {
            request.do_sample = Some(do_sample);
        }
        if let Some(temperature) = self.temperature {
            request.temperature = Some(temperature);
        }
        if let Some(top_p) = self.top_p {
            request.top_p = Some(top_p);
        }
        if let Some(stop) = &self.stop {
            request.stop = Some(stop.clone());
        }
        if let Some(tool_choice) = &self.tool_choice {
            request.tool_choice = Some(tool_choice.clone());
        }
        if let Some(user) = &self.user {
            request.user = Some(user.clone());
        }
    }
}

impl fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let callbacks: Vec<_> = self.function_callbacks.iter().map(|c| c.name()).collect();
        f.debug_struct("ChatOptions")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("do_sample", &self.do_sample)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("stop", &self.stop)
            .field("tool_choice", &self.tool_choice)
            .field("user", &self.user)
            .field("functions", &self.functions)
            .field("function_callbacks", &callbacks)
            .finish()
    }
}

#[derive(Default)]
pub struct ChatOptionsBuilder {
    options: ChatOptions,
}

impl ChatOptionsBuilder {
    pub fn model(mut self, model: &str) -> Self {
        self.options.model = Some(model.to_string());
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.options.max_tokens = Some(max_tokens);
        self
    }

    pub fn do_sample(mut self, do_sample: bool) -> Self {
        self.options.do_sample = Some(do_sample);
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.options.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.options.top_p = Some(top_p);
        self
    }

    pub fn stop(mut self, stop: Vec<String>) -> Self {
        self.options.stop = Some(stop);
        self
    }

    pub fn tool_choice(mut self, tool_choice: &str) -> Self {
        self.options.tool_choice = Some(tool_choice.to_string());
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.options.user = Some(user.to_string());
        self
    }

    pub fn function(mut self, name: &str) -> Self {
        self.options.functions.insert(name.to_string());
        self
    }

    pub fn function_callback(mut self, callback: Arc<dyn FunctionCallback>) -> Self {
        self.options.function_callbacks.push(callback);
        self
    }

    pub fn build(self) -> ChatOptions {
        self.options
    }
}

/// Image generation options. Only `model` and `user` reach the vendor; the
/// remaining fields are accepted for portability and otherwise ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ImageOptions {
    pub fn with_model(model: &str) -> Self {
        Self {
            model: Some(model.to_string()),
            ..Default::default()
        }
    }

    pub fn vendor_defaults() -> Self {
        Self::with_model(DEFAULT_IMAGE_MODEL)
    }

    /// Values set on `self` win over `fallback`.
    pub fn merge(&self, fallback: &ImageOptions) -> ImageOptions {
        ImageOptions {
            n: self.n.or(fallback.n),
            model: self.model.clone().or_else(|| fallback.model.clone()),
            quality: self.quality.clone().or_else(|| fallback.quality.clone()),
            response_format: self
                .response_format
                .clone()
                .or_else(|| fallback.response_format.clone()),
            width: self.width.or(fallback.width),
            height: self.height.or(fallback.height),
            style: self.style.clone().or_else(|| fallback.style.clone()),
            user: self.user.clone().or_else(|| fallback.user.clone()),
        }
    }

    pub fn apply_to(&self, request: &mut ImageRequest) {
        if let Some(model) = &self.model {
            request.model = Some(model.clone());
        }
        if let Some(user) = &self.user {
            request.user = Some(user.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionCallbackWrapper;
    use serde_json::json;

    #[test]
    fn test_runtime_options_override_defaults() {
        let defaults = ChatOptions::vendor_defaults();
        let runtime = ChatOptions::builder().temperature(0.2).model("custom").build();

        let merged = runtime.merge(&defaults);

        assert_eq!(merged.model.as_deref(), Some("custom"));
        assert_eq!(merged.temperature, Some(0.2));
        assert_eq!(merged.max_tokens, Some(DEFAULT_MAX_TOKENS));
        assert_eq!(merged.top_p, Some(DEFAULT_TOP_P));
        assert_eq!(merged.do_sample, Some(true));
    }

    #[test]
    fn test_merge_combines_functions() {
        let callback = Arc::new(FunctionCallbackWrapper::new("clock", "time", json!({}), |_| {
            Ok("noon".to_string())
        }));
        let defaults = ChatOptions::builder().function("weather").build();
        let runtime = ChatOptions::builder()
            .function("clock")
            .function_callback(callback)
            .build();

        let merged = runtime.merge(&defaults);

        assert_eq!(
            merged.functions.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["clock", "weather"]
        );
        assert_eq!(merged.function_callbacks.len(), 1);
    }

    #[test]
    fn test_apply_to_overwrites_only_set_fields() {
        let mut request = ChatCompletionRequest {
            top_p: Some(0.1),
            ..ChatCompletionRequest::new(Vec::new(), false)
        };

        ChatOptions::builder()
            .model("SkyChat-MegaVerse")
            .stop(vec!["END".to_string()])
            .user("u-1")
            .build()
            .apply_to(&mut request);

        assert_eq!(request.model.as_deref(), Some("SkyChat-MegaVerse"));
        assert_eq!(request.top_p, Some(0.1));
        assert_eq!(request.stop, Some(vec!["END".to_string()]));
        assert_eq!(request.user.as_deref(), Some("u-1"));
        assert!(!request.stream);
    }

    #[test]
    fn test_chat_options_from_toml_style_json() {
        let options: ChatOptions =
            serde_json::from_value(json!({"model": "m", "temperature": 0.5, "functions": ["f"]})).unwrap();
        assert_eq!(options.model.as_deref(), Some("m"));
        assert_eq!(options.temperature, Some(0.5));
        assert!(options.functions.contains("f"));
        assert!(options.function_callbacks.is_empty());
    }

    #[test]
    fn test_image_options_merge_and_apply() {
        let defaults = ImageOptions::vendor_defaults();
        let runtime = ImageOptions {
            user: Some("artist".to_string()),
            width: Some(512),
            ..Default::default()
        };

        let merged = runtime.merge(&defaults);
        assert_eq!(merged.model.as_deref(), Some(DEFAULT_IMAGE_MODEL));
        assert_eq!(merged.width, Some(512));

        let mut request = ImageRequest::new("a cat", "other");
        merged.apply_to(&mut request);
        assert_eq!(request.model.as_deref(), Some(DEFAULT_IMAGE_MODEL));
        assert_eq!(request.user.as_deref(), Some("artist"));
    }
}
