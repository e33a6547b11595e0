//! Client construction from configuration and the chat/image commands.

use anyhow::{bail, Result};
use std::io::Write;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use tiangong_config::{ChatOptionsConfig, Config, ImageOptionsConfig, RetryConfig};
use tiangong_providers::{
    ChatOptions, ImageOptions, ImagePrompt, Prompt, PromptMessage, RetryPolicy, TiangongApi, TiangongChatClient,
    TiangongImageApi, TiangongImageClient,
};

pub fn chat_options_from_config(options: &ChatOptionsConfig) -> ChatOptions {
    ChatOptions {
        model: options.model.clone(),
        max_tokens: options.max_tokens,
        do_sample: options.do_sample,
        temperature: options.temperature,
        top_p: options.top_p,
        stop: options.stop.clone(),
        user: options.user.clone(),
        ..Default::default()
    }
}

pub fn image_options_from_config(options: &ImageOptionsConfig) -> ImageOptions {
    ImageOptions {
        model: options.model.clone(),
        user: options.user.clone(),
        ..Default::default()
    }
}

pub fn retry_policy_from_config(retry: &RetryConfig) -> RetryPolicy {
    RetryPolicy::new(retry.max_attempts, retry.base_delay_ms, retry.max_delay_ms)
}

pub fn build_chat_client(config: &Config) -> Result<TiangongChatClient> {
    let connection = config.chat_connection()?;
    debug!("Chat endpoint: {}", connection.base_url);

    let api = Arc::new(TiangongApi::with_base_url(connection.base_url, connection.api_key));
    Ok(
        TiangongChatClient::with_options(api, chat_options_from_config(&config.chat.options))
            .with_retry_policy(retry_policy_from_config(&config.retry)),
    )
}

pub fn build_image_client(config: &Config) -> Result<TiangongImageClient> {
    let connection = config.image_connection()?;
    debug!("Image endpoint: {}", connection.base_url);

    let api = Arc::new(TiangongImageApi::with_base_url(connection.base_url, connection.api_key));
    Ok(
        TiangongImageClient::with_options(api, image_options_from_config(&config.image.options))
            .with_retry_policy(retry_policy_from_config(&config.retry)),
    )
}

/// Prompt for the chat command, with runtime options only when a flag
/// overrides the configuration.
pub fn chat_prompt(prompt: &str, system: Option<&str>, model: Option<&str>, temperature: Option<f32>) -> Prompt {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(PromptMessage::system(system));
    }
    messages.push(PromptMessage::user(prompt));

    let mut prompt = Prompt::new(messages);
    if model.is_some() || temperature.is_some() {
        prompt = prompt.with_options(ChatOptions {
            model: model.map(str::to_string),
            temperature,
            ..Default::default()
        });
    }
    prompt
}

pub async fn run_chat<W: Write>(client: &TiangongChatClient, prompt: &Prompt, stream: bool, out: &mut W) -> Result<()> {
    if !stream {
        let response = client.call(prompt).await?;
        writeln!(out, "{}", response.content())?;
        return Ok(());
    }

    let mut responses = client.stream(prompt).await?;
    while let Some(response) = responses.next().await {
        let response = response?;
        write!(out, "{}", response.content())?;
        out.flush()?;

        if let Some(reason) = response.first().and_then(|g| g.finish_reason()) {
            if reason != "stop" && reason != "tool_calls" {
                warn!("Generation finished early: {}", reason);
            }
        }
    }
    writeln!(out)?;
    Ok(())
}

pub async fn run_image<W: Write>(client: &TiangongImageClient, prompt: &str, model: Option<&str>, out: &mut W) -> Result<()> {
    let mut image_prompt = ImagePrompt::new(prompt);
    if let Some(model) = model {
        image_prompt = image_prompt.with_options(ImageOptions::with_model(model));
    }

    let response = client.call(&image_prompt).await?;
    let urls = response.urls();
    if urls.is_empty() {
        bail!("The image service returned no images");
    }
    for url in urls {
        writeln!(out, "{}", url)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiangong_providers::mock::{MockChatApi, MockImageApi, MockReply};

    #[test]
    fn test_chat_options_follow_config() {
        let options = chat_options_from_config(&ChatOptionsConfig::default());
        assert_eq!(options.model.as_deref(), Some("SkyChat-MegaVerse"));
        assert_eq!(options.max_tokens, Some(1024));
        assert_eq!(options.do_sample, Some(true));
        assert!(options.functions.is_empty());
    }

    #[test]
    fn test_chat_prompt_only_adds_options_for_overrides() {
        let plain = chat_prompt("hi", None, None, None);
        assert!(plain.options.is_none());
        assert_eq!(plain.messages.len(), 1);

        let tuned = chat_prompt("hi", Some("be terse"), Some("other-model"), Some(0.1));
        assert_eq!(tuned.messages[0], PromptMessage::system("be terse"));
        let options = tuned.options.unwrap();
        assert_eq!(options.model.as_deref(), Some("other-model"));
        assert_eq!(options.temperature, Some(0.1));
    }

    #[test]
    fn test_build_clients_require_credentials() {
        let mut config = Config::default();
        config.connection.api_key = None;
        assert!(build_chat_client(&config).is_err());

        config.connection.api_key = Some("key".to_string());
        assert!(build_chat_client(&config).is_ok());
        assert!(build_image_client(&config).is_ok());
    }

    #[tokio::test]
    async fn test_run_chat_prints_answer() {
        let api = Arc::new(MockChatApi::new().with_reply(MockReply::text("Hello there")));
        let client = TiangongChatClient::new(api);

        let mut out = Vec::new();
        run_chat(&client, &chat_prompt("hi", None, None, None), false, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hello there\n");
    }

    #[tokio::test]
    async fn test_run_chat_streams_answer() {
        let api = Arc::new(MockChatApi::new().with_reply(MockReply::streaming(vec!["Hel", "lo"])));
        let client = TiangongChatClient::new(api);

        let mut out = Vec::new();
        run_chat(&client, &chat_prompt("hi", None, None, None), true, &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Hello\n");
    }

    #[tokio::test]
    async fn test_run_image_prints_urls() {
        let api = Arc::new(MockImageApi::new().with_urls(1, &["https://img/a.png"]));
        let client = TiangongImageClient::new(api.clone());

        let mut out = Vec::new();
        run_image(&client, "a boat", Some("cogview-3-plus"), &mut out).await.unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "https://img/a.png\n");
        assert_eq!(api.requests()[0].model.as_deref(), Some("cogview-3-plus"));
    }

    #[tokio::test]
    async fn test_run_image_without_results_fails() {
        let client = TiangongImageClient::new(Arc::new(MockImageApi::new()));
        let mut out = Vec::new();
        assert!(run_image(&client, "a boat", None, &mut out).await.is_err());
    }
}
