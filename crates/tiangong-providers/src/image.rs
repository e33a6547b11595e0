//! Image client: prompt in, image URLs out.

use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

use crate::api::image::{ImageApi, ImageApiResponse, ImageRequest, DEFAULT_IMAGE_MODEL};
use crate::error::ProviderError;
use crate::options::ImageOptions;
use crate::retry::{retry_with_backoff, RetryPolicy};

#[derive(Debug, Clone, Default)]
pub struct ImagePrompt {
    pub instructions: Vec<String>,
    pub options: Option<ImageOptions>,
}

impl ImagePrompt {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instructions: vec![instruction.into()],
            options: None,
        }
    }

    pub fn with_options(mut self, options: ImageOptions) -> Self {
        self.options = Some(options);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageGeneration {
    pub url: Option<String>,
    /// The vendor never rewrites prompts, so this is always empty.
    pub revised_prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageResponseMetadata {
    pub created: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageResponse {
    pub generations: Vec<ImageGeneration>,
    pub metadata: ImageResponseMetadata,
}

impl ImageResponse {
    pub fn urls(&self) -> Vec<&str> {
        self.generations.iter().filter_map(|g| g.url.as_deref()).collect()
    }
}

pub struct TiangongImageClient {
    api: Arc<dyn ImageApi>,
    default_options: ImageOptions,
    retry_policy: RetryPolicy,
}

impl TiangongImageClient {
    pub fn new(api: Arc<dyn ImageApi>) -> Self {
        Self::with_options(api, ImageOptions::vendor_defaults())
    }

    pub fn with_options(api: Arc<dyn ImageApi>, default_options: ImageOptions) -> Self {
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

    pub fn default_options(&self) -> &ImageOptions {
        &self.default_options
    }

    /// Build the vendor request: runtime options over defaults over the
    /// built-in model. Only the first instruction is sent.
    pub fn create_request(&self, prompt: &ImagePrompt) -> Result<ImageRequest> {
        let instruction = prompt
            .instructions
            .first()
            .ok_or_else(|| ProviderError::InvalidRequest("image prompt has no instructions".to_string()))?;

        let mut request = ImageRequest::new(instruction.clone(), DEFAULT_IMAGE_MODEL);
        let options = match &prompt.options {
            Some(runtime) => runtime.merge(&self.default_options),
            None => self.default_options.clone(),
        };
        options.apply_to(&mut request);

        Ok(request)
    }

    pub async fn call(&self, prompt: &ImagePrompt) -> Result<ImageResponse> {
        let request = self.create_request(prompt)?;

        let response = retry_with_backoff("image generation", &self.retry_policy, || {
            self.api.create_image(request.clone())
        })
        .await?;

        Ok(to_image_response(response, &request))
    }
}

fn to_image_response(response: ImageApiResponse, request: &ImageRequest) -> ImageResponse {
    if let Some(error) = &response.error {
        warn!(
            "Image generation for model {:?} reported an error: {:?}",
            request.model, error.message
        );
    }
    if response.data.is_empty() {
        warn!("No image returned for prompt: {}", request.prompt);
    }

    ImageResponse {
        generations: response
            .data
            .into_iter()
            .map(|data| ImageGeneration {
                url: data.url,
                revised_prompt: String::new(),
            })
            .collect(),
        metadata: ImageResponseMetadata {
            created: response.created,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockImageApi;

    #[tokio::test]
    async fn test_call_returns_generations_and_metadata() {
        let api = Arc::new(MockImageApi::new().with_urls(1_700_000_000, &["https://img/1.png", "https://img/2.png"]));
        let client = TiangongImageClient::new(api.clone());

        let response = client.call(&ImagePrompt::new("a red fox")).await.unwrap();

        assert_eq!(response.urls(), vec!["https://img/1.png", "https://img/2.png"]);
        assert_eq!(response.metadata.created, Some(1_700_000_000));
        assert!(response.generations.iter().all(|g| g.revised_prompt.is_empty()));

        let requests = api.requests();
        assert_eq!(requests[0].prompt, "a red fox");
        assert_eq!(requests[0].model.as_deref(), Some(DEFAULT_IMAGE_MODEL));
    }

    #[test]
    fn test_runtime_options_override_defaults() {
        let client = TiangongImageClient::with_options(
            Arc::new(MockImageApi::new()),
            ImageOptions {
                user: Some("default-user".to_string()),
                ..ImageOptions::with_model("cogview-3-plus")
            },
        );

        let request = client
            .create_request(&ImagePrompt::new("sunset").with_options(ImageOptions::with_model("custom")))
            .unwrap();
        assert_eq!(request.model.as_deref(), Some("custom"));
        assert_eq!(request.user.as_deref(), Some("default-user"));

        let request = client.create_request(&ImagePrompt::new("sunset")).unwrap();
        assert_eq!(request.model.as_deref(), Some("cogview-3-plus"));
    }

    #[test]
    fn test_prompt_without_instructions_is_rejected() {
        let client = TiangongImageClient::new(Arc::new(MockImageApi::new()));
        let err = client.create_request(&ImagePrompt::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProviderError>(),
            Some(ProviderError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_response_yields_no_generations() {
        let client = TiangongImageClient::new(Arc::new(MockImageApi::new()));
        let response = client.call(&ImagePrompt::new("nothing")).await.unwrap();
        assert!(response.generations.is_empty());
        assert_eq!(response.metadata.created, None);
    }
}
