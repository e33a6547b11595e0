//! Image generation endpoint.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{check_status, json_post, null_as_empty, DEFAULT_BASE_URL};
use crate::error::ProviderError;

pub const IMAGE_GENERATIONS_PATH: &str = "/api/paas/v4/images/generations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageModel {
    #[default]
    CogView3,
}

impl ImageModel {
    pub fn value(&self) -> &'static str {
        match self {
            ImageModel::CogView3 => "cogview-3",
        }
    }
}

pub const DEFAULT_IMAGE_MODEL: &str = "cogview-3";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(rename = "user_id", skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>, model: &str) -> Self {
        Self {
            prompt: prompt.into(),
            model: Some(model.to_string()),
            user: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub data: Vec<ImageData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ImageApiError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageApiError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Transport seam for image generation.
#[async_trait]
pub trait ImageApi: Send + Sync {
    async fn create_image(&self, request: ImageRequest) -> Result<ImageApiResponse>;
}

#[derive(Clone)]
pub struct TiangongImageApi {
    client: Client,
    base_url: String,
    api_key: String,
}

impl TiangongImageApi {
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
}

#[async_trait]
impl ImageApi for TiangongImageApi {
    async fn create_image(&self, request: ImageRequest) -> Result<ImageApiResponse> {
        if request.prompt.is_empty() {
            return Err(ProviderError::InvalidRequest("prompt cannot be empty".to_string()).into());
        }

        debug!("Sending image generation request: model={:?}", request.model);

        let response = json_post(&self.client, &self.base_url, IMAGE_GENERATIONS_PATH, &self.api_key)
            .json(&request)
            .send()
            .await?;
        let body: ImageApiResponse = check_status(response).await?.json().await?;

        debug!("Image generation returned {} images", body.data.len());
        Ok(body)
    }
}
