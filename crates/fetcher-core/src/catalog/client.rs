//! HTTP client for the Civitai REST API.

use super::types::{decode_record, CatalogRecord, ModelRecord, ModelVersionRecord};
use super::CatalogClient;
use crate::config::FetcherConfig;
use crate::error::{FetcherError, Result};
use crate::network::{build_http_client, retry_async_with_floor, RetryConfig};
use async_trait::async_trait;
use reqwest::{header, RequestBuilder, StatusCode};
use std::fmt;
use tracing::{debug, info};

/// Civitai API client authenticated with a static bearer token.
#[derive(Clone)]
pub struct CivitaiClient {
    pub(super) client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
    pub(super) retry: RetryConfig,
}

impl fmt::Debug for CivitaiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CivitaiClient")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "<redacted>"))
            .field("retry", &self.retry)
            .finish()
    }
}

impl CivitaiClient {
    /// Create a client for `base_url` (e.g. `https://civitai.com/api/v1`).
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client: build_http_client()?,
            base_url,
            api_token,
            retry: RetryConfig::unbounded(),
        })
    }

    pub fn from_config(config: &FetcherConfig) -> Result<Self> {
        Self::new(config.api_base_url.clone(), config.api_token.clone())
    }

    /// Replace the retry policy for transient failures.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Attach the bearer token, if one is configured.
    pub(super) fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.header(header::AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn get_record<T: CatalogRecord>(&self, url: &str) -> Result<Option<T>> {
        let (result, stats) = retry_async_with_floor(
            &self.retry,
            || self.get_record_once::<T>(url),
            |e: &FetcherError| e.is_retryable(),
            FetcherError::retry_after,
        )
        .await;

        if stats.attempts > 1 {
            info!(
                "GET {} finished after {} attempts ({:?} waiting)",
                url, stats.attempts, stats.total_delay
            );
        }

        result
    }

    async fn get_record_once<T: CatalogRecord>(&self, url: &str) -> Result<Option<T>> {
        debug!("GET {}", url);
        let response = self.authorize(self.client.get(url)).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok());
            return Err(FetcherError::RateLimited {
                service: "civitai".to_string(),
                retry_after_secs,
            });
        }

        if !status.is_success() {
            return Err(FetcherError::Api {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        decode_record::<T>(&body).map(Some)
    }
}

#[async_trait]
impl CatalogClient for CivitaiClient {
    async fn lookup_version_by_hash(&self, hash: &str) -> Result<Option<ModelVersionRecord>> {
        let url = format!("{}/model-versions/by-hash/{}", self.base_url, hash);
        self.get_record(&url).await
    }

    async fn fetch_model(&self, model_id: u64) -> Result<Option<ModelRecord>> {
        let url = format!("{}/models/{}", self.base_url, model_id);
        self.get_record(&url).await
    }
}
