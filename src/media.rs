//! Direct download of image/video assets referenced by a post.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, REFERER};
use thiserror::Error;

use crate::model::MediaAsset;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("network error: {0}")]
    Network(String),

    #[error("asset host answered {status}")]
    Status { status: u16 },
}

impl From<reqwest::Error> for MediaError {
    fn from(err: reqwest::Error) -> Self {
        MediaError::Network(err.to_string())
    }
}

/// Fetches one asset. No retries: callers drop assets that fail.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, referer: &str) -> Result<MediaAsset, MediaError>;
}

pub struct MediaResolver {
    client: reqwest::Client,
    timeout: Duration,
}

impl MediaResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }
}

impl Default for MediaResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for MediaResolver {
    async fn fetch(&self, url: &str, referer: &str) -> Result<MediaAsset, MediaError> {
        let resp = self
            .client
            .get(url)
            .header(REFERER, referer)
            .timeout(self.timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MediaError::Status {
                status: status.as_u16(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let data = resp.bytes().await?.to_vec();

        Ok(MediaAsset { data, content_type })
    }
}
