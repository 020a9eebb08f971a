//! Server directory client: channel manifest, day guide, connection check.
//!
//! No retries here.  The player core decides what a failure means (fatal on
//! configure, ignored on periodic refresh).

use std::time::Duration;

use async_trait::async_trait;
use broadcaster_proto::config::NetworkConfig;
use broadcaster_proto::{ChannelManifest, GuideData, ServerConfig};
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::DirectoryError;

pub type Result<T> = std::result::Result<T, DirectoryError>;

#[async_trait]
pub trait Directory: Send + Sync {
    async fn fetch_manifest(&self, server: &ServerConfig) -> Result<ChannelManifest>;

    async fn fetch_guide(&self, server: &ServerConfig) -> Result<GuideData>;

    /// `Ok(true)` only for a 200 whose manifest lists at least one channel.
    /// An empty line-up is `Ok(false)`, not an error.
    async fn validate(&self, server: &ServerConfig) -> Result<bool>;
}

/// reqwest-backed [`Directory`].
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    client: Client,
}

impl DirectoryClient {
    pub fn new(network: &NetworkConfig) -> reqwest::Result<Self> {
        Self::with_timeouts(network.request_timeout(), network.resource_timeout())
    }

    /// `request` bounds connection setup and each idle wait on the socket,
    /// `resource` the whole exchange.
    pub fn with_timeouts(request: Duration, resource: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .connect_timeout(request)
            .read_timeout(request)
            .timeout(resource)
            .build()?;
        Ok(Self { client })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Option<Url>) -> Result<T> {
        let url = url.ok_or(DirectoryError::InvalidUrl)?;
        debug!("directory: GET {}", url);

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!("directory: {} returned {}", url, status);
            return Err(DirectoryError::ServerError(status.as_u16()));
        }

        let body = response
            .bytes()
            .await
            .map_err(DirectoryError::from_reqwest)?;
        serde_json::from_slice(&body).map_err(DirectoryError::Decode)
    }
}

#[async_trait]
impl Directory for DirectoryClient {
    async fn fetch_manifest(&self, server: &ServerConfig) -> Result<ChannelManifest> {
        self.get_json(server.manifest_url()).await
    }

    async fn fetch_guide(&self, server: &ServerConfig) -> Result<GuideData> {
        self.get_json(server.guide_url()).await
    }

    async fn validate(&self, server: &ServerConfig) -> Result<bool> {
        let manifest: ChannelManifest = self.get_json(server.manifest_url()).await?;
        Ok(!manifest.channels.is_empty())
    }
}
