use super::{AssetStatus, ByteStream, PlanetApi, SearchPage, SearchRequest};
use crate::asset::AssetKind;
use crate::config::Config;
use crate::error::{ApiError, ConfigError};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use url::Url;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// `PlanetApi` over HTTP. Every request carries the API key as basic auth user with an empty
/// password. Search, status and activation calls are bounded by `request_timeout`; downloads are
/// bounded per read by the caller.
#[derive(Clone, Debug)]
pub struct PlanetClient {
    client: Client,
    api_url: Url,
    item_type: String,
    api_key: String,
    request_timeout: Duration,
}

impl PlanetClient {
    pub fn new(client: Client, api_url: Url, item_type: &str, api_key: &str) -> Self {
        Self {
            client,
            api_url,
            item_type: item_type.to_string(),
            api_key: api_key.to_string(),
            request_timeout: Duration::from_secs(20),
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let planet = Self::new(client, config.api_url.clone(), &config.item_type, config.api_key()?)
            .with_request_timeout(config.pipeline.status_timeout());
        Ok(planet)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        let base = self.api_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path))?)
    }

    fn get(&self, url: Url) -> RequestBuilder {
        self.client.get(url).basic_auth(&self.api_key, Some(""))
    }

    fn get_with_timeout(&self, url: Url) -> RequestBuilder {
        self.get(url).timeout(self.request_timeout)
    }

    async fn read_page(response: Response) -> Result<SearchPage, ApiError> {
        let body = response.error_for_status()?.bytes().await?;
        SearchPage::parse(&body)
    }
}

#[async_trait]
impl PlanetApi for PlanetClient {
    async fn quick_search(&self, request: &SearchRequest) -> Result<SearchPage, ApiError> {
        let url = self.endpoint("quick-search")?;
        tracing::debug!(%url, "Initial search query");
        let response = self
            .client
            .post(url)
            .basic_auth(&self.api_key, Some(""))
            .timeout(self.request_timeout)
            .json(request)
            .send()
            .await?;
        Self::read_page(response).await
    }

    async fn next_page(&self, link: &Url) -> Result<SearchPage, ApiError> {
        tracing::debug!(%link, "Next search link");
        let response = self.get_with_timeout(link.clone()).send().await?;
        Self::read_page(response).await
    }

    async fn asset_status(&self, item_id: &str, kind: AssetKind) -> Result<AssetStatus, ApiError> {
        let url = self.endpoint(&format!(
            "item-types/{}/items/{}/assets",
            self.item_type, item_id
        ))?;
        let response = self
            .get_with_timeout(url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;
        Ok(AssetStatus::classify(&body, kind))
    }

    async fn activate(&self, link: &Url) -> Result<(), ApiError> {
        let response = self.get_with_timeout(link.clone()).send().await?;
        tracing::debug!(%link, status = response.status().as_u16(), "Activation answered");
        response.error_for_status()?;
        Ok(())
    }

    async fn open_download(&self, location: &Url) -> Result<ByteStream, ApiError> {
        let response = self.get(location.clone()).send().await?.error_for_status()?;
        let stream = response.bytes_stream().map_err(ApiError::from).boxed();
        Ok(stream)
    }
}
