//! The Planet data API: catalog search, asset status, activation and retrieval.
mod client;
pub mod filter;

#[cfg(test)]
pub(crate) mod fake;

pub use client::PlanetClient;
pub use filter::{Filter, SearchRequest};

use crate::asset::{AssetKey, AssetKind};
use crate::error::ApiError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use std::collections::HashMap;
use url::Url;

pub type ByteStream = BoxStream<'static, Result<Bytes, ApiError>>;

/// Remote operations the pipeline stages depend on.
#[async_trait]
pub trait PlanetApi: Send + Sync {
    /// Submit a search and return its first page.
    async fn quick_search(&self, request: &SearchRequest) -> Result<SearchPage, ApiError>;

    async fn next_page(&self, link: &Url) -> Result<SearchPage, ApiError>;

    async fn asset_status(&self, item_id: &str, kind: AssetKind) -> Result<AssetStatus, ApiError>;

    /// Ask for an asset to be prepared. The answer is advisory; readiness is observed through
    /// `asset_status`.
    async fn activate(&self, link: &Url) -> Result<(), ApiError>;

    async fn open_download(&self, location: &Url) -> Result<ByteStream, ApiError>;
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub features: Vec<Feature>,
    pub next: Option<Url>,
}

#[derive(Deserialize)]
struct SearchResponse {
    features: Vec<Feature>,
    #[serde(rename = "_links")]
    links: PageLinks,
}

#[derive(Deserialize)]
struct PageLinks {
    #[serde(rename = "_next", default)]
    next: Option<Url>,
}

impl SearchPage {
    pub fn parse(body: &[u8]) -> Result<Self, ApiError> {
        let response: SearchResponse = serde_json::from_slice(body)
            .map_err(|e| ApiError::Malformed(format!("search page: {}", e)))?;
        Ok(Self {
            features: response.features,
            next: response.links.next,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssetStatus {
    Active { location: Url },
    Inactive { activate: Url },
    /// The answer could not be interpreted.
    Indeterminate { reason: String },
}

#[derive(Deserialize)]
struct AssetEntry {
    status: String,
    location: Option<Url>,
    #[serde(rename = "_links", default)]
    links: AssetLinks,
}

#[derive(Deserialize, Default)]
struct AssetLinks {
    activate: Option<Url>,
}

impl AssetStatus {
    /// Classify the body of an item's asset listing for one asset kind.
    pub fn classify(body: &[u8], kind: AssetKind) -> Self {
        let indeterminate = |reason: String| Self::Indeterminate { reason };

        let assets: HashMap<String, serde_json::Value> = match serde_json::from_slice(body) {
            Ok(assets) => assets,
            Err(e) => return indeterminate(format!("unparseable asset listing: {}", e)),
        };
        let Some(entry) = assets.get(kind.key()) else {
            return indeterminate(format!("asset {} not listed", kind));
        };
        let entry: AssetEntry = match serde_json::from_value(entry.clone()) {
            Ok(entry) => entry,
            Err(e) => return indeterminate(format!("unparseable entry for {}: {}", kind, e)),
        };

        match (entry.status.as_str(), entry.location, entry.links.activate) {
            ("active", Some(location), _) => Self::Active { location },
            ("active", None, _) => indeterminate(format!("{} is active without a location", kind)),
            (_, _, Some(activate)) => Self::Inactive { activate },
            (status, _, None) => indeterminate(format!(
                "{} has status '{}' without an activation link",
                kind, status
            )),
        }
    }
}
