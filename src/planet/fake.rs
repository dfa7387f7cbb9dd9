//! In-memory `PlanetApi` with scripted answers for stage and pipeline tests.
use super::{AssetStatus, ByteStream, Feature, PlanetApi, SearchPage, SearchRequest};
use crate::asset::AssetKind;
use crate::error::ApiError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use url::Url;

#[derive(Default)]
pub(crate) struct FakePlanet {
    /// Result pages; page n > 0 is served for `next_link(n)`.
    pages: Vec<Vec<&'static str>>,
    fail_search: bool,
    statuses: Mutex<HashMap<(String, AssetKind), VecDeque<Result<AssetStatus, ApiError>>>>,
    download_failures: Mutex<HashMap<Url, VecDeque<ApiError>>>,
    broken_streams: Mutex<HashMap<Url, VecDeque<ApiError>>>,
    pub searches: Mutex<Vec<SearchRequest>>,
    pub activations: Mutex<Vec<Url>>,
    pub downloads: Mutex<Vec<Url>>,
}

pub(crate) fn next_link(page: usize) -> Url {
    Url::parse(&format!("https://fake.planet/searches/1/results?_page={}", page)).unwrap()
}

pub(crate) fn activate_link(item_id: &str, kind: AssetKind) -> Url {
    Url::parse(&format!("https://fake.planet/assets/{}/{}/activate", item_id, kind)).unwrap()
}

pub(crate) fn location(item_id: &str, kind: AssetKind) -> Url {
    Url::parse(&format!("https://fake.planet/download/{}/{}", item_id, kind)).unwrap()
}

pub(crate) fn active(item_id: &str, kind: AssetKind) -> AssetStatus {
    AssetStatus::Active {
        location: location(item_id, kind),
    }
}

pub(crate) fn inactive(item_id: &str, kind: AssetKind) -> AssetStatus {
    AssetStatus::Inactive {
        activate: activate_link(item_id, kind),
    }
}

pub(crate) fn payload(location: &Url) -> Vec<u8> {
    location.as_str().repeat(64).into_bytes()
}

impl FakePlanet {
    pub fn with_pages(pages: Vec<Vec<&'static str>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn failing_search() -> Self {
        Self {
            fail_search: true,
            ..Self::default()
        }
    }

    /// Answers for consecutive status checks; the last one repeats.
    pub fn script(self, item_id: &str, kind: AssetKind, answers: Vec<AssetStatus>) -> Self {
        self.script_results(item_id, kind, answers.into_iter().map(Ok).collect())
    }

    pub fn script_results(
        self,
        item_id: &str,
        kind: AssetKind,
        answers: Vec<Result<AssetStatus, ApiError>>,
    ) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert((item_id.to_string(), kind), answers.into());
        self
    }

    /// Fail the next downloads of `location` with these errors before serving it.
    pub fn fail_downloads(self, location: Url, errors: Vec<ApiError>) -> Self {
        self.download_failures
            .lock()
            .unwrap()
            .insert(location, errors.into());
        self
    }

    /// Cut the next downloads of `location` off with these errors after the first chunk.
    pub fn break_streams(self, location: Url, errors: Vec<ApiError>) -> Self {
        self.broken_streams
            .lock()
            .unwrap()
            .insert(location, errors.into());
        self
    }

    pub fn activation_count(&self) -> usize {
        self.activations.lock().unwrap().len()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.lock().unwrap().len()
    }

    fn page(&self, index: usize) -> Result<SearchPage, ApiError> {
        let ids = self
            .pages
            .get(index)
            .ok_or_else(|| ApiError::Malformed(format!("no page {}", index)))?;
        let next = (index + 1 < self.pages.len()).then(|| next_link(index + 1));
        Ok(SearchPage {
            features: ids.iter().map(|id| Feature { id: id.to_string() }).collect(),
            next,
        })
    }
}

#[async_trait]
impl PlanetApi for FakePlanet {
    async fn quick_search(&self, request: &SearchRequest) -> Result<SearchPage, ApiError> {
        self.searches.lock().unwrap().push(request.clone());
        if self.fail_search {
            return Err(ApiError::Timeout {
                url: "https://fake.planet/quick-search".to_string(),
            });
        }
        self.page(0)
    }

    async fn next_page(&self, link: &Url) -> Result<SearchPage, ApiError> {
        let index = (1..self.pages.len())
            .find(|n| next_link(*n) == *link)
            .ok_or_else(|| ApiError::Malformed(format!("unknown link {}", link)))?;
        self.page(index)
    }

    async fn asset_status(&self, item_id: &str, kind: AssetKind) -> Result<AssetStatus, ApiError> {
        let mut statuses = self.statuses.lock().unwrap();
        let Some(answers) = statuses.get_mut(&(item_id.to_string(), kind)) else {
            return Ok(AssetStatus::Indeterminate {
                reason: "not scripted".to_string(),
            });
        };
        if answers.len() > 1 {
            return answers.pop_front().unwrap();
        }
        match answers.front() {
            Some(Ok(status)) => Ok(status.clone()),
            Some(Err(_)) => answers.pop_front().unwrap(),
            None => Ok(AssetStatus::Indeterminate {
                reason: "script exhausted".to_string(),
            }),
        }
    }

    async fn activate(&self, link: &Url) -> Result<(), ApiError> {
        self.activations.lock().unwrap().push(link.clone());
        Ok(())
    }

    async fn open_download(&self, location: &Url) -> Result<ByteStream, ApiError> {
        self.downloads.lock().unwrap().push(location.clone());
        if let Some(failures) = self.download_failures.lock().unwrap().get_mut(location) {
            if let Some(err) = failures.pop_front() {
                return Err(err);
            }
        }
        let mut chunks: Vec<Result<Bytes, ApiError>> = payload(location)
            .chunks(100)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some(breaks) = self.broken_streams.lock().unwrap().get_mut(location) {
            if let Some(err) = breaks.pop_front() {
                chunks.truncate(1);
                chunks.push(Err(err));
            }
        }
        Ok(stream::iter(chunks).boxed())
    }
}
