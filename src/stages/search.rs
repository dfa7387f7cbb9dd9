use crate::config::Config;
use crate::error::ApiError;
use crate::planet::{PlanetApi, SearchPage, SearchRequest};
use crate::task::{ItemTask, TaskQueue};
use anyhow::{Context, Result};
use futures_util::stream::{self, Stream, TryStreamExt};
use futures_util::pin_mut;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use url::Url;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SearchSummary {
    pub regions: usize,
    pub pages: usize,
    pub items: usize,
}

enum Cursor {
    Start(SearchRequest),
    Next(Url),
    End,
}

/// Lazily walk the result pages of a search, following each page's next link until there is
/// none.
pub fn pages<'a, A>(
    api: &'a A,
    request: SearchRequest,
) -> impl Stream<Item = Result<SearchPage, ApiError>> + 'a
where
    A: PlanetApi + ?Sized,
{
    stream::try_unfold(Cursor::Start(request), move |cursor| async move {
        let page = match cursor {
            Cursor::Start(request) => api.quick_search(&request).await?,
            Cursor::Next(link) => api.next_page(&link).await?,
            Cursor::End => return Ok::<_, ApiError>(None),
        };
        let cursor = match &page.next {
            Some(link) => Cursor::Next(link.clone()),
            None => Cursor::End,
        };
        Ok::<_, ApiError>(Some((page, cursor)))
    })
}

/// Search every configured region and queue one item task per result. The termination marker
/// is queued exactly once when the stage ends, also when it ends with an error.
pub async fn run<A>(api: &A, config: &Config, items: &TaskQueue<ItemTask>) -> Result<SearchSummary>
where
    A: PlanetApi + ?Sized,
{
    tracing::info!("Search started");
    let outcome = search_regions(api, config, items).await;
    items.finish();
    match &outcome {
        Ok(summary) => tracing::info!(
            regions = summary.regions,
            items = summary.items,
            "Search has ended"
        ),
        Err(e) => tracing::error!(error = %format!("{:#}", e), "Search failed"),
    }
    outcome
}

/// Queue the items of an earlier search instead of searching again. Like `run`, the
/// termination marker is queued exactly once, also when the plan names a region that is not
/// configured.
pub fn replay(plan: SearchPlan, config: &Config, items: &TaskQueue<ItemTask>) -> Result<SearchSummary> {
    tracing::info!(items = plan.items.len(), "Replaying search plan");
    let outcome = replay_plan(plan, config, items);
    items.finish();
    if let Err(e) = &outcome {
        tracing::error!(error = %format!("{:#}", e), "Search plan rejected");
    }
    outcome
}

fn replay_plan(plan: SearchPlan, config: &Config, items: &TaskQueue<ItemTask>) -> Result<SearchSummary> {
    if let Some(item) = plan.items.iter().find(|item| config.region(&item.region).is_none()) {
        anyhow::bail!(
            "Search plan item {} belongs to unknown region {}",
            item.item_id,
            item.region
        );
    }
    let regions = plan
        .items
        .iter()
        .map(|item| item.region.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let mut summary = SearchSummary {
        regions,
        ..SearchSummary::default()
    };
    for item in plan.items {
        items.push(item);
        summary.items += 1;
    }
    Ok(summary)
}

async fn search_regions<A>(
    api: &A,
    config: &Config,
    items: &TaskQueue<ItemTask>,
) -> Result<SearchSummary>
where
    A: PlanetApi + ?Sized,
{
    let mut summary = SearchSummary::default();

    for (name, region) in config.regions.iter() {
        let footprint = region.footprint()?;
        let request = SearchRequest::for_region(&config.item_type, region, footprint);

        let results = pages(api, request);
        pin_mut!(results);
        while let Some(page) = results
            .try_next()
            .await
            .with_context(|| format!("Searching region {}", name))?
        {
            summary.pages += 1;
            for feature in page.features {
                items.push(ItemTask::new(&feature.id, name));
                summary.items += 1;
            }
            tracing::debug!(region = %name, queued = items.len(), "Search page queued");
        }
        summary.regions += 1;
    }
    Ok(summary)
}

/// Items found by a search-only run.
#[derive(Deserialize, Serialize, Debug)]
pub struct SearchPlan {
    pub items: Vec<ItemTask>,
}

impl SearchPlan {
    pub fn new(items: Vec<ItemTask>) -> Self {
        Self { items }
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        let plan: Self = serde_json::from_str(&content)
            .with_context(|| format!("Parsing search plan {}", path.display()))?;
        Ok(plan)
    }

    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
