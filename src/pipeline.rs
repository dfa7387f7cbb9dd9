use crate::config::Config;
use crate::planet::PlanetApi;
use crate::stages::download::DeadLetter;
use crate::stages::search::SearchPlan;
use crate::stages::{activation, download, poll, search};
use crate::task::task_queue;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::Instrument;

/// Outcome of a full run, assembled from what each stage reports when it ends.
#[derive(Serialize, Debug, Default)]
pub struct PipelineReport {
    pub items_found: usize,
    pub activation_requests: usize,
    pub failed_activations: usize,
    pub skipped_indeterminate: usize,
    pub status_checks: usize,
    pub promoted: usize,
    pub downloaded: usize,
    pub bytes: u64,
    pub skipped_existing: usize,
    pub retried: usize,
    pub dropped: usize,
    pub dead_letters: Vec<DeadLetter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_error: Option<String>,
}

impl PipelineReport {
    /// Everything found was either downloaded or already on disk.
    pub fn is_complete(&self) -> bool {
        self.search_error.is_none()
            && self.dropped == 0
            && self.skipped_indeterminate == 0
            && self.dead_letters.is_empty()
    }

    pub fn write_dead_letters<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.dead_letters)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Persist the dead letters, if any and if asked to, then turn the report into the run's
    /// outcome: an error when the search failed, otherwise whether the run is complete.
    pub fn finish(self: &Self, dead_letter: Option<&Path>) -> Result<bool> {
        if let Some(path) = dead_letter {
            if !self.dead_letters.is_empty() {
                self.write_dead_letters(path)
                    .with_context(|| format!("Writing dead letters to {}", path.display()))?;
                tracing::warn!(path = %path.display(), count = self.dead_letters.len(), "Dead letters written");
            }
        }
        if let Some(e) = &self.search_error {
            anyhow::bail!("Search failed: {}", e);
        }
        Ok(self.is_complete())
    }
}

/// Where the item queue is fed from.
#[derive(Debug)]
pub enum ItemSource {
    /// Search the catalog for every configured region.
    Search,
    /// Replay the items of an earlier search-only run.
    Plan(SearchPlan),
}

/// Run search, activation, polling and download as four concurrent tasks connected by the item,
/// pending and ready queues, and wait for all of them to finish.
pub async fn run<A>(api: Arc<A>, config: Arc<Config>) -> Result<PipelineReport>
where
    A: PlanetApi + ?Sized + 'static,
{
    run_from(api, config, ItemSource::Search).await
}

pub async fn run_from<A>(api: Arc<A>, config: Arc<Config>, source: ItemSource) -> Result<PipelineReport>
where
    A: PlanetApi + ?Sized + 'static,
{
    let (items, items_rx) = task_queue("items");
    let (pending, pending_rx) = task_queue("pending");
    let (ready, ready_rx) = task_queue("ready");

    let search = tokio::spawn({
        let api = Arc::clone(&api);
        let config = Arc::clone(&config);
        async move {
            match source {
                ItemSource::Search => search::run(api.as_ref(), &config, &items).await,
                ItemSource::Plan(plan) => search::replay(plan, &config, &items),
            }
        }
        .instrument(tracing::info_span!("search"))
    });

    let activation = tokio::spawn({
        let api = Arc::clone(&api);
        let config = Arc::clone(&config);
        let pending = pending.clone();
        let ready = ready.clone();
        async move {
            activation::run(api.as_ref(), &config.pipeline, items_rx, pending, ready).await
        }
        .instrument(tracing::info_span!("activation"))
    });

    let poll = tokio::spawn({
        let api = Arc::clone(&api);
        let config = Arc::clone(&config);
        let ready = ready.clone();
        async move { poll::run(api.as_ref(), &config.pipeline, pending_rx, pending, ready).await }
            .instrument(tracing::info_span!("poll"))
    });

    let download = tokio::spawn({
        let api = Arc::clone(&api);
        let config = Arc::clone(&config);
        async move { download::run(api.as_ref(), &config, ready_rx, ready).await }
            .instrument(tracing::info_span!("download"))
    });

    let (search, activation, poll, download) = tokio::join!(search, activation, poll, download);
    let search = search.context("Search stage panicked")?;
    let activation = activation.context("Activation stage panicked")?;
    let poll = poll.context("Poll stage panicked")?;
    let download = download.context("Download stage panicked")?;

    let mut report = PipelineReport {
        activation_requests: activation.activation_requests,
        failed_activations: activation.failed_activations,
        skipped_indeterminate: activation.skipped_indeterminate,
        status_checks: poll.checks,
        promoted: poll.promoted,
        downloaded: download.downloaded,
        bytes: download.bytes,
        skipped_existing: download.skipped_existing,
        retried: download.retried,
        dropped: download.dropped,
        dead_letters: download.dead_letters,
        ..PipelineReport::default()
    };
    match search {
        Ok(summary) => report.items_found = summary.items,
        Err(e) => report.search_error = Some(format!("{:#}", e)),
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::AssetKind;
    use crate::planet::fake::{self, FakePlanet};
    use crate::stages::tests::config_in;
    use crate::task::{AssetTask, ItemTask};
    use std::time::Duration;

    const ITEM: &str = "20230101_123456_abcd";

    async fn run_to_end(api: Arc<FakePlanet>, config: Config) -> PipelineReport {
        tokio::time::timeout(Duration::from_secs(10), run(api, Arc::new(config)))
            .await
            .expect("pipeline should drain and terminate")
            .unwrap()
    }

    #[tokio::test]
    async fn test_inactive_item_is_activated_polled_and_downloaded() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut api = FakePlanet::with_pages(vec![vec![ITEM]]);
        for kind in AssetKind::ALL {
            // Activation sees it inactive, the first recheck sees it active
            api = api.script(ITEM, kind, vec![fake::inactive(ITEM, kind), fake::active(ITEM, kind)]);
        }
        let api = Arc::new(api);

        let report = run_to_end(Arc::clone(&api), config.clone()).await;
        assert_eq!(report.items_found, 1);
        assert_eq!(report.activation_requests, 2);
        assert_eq!(api.activation_count(), 2);
        assert_eq!(report.promoted, 2);
        assert_eq!(report.downloaded, 2);
        assert_eq!(api.download_count(), 2);
        assert!(report.is_complete());

        let out = &config.region("berlin").unwrap().download;
        assert!(out.join("20230101_123456_abcd.tif").exists());
        assert!(out.join("20230101_123456_abcd.xml").exists());
        assert_eq!(std::fs::read_dir(out).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_rerun_skips_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let script = || {
            let mut api = FakePlanet::with_pages(vec![vec![ITEM]]);
            for kind in AssetKind::ALL {
                api = api.script(ITEM, kind, vec![fake::active(ITEM, kind)]);
            }
            Arc::new(api)
        };

        let report = run_to_end(script(), config.clone()).await;
        assert_eq!(report.downloaded, 2);

        let api = script();
        let report = run_to_end(Arc::clone(&api), config).await;
        assert_eq!(report.skipped_existing, 2);
        assert_eq!(report.downloaded, 0);
        assert_eq!(api.download_count(), 0);
    }

    #[tokio::test]
    async fn test_many_items_across_pages_all_arrive() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let ids = ["a", "b", "c", "d", "e"];
        let mut api = FakePlanet::with_pages(vec![ids[..2].to_vec(), ids[2..].to_vec()]);
        for (n, id) in ids.iter().enumerate() {
            for kind in AssetKind::ALL {
                let answers = if n % 2 == 0 {
                    vec![fake::active(id, kind)]
                } else {
                    vec![fake::inactive(id, kind), fake::inactive(id, kind), fake::active(id, kind)]
                };
                api = api.script(id, kind, answers);
            }
        }
        let api = Arc::new(api);

        let report = run_to_end(Arc::clone(&api), config).await;
        assert_eq!(report.items_found, 5);
        assert_eq!(report.downloaded, 10);
        assert_eq!(report.promoted, 4);
        assert_eq!(api.download_count(), 10);
    }

    #[tokio::test]
    async fn test_one_marker_reaches_ready_queue() {
        use crate::stages::tests::settings;
        use crate::task::Message;

        let mut api = FakePlanet::default();
        for id in ["a", "b", "c"] {
            api = api
                .script(id, AssetKind::Analytic, vec![fake::active(id, AssetKind::Analytic)])
                .script(
                    id,
                    AssetKind::AnalyticXml,
                    vec![fake::inactive(id, AssetKind::AnalyticXml), fake::active(id, AssetKind::AnalyticXml)],
                );
        }
        let api = Arc::new(api);
        let (items, items_rx) = task_queue("items");
        let (pending, pending_rx) = task_queue("pending");
        let (ready, mut ready_rx) = task_queue("ready");
        for id in ["a", "b", "c"] {
            items.push(ItemTask::new(id, "berlin"));
        }
        items.finish();

        let activation = tokio::spawn({
            let api = Arc::clone(&api);
            let (pending, ready) = (pending.clone(), ready.clone());
            async move { activation::run(api.as_ref(), &settings(), items_rx, pending, ready).await }
        });
        let poll = tokio::spawn({
            let api = Arc::clone(&api);
            async move { poll::run(api.as_ref(), &settings(), pending_rx, pending, ready).await }
        });
        activation.await.unwrap();
        poll.await.unwrap();

        let messages = ready_rx.drain();
        let markers = messages.iter().filter(|m| **m == Message::Done).count();
        assert_eq!(markers, 1);
        assert_eq!(messages.len(), 7);
        assert_eq!(messages.last(), Some(&Message::Done));
    }

    #[tokio::test]
    async fn test_failed_search_still_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let api = Arc::new(FakePlanet::failing_search());

        let report = run_to_end(api, config).await;
        assert!(report.search_error.is_some());
        assert!(!report.is_complete());
        assert_eq!(report.downloaded, 0);
    }

    #[tokio::test]
    async fn test_run_from_plan_skips_search() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let mut api = FakePlanet::default();
        for kind in AssetKind::ALL {
            api = api.script(ITEM, kind, vec![fake::active(ITEM, kind)]);
        }
        let api = Arc::new(api);
        let plan = SearchPlan::new(vec![ItemTask::new(ITEM, "berlin")]);

        let report = tokio::time::timeout(
            Duration::from_secs(10),
            run_from(Arc::clone(&api), Arc::new(config), ItemSource::Plan(plan)),
        )
        .await
        .expect("pipeline should drain and terminate")
        .unwrap();
        assert!(api.searches.lock().unwrap().is_empty());
        assert_eq!(report.items_found, 1);
        assert_eq!(report.downloaded, 2);
        assert!(report.is_complete());
    }

    fn dead_letter() -> DeadLetter {
        DeadLetter {
            task: AssetTask::new(&ItemTask::new(ITEM, "berlin"), AssetKind::Analytic),
            error: "Request to https://fake.planet/download timed out".to_string(),
        }
    }

    #[test]
    fn test_finish_writes_dead_letters_before_reporting_search_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead_letters.json");
        let report = PipelineReport {
            dead_letters: vec![dead_letter()],
            search_error: Some("Searching region berlin".to_string()),
            ..PipelineReport::default()
        };

        let err = report.finish(Some(&path)).unwrap_err();
        assert!(err.to_string().starts_with("Search failed"));
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written[0]["task"]["item_id"], ITEM);
        assert_eq!(written[0]["task"]["kind"], "analytic");
    }

    #[test]
    fn test_finish_reports_completeness() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead_letters.json");
        assert!(PipelineReport::default().finish(Some(&path)).unwrap());
        assert!(!path.exists());

        let report = PipelineReport {
            dead_letters: vec![dead_letter()],
            ..PipelineReport::default()
        };
        assert!(!report.finish(None).unwrap());
        assert!(!path.exists());
    }

    #[test]
    fn test_write_dead_letters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dead_letters.json");
        let report = PipelineReport::default();
        report.write_dead_letters(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }
}
