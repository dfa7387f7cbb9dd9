use crate::config::Config;
use crate::error::{ApiError, DownloadError};
use crate::planet::PlanetApi;
use crate::task::{AssetTask, Message, Payload, QueueReceiver, TaskQueue};
use futures_util::StreamExt;
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use url::Url;

/// A task given up on after exhausting its download attempts.
#[derive(Serialize, Debug, Clone)]
pub struct DeadLetter {
    pub task: AssetTask,
    pub error: String,
}

#[derive(Debug, Default, Clone)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub bytes: u64,
    pub skipped_existing: usize,
    pub retried: usize,
    pub dropped: usize,
    pub dead_letters: Vec<DeadLetter>,
}

/// Download every ready asset into its region's directory. Failed downloads that may succeed
/// later go back on the ready queue. Stops once the termination marker arrives with no real
/// task left behind it.
///
/// There is a single download worker, so no two downloads ever target the same destination at
/// once.
pub async fn run<A>(
    api: &A,
    config: &Config,
    mut ready_rx: QueueReceiver<AssetTask>,
    ready: TaskQueue<AssetTask>,
) -> DownloadSummary
where
    A: PlanetApi + ?Sized,
{
    tracing::info!("Download started");
    let settings = &config.pipeline;
    let mut summary = DownloadSummary::default();

    loop {
        let mut task = match ready_rx.recv(settings.idle_wait()).await {
            Message::Task(task) => task,
            Message::Done if ready_rx.is_empty() => break,
            Message::Done => {
                ready.finish();
                continue;
            }
        };

        if let Some(remaining) = task.backoff_remaining(Instant::now()) {
            ready.push(task);
            tokio::time::sleep(remaining.min(settings.idle_wait())).await;
            continue;
        }

        let Some(region) = config.region(&task.region) else {
            tracing::error!(item_id = %task.item_id, region = %task.region, "Unknown region, dropping task");
            summary.dropped += 1;
            continue;
        };
        let Payload::Ready { location } = &task.payload else {
            tracing::error!(item_id = %task.item_id, asset = %task.kind, "Task has no download location, dropping it");
            summary.dropped += 1;
            continue;
        };

        let dst = task.destination(&region.download);
        tracing::info!(queued = ready_rx.len(), "Download queue length");
        if dst.exists() {
            tracing::info!(file = %dst.display(), "File already exists. Skipping.");
            summary.skipped_existing += 1;
            continue;
        }

        tracing::info!(%location, file = %dst.display(), "Downloading");
        match fetch(api, location, &dst, settings.download_timeout()).await {
            Ok(bytes) => {
                tracing::info!(file = %dst.display(), bytes, "Download finished");
                summary.downloaded += 1;
                summary.bytes += bytes;
            }
            Err(e) if e.is_retryable() => {
                task.attempts += 1;
                if settings.retry.exhausted(task.attempts) {
                    tracing::error!(file = %dst.display(), attempts = task.attempts, error = %e, "Giving up on download");
                    discard_partial(&dst).await;
                    summary.dead_letters.push(DeadLetter {
                        task,
                        error: e.to_string(),
                    });
                    continue;
                }
                let delay = settings.retry.delay_for(task.attempts);
                tracing::warn!(file = %dst.display(), attempts = task.attempts, ?delay, error = %e, "Download failed, requeuing");
                task.not_before = Some(Instant::now() + delay);
                ready.push(task);
                summary.retried += 1;
            }
            Err(e) => {
                tracing::error!(file = %dst.display(), error = %e, "Download failed permanently, dropping task");
                discard_partial(&dst).await;
                summary.dropped += 1;
            }
        }
    }

    tracing::info!(
        downloaded = summary.downloaded,
        skipped = summary.skipped_existing,
        "Downloading has ended"
    );
    summary
}

/// Stream an asset into `{dst}.partial` and move it into place once complete. Waiting longer
/// than `read_timeout` for the response or for the next chunk fails the download.
pub async fn fetch<A>(
    api: &A,
    location: &Url,
    dst: &Path,
    read_timeout: Duration,
) -> Result<u64, DownloadError>
where
    A: PlanetApi + ?Sized,
{
    let timed_out = || ApiError::Timeout {
        url: location.to_string(),
    };
    let mut body = tokio::time::timeout(read_timeout, api.open_download(location))
        .await
        .map_err(|_| timed_out())??;

    // Make parent directories as necessary
    if let Some(parent_dir) = dst.parent() {
        fs::create_dir_all(parent_dir).await.map_err(io_error(parent_dir))?;
    }

    let partial = partial_path(dst);
    let mut partial_file = fs::File::create(&partial).await.map_err(io_error(&partial))?;
    let mut byte_count = 0_u64;

    loop {
        let chunk = match tokio::time::timeout(read_timeout, body.next()).await {
            Ok(Some(chunk)) => chunk?,
            Ok(None) => break,
            Err(_) => return Err(timed_out().into()),
        };
        partial_file.write_all(&chunk).await.map_err(io_error(&partial))?;
        byte_count += chunk.len() as u64;
    }
    partial_file.flush().await.map_err(io_error(&partial))?;
    drop(partial_file);

    // Rename the file to remove .partial suffix
    fs::rename(&partial, dst).await.map_err(io_error(dst))?;

    Ok(byte_count)
}

fn partial_path(dst: &Path) -> PathBuf {
    let mut name = OsString::from(dst.as_os_str());
    name.push(".partial");
    PathBuf::from(name)
}

/// Remove what a failed download left behind once the task is given up on.
async fn discard_partial(dst: &Path) {
    let partial = partial_path(dst);
    match fs::remove_file(&partial).await {
        Ok(()) => tracing::debug!(file = %partial.display(), "Removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(file = %partial.display(), error = %e, "Unable to remove partial download"),
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DownloadError + '_ {
    move |source| DownloadError::Io {
        path: path.to_path_buf(),
        source,
    }
}
