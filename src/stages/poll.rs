use crate::config::PipelineSettings;
use crate::planet::{AssetStatus, PlanetApi};
use crate::task::{AssetTask, Message, QueueReceiver, TaskQueue};
use chrono::Utc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollSummary {
    pub checks: usize,
    pub promoted: usize,
}

/// Recheck pending assets until they turn active and move them to the ready queue. A pending
/// task is never dropped: anything not yet active goes back on the pending queue, so an asset
/// that never activates is polled for as long as the pipeline runs.
///
/// The termination marker is forwarded to the ready queue once no real task is left behind it;
/// until then it is put back and evaluated again after the remaining tasks.
pub async fn run<A>(
    api: &A,
    settings: &PipelineSettings,
    mut pending_rx: QueueReceiver<AssetTask>,
    pending: TaskQueue<AssetTask>,
    ready: TaskQueue<AssetTask>,
) -> PollSummary
where
    A: PlanetApi + ?Sized,
{
    tracing::info!("Activation polling started");
    let mut summary = PollSummary::default();

    loop {
        let task = match pending_rx.recv(settings.idle_wait()).await {
            Message::Task(task) => task,
            Message::Done if pending_rx.is_empty() => break,
            Message::Done => {
                pending.finish();
                continue;
            }
        };

        if !task.recheck_due(settings.recheck_interval(), Utc::now()) {
            pending.push(task);
            tokio::time::sleep(settings.idle_wait()).await;
            continue;
        }

        summary.checks += 1;
        match api.asset_status(&task.item_id, task.kind).await {
            Ok(AssetStatus::Active { location }) => {
                tracing::info!(item_id = %task.item_id, asset = %task.kind, "Asset is active");
                ready.push(task.ready(location));
                summary.promoted += 1;
            }
            Ok(AssetStatus::Inactive { .. }) => {
                pending.push(task.pending(Utc::now()));
            }
            Ok(AssetStatus::Indeterminate { reason }) => {
                tracing::debug!(item_id = %task.item_id, asset = %task.kind, %reason, "Status indeterminate");
                pending.push(task.pending(Utc::now()));
            }
            Err(e) => {
                tracing::warn!(item_id = %task.item_id, asset = %task.kind, error = %e, "Status check failed");
                pending.push(task.pending(Utc::now()));
            }
        }
        tracing::debug!(pending = pending.len(), ready = ready.len(), "Queue lengths");
    }

    ready.finish();
    tracing::info!(
        checks = summary.checks,
        promoted = summary.promoted,
        "Activation polling has ended"
    );
    summary
}
