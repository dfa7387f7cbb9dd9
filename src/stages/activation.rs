use crate::asset::AssetKind;
use crate::config::{IndeterminatePolicy, PipelineSettings};
use crate::planet::{AssetStatus, PlanetApi};
use crate::task::{AssetTask, ItemTask, Message, QueueReceiver, TaskQueue};
use chrono::Utc;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ActivationSummary {
    pub items: usize,
    pub activation_requests: usize,
    pub failed_activations: usize,
    pub queued_pending: usize,
    pub queued_ready: usize,
    pub skipped_indeterminate: usize,
}

/// Check both assets of every item. Inactive assets are activated and queued as pending, active
/// ones go straight to the ready queue. Forwards the termination marker to the pending queue.
pub async fn run<A>(
    api: &A,
    settings: &PipelineSettings,
    mut items: QueueReceiver<ItemTask>,
    pending: TaskQueue<AssetTask>,
    ready: TaskQueue<AssetTask>,
) -> ActivationSummary
where
    A: PlanetApi + ?Sized,
{
    tracing::info!("Activation started");
    let mut summary = ActivationSummary::default();

    while let Message::Task(item) = items.recv(settings.idle_wait()).await {
        summary.items += 1;
        for kind in AssetKind::ALL {
            let task = AssetTask::new(&item, kind);
            route(api, settings.indeterminate, task, &pending, &ready, &mut summary).await;
        }
    }

    pending.finish();
    tracing::info!(
        items = summary.items,
        activation_requests = summary.activation_requests,
        "Activation has ended"
    );
    summary
}

async fn route<A>(
    api: &A,
    policy: IndeterminatePolicy,
    task: AssetTask,
    pending: &TaskQueue<AssetTask>,
    ready: &TaskQueue<AssetTask>,
    summary: &mut ActivationSummary,
) where
    A: PlanetApi + ?Sized,
{
    let reason = match api.asset_status(&task.item_id, task.kind).await {
        Ok(AssetStatus::Active { location }) => {
            tracing::info!(item_id = %task.item_id, asset = %task.kind, "Queuing active asset");
            ready.push(task.ready(location));
            summary.queued_ready += 1;
            return;
        }
        Ok(AssetStatus::Inactive { activate }) => {
            tracing::info!(item_id = %task.item_id, asset = %task.kind, %activate, "Activating");
            summary.activation_requests += 1;
            // A failed request is not retried here; polling observes the activation either way
            if let Err(e) = api.activate(&activate).await {
                summary.failed_activations += 1;
                tracing::warn!(item_id = %task.item_id, asset = %task.kind, error = %e, "Activation request failed");
            }
            pending.push(task.pending(Utc::now()));
            summary.queued_pending += 1;
            return;
        }
        Err(e) if e.is_transient() => {
            tracing::warn!(item_id = %task.item_id, asset = %task.kind, error = %e, "Status check failed, leaving it to polling");
            pending.push(task.pending(Utc::now()));
            summary.queued_pending += 1;
            return;
        }
        Ok(AssetStatus::Indeterminate { reason }) => reason,
        Err(e) => e.to_string(),
    };

    match policy {
        IndeterminatePolicy::Skip => {
            tracing::warn!(item_id = %task.item_id, asset = %task.kind, %reason, "Status indeterminate, skipping asset");
            summary.skipped_indeterminate += 1;
        }
        IndeterminatePolicy::Retry => {
            tracing::warn!(item_id = %task.item_id, asset = %task.kind, %reason, "Status indeterminate, queuing for recheck");
            pending.push(task.pending(Utc::now()));
            summary.queued_pending += 1;
        }
    }
}
