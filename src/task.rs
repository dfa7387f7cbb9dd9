//! Task records passed between pipeline stages and the queues carrying them.
use crate::asset::AssetKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use url::Url;

/// One catalog item found for a region.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ItemTask {
    pub item_id: String,
    pub region: String,
}

impl ItemTask {
    pub fn new(item_id: &str, region: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            region: region.to_string(),
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Payload {
    Unchecked,
    Pending { checked_at: DateTime<Utc> },
    Ready { location: Url },
}

/// One asset of an item on its way to disk.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AssetTask {
    pub item_id: String,
    pub region: String,
    pub kind: AssetKind,
    pub payload: Payload,
    /// Failed download attempts so far.
    pub attempts: u32,
    #[serde(skip)]
    pub not_before: Option<Instant>,
}

impl AssetTask {
    pub fn new(item: &ItemTask, kind: AssetKind) -> Self {
        Self {
            item_id: item.item_id.clone(),
            region: item.region.clone(),
            kind,
            payload: Payload::Unchecked,
            attempts: 0,
            not_before: None,
        }
    }

    pub fn pending(mut self, checked_at: DateTime<Utc>) -> Self {
        self.payload = Payload::Pending { checked_at };
        self
    }

    pub fn ready(mut self, location: Url) -> Self {
        self.payload = Payload::Ready { location };
        self
    }

    /// A pending task is due for another status check once `interval` has passed since the last
    /// one. Tasks in any other state are always due.
    pub fn recheck_due(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        match &self.payload {
            Payload::Pending { checked_at } => {
                (now - *checked_at).to_std().unwrap_or_default() >= interval
            }
            _ => true,
        }
    }

    /// Time left before a backed off task may be retried.
    pub fn backoff_remaining(&self, now: Instant) -> Option<Duration> {
        self.not_before
            .filter(|not_before| *not_before > now)
            .map(|not_before| not_before - now)
    }

    pub fn file_name(&self) -> String {
        self.kind.file_name(&self.item_id)
    }

    pub fn destination(&self, download_dir: &Path) -> PathBuf {
        download_dir.join(self.file_name())
    }
}

/// What travels on a queue: a real task or the termination marker.
#[derive(Debug, PartialEq)]
pub enum Message<T> {
    Task(T),
    Done,
}

/// Producer half of a FIFO task queue. Cheap to clone; every stage feeding the queue holds one.
#[derive(Debug)]
pub struct TaskQueue<T> {
    name: &'static str,
    tx: UnboundedSender<Message<T>>,
    queued: Arc<AtomicUsize>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            queued: Arc::clone(&self.queued),
        }
    }
}

/// Consumer half of a task queue, owned by exactly one stage.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    name: &'static str,
    rx: UnboundedReceiver<Message<T>>,
    queued: Arc<AtomicUsize>,
}

pub fn task_queue<T>(name: &'static str) -> (TaskQueue<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queued = Arc::new(AtomicUsize::new(0));
    (
        TaskQueue {
            name,
            tx,
            queued: Arc::clone(&queued),
        },
        QueueReceiver { name, rx, queued },
    )
}

impl<T> TaskQueue<T> {
    pub fn push(&self, task: T) {
        // Count before sending so the consumer never sees a task it has not been told about
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Message::Task(task)).is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            tracing::error!(queue = self.name, "Queue consumer is gone, task lost");
        }
    }

    /// Enqueue the termination marker.
    pub fn finish(&self) {
        if self.tx.send(Message::Done).is_err() {
            tracing::warn!(queue = self.name, "Queue consumer is gone, marker not delivered");
        }
    }

    /// Real tasks currently enqueued.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> QueueReceiver<T> {
    /// Wait for the next message. Waits are bounded by `idle_wait` so an idle queue shows up in
    /// the logs; a queue whose producers are all gone reads as the termination marker.
    pub async fn recv(&mut self, idle_wait: Duration) -> Message<T> {
        loop {
            match tokio::time::timeout(idle_wait, self.rx.recv()).await {
                Ok(Some(Message::Task(task))) => {
                    self.queued.fetch_sub(1, Ordering::SeqCst);
                    return Message::Task(task);
                }
                Ok(Some(Message::Done)) | Ok(None) => return Message::Done,
                Err(_) => {
                    tracing::trace!(queue = self.name, depth = self.len(), "Queue idle");
                }
            }
        }
    }

    /// Take every message already enqueued without waiting.
    pub fn drain(&mut self) -> Vec<Message<T>> {
        let mut messages = vec![];
        while let Ok(message) = self.rx.try_recv() {
            if matches!(message, Message::Task(_)) {
                self.queued.fetch_sub(1, Ordering::SeqCst);
            }
            messages.push(message);
        }
        messages
    }

    /// Real tasks still waiting behind the message just received.
    pub fn len(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
