//! Change queue: filtered write notifications, reconciled one at a time.
//!
//! Producers call [`ChangeQueue::submit`], which waits for channel capacity
//! but never for processing. A single [`QueueWorker`] drains the channel and
//! awaits each event to completion before taking the next, so no two events
//! are ever reconciled concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, RwLock};

use fieldsync_core::WriteNotification;
use fieldsync_sync::{EventReport, ReverseReconciler, SyncResult};

use crate::error::DaemonError;

/// Whatever reconciles one accepted notification.
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, note: &WriteNotification) -> SyncResult<EventReport>;
}

#[async_trait]
impl ChangeHandler for ReverseReconciler {
    async fn handle(&self, note: &WriteNotification) -> SyncResult<EventReport> {
        ReverseReconciler::handle(self, note).await
    }
}

/// Result of a submit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Submitted {
    Queued,
    /// Filtered out: not a successful write of the watched content type.
    Ignored,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub accepted: u64,
    pub ignored: u64,
    pub processed: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_event: Option<EventReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Producer handle. Cheap to clone.
#[derive(Clone)]
pub struct ChangeQueue {
    tx: mpsc::Sender<WriteNotification>,
    watched_content_type: Arc<str>,
    stats: Arc<RwLock<QueueStats>>,
}

/// The single consumer of a [`ChangeQueue`].
pub struct QueueWorker {
    rx: mpsc::Receiver<WriteNotification>,
    stats: Arc<RwLock<QueueStats>>,
}

impl ChangeQueue {
    /// A bounded queue holding at most `capacity` pending events.
    pub fn new(capacity: usize, watched_content_type: &str) -> (Self, QueueWorker) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stats = Arc::new(RwLock::new(QueueStats::default()));
        let queue = Self {
            tx,
            watched_content_type: Arc::from(watched_content_type),
            stats: stats.clone(),
        };
        (queue, QueueWorker { rx, stats })
    }

    /// Enqueue `note` if it passes the filter. Waits while the queue is full.
    pub async fn submit(&self, note: WriteNotification) -> Result<Submitted, DaemonError> {
        if !note.accepts(&self.watched_content_type) {
            tracing::debug!(
                msgtype = %note.msgtype,
                code = %note.code,
                content_type = %note.content_type,
                "ignoring notification",
            );
            self.stats.write().await.ignored += 1;
            return Ok(Submitted::Ignored);
        }

        tracing::debug!(resource_id = %note.resource_id, rev = note.rev, "queueing change event");
        self.tx
            .send(note)
            .await
            .map_err(|_| DaemonError::ChannelClosed("change queue"))?;
        self.stats.write().await.accepted += 1;
        Ok(Submitted::Queued)
    }

    pub async fn stats(&self) -> QueueStats {
        self.stats.read().await.clone()
    }
}

impl QueueWorker {
    /// Process events until shutdown or until every producer is dropped.
    ///
    /// Failures are logged and the event is dropped; there is no retry.
    pub async fn run<H>(
        self,
        handler: &H,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<(), DaemonError>
    where
        H: ChangeHandler + ?Sized,
    {
        let QueueWorker { mut rx, stats } = self;
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                maybe_note = rx.recv() => {
                    let Some(note) = maybe_note else { break };
                    process(handler, &stats, &note).await;
                }
            }
        }
        Ok(())
    }
}

async fn process<H>(handler: &H, stats: &RwLock<QueueStats>, note: &WriteNotification)
where
    H: ChangeHandler + ?Sized,
{
    match handler.handle(note).await {
        Ok(report) => {
            tracing::info!(
                resource_id = %report.resource_id,
                rev = report.rev,
                writes = report.writes.len(),
                skipped = report.skipped.len(),
                "change event reconciled",
            );
            let mut stats = stats.write().await;
            stats.processed += 1;
            stats.last_event = Some(report);
        }
        Err(err) => {
            tracing::error!(
                resource_id = %note.resource_id,
                rev = note.rev,
                error = %err,
                "change event dropped",
            );
            let mut stats = stats.write().await;
            stats.failed += 1;
            stats.last_error = Some(err.to_string());
        }
    }
}
