//! Auto-save worker: one per session, saves snapshots in order.
//!
//! DESIGN
//! ======
//! Scene listeners run synchronously inside scene mutation, so they cannot
//! await a store write. They encode the scene and hand the snapshot to a
//! bounded queue with `try_send`; a background task drains the queue and
//! saves through the gateway one snapshot at a time, so saves land in the
//! order the mutations happened.
//!
//! Saves are fire-and-report: success is silent, a failure is logged and
//! sent on the report channel. Nothing is retried.
//!
//! After `dispose`, queued snapshots that have not started are dropped. A
//! save already in flight finishes at the store, but its outcome is
//! discarded and never reported.

#[cfg(test)]
#[path = "autosave_test.rs"]
mod autosave_test;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use canvas::codec::Snapshot;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::gateway::{SyncError, SyncGateway};

/// Outcome worth telling the client about. Successful saves are not reported.
#[derive(Debug)]
pub enum SaveReport {
    /// The write reached the store and failed.
    Failed { canvas_id: String, error: SyncError },
    /// The queue was full; the snapshot was never written.
    Dropped { canvas_id: String },
}

/// Handle to a session's auto-save worker. Cheap to clone into listeners.
#[derive(Clone)]
pub struct AutoSaver {
    canvas_id: Arc<str>,
    tx: mpsc::Sender<Snapshot>,
    reports: mpsc::UnboundedSender<SaveReport>,
    disposed: Arc<AtomicBool>,
}

/// Spawn the worker for `canvas_id`. Returns its handle and the report
/// channel.
#[must_use]
pub fn spawn(
    gateway: SyncGateway,
    canvas_id: &str,
    queue_capacity: usize,
) -> (AutoSaver, mpsc::UnboundedReceiver<SaveReport>) {
    let (tx, mut rx) = mpsc::channel::<Snapshot>(queue_capacity.max(1));
    let (reports, reports_rx) = mpsc::unbounded_channel();
    let disposed = Arc::new(AtomicBool::new(false));
    let canvas_id: Arc<str> = Arc::from(canvas_id);

    let saver = AutoSaver { canvas_id: canvas_id.clone(), tx, reports: reports.clone(), disposed: disposed.clone() };

    info!(%canvas_id, queue_capacity, "auto-save worker started");
    tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            if disposed.load(Ordering::SeqCst) {
                break;
            }
            let result = gateway.save(&canvas_id, &snapshot).await;
            if disposed.load(Ordering::SeqCst) {
                debug!(%canvas_id, "session disposed during save; outcome discarded");
                break;
            }
            if let Err(e) = result {
                warn!(%canvas_id, error = %e, "auto-save failed");
                // Receiver gone means the session stopped listening.
                let _ = reports.send(SaveReport::Failed { canvas_id: canvas_id.to_string(), error: e });
            }
        }
        debug!(%canvas_id, "auto-save worker stopped");
    });

    (saver, reports_rx)
}

impl AutoSaver {
    /// Queue `snapshot` for saving. Returns whether it was queued.
    pub fn enqueue(&self, snapshot: Snapshot) -> bool {
        if self.is_disposed() {
            debug!(canvas_id = %self.canvas_id, "auto-save after dispose ignored");
            return false;
        }
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(canvas_id = %self.canvas_id, "auto-save queue full; dropping snapshot");
                let _ = self.reports.send(SaveReport::Dropped { canvas_id: self.canvas_id.to_string() });
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(canvas_id = %self.canvas_id, "auto-save worker gone; dropping snapshot");
                false
            }
        }
    }

    /// Stop saving. Idempotent.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::SeqCst) {
            debug!(canvas_id = %self.canvas_id, "auto-save disposed");
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn canvas_id(&self) -> &str {
        &self.canvas_id
    }
}
