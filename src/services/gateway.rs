//! Sync gateway: canvas snapshots in and out of the remote store.
//!
//! DESIGN
//! ======
//! A canvas record lives at `canvas/{id}`; its snapshot at `canvas/{id}/json`.
//! Saves overwrite the snapshot unconditionally (last write wins). A load is a
//! one-shot subscription: watch the snapshot path, take the first value the
//! watch emits, drop the watch. Standing subscriptions at the record level are
//! handed to the caller as a [`Subscription`] that stops on drop.
//!
//! ERROR HANDLING
//! ==============
//! Store errors are returned to the caller as `SyncError`. Nothing is retried
//! here; the session decides whether a failure is reported or surfaced.

#[cfg(test)]
#[path = "gateway_test.rs"]
mod gateway_test;

use canvas::codec::Snapshot;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::frame::ErrorCode;
use crate::state::CanvasRecord;
use crate::store::{self, SharedStore, StoreError, StorePath};

/// Store collection holding canvas records.
pub const CANVAS_COLLECTION: &str = "canvas";

/// Record field holding the snapshot.
pub const SNAPSHOT_FIELD: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid canvas id: {0:?}")]
    InvalidCanvasId(String),
    #[error("subscription closed before a value arrived")]
    SubscriptionClosed,
}

impl ErrorCode for SyncError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Store(e) => e.error_code(),
            Self::InvalidCanvasId(_) => "E_INVALID_CANVAS_ID",
            Self::SubscriptionClosed => "E_SUBSCRIPTION_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// `canvas/{id}`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidCanvasId`] if `id` is not a valid path segment.
pub fn canvas_path(id: &str) -> Result<StorePath, SyncError> {
    StorePath::parse(CANVAS_COLLECTION)
        .and_then(|collection| collection.child(id))
        .map_err(|_| SyncError::InvalidCanvasId(id.to_owned()))
}

/// `canvas/{id}/json`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidCanvasId`] if `id` is not a valid path segment.
pub fn snapshot_path(id: &str) -> Result<StorePath, SyncError> {
    Ok(canvas_path(id)?.child(SNAPSHOT_FIELD)?)
}

// =============================================================================
// GATEWAY
// =============================================================================

#[derive(Clone)]
pub struct SyncGateway {
    store: SharedStore,
}

impl SyncGateway {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Overwrite the canvas's snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidCanvasId`] for a bad id and
    /// [`SyncError::Store`] if the write fails.
    pub async fn save(&self, canvas_id: &str, snapshot: &Snapshot) -> Result<(), SyncError> {
        let path = snapshot_path(canvas_id)?;
        self.store.set(&path, snapshot.as_value().clone()).await?;
        debug!(%canvas_id, objects = snapshot.objects().len(), "snapshot saved");
        Ok(())
    }

    /// Read the canvas's latest snapshot once.
    ///
    /// `Ok(None)` when nothing usable is stored: no record, no snapshot, or
    /// the legacy `"{}"` placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the read fails and
    /// [`SyncError::SubscriptionClosed`] if the watch ends without a value.
    pub async fn load_once(&self, canvas_id: &str) -> Result<Option<Snapshot>, SyncError> {
        let path = snapshot_path(canvas_id)?;
        let mut watch = store::watch(self.store.clone(), path);
        let first = watch.next().await;
        watch.unsubscribe();

        let value = first.ok_or(SyncError::SubscriptionClosed)??;
        let snapshot = value.and_then(Snapshot::from_stored);
        debug!(%canvas_id, found = snapshot.is_some(), "snapshot loaded");
        Ok(snapshot)
    }

    /// Follow the canvas record. `on_record` runs with the current record and
    /// again after every change; `None` means the record is absent.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidCanvasId`] for a bad id.
    pub fn subscribe<F>(&self, canvas_id: &str, mut on_record: F) -> Result<Subscription, SyncError>
    where
        F: FnMut(Option<CanvasRecord>) + Send + 'static,
    {
        let path = canvas_path(canvas_id)?;
        let id = canvas_id.to_owned();
        let mut watch = store::watch(self.store.clone(), path);

        let task = tokio::spawn(async move {
            while let Some(item) = watch.next().await {
                match item {
                    Ok(value) => on_record(value.and_then(|v| CanvasRecord::from_stored(&id, v))),
                    Err(e) => warn!(canvas_id = %id, error = %e, "record subscription read failed"),
                }
            }
        });
        info!(%canvas_id, "record subscription started");
        Ok(Subscription { task })
    }
}

/// A standing record subscription. Dropping it unsubscribes.
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
