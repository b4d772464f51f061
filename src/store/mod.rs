//! Remote store: a keyed JSON tree with change notification.
//!
//! DESIGN
//! ======
//! Locations are `/`-separated paths (`canvas/{id}/json`). Writes replace the
//! value at a path unconditionally; writing `null` deletes it. Documents must
//! not contain `null` anywhere inside them, the same rule a hosted real-time
//! database enforces, so callers strip missing values before writing.
//!
//! Every backend publishes the path of each successful write on a broadcast
//! channel. [`watch`] turns that into a per-path subscription: it emits the
//! current value once, then re-reads and emits again whenever a write touches
//! the watched path, one of its ancestors, or one of its descendants.
//!
//! One store is opened at startup ([`connect`]) and shared as a
//! [`SharedStore`]; services receive it by injection and never open their own.
//!
//! ERROR HANDLING
//! ==============
//! Backends return `StoreError`. A watch forwards read errors to its
//! subscriber as items and keeps running.

pub mod memory;
pub mod postgres;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::frame::ErrorCode;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Capacity of each backend's change broadcast.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// PATHS
// =============================================================================

/// A validated `/`-separated store location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorePath(Vec<String>);

const FORBIDDEN_SEGMENT_CHARS: &[char] = &['.', '#', '$', '[', ']'];

impl StorePath {
    /// Parse `a/b/c`. Leading and trailing slashes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] for an empty path, an empty
    /// segment, or a segment containing `.`, `#`, `$`, `[` or `]`.
    pub fn parse(path: &str) -> Result<Self, StoreError> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(StoreError::InvalidPath(path.to_owned()));
        }
        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            validate_segment(segment).map_err(|()| StoreError::InvalidPath(path.to_owned()))?;
            segments.push(segment.to_owned());
        }
        Ok(Self(segments))
    }

    /// Append one segment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidPath`] if `segment` is not a valid segment.
    pub fn child(&self, segment: &str) -> Result<Self, StoreError> {
        validate_segment(segment).map_err(|()| StoreError::InvalidPath(format!("{self}/{segment}")))?;
        let mut segments = self.0.clone();
        segments.push(segment.to_owned());
        Ok(Self(segments))
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// The last segment.
    #[must_use]
    pub fn key(&self) -> &str {
        self.0.last().map_or("", String::as_str)
    }

    /// Whether `other` is this path, an ancestor, or a descendant.
    #[must_use]
    pub fn is_related(&self, other: &StorePath) -> bool {
        let shared = self.0.len().min(other.0.len());
        self.0[..shared] == other.0[..shared]
    }
}

fn validate_segment(segment: &str) -> Result<(), ()> {
    if segment.trim().is_empty() || segment.contains(FORBIDDEN_SEGMENT_CHARS) || segment.contains('/') {
        Err(())
    } else {
        Ok(())
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid store path: {0:?}")]
    InvalidPath(String),
    #[error("document written to {0} contains null")]
    NullInDocument(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed document at {path}: {message}")]
    Malformed { path: String, message: String },
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPath(_) => "E_INVALID_PATH",
            Self::NullInDocument(_) => "E_NULL_IN_DOCUMENT",
            Self::Database(_) => "E_DATABASE",
            Self::Malformed { .. } => "E_MALFORMED_DOCUMENT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Replace the value at `path`. `Value::Null` deletes it.
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError>;

    /// Read the value at `path`; `None` if nothing is stored there.
    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError>;

    /// Allocate a fresh child key under `path`. Keys sort in creation order.
    async fn push_key(&self, _path: &StorePath) -> Result<String, StoreError> {
        Ok(Uuid::now_v7().to_string())
    }

    /// Subscribe to the paths of successful writes.
    fn changes(&self) -> broadcast::Receiver<StorePath>;
}

pub type SharedStore = Arc<dyn RemoteStore>;

/// Reject a document that carries `null` below its root.
pub(crate) fn ensure_no_nulls(path: &StorePath, value: &Value) -> Result<(), StoreError> {
    fn has_null(value: &Value) -> bool {
        match value {
            Value::Null => true,
            Value::Array(items) => items.iter().any(has_null),
            Value::Object(map) => map.values().any(has_null),
            _ => false,
        }
    }
    if has_null(value) { Err(StoreError::NullInDocument(path.to_string())) } else { Ok(()) }
}

/// Open the process-wide store: PostgreSQL when a URL is configured,
/// otherwise in memory.
///
/// # Errors
///
/// Returns [`StoreError::Database`] if the pool cannot be opened or
/// migrations fail.
pub async fn connect(config: &Config) -> Result<SharedStore, StoreError> {
    let Some(url) = config.database_url.as_deref() else {
        warn!("DATABASE_URL not set; using in-memory store, canvases will not survive restart");
        return Ok(Arc::new(MemoryStore::new()));
    };
    let pool = crate::db::init_pool(url, config.db_max_connections).await?;
    info!(max_connections = config.db_max_connections, "postgres store connected");
    Ok(Arc::new(PgStore::new(pool)))
}

// =============================================================================
// WATCH
// =============================================================================

/// Item emitted by a [`Watch`]: the value at the watched path after a change.
pub type WatchItem = Result<Option<Value>, StoreError>;

/// Standing subscription to one path. Dropping it unsubscribes.
pub struct Watch {
    rx: mpsc::UnboundedReceiver<WatchItem>,
    task: JoinHandle<()>,
}

/// Watch `path`: emit its current value, then re-emit after every related
/// write.
#[must_use]
pub fn watch(store: SharedStore, path: StorePath) -> Watch {
    // Subscribe before the first read so no write between the two is missed.
    let mut changes = store.changes();
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        if !emit(store.as_ref(), &path, &tx).await {
            return;
        }
        loop {
            match changes.recv().await {
                Ok(changed) => {
                    if changed.is_related(&path) && !emit(store.as_ref(), &path, &tx).await {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(%path, skipped, "watch lagged; re-reading");
                    if !emit(store.as_ref(), &path, &tx).await {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });

    Watch { rx, task }
}

/// Read `path` and forward the result. `false` once the subscriber is gone.
async fn emit(store: &dyn RemoteStore, path: &StorePath, tx: &mpsc::UnboundedSender<WatchItem>) -> bool {
    let item = store.get(path).await;
    tx.send(item).is_ok()
}

impl Watch {
    /// Stop watching.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Stream for Watch {
    type Item = WatchItem;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::Semaphore;

    use super::*;

    /// In-memory store that records writes and can fail or hold them.
    pub struct RecordingStore {
        inner: MemoryStore,
        writes: Mutex<Vec<(String, Value)>>,
        started: AtomicUsize,
        fail_writes: AtomicBool,
        gate: Option<Arc<Semaphore>>,
    }

    impl RecordingStore {
        #[must_use]
        pub fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                writes: Mutex::new(Vec::new()),
                started: AtomicUsize::new(0),
                fail_writes: AtomicBool::new(false),
                gate: None,
            }
        }

        /// A store whose writes block until a permit is added to the gate.
        #[must_use]
        pub fn gated() -> (Self, Arc<Semaphore>) {
            let gate = Arc::new(Semaphore::new(0));
            (Self { gate: Some(gate.clone()), ..Self::new() }, gate)
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Completed writes as `(path, value)`, oldest first.
        pub fn writes(&self) -> Vec<(String, Value)> {
            self.writes.lock().unwrap().clone()
        }

        pub fn writes_to(&self, path: &str) -> Vec<Value> {
            self.writes().into_iter().filter(|(p, _)| p == path).map(|(_, v)| v).collect()
        }

        /// Writes that have begun, including ones held by the gate.
        pub fn started_writes(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        /// Wait until at least `count` writes have completed.
        pub async fn wait_for_writes(&self, count: usize) -> bool {
            tokio::time::timeout(Duration::from_secs(2), async {
                while self.writes.lock().unwrap().len() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .is_ok()
        }

        /// Wait until at least `count` writes have begun.
        pub async fn wait_for_started(&self, count: usize) -> bool {
            tokio::time::timeout(Duration::from_secs(2), async {
                while self.started_writes() < count {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await
            .is_ok()
        }
    }

    #[async_trait]
    impl RemoteStore for RecordingStore {
        async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
            }
            self.inner.set(path, value.clone()).await?;
            self.writes.lock().unwrap().push((path.to_string(), value));
            Ok(())
        }

        async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
            self.inner.get(path).await
        }

        fn changes(&self) -> broadcast::Receiver<StorePath> {
            self.inner.changes()
        }
    }

    pub fn path(s: &str) -> StorePath {
        StorePath::parse(s).unwrap()
    }
}
