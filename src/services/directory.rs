//! Canvas directory: list and create canvas records.
//!
//! DESIGN
//! ======
//! The directory is a standing subscription on the `canvas` collection. Every
//! change anywhere under it re-reads the whole collection and emits the full
//! list, in the store's key order. Keys come from `push_key`, so key order is
//! creation order.
//!
//! New records are written in one `set` of the whole record with an empty
//! snapshot and an epoch-millisecond `createdAt`.

#[cfg(test)]
#[path = "directory_test.rs"]
mod directory_test;

use canvas::codec::Snapshot;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::{Value, json};
use tracing::{info, warn};

use super::gateway::{CANVAS_COLLECTION, SyncError, canvas_path};
use crate::state::{CanvasRecord, CreatedAt};
use crate::store::{self, SharedStore, StorePath};

#[derive(Clone)]
pub struct CanvasDirectory {
    store: SharedStore,
}

impl CanvasDirectory {
    #[must_use]
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    fn collection() -> Result<StorePath, SyncError> {
        Ok(StorePath::parse(CANVAS_COLLECTION)?)
    }

    /// Live list of every canvas record: the current list first, then the
    /// full list again after each change. Read errors are logged and skipped.
    #[must_use]
    pub fn list(&self) -> BoxStream<'static, Vec<CanvasRecord>> {
        let Ok(path) = Self::collection() else {
            return futures::stream::empty().boxed();
        };
        store::watch(self.store.clone(), path)
            .filter_map(|item| async move {
                match item {
                    Ok(value) => Some(records_of(value)),
                    Err(e) => {
                        warn!(error = %e, "directory read failed");
                        None
                    }
                }
            })
            .boxed()
    }

    /// The current list, read once.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the read fails.
    pub async fn list_once(&self) -> Result<Vec<CanvasRecord>, SyncError> {
        let value = self.store.get(&Self::collection()?).await?;
        Ok(records_of(value))
    }

    /// One record, if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidCanvasId`] for a bad id and
    /// [`SyncError::Store`] if the read fails.
    pub async fn get(&self, canvas_id: &str) -> Result<Option<CanvasRecord>, SyncError> {
        let value = self.store.get(&canvas_path(canvas_id)?).await?;
        Ok(value.and_then(|v| CanvasRecord::from_stored(canvas_id, v)))
    }

    /// Create a blank canvas and return its id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if key allocation or the write fails.
    pub async fn create_new(&self) -> Result<String, SyncError> {
        let collection = Self::collection()?;
        let id = self.store.push_key(&collection).await?;
        let path = collection.child(&id)?;
        let created = CreatedAt::now();

        let record = json!({
            "name": default_name(created),
            "json": Snapshot::empty().into_value(),
            "createdAt": created.millis(),
        });
        self.store.set(&path, record).await?;
        info!(canvas_id = %id, "canvas created");
        Ok(id)
    }
}

/// `Canvas 2024-03-01 12:30:00 UTC`.
fn default_name(created: CreatedAt) -> String {
    let at = created.as_datetime();
    format!(
        "Canvas {}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second()
    )
}

fn records_of(collection: Option<Value>) -> Vec<CanvasRecord> {
    let Some(Value::Object(rows)) = collection else {
        return Vec::new();
    };
    rows.into_iter().filter_map(|(id, value)| CanvasRecord::from_stored(&id, value)).collect()
}
