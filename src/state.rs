//! Shared application state and the canvas record model.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the one store opened at startup plus the services built on it.
//! Sessions are not kept here: each websocket connection owns its session.
//!
//! A canvas record lives at `canvas/{id}` as `{name, createdAt, json}`.
//! Records written by older clients store `createdAt` as an RFC 3339 string
//! and `json` as the text placeholder `"{}"`; both read back cleanly.

#[cfg(test)]
#[path = "state_test.rs"]
mod state_test;

use std::sync::Arc;

use canvas::codec::Snapshot;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::Config;
use crate::services::directory::CanvasDirectory;
use crate::services::gateway::SyncGateway;
use crate::store::SharedStore;

/// Display name for records stored without one.
pub const UNTITLED_CANVAS: &str = "Untitled Canvas";

// =============================================================================
// APP STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub gateway: SyncGateway,
    pub directory: CanvasDirectory,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(store: SharedStore, config: Config) -> Self {
        Self {
            gateway: SyncGateway::new(store.clone()),
            directory: CanvasDirectory::new(store.clone()),
            store,
            config: Arc::new(config),
        }
    }
}

// =============================================================================
// CANVAS RECORD
// =============================================================================

/// A canvas as stored at `canvas/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasRecord {
    /// The record's key. Not part of the stored document.
    #[serde(skip)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_created_at", skip_serializing_if = "Option::is_none")]
    pub created_at: Option<CreatedAt>,
    /// Raw stored snapshot; see [`CanvasRecord::snapshot`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
}

impl CanvasRecord {
    /// Interpret the document stored under key `id`. `None` if it is not an
    /// object.
    #[must_use]
    pub fn from_stored(id: &str, value: Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        let mut record: Self = serde_json::from_value(value).ok()?;
        record.id = id.to_owned();
        Some(record)
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(UNTITLED_CANVAS)
    }

    /// The stored snapshot, or `None` when the record has none or only the
    /// legacy placeholder.
    #[must_use]
    pub fn snapshot(&self) -> Option<Snapshot> {
        self.json.clone().and_then(Snapshot::from_stored)
    }
}

fn lenient_created_at<'de, D>(deserializer: D) -> Result<Option<CreatedAt>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| serde_json::from_value::<CreatedAt>(value).ok()))
}

// =============================================================================
// TIMESTAMPS
// =============================================================================

/// Record creation time.
///
/// Read from epoch milliseconds (integer or fractional) or an RFC 3339
/// string; always written as integer epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawTimestamp", into = "i64")]
pub struct CreatedAt(OffsetDateTime);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    #[error("timestamp out of range: {0}")]
    OutOfRange(i128),
    #[error("invalid RFC 3339 timestamp {input:?}: {source}")]
    Parse {
        input: String,
        #[source]
        source: time::error::Parse,
    },
}

impl TryFrom<RawTimestamp> for CreatedAt {
    type Error = TimestampError;

    fn try_from(raw: RawTimestamp) -> Result<Self, Self::Error> {
        match raw {
            RawTimestamp::Millis(millis) => Self::from_millis(i128::from(millis)),
            #[allow(clippy::cast_possible_truncation)]
            RawTimestamp::Fractional(millis) => Self::from_millis(millis.trunc() as i128),
            RawTimestamp::Text(text) => OffsetDateTime::parse(&text, &Rfc3339)
                .map(Self)
                .map_err(|source| TimestampError::Parse { input: text, source }),
        }
    }
}

impl From<CreatedAt> for i64 {
    fn from(created: CreatedAt) -> Self {
        created.millis()
    }
}

impl CreatedAt {
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    fn from_millis(millis: i128) -> Result<Self, TimestampError> {
        let nanos = millis.checked_mul(1_000_000).ok_or(TimestampError::OutOfRange(millis))?;
        OffsetDateTime::from_unix_timestamp_nanos(nanos)
            .map(Self)
            .map_err(|_| TimestampError::OutOfRange(millis))
    }

    /// Epoch milliseconds.
    #[must_use]
    pub fn millis(self) -> i64 {
        i64::try_from(self.0.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }

    #[must_use]
    pub fn as_datetime(self) -> OffsetDateTime {
        self.0
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
