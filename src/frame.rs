//! Frame: the JSON message exchanged on session and feed websockets.
//!
//! ARCHITECTURE
//! ============
//! A client drives its editing session with request frames (`shape:rect`,
//! `tool:pen`, `canvas:save`, ...). The socket loop routes on the syscall
//! prefix and answers each request with exactly one reply, `done` or `error`,
//! whose `parent_id` is the request id. The server also pushes frames nobody
//! asked for (`session:ready`, `save:error`, `canvas:record`, `canvas:list`);
//! those have no parent.
//!
//! DESIGN
//! ======
//! - `data` is a flat map. Handlers read the keys they need and ignore the rest.
//! - Only `syscall` is required on input, so `{"syscall":"shape:rect"}` is a
//!   complete request.
//! - Errors carry `code`, `message` and `retryable` so clients can branch on
//!   the code without parsing text.

#[cfg(test)]
#[path = "frame_test.rs"]
mod frame_test;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// Well-known keys of error payloads.
pub mod keys {
    pub const CODE: &str = "code";
    pub const MESSAGE: &str = "message";
    pub const RETRYABLE: &str = "retryable";
}

/// Frame payload.
pub type Data = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Client request or server notification.
    #[default]
    Request,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch.
    #[serde(default = "now_ms")]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canvas_id: Option<String>,
    pub syscall: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

/// Grepable error code and retryable flag for error frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Error payload for `err`.
#[must_use]
pub fn error_data(err: &(impl ErrorCode + ?Sized)) -> Data {
    Data::from([
        (keys::CODE.to_owned(), Value::from(err.error_code())),
        (keys::MESSAGE.to_owned(), Value::from(err.to_string())),
        (keys::RETRYABLE.to_owned(), Value::from(err.retryable())),
    ])
}

fn now_ms() -> i64 {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    i64::try_from(millis).unwrap_or(i64::MAX)
}

// =============================================================================
// SERVER NOTIFICATIONS
// =============================================================================

impl Frame {
    /// A frame the server sends on its own initiative.
    pub fn notify(syscall: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: now_ms(),
            canvas_id: None,
            syscall: syscall.into(),
            status: Status::Request,
            data: Data::new(),
        }
    }

    /// A notification reporting `err`, with status `error`.
    pub fn failure(syscall: impl Into<String>, err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { status: Status::Error, data: error_data(err), ..Self::notify(syscall) }
    }
}

// =============================================================================
// REPLIES
// =============================================================================

impl Frame {
    #[must_use]
    pub fn done(&self) -> Self {
        self.answer(Status::Done, Data::new())
    }

    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.answer(Status::Done, data)
    }

    /// Error reply with a message and no code, for malformed requests.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        self.answer(Status::Error, Data::from([(keys::MESSAGE.to_owned(), Value::from(message.into()))]))
    }

    /// Error reply carrying a typed error.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        self.answer(Status::Error, error_data(err))
    }

    /// Replies keep the request's syscall and canvas so clients can match
    /// them without tracking ids.
    fn answer(&self, status: Status, data: Data) -> Self {
        Self {
            parent_id: Some(self.id),
            canvas_id: self.canvas_id.clone(),
            status,
            data,
            ..Self::notify(self.syscall.as_str())
        }
    }

    #[must_use]
    pub fn with_canvas_id(mut self, canvas_id: impl Into<String>) -> Self {
        self.canvas_id = Some(canvas_id.into());
        self
    }

    /// Rename the frame, e.g. to answer `canvas:save` with `save:ok`.
    #[must_use]
    pub fn with_syscall(mut self, syscall: impl Into<String>) -> Self {
        self.syscall = syscall.into();
        self
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// `shape:rect` → `("shape", "rect")`. A syscall without ':' is all prefix.
    #[must_use]
    pub fn route(&self) -> (&str, &str) {
        self.syscall.split_once(':').unwrap_or((self.syscall.as_str(), ""))
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        self.route().0
    }

    #[must_use]
    pub fn op(&self) -> &str {
        self.route().1
    }

    #[must_use]
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Non-negative integer field that fits in a `u32`.
    #[must_use]
    pub fn data_u32(&self, key: &str) -> Option<u32> {
        self.data.get(key).and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
    }
}
