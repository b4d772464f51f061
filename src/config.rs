//! Process configuration, read once from the environment at startup.
//!
//! Every knob has a default so the server starts with no environment at all:
//! without `DATABASE_URL` the store is kept in memory.

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;

use crate::services::viewport::ViewportSize;

pub(crate) const DEFAULT_PORT: u16 = 3000;
pub(crate) const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub(crate) const DEFAULT_AUTOSAVE_QUEUE_CAPACITY: usize = 64;
pub(crate) const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub(crate) const DEFAULT_VIEWPORT_HEIGHT: u32 = 800;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// PostgreSQL URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// Bounded queue length of each session's auto-save worker.
    pub autosave_queue_capacity: usize,
    /// Viewport assumed for sessions whose client does not report one.
    pub default_viewport: ViewportSize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            db_max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            autosave_queue_capacity: DEFAULT_AUTOSAVE_QUEUE_CAPACITY,
            default_viewport: ViewportSize::new(DEFAULT_VIEWPORT_WIDTH, DEFAULT_VIEWPORT_HEIGHT),
        }
    }
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS),
            autosave_queue_capacity: env_parse("AUTOSAVE_QUEUE_CAPACITY", DEFAULT_AUTOSAVE_QUEUE_CAPACITY).max(1),
            default_viewport: ViewportSize::new(
                env_parse("VIEWPORT_WIDTH", DEFAULT_VIEWPORT_WIDTH),
                env_parse("VIEWPORT_HEIGHT", DEFAULT_VIEWPORT_HEIGHT),
            ),
        }
    }
}

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
