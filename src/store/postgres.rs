//! PostgreSQL store: one JSONB row per `(collection, key)`.
//!
//! DESIGN
//! ======
//! A path `collection/key/rest...` addresses the row `(collection, key)` and
//! the field `rest` inside its `value`. Reads of deeper paths use the `#>`
//! operator. Writes of deeper paths lock the row (`SELECT ... FOR UPDATE`),
//! patch the document in memory and write it back in the same transaction.
//! A one-segment path addresses the whole collection as an object keyed by
//! row key.
//!
//! Change notification is in-process only: this store announces its own
//! writes. Several server processes sharing one database do not see each
//! other's writes live.

#[cfg(test)]
#[path = "postgres_test.rs"]
mod postgres_test;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::PgPool;
use tokio::sync::broadcast;
use tracing::debug;

use super::memory::tree_set;
use super::{CHANGE_CHANNEL_CAPACITY, RemoteStore, StoreError, StorePath, ensure_no_nulls};

pub struct PgStore {
    pool: PgPool,
    changes: broadcast::Sender<StorePath>,
}

/// A store path split into its row address and the field path inside the row.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum DocPath<'a> {
    Collection(&'a str),
    Row { collection: &'a str, key: &'a str },
    Field { collection: &'a str, key: &'a str, field: &'a [String] },
}

impl<'a> DocPath<'a> {
    pub(crate) fn of(path: &'a StorePath) -> Self {
        match path.segments() {
            [collection] => Self::Collection(collection),
            [collection, key] => Self::Row { collection, key },
            [collection, key, field @ ..] => Self::Field { collection, key, field },
            // StorePath is never empty.
            [] => Self::Collection(""),
        }
    }
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self { pool, changes }
    }

    async fn set_collection(&self, collection: &str, value: Value) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM store_documents WHERE collection = $1")
            .bind(collection)
            .execute(&mut *tx)
            .await?;

        match value {
            Value::Null => {}
            Value::Object(rows) => {
                for (key, doc) in rows {
                    upsert_row(&mut tx, collection, &key, doc).await?;
                }
            }
            other => {
                return Err(StoreError::Malformed {
                    path: collection.to_owned(),
                    message: format!("collection must be an object, got {other}"),
                });
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn set_row(&self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        if value.is_null() {
            sqlx::query("DELETE FROM store_documents WHERE collection = $1 AND key = $2")
                .bind(collection)
                .bind(key)
                .execute(&self.pool)
                .await?;
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        upsert_row(&mut tx, collection, key, value).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_field(&self, collection: &str, key: &str, field: &[String], value: Value) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        let current: Option<(Value,)> =
            sqlx::query_as("SELECT value FROM store_documents WHERE collection = $1 AND key = $2 FOR UPDATE")
                .bind(collection)
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

        let mut doc = current.map_or_else(|| Value::Object(Map::new()), |(doc,)| doc);
        tree_set(&mut doc, field, value);

        if doc.as_object().is_some_and(Map::is_empty) {
            sqlx::query("DELETE FROM store_documents WHERE collection = $1 AND key = $2")
                .bind(collection)
                .bind(key)
                .execute(&mut *tx)
                .await?;
        } else {
            upsert_row(&mut tx, collection, key, doc).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

async fn upsert_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    collection: &str,
    key: &str,
    value: Value,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO store_documents (collection, key, value, updated_at) VALUES ($1, $2, $3, now()) \
         ON CONFLICT (collection, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
    )
    .bind(collection)
    .bind(key)
    .bind(value)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl RemoteStore for PgStore {
    async fn set(&self, path: &StorePath, value: Value) -> Result<(), StoreError> {
        if !value.is_null() {
            ensure_no_nulls(path, &value)?;
        }
        match DocPath::of(path) {
            DocPath::Collection(collection) => self.set_collection(collection, value).await?,
            DocPath::Row { collection, key } => self.set_row(collection, key, value).await?,
            DocPath::Field { collection, key, field } => self.set_field(collection, key, field, value).await?,
        }
        debug!(%path, "store write");
        // No receivers just means nobody is watching.
        let _ = self.changes.send(path.clone());
        Ok(())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>, StoreError> {
        match DocPath::of(path) {
            DocPath::Collection(collection) => {
                let rows: Vec<(String, Value)> =
                    sqlx::query_as("SELECT key, value FROM store_documents WHERE collection = $1 ORDER BY key")
                        .bind(collection)
                        .fetch_all(&self.pool)
                        .await?;
                if rows.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Value::Object(rows.into_iter().collect())))
            }
            DocPath::Row { collection, key } => {
                let row: Option<(Value,)> =
                    sqlx::query_as("SELECT value FROM store_documents WHERE collection = $1 AND key = $2")
                        .bind(collection)
                        .bind(key)
                        .fetch_optional(&self.pool)
                        .await?;
                Ok(row.map(|(value,)| value))
            }
            DocPath::Field { collection, key, field } => {
                let row: Option<(Option<Value>,)> = sqlx::query_as(
                    "SELECT value #> $3::text[] FROM store_documents WHERE collection = $1 AND key = $2",
                )
                .bind(collection)
                .bind(key)
                .bind(field.to_vec())
                .fetch_optional(&self.pool)
                .await?;
                Ok(row.and_then(|(value,)| value).filter(|v| !v.is_null()))
            }
        }
    }

    fn changes(&self) -> broadcast::Receiver<StorePath> {
        self.changes.subscribe()
    }
}
