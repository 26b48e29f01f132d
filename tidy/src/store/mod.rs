//! Remote store access.
//!
//! The job only needs a handful of calls against the notebook table and the
//! asset bucket. Each backend maps its own failure codes onto [`StoreError`].

mod memory;
mod postgres;
mod rest;

pub use memory::{Call, MemoryStore};
pub use postgres::{classify_pg, upsert_statement, PgStore};
pub use rest::{classify_response, RestStore};

use crate::error::StoreError;
use async_trait::async_trait;
use quire_engine::RecordId;
use serde_json::Value;

/// Table operations the cleanup job relies on.
#[async_trait]
pub trait NotebookStore: Send + Sync {
    /// Every row of the collection.
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    /// Delete the given ids in one call, returning how many rows went away.
    async fn delete_by_ids(&self, collection: &str, ids: &[RecordId])
        -> Result<usize, StoreError>;

    /// Insert the row, or replace the columns it carries when `conflict_key`
    /// matches an existing row.
    async fn upsert(&self, collection: &str, row: &Value, conflict_key: &str)
        -> Result<(), StoreError>;
}

/// Object storage holding notebook assets.
#[async_trait]
pub trait AssetStore: Send + Sync {
    /// Names of every object in the bucket.
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError>;

    /// Remove the named objects in one call.
    async fn remove_objects(&self, bucket: &str, names: &[String]) -> Result<(), StoreError>;
}

/// First identifier quoted with `'` or `"` in a backend error message.
///
/// Both `Could not find the 'ownerId' column` and
/// `column "ownerId" of relation "notebooks" does not exist` yield `ownerId`.
pub(crate) fn quoted_name(message: &str) -> Option<String> {
    let start = message.find(['\'', '"'])?;
    let quote = message[start..].chars().next()?;
    let rest = &message[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string()).filter(|name| !name.is_empty())
}
