//! In-memory store with fault injection.

use super::{AssetStore, NotebookStore};
use crate::error::StoreError;
use async_trait::async_trait;
use quire_engine::RecordId;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A call received by [`MemoryStore`], in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    FetchAll { collection: String },
    Delete { collection: String, ids: Vec<RecordId> },
    Upsert { collection: String, id: String, columns: Vec<String> },
    ListObjects { bucket: String },
    RemoveObjects { bucket: String, names: Vec<String> },
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<String, Vec<Value>>,
    objects: BTreeMap<String, Vec<String>>,
    missing_columns: BTreeSet<String>,
    failing_upserts: BTreeSet<String>,
    fetch_error: Option<StoreError>,
    deny_deletes: bool,
    deny_upserts: bool,
    deny_assets: bool,
    journal: Vec<Call>,
}

/// Collections and buckets held in memory.
///
/// Upserts merge the given columns into an existing row with the same key,
/// like the hosted API's merge-duplicates resolution.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn with_rows(self, collection: &str, rows: Vec<Value>) -> Self {
        self.state()
            .collections
            .insert(collection.to_string(), rows);
        self
    }

    pub fn with_objects(self, bucket: &str, names: &[&str]) -> Self {
        self.state().objects.insert(
            bucket.to_string(),
            names.iter().map(|n| n.to_string()).collect(),
        );
        self
    }

    /// Reject writes that carry `column`, as a table without it would.
    pub fn without_column(self, column: &str) -> Self {
        self.state().missing_columns.insert(column.to_string());
        self
    }

    pub fn fail_fetch(self, error: StoreError) -> Self {
        self.state().fetch_error = Some(error);
        self
    }

    pub fn fail_upsert_for(self, id: &str) -> Self {
        self.state().failing_upserts.insert(id.to_string());
        self
    }

    pub fn deny_deletes(self) -> Self {
        self.state().deny_deletes = true;
        self
    }

    pub fn deny_upserts(self) -> Self {
        self.state().deny_upserts = true;
        self
    }

    pub fn deny_assets(self) -> Self {
        self.state().deny_assets = true;
        self
    }

    /// Current rows of a collection.
    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.state()
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row(&self, collection: &str, id: &str) -> Option<Value> {
        self.rows(collection)
            .into_iter()
            .find(|row| row_key(row, "id").as_deref() == Some(id))
    }

    pub fn objects(&self, bucket: &str) -> Vec<String> {
        self.state().objects.get(bucket).cloned().unwrap_or_default()
    }

    /// Every call received so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state().journal.clone()
    }
}

fn row_key(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn permission_denied(action: &str) -> StoreError {
    StoreError::PermissionDenied {
        message: format!("{action} rejected by access policy"),
    }
}

#[async_trait]
impl NotebookStore for MemoryStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let mut state = self.state();
        state.journal.push(Call::FetchAll {
            collection: collection.to_string(),
        });
        if let Some(err) = &state.fetch_error {
            return Err(err.clone());
        }
        Ok(state
            .collections
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_by_ids(
        &self,
        collection: &str,
        ids: &[RecordId],
    ) -> Result<usize, StoreError> {
        let mut state = self.state();
        state.journal.push(Call::Delete {
            collection: collection.to_string(),
            ids: ids.to_vec(),
        });
        if state.deny_deletes {
            return Err(permission_denied("delete"));
        }
        let rows = state.collections.entry(collection.to_string()).or_default();
        let before = rows.len();
        rows.retain(|row| {
            row_key(row, "id").map_or(true, |id| !ids.contains(&id))
        });
        Ok(before - rows.len())
    }

    async fn upsert(
        &self,
        collection: &str,
        row: &Value,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let Some(object) = row.as_object() else {
            return Err(StoreError::Decode("upsert row is not an object".into()));
        };
        let key = row_key(row, conflict_key).unwrap_or_default();
        state.journal.push(Call::Upsert {
            collection: collection.to_string(),
            id: key.clone(),
            columns: object.keys().cloned().collect(),
        });

        if state.deny_upserts {
            return Err(permission_denied("upsert"));
        }
        if let Some(column) = object
            .keys()
            .find(|column| state.missing_columns.contains(*column))
        {
            return Err(StoreError::UnknownColumn {
                column: Some(column.clone()),
                message: format!("Could not find the '{column}' column of '{collection}'"),
            });
        }
        if state.failing_upserts.contains(&key) {
            return Err(StoreError::Backend {
                code: Some("57014".into()),
                message: "canceling statement due to statement timeout".into(),
            });
        }

        let rows = state.collections.entry(collection.to_string()).or_default();
        let existing = rows
            .iter_mut()
            .find(|r| row_key(r, conflict_key).as_deref() == Some(key.as_str()));
        match existing.and_then(Value::as_object_mut) {
            Some(stored) => {
                for (column, value) in object {
                    stored.insert(column.clone(), value.clone());
                }
            }
            None => rows.push(row.clone()),
        }
        Ok(())
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let mut state = self.state();
        state.journal.push(Call::ListObjects {
            bucket: bucket.to_string(),
        });
        if state.deny_assets {
            return Err(permission_denied("list"));
        }
        Ok(state.objects.get(bucket).cloned().unwrap_or_default())
    }

    async fn remove_objects(&self, bucket: &str, names: &[String]) -> Result<(), StoreError> {
        let mut state = self.state();
        state.journal.push(Call::RemoveObjects {
            bucket: bucket.to_string(),
            names: names.to_vec(),
        });
        if state.deny_assets {
            return Err(permission_denied("remove"));
        }
        if let Some(objects) = state.objects.get_mut(bucket) {
            objects.retain(|name| !names.contains(name));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_merges_columns() {
        let store = MemoryStore::new().with_rows(
            "notebooks",
            vec![json!({"id": "n1", "title": "Keep", "ownerId": "old"})],
        );

        store
            .upsert("notebooks", &json!({"id": "n1", "ownerId": "new"}), "id")
            .await
            .unwrap();
        store
            .upsert("notebooks", &json!({"id": "n2", "title": "Fresh"}), "id")
            .await
            .unwrap();

        assert_eq!(
            store.row("notebooks", "n1"),
            Some(json!({"id": "n1", "title": "Keep", "ownerId": "new"}))
        );
        assert_eq!(store.rows("notebooks").len(), 2);
    }

    #[tokio::test]
    async fn missing_column_is_rejected() {
        let store = MemoryStore::new().without_column("ownerId");
        let err = store
            .upsert("notebooks", &json!({"id": "n1", "ownerId": "u"}), "id")
            .await
            .unwrap_err();
        assert!(err.is_unknown_column("ownerId"));
        assert!(store.rows("notebooks").is_empty());
    }

    #[tokio::test]
    async fn delete_counts_removed_rows() {
        let store = MemoryStore::new().with_rows(
            "notebooks",
            vec![json!({"id": "a"}), json!({"id": "b"}), json!({"id": 3})],
        );
        let removed = store
            .delete_by_ids(
                "notebooks",
                &["a".to_string(), "3".to_string(), "zzz".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.rows("notebooks"), vec![json!({"id": "b"})]);
    }
}
