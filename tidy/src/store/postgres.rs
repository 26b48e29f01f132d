//! Direct Postgres backend for the notebook table.

use super::{quoted_name, NotebookStore};
use crate::error::StoreError;
use async_trait::async_trait;
use quire_engine::RecordId;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Notebook table accessed over a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        // The job awaits one statement at a time.
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(classify_sqlx)?;
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Quote an identifier, keeping `schema.table` qualification.
fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Build the upsert statement for a row carrying `columns`.
///
/// The row is bound once as `$1` and expanded with `jsonb_populate_record`,
/// so column types come from the table itself. A column the table lacks
/// fails with SQLSTATE `42703`.
pub fn upsert_statement(table: &str, columns: &[&str], conflict_key: &str) -> String {
    let table = quote_ident(table);
    let column_list = columns
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ");

    let assignments: Vec<String> = columns
        .iter()
        .filter(|c| **c != conflict_key)
        .map(|c| format!("{0} = EXCLUDED.{0}", quote_ident(c)))
        .collect();
    let on_conflict = if assignments.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", assignments.join(", "))
    };

    format!(
        "INSERT INTO {table} ({column_list}) \
         SELECT {column_list} FROM jsonb_populate_record(NULL::{table}, $1) \
         ON CONFLICT ({key}) {on_conflict}",
        key = quote_ident(conflict_key),
    )
}

/// Map a Postgres error code onto a [`StoreError`].
pub fn classify_pg(code: Option<&str>, message: &str) -> StoreError {
    let message = message.to_string();
    match code {
        Some("42703") => StoreError::UnknownColumn {
            column: quoted_name(&message),
            message,
        },
        Some("42501") => StoreError::PermissionDenied { message },
        other => StoreError::Backend {
            code: other.map(str::to_string),
            message,
        },
    }
}

fn classify_sqlx(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db) => classify_pg(db.code().as_deref(), db.message()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Decode(err.to_string())
        }
        other => StoreError::Transport(other.to_string()),
    }
}

#[async_trait]
impl NotebookStore for PgStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let sql = format!("SELECT to_jsonb(t) FROM {} t", quote_ident(collection));
        sqlx::query_scalar::<_, Value>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(classify_sqlx)
    }

    async fn delete_by_ids(
        &self,
        collection: &str,
        ids: &[RecordId],
    ) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!(
            "DELETE FROM {} WHERE id::text = ANY($1)",
            quote_ident(collection)
        );
        let result = sqlx::query(&sql)
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;
        Ok(result.rows_affected() as usize)
    }

    async fn upsert(
        &self,
        collection: &str,
        row: &Value,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        let Some(object) = row.as_object() else {
            return Err(StoreError::Decode("upsert row is not an object".into()));
        };
        let columns: Vec<&str> = object.keys().map(String::as_str).collect();
        let sql = upsert_statement(collection, &columns, conflict_key);

        sqlx::query(&sql)
            .bind(sqlx::types::Json(row))
            .execute(&self.pool)
            .await
            .map_err(classify_sqlx)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_identifiers() {
        assert_eq!(quote_ident("ownerId"), "\"ownerId\"");
        assert_eq!(quote_ident("public.notebooks"), "\"public\".\"notebooks\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn upsert_statement_updates_all_but_key() {
        let sql = upsert_statement("notebooks", &["id", "metadata", "ownerId"], "id");
        assert_eq!(
            sql,
            "INSERT INTO \"notebooks\" (\"id\", \"metadata\", \"ownerId\") \
             SELECT \"id\", \"metadata\", \"ownerId\" FROM jsonb_populate_record(NULL::\"notebooks\", $1) \
             ON CONFLICT (\"id\") DO UPDATE SET \"metadata\" = EXCLUDED.\"metadata\", \"ownerId\" = EXCLUDED.\"ownerId\""
        );
    }

    #[test]
    fn upsert_statement_with_key_only() {
        let sql = upsert_statement("notebooks", &["id"], "id");
        assert!(sql.ends_with("ON CONFLICT (\"id\") DO NOTHING"));
    }

    #[test]
    fn classify_codes() {
        let err = classify_pg(
            Some("42703"),
            "column \"ownerId\" of relation \"notebooks\" does not exist",
        );
        assert!(err.is_unknown_column("ownerId"));

        assert!(classify_pg(Some("42501"), "permission denied for table notebooks")
            .is_permission_denied());

        assert_eq!(
            classify_pg(None, "server closed the connection"),
            StoreError::Backend {
                code: None,
                message: "server closed the connection".into()
            }
        );
    }

    #[test]
    fn pool_errors_are_transport() {
        assert!(matches!(
            classify_sqlx(sqlx::Error::PoolTimedOut),
            StoreError::Transport(_)
        ));
    }
}
