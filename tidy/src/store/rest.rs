//! Hosted REST backend: PostgREST tables plus the object storage API.

use super::{quoted_name, AssetStore, NotebookStore};
use crate::error::StoreError;
use async_trait::async_trait;
use quire_engine::RecordId;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Rows requested per page when reading a table or listing a bucket.
const PAGE_SIZE: usize = 1000;

/// Client for the hosted backend's REST surface.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
}

/// Error body returned by the table and storage APIs.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    limit: usize,
    offset: usize,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

#[derive(Debug, Serialize)]
struct RemoveRequest<'a> {
    prefixes: &'a [String],
}

impl RestStore {
    /// Create a client for `base_url`, authenticating with `api_key`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(status.as_u16(), &body))
    }
}

/// Map a failed response onto a [`StoreError`].
///
/// `PGRST204` (column missing from the schema cache) and SQLSTATE `42703`
/// are unknown-column errors; SQLSTATE `42501` and HTTP 401/403 are
/// permission errors.
pub fn classify_response(status: u16, body: &str) -> StoreError {
    let parsed = serde_json::from_str::<ErrorBody>(body).ok();
    let code = parsed.as_ref().and_then(|b| b.code.clone());
    let message = parsed
        .and_then(|b| b.message.or(b.error))
        .unwrap_or_else(|| {
            if body.is_empty() {
                format!("HTTP {status}")
            } else {
                body.to_string()
            }
        });

    match code.as_deref() {
        Some("PGRST204") | Some("42703") => StoreError::UnknownColumn {
            column: quoted_name(&message),
            message,
        },
        Some("42501") => StoreError::PermissionDenied { message },
        _ if status == 401 || status == 403 => StoreError::PermissionDenied { message },
        _ => StoreError::Backend {
            code: code.or_else(|| Some(status.to_string())),
            message,
        },
    }
}

/// PostgREST `in.(...)` filter value with every id quoted.
fn in_filter(ids: &[RecordId]) -> String {
    let quoted: Vec<String> = ids
        .iter()
        .map(|id| format!("\"{}\"", id.replace('\\', "\\\\").replace('"', "\\\"")))
        .collect();
    format!("in.({})", quoted.join(","))
}

#[async_trait]
impl NotebookStore for RestStore {
    async fn fetch_all(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        let mut rows = Vec::new();
        loop {
            let offset = rows.len().to_string();
            let limit = PAGE_SIZE.to_string();
            let request = self.client.get(self.table_url(collection)).query(&[
                ("select", "*"),
                ("order", "id.asc"),
                ("limit", limit.as_str()),
                ("offset", offset.as_str()),
            ]);
            let response = Self::check(self.authed(request).send().await?).await?;
            let page: Vec<Value> = response.json().await?;

            // The server may cap pages below PAGE_SIZE, so only an empty
            // page marks the end of the table.
            if page.is_empty() {
                return Ok(rows);
            }
            rows.extend(page);
        }
    }

    async fn delete_by_ids(
        &self,
        collection: &str,
        ids: &[RecordId],
    ) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let request = self
            .client
            .delete(self.table_url(collection))
            .query(&[("id", in_filter(ids))])
            .header("Prefer", "return=representation");
        let response = Self::check(self.authed(request).send().await?).await?;
        // Row-level security filters rows silently, so count what came back.
        let deleted: Vec<Value> = response.json().await?;
        Ok(deleted.len())
    }

    async fn upsert(
        &self,
        collection: &str,
        row: &Value,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        let request = self
            .client
            .post(self.table_url(collection))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(row);
        Self::check(self.authed(request).send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl AssetStore for RestStore {
    async fn list_objects(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        loop {
            let body = ListRequest {
                prefix: "",
                limit: PAGE_SIZE,
                offset: names.len(),
            };
            let request = self
                .client
                .post(self.storage_url(&format!("object/list/{bucket}")))
                .json(&body);
            let response = Self::check(self.authed(request).send().await?).await?;
            let page: Vec<ListedObject> = response.json().await?;

            if page.is_empty() {
                return Ok(names);
            }
            names.extend(page.into_iter().map(|object| object.name));
        }
    }

    async fn remove_objects(&self, bucket: &str, names: &[String]) -> Result<(), StoreError> {
        if names.is_empty() {
            return Ok(());
        }
        let request = self
            .client
            .delete(self.storage_url(&format!("object/{bucket}")))
            .json(&RemoveRequest { prefixes: names });
        Self::check(self.authed(request).send().await?).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_schema_cache_miss() {
        let body = r#"{"code":"PGRST204","details":null,"hint":null,
            "message":"Could not find the 'ownerId' column of 'notebooks' in the schema cache"}"#;
        let err = classify_response(400, body);
        assert!(err.is_unknown_column("ownerId"));
    }

    #[test]
    fn classify_undefined_column() {
        let body = r#"{"code":"42703","message":"column \"ownerId\" of relation \"notebooks\" does not exist"}"#;
        assert!(classify_response(400, body).is_unknown_column("ownerId"));
    }

    #[test]
    fn classify_permission() {
        let body = r#"{"code":"42501","message":"new row violates row-level security policy for table \"notebooks\""}"#;
        assert!(classify_response(403, body).is_permission_denied());

        let body = r#"{"statusCode":"403","error":"Unauthorized","message":"invalid signature"}"#;
        assert_eq!(
            classify_response(403, body),
            StoreError::PermissionDenied {
                message: "invalid signature".into()
            }
        );

        assert!(classify_response(401, "").is_permission_denied());
    }

    #[test]
    fn classify_other_errors() {
        let body = r#"{"code":"23505","message":"duplicate key value violates unique constraint"}"#;
        assert_eq!(
            classify_response(409, body),
            StoreError::Backend {
                code: Some("23505".into()),
                message: "duplicate key value violates unique constraint".into()
            }
        );

        assert_eq!(
            classify_response(502, "Bad Gateway"),
            StoreError::Backend {
                code: Some("502".into()),
                message: "Bad Gateway".into()
            }
        );

        assert_eq!(
            classify_response(500, ""),
            StoreError::Backend {
                code: Some("500".into()),
                message: "HTTP 500".into()
            }
        );
    }

    #[test]
    fn in_filter_quotes_ids() {
        let ids = vec!["n1".to_string(), "we\"ird,id".to_string()];
        assert_eq!(in_filter(&ids), r#"in.("n1","we\"ird,id")"#);
    }

    #[test]
    fn base_url_trailing_slash() {
        let store = RestStore::new("https://example.test/", "key", Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.table_url("notebooks"),
            "https://example.test/rest/v1/notebooks"
        );
        assert_eq!(
            store.storage_url("object/list/assets"),
            "https://example.test/storage/v1/object/list/assets"
        );
    }
}
