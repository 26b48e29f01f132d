//! Notebook record model.
//!
//! Rows come from a remote collection whose schema the engine does not own,
//! so every struct here keeps the keys it does not know about in an `extra`
//! map and writes them back untouched.

use crate::{error::Result, sharing::SharingSettings, Error, RecordId, UserId};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Name of the denormalized owner column on the notebook table.
pub const OWNER_COLUMN: &str = "ownerId";

/// Open metadata mapping attached to every notebook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// Authoritative owner reference
    #[serde(
        rename = "ownerId",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_key"
    )]
    pub owner_id: Option<UserId>,
    /// Legacy spelling of the owner reference
    #[serde(
        rename = "owner_id",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_key"
    )]
    pub owner_id_snake: Option<UserId>,
    /// Copy of the sharing settings kept inside metadata
    #[serde(
        rename = "sharingSettings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sharing_settings: Option<SharingSettings>,
    /// Everything else, passed through as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A notebook row as stored in the remote collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotebookRecord {
    /// Stable identifier, used as the upsert conflict key
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RecordId,
    /// Denormalized owner column
    #[serde(
        rename = "ownerId",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_key"
    )]
    pub owner_id: Option<UserId>,
    /// Legacy snake_case owner column
    #[serde(
        rename = "owner_id",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_key"
    )]
    pub owner_id_snake: Option<UserId>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: Metadata,
    #[serde(
        rename = "sharingSettings",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sharing_settings: Option<SharingSettings>,
    /// Columns the engine does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NotebookRecord {
    /// Decode one fetched row.
    pub fn from_row(row: Value) -> Result<Self> {
        let Some(object) = row.as_object() else {
            return Err(Error::invalid("row is not an object"));
        };
        match object.get("id") {
            Some(Value::String(_)) | Some(Value::Number(_)) => {}
            _ => return Err(Error::MissingId),
        }
        serde_json::from_value(row).map_err(|e| Error::invalid(e.to_string()))
    }

    /// Encode the record as an upsert payload.
    pub fn to_row(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::invalid(e.to_string()))
    }
}

/// Accepts a string or a number; `null` and absence both mean "no value".
fn deserialize_key<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!(
            "expected a string or number, got {other}"
        ))),
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> std::result::Result<RecordId, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_key(deserializer)?.ok_or_else(|| D::Error::custom("id is null"))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
