//! Owner resolution.
//!
//! A notebook names its owner in up to four places: `ownerId` and
//! `owner_id`, both at the top level and inside metadata. The camelCase key
//! wins within a level, and the metadata level is authoritative.

use crate::{Metadata, NotebookRecord};

/// Owner recorded inside metadata: `ownerId`, else `owner_id`.
pub fn metadata_owner(metadata: &Metadata) -> Option<&str> {
    metadata
        .owner_id
        .as_deref()
        .or(metadata.owner_id_snake.as_deref())
}

/// Owner recorded in the top-level columns: `ownerId`, else `owner_id`.
pub fn column_owner(record: &NotebookRecord) -> Option<&str> {
    record
        .owner_id
        .as_deref()
        .or(record.owner_id_snake.as_deref())
}

/// Both owner references of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerRefs<'a> {
    pub column: Option<&'a str>,
    pub metadata: Option<&'a str>,
}

impl<'a> OwnerRefs<'a> {
    pub fn of(record: &'a NotebookRecord) -> Self {
        Self {
            column: column_owner(record),
            metadata: metadata_owner(&record.metadata),
        }
    }

    /// Both references are present and disagree.
    pub fn conflict(&self) -> bool {
        matches!((self.column, self.metadata), (Some(column), Some(meta)) if column != meta)
    }

    /// The owner a normalized record should carry.
    pub fn resolved(&self) -> Option<&'a str> {
        self.metadata.or(self.column)
    }
}
