//! # Quire Engine
//!
//! Owner and sharing reconciliation for Quire notebook records.
//!
//! Notebooks store their owner twice (a denormalized column and an entry in
//! the metadata mapping) and their sharing list twice (top level and inside
//! metadata). Write paths have drifted over time, so the copies disagree and
//! list entries come in two shapes. This crate decides, for a full snapshot,
//! which records are corrupt and how every other record is rewritten.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine never talks to the store; the caller fetches rows
//!   and applies the resulting plan
//! - **Deterministic**: the same snapshot always yields the same plan
//! - **Idempotent**: a second pass over the rewritten records changes nothing
//! - **Lossless**: keys the engine does not know are written back untouched
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`NotebookRecord`] is decoded from one fetched row with
//! [`NotebookRecord::from_row`] and encoded back with
//! [`NotebookRecord::to_row`]. Sharing list elements are a [`SharedEntry`]:
//! a plain email, an object holding an email, or something unusable.
//!
//! ### Owner resolution
//!
//! [`OwnerRefs`] reads the column owner and the metadata owner. When both are
//! present and differ the record is considered corrupt.
//!
//! ### Reconciliation
//!
//! The [`Reconciler`] turns a snapshot into a [`ReconcilePlan`]: ids to
//! delete and fully rewritten records to upsert.
//!
//! ## Quick Start
//!
//! ```rust
//! use quire_engine::{NotebookRecord, Reconciler};
//! use serde_json::json;
//!
//! let rows = vec![
//!     json!({"id": "n1", "ownerId": "u1", "metadata": {"ownerId": "u1"},
//!            "sharingSettings": {"sharedWith": ["a@x.com", {"email": "b@x.com"}]}}),
//!     json!({"id": "n2", "ownerId": "u1", "metadata": {"ownerId": "u2"}}),
//! ];
//!
//! let mut reconciler = Reconciler::new();
//! reconciler.load_records(rows.into_iter().map(|row| NotebookRecord::from_row(row).unwrap()));
//! let plan = reconciler.reconcile();
//!
//! assert_eq!(plan.to_delete, vec!["n2".to_string()]);
//! assert_eq!(
//!     plan.to_update[0].to_row().unwrap()["sharingSettings"]["sharedWith"],
//!     json!(["a@x.com", "b@x.com"])
//! );
//! ```

pub mod error;
pub mod owner;
pub mod reconcile;
pub mod record;
pub mod sharing;

// Re-export main types at crate root
pub use error::Error;
pub use owner::{column_owner, metadata_owner, OwnerRefs};
pub use reconcile::{classify, Normalized, OwnerConflict, ReconcilePlan, Reconciler, Verdict};
pub use record::{Metadata, NotebookRecord, OWNER_COLUMN};
pub use sharing::{normalize_shared_with, NormalizedList, SharedEntry, SharingSettings};

/// Type aliases for clarity
pub type RecordId = String;
pub type UserId = String;
