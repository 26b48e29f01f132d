//! Run report.

use crate::error::StoreError;
use chrono::{DateTime, Utc};
use quire_engine::RecordId;
use serde::Serialize;
use uuid::Uuid;

/// Phase a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Decode,
    Delete,
    Update,
    Assets,
}

/// Coarse failure class, for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    Permission,
    Schema,
    Backend,
    Transport,
    Malformed,
}

impl From<&StoreError> for FailureKind {
    fn from(err: &StoreError) -> Self {
        match err {
            StoreError::PermissionDenied { .. } => FailureKind::Permission,
            StoreError::UnknownColumn { .. } => FailureKind::Schema,
            StoreError::Backend { .. } => FailureKind::Backend,
            StoreError::Transport(_) => FailureKind::Transport,
            StoreError::Decode(_) => FailureKind::Malformed,
        }
    }
}

/// One failed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub phase: Phase,
    /// `None` for batch calls
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn from_store(phase: Phase, record_id: Option<&str>, err: &StoreError) -> Self {
        Self {
            phase,
            record_id: record_id.map(str::to_string),
            kind: err.into(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub collection: String,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Rows returned by the fetch
    pub fetched: usize,
    /// Rows that could not be decoded and were left alone
    pub undecodable: usize,
    pub planned_deletes: usize,
    pub deleted: usize,
    pub planned_updates: usize,
    pub updated: usize,
    /// Updates written after dropping the owner column
    pub updated_without_owner_column: usize,
    pub skipped_unchanged: usize,
    pub ownerless: Vec<RecordId>,
    pub dropped_entries: usize,
    pub assets_removed: usize,
    pub failures: Vec<Failure>,
}

impl RunReport {
    pub fn new(run_id: Uuid, collection: impl Into<String>, dry_run: bool) -> Self {
        Self {
            run_id,
            collection: collection.into(),
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            fetched: 0,
            undecodable: 0,
            planned_deletes: 0,
            deleted: 0,
            planned_updates: 0,
            updated: 0,
            updated_without_owner_column: 0,
            skipped_unchanged: 0,
            ownerless: Vec::new(),
            dropped_entries: 0,
            assets_removed: 0,
            failures: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// No step failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures_in(&self, phase: Phase) -> impl Iterator<Item = &Failure> {
        self.failures.iter().filter(move |f| f.phase == phase)
    }
}
