//! The cleanup pass: fetch, reconcile, delete, upsert, purge assets.
//!
//! Every network call is awaited before the next one starts. Only the
//! initial fetch can end the run; every later failure is logged, recorded
//! in the [`RunReport`] and the pass moves on.

use crate::error::{Result, StoreError, TidyError};
use crate::report::{Failure, FailureKind, Phase, RunReport};
use crate::store::{AssetStore, NotebookStore};
use quire_engine::{NotebookRecord, ReconcilePlan, Reconciler, OWNER_COLUMN};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Conflict key for every upsert.
const CONFLICT_KEY: &str = "id";

const ELEVATED_HINT: &str = "rerun with an elevated (service role) key";

/// Options for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub collection: String,
    pub dry_run: bool,
    pub skip_unchanged: bool,
    pub purge_assets: bool,
    pub bucket: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            collection: "notebooks".to_string(),
            dry_run: false,
            skip_unchanged: false,
            purge_assets: false,
            bucket: "notebooks".to_string(),
        }
    }
}

/// How an upsert went through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteOutcome {
    Written,
    WithoutOwnerColumn,
}

/// Runs one reconciliation pass against a store.
///
/// The runner takes no locks. It assumes nothing else writes to the
/// collection while it runs; a concurrent writer can reintroduce drift or
/// have its changes overwritten by the upserts.
pub struct Runner<'a> {
    store: &'a dyn NotebookStore,
    assets: Option<&'a dyn AssetStore>,
    options: RunOptions,
}

impl<'a> Runner<'a> {
    pub fn new(store: &'a dyn NotebookStore, options: RunOptions) -> Self {
        Self {
            store,
            assets: None,
            options,
        }
    }

    /// Attach the object store used when `purge_assets` is set.
    pub fn with_assets(mut self, assets: &'a dyn AssetStore) -> Self {
        self.assets = Some(assets);
        self
    }

    /// Execute the pass.
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "tidy",
            %run_id,
            collection = %self.options.collection,
            dry_run = self.options.dry_run,
        );
        self.run_inner(run_id).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid) -> Result<RunReport> {
        let collection = self.options.collection.as_str();
        let mut report = RunReport::new(run_id, collection, self.options.dry_run);

        let rows = match self.store.fetch_all(collection).await {
            Ok(rows) => rows,
            Err(source) => {
                error!(error = %source, "Failed to fetch notebooks, aborting");
                if source.is_permission_denied() {
                    error!("{}", ELEVATED_HINT);
                }
                return Err(TidyError::Fetch {
                    collection: collection.to_string(),
                    source,
                });
            }
        };
        report.fetched = rows.len();
        info!(rows = rows.len(), "Fetched notebooks");

        let records = decode_rows(rows, &mut report);
        let mut reconciler = Reconciler::new();
        reconciler.load_records(records);
        let plan = reconciler.reconcile();
        self.log_plan(&plan, &mut report);

        if self.options.dry_run {
            info!(
                deletes = plan.to_delete.len(),
                updates = plan.to_update.len(),
                "Dry run, nothing written"
            );
            report.finish();
            return Ok(report);
        }

        self.delete_phase(&plan, &mut report).await;
        self.update_phase(&plan, &mut report).await;

        if self.options.purge_assets {
            self.purge_assets(&mut report).await;
        }

        report.finish();
        info!(
            deleted = report.deleted,
            updated = report.updated,
            failures = report.failures.len(),
            "Cleanup finished"
        );
        Ok(report)
    }

    fn log_plan(&self, plan: &ReconcilePlan, report: &mut RunReport) {
        for conflict in &plan.conflicts {
            info!(
                record_id = %conflict.record_id,
                column_owner = %conflict.column_owner,
                metadata_owner = %conflict.metadata_owner,
                "Owner mismatch, scheduling delete"
            );
        }
        for id in &plan.ownerless {
            warn!(record_id = %id, "Notebook has no owner reference, normalizing sharing only");
        }
        if plan.dropped_entries > 0 {
            warn!(
                entries = plan.dropped_entries,
                "Dropped sharedWith entries without an email"
            );
        }

        report.planned_deletes = plan.to_delete.len();
        report.planned_updates = plan.to_update.len();
        report.ownerless = plan.ownerless.clone();
        report.dropped_entries = plan.dropped_entries;

        info!(
            deletes = plan.to_delete.len(),
            updates = plan.to_update.len(),
            unchanged = plan.unchanged.len(),
            "Reconciliation planned"
        );
        if plan.is_noop() {
            info!("Collection already consistent");
        }
    }

    async fn delete_phase(&self, plan: &ReconcilePlan, report: &mut RunReport) {
        if plan.to_delete.is_empty() {
            debug!("No notebooks to delete");
            return;
        }

        match self
            .store
            .delete_by_ids(&self.options.collection, &plan.to_delete)
            .await
        {
            Ok(deleted) => {
                report.deleted = deleted;
                if deleted < plan.to_delete.len() {
                    warn!(
                        requested = plan.to_delete.len(),
                        deleted,
                        "Fewer notebooks deleted than requested; row access policies may be hiding them, {}",
                        ELEVATED_HINT
                    );
                } else {
                    info!(deleted, "Deleted notebooks with conflicting owners");
                }
            }
            Err(err) => {
                if err.is_permission_denied() {
                    error!(error = %err, "Delete rejected by access policy, {}", ELEVATED_HINT);
                } else {
                    error!(error = %err, "Failed to delete notebooks");
                }
                report
                    .failures
                    .push(Failure::from_store(Phase::Delete, None, &err));
            }
        }
    }

    async fn update_phase(&self, plan: &ReconcilePlan, report: &mut RunReport) {
        let unchanged: HashSet<&str> = plan.unchanged.iter().map(String::as_str).collect();

        for record in &plan.to_update {
            if self.options.skip_unchanged && unchanged.contains(record.id.as_str()) {
                report.skipped_unchanged += 1;
                continue;
            }

            let row = match record.to_row() {
                Ok(row) => row,
                Err(err) => {
                    error!(record_id = %record.id, error = %err, "Failed to encode notebook");
                    report.failures.push(Failure {
                        phase: Phase::Update,
                        record_id: Some(record.id.clone()),
                        kind: FailureKind::Malformed,
                        message: err.to_string(),
                    });
                    continue;
                }
            };

            match self.upsert_with_fallback(record, row).await {
                Ok(outcome) => {
                    report.updated += 1;
                    if outcome == WriteOutcome::WithoutOwnerColumn {
                        report.updated_without_owner_column += 1;
                    }
                    debug!(record_id = %record.id, "Notebook normalized");
                }
                Err(err) => {
                    if err.is_permission_denied() {
                        error!(record_id = %record.id, error = %err, "Update rejected by access policy, {}", ELEVATED_HINT);
                    } else {
                        error!(record_id = %record.id, error = %err, "Failed to update notebook");
                    }
                    report.failures.push(Failure::from_store(
                        Phase::Update,
                        Some(record.id.as_str()),
                        &err,
                    ));
                }
            }
        }
    }

    /// Upsert `row`; when the table has no owner column, retry once without it.
    async fn upsert_with_fallback(
        &self,
        record: &NotebookRecord,
        row: Value,
    ) -> std::result::Result<WriteOutcome, StoreError> {
        let collection = self.options.collection.as_str();
        match self.store.upsert(collection, &row, CONFLICT_KEY).await {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(err) if err.is_unknown_column(OWNER_COLUMN) => {
                warn!(
                    record_id = %record.id,
                    "Table has no {} column, retrying without it",
                    OWNER_COLUMN
                );
                let mut row = row;
                if let Some(object) = row.as_object_mut() {
                    object.remove(OWNER_COLUMN);
                }
                self.store.upsert(collection, &row, CONFLICT_KEY).await?;
                Ok(WriteOutcome::WithoutOwnerColumn)
            }
            Err(err) => Err(err),
        }
    }

    async fn purge_assets(&self, report: &mut RunReport) {
        let Some(assets) = self.assets else {
            warn!("Asset purge requested but no object store is configured");
            return;
        };
        let bucket = self.options.bucket.as_str();

        let names = match assets.list_objects(bucket).await {
            Ok(names) => names,
            Err(err) => {
                error!(bucket, error = %err, "Failed to list assets");
                report
                    .failures
                    .push(Failure::from_store(Phase::Assets, None, &err));
                return;
            }
        };
        if names.is_empty() {
            info!(bucket, "No assets to remove");
            return;
        }

        match assets.remove_objects(bucket, &names).await {
            Ok(()) => {
                report.assets_removed = names.len();
                info!(bucket, removed = names.len(), "Removed assets");
            }
            Err(err) => {
                error!(bucket, error = %err, "Failed to remove assets");
                report
                    .failures
                    .push(Failure::from_store(Phase::Assets, None, &err));
            }
        }
    }
}

fn row_id(row: &Value) -> Option<String> {
    match row.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Decode fetched rows, recording the ones that cannot be used.
fn decode_rows(rows: Vec<Value>, report: &mut RunReport) -> Vec<NotebookRecord> {
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let id = row_id(&row);
        match NotebookRecord::from_row(row) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(record_id = ?id, error = %err, "Skipping undecodable notebook row");
                report.undecodable += 1;
                report.failures.push(Failure {
                    phase: Phase::Decode,
                    record_id: id,
                    kind: FailureKind::Malformed,
                    message: err.to_string(),
                });
            }
        }
    }
    records
}
