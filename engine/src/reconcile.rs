//! Reconciliation of owner and sharing fields across a notebook snapshot.
//!
//! Given every notebook currently stored, this module decides which rows are
//! corrupt and must be deleted, and how every other row is rewritten.
//!
//! # Algorithm
//!
//! 1. Read the metadata owner (`ownerId`, else `owner_id`)
//! 2. Read the column owner (`ownerId`, else `owner_id`)
//! 3. Both present and unequal: delete the record, nothing else
//! 4. Otherwise rewrite it: resolved owner in the column, one plain-email
//!    `sharedWith` list at the top level and inside metadata
//!
//! Running the reconciler over its own output deletes nothing and rewrites
//! every record to itself.

use crate::{
    owner::OwnerRefs,
    sharing::{normalize_shared_with, SharingSettings},
    NotebookRecord, RecordId, UserId,
};
/// Owner references that disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerConflict {
    pub record_id: RecordId,
    pub column_owner: UserId,
    pub metadata_owner: UserId,
}

/// A record after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub record: NotebookRecord,
    /// The resolved owner, `None` when neither reference exists
    pub owner: Option<UserId>,
    /// Whether the rewrite differs from the input
    pub changed: bool,
    /// `sharedWith` entries that had no email
    pub dropped_entries: usize,
}

/// What to do with one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Delete(OwnerConflict),
    Normalize(Normalized),
}

/// Classify a single record.
pub fn classify(record: &NotebookRecord) -> Verdict {
    let refs = OwnerRefs::of(record);

    if let (true, Some(column), Some(meta)) = (refs.conflict(), refs.column, refs.metadata) {
        return Verdict::Delete(OwnerConflict {
            record_id: record.id.clone(),
            column_owner: column.to_string(),
            metadata_owner: meta.to_string(),
        });
    }

    Verdict::Normalize(normalize(record, refs))
}

fn normalize(record: &NotebookRecord, refs: OwnerRefs<'_>) -> Normalized {
    let owner = refs.resolved().map(str::to_string);

    let entries = record
        .sharing_settings
        .as_ref()
        .map(|s| s.shared_with.as_slice())
        .unwrap_or_default();
    let list = normalize_shared_with(entries);

    let mut rewritten = record.clone();
    rewritten.owner_id = owner.clone();
    rewritten.sharing_settings = Some(
        record
            .sharing_settings
            .clone()
            .unwrap_or_default()
            .with_emails(&list.emails),
    );

    let metadata = &mut rewritten.metadata;
    metadata.sharing_settings = Some(
        metadata
            .sharing_settings
            .take()
            .unwrap_or_else(SharingSettings::default)
            .with_emails(&list.emails),
    );
    // Metadata must carry the owner on its own so that dropping the column
    // on write loses nothing.
    if refs.metadata.is_none() {
        metadata.owner_id = owner.clone();
    }

    let changed = rewritten != *record;
    Normalized {
        record: rewritten,
        owner,
        changed,
        dropped_entries: list.dropped,
    }
}

/// Outcome of reconciling a snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Records with conflicting owners, in input order
    pub to_delete: Vec<RecordId>,
    /// Rewritten records, in input order
    pub to_update: Vec<NotebookRecord>,
    /// Details for every id in `to_delete`
    pub conflicts: Vec<OwnerConflict>,
    /// Updated records with no owner reference anywhere
    pub ownerless: Vec<RecordId>,
    /// Updated records whose rewrite equals the input
    pub unchanged: Vec<RecordId>,
    /// `sharedWith` entries dropped across all records
    pub dropped_entries: usize,
}

impl ReconcilePlan {
    fn new() -> Self {
        Self::default()
    }

    /// Nothing to delete and nothing that would change.
    pub fn is_noop(&self) -> bool {
        self.to_delete.is_empty() && self.unchanged.len() == self.to_update.len()
    }
}

/// Builds a [`ReconcilePlan`] from a snapshot.
#[derive(Debug, Default)]
pub struct Reconciler {
    records: Vec<NotebookRecord>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load snapshot records into the reconciler.
    pub fn load_records(&mut self, records: impl IntoIterator<Item = NotebookRecord>) {
        self.records.extend(records);
    }

    /// Classify every loaded record.
    pub fn reconcile(self) -> ReconcilePlan {
        let mut plan = ReconcilePlan::new();

        for record in &self.records {
            match classify(record) {
                Verdict::Delete(conflict) => {
                    plan.to_delete.push(conflict.record_id.clone());
                    plan.conflicts.push(conflict);
                }
                Verdict::Normalize(normalized) => {
                    if normalized.owner.is_none() {
                        plan.ownerless.push(record.id.clone());
                    }
                    if !normalized.changed {
                        plan.unchanged.push(record.id.clone());
                    }
                    plan.dropped_entries += normalized.dropped_entries;
                    plan.to_update.push(normalized.record);
                }
            }
        }

        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(row: Value) -> NotebookRecord {
        NotebookRecord::from_row(row).unwrap()
    }

    fn plan(rows: Vec<Value>) -> ReconcilePlan {
        let mut reconciler = Reconciler::new();
        reconciler.load_records(rows.into_iter().map(record));
        reconciler.reconcile()
    }

    #[test]
    fn normalizes_mixed_list() {
        let plan = plan(vec![json!({
            "id": "n1",
            "ownerId": "u1",
            "metadata": {"ownerId": "u1"},
            "sharingSettings": {"sharedWith": ["a@x.com", {"email": "b@x.com"}]}
        })]);

        assert!(plan.to_delete.is_empty());
        assert_eq!(plan.to_update.len(), 1);
        assert_eq!(
            plan.to_update[0].to_row().unwrap(),
            json!({
                "id": "n1",
                "ownerId": "u1",
                "sharingSettings": {"sharedWith": ["a@x.com", "b@x.com"]},
                "metadata": {
                    "ownerId": "u1",
                    "sharingSettings": {"sharedWith": ["a@x.com", "b@x.com"]}
                }
            })
        );
    }

    #[test]
    fn deletes_conflicting_owner() {
        let plan = plan(vec![json!({
            "id": "n2",
            "ownerId": "u1",
            "metadata": {"ownerId": "u2"}
        })]);

        assert_eq!(plan.to_delete, vec!["n2".to_string()]);
        assert!(plan.to_update.is_empty());
        assert_eq!(
            plan.conflicts,
            vec![OwnerConflict {
                record_id: "n2".into(),
                column_owner: "u1".into(),
                metadata_owner: "u2".into(),
            }]
        );
    }

    #[test]
    fn snake_case_metadata_owner_is_used() {
        let plan = plan(vec![json!({
            "id": "n3",
            "metadata": {"owner_id": "u9"},
            "sharingSettings": {"sharedWith": []}
        })]);

        assert!(plan.to_delete.is_empty());
        let updated = &plan.to_update[0];
        assert_eq!(updated.owner_id.as_deref(), Some("u9"));
        // metadata already names the owner, so it is not duplicated
        assert!(updated.metadata.owner_id.is_none());
        assert_eq!(updated.metadata.owner_id_snake.as_deref(), Some("u9"));
    }

    #[test]
    fn column_only_owner_is_copied_into_metadata() {
        let plan = plan(vec![json!({"id": "n4", "ownerId": "u4"})]);

        let updated = &plan.to_update[0];
        assert_eq!(updated.owner_id.as_deref(), Some("u4"));
        assert_eq!(updated.metadata.owner_id.as_deref(), Some("u4"));
    }

    #[test]
    fn ownerless_records_are_normalized_and_flagged() {
        let plan = plan(vec![json!({
            "id": "n5",
            "sharingSettings": {"sharedWith": [{"email": "a@x.com"}]}
        })]);

        assert_eq!(plan.ownerless, vec!["n5".to_string()]);
        let row = plan.to_update[0].to_row().unwrap();
        assert!(row.get("ownerId").is_none());
        assert_eq!(row["sharingSettings"]["sharedWith"], json!(["a@x.com"]));
        assert_eq!(
            row["metadata"]["sharingSettings"]["sharedWith"],
            json!(["a@x.com"])
        );
    }

    #[test]
    fn metadata_list_is_replaced_by_top_level_list() {
        let plan = plan(vec![json!({
            "id": "n6",
            "ownerId": "u1",
            "metadata": {
                "ownerId": "u1",
                "sharingSettings": {"sharedWith": ["stale@x.com"], "linkAccess": "view"}
            },
            "sharingSettings": {"sharedWith": ["fresh@x.com"]}
        })]);

        let row = plan.to_update[0].to_row().unwrap();
        assert_eq!(
            row["metadata"]["sharingSettings"],
            json!({"sharedWith": ["fresh@x.com"], "linkAccess": "view"})
        );
    }

    #[test]
    fn already_normal_record_is_unchanged() {
        let plan = plan(vec![json!({
            "id": "n7",
            "ownerId": "u1",
            "metadata": {"ownerId": "u1", "sharingSettings": {"sharedWith": ["a@x.com"]}},
            "sharingSettings": {"sharedWith": ["a@x.com"]}
        })]);

        assert_eq!(plan.unchanged, vec!["n7".to_string()]);
        assert!(plan.is_noop());
    }

    #[test]
    fn dropped_entries_are_counted() {
        let plan = plan(vec![
            json!({"id": "a", "sharingSettings": {"sharedWith": [1, "x@x.com"]}}),
            json!({"id": "b", "sharingSettings": {"sharedWith": [{"name": "n"}]}}),
        ]);
        assert_eq!(plan.dropped_entries, 2);
    }

    #[test]
    fn actions_are_disjoint_and_ordered() {
        let plan = plan(vec![
            json!({"id": "a", "ownerId": "u1", "metadata": {"ownerId": "u1"}}),
            json!({"id": "b", "ownerId": "u1", "metadata": {"ownerId": "u2"}}),
            json!({"id": "c", "metadata": {"ownerId": "u3"}}),
            json!({"id": "d", "owner_id": "u4", "metadata": {"owner_id": "u5"}}),
        ]);

        assert_eq!(plan.to_delete, vec!["b".to_string(), "d".to_string()]);
        let updated: Vec<_> = plan.to_update.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(updated, vec!["a", "c"]);
    }

    #[test]
    fn reconcile_is_idempotent() {
        let first = plan(vec![
            json!({"id": "a", "ownerId": "u1", "metadata": {"owner_id": "u1"},
                   "sharingSettings": {"sharedWith": [{"email": "x@x.com"}, 3]}}),
            json!({"id": "b", "owner_id": "u2"}),
            json!({"id": "c", "sharingSettings": {"sharedWith": "oops"}}),
        ]);

        let mut reconciler = Reconciler::new();
        reconciler.load_records(first.to_update.clone());
        let second = reconciler.reconcile();

        assert!(second.to_delete.is_empty());
        assert_eq!(second.to_update, first.to_update);
        assert!(second.is_noop());
    }

    // Property-based tests using proptest
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_owner() -> impl Strategy<Value = Option<String>> {
            prop_oneof![
                Just(None),
                Just(Some("u1".to_string())),
                Just(Some("u2".to_string())),
            ]
        }

        fn arb_entry() -> impl Strategy<Value = Value> {
            prop_oneof![
                "[a-c]@x\\.com".prop_map(Value::String),
                "[a-c]@x\\.com".prop_map(|email| json!({ "email": email })),
                Just(json!(null)),
                Just(json!({"name": "nobody"})),
            ]
        }

        prop_compose! {
            fn arb_row(id: usize)(
                col in arb_owner(),
                col_snake in arb_owner(),
                meta in arb_owner(),
                meta_snake in arb_owner(),
                list in proptest::option::of(proptest::collection::vec(arb_entry(), 0..4)),
            ) -> Value {
                let mut metadata = serde_json::Map::new();
                if let Some(owner) = meta { metadata.insert("ownerId".into(), json!(owner)); }
                if let Some(owner) = meta_snake { metadata.insert("owner_id".into(), json!(owner)); }

                let mut row = json!({"id": format!("n{id}"), "metadata": metadata});
                if let Some(owner) = col { row["ownerId"] = json!(owner); }
                if let Some(owner) = col_snake { row["owner_id"] = json!(owner); }
                if let Some(list) = list { row["sharingSettings"] = json!({"sharedWith": list}); }
                row
            }
        }

        fn arb_snapshot() -> impl Strategy<Value = Vec<Value>> {
            (0usize..6).prop_flat_map(|n| (0..n).map(arb_row).collect::<Vec<_>>())
        }

        proptest! {
            #[test]
            fn prop_conflicts_are_deleted_only(rows in arb_snapshot()) {
                let records: Vec<_> = rows.into_iter().map(record).collect();
                let mut reconciler = Reconciler::new();
                reconciler.load_records(records.clone());
                let plan = reconciler.reconcile();

                for r in &records {
                    let conflict = OwnerRefs::of(r).conflict();
                    prop_assert_eq!(plan.to_delete.contains(&r.id), conflict);
                    prop_assert_eq!(plan.to_update.iter().any(|u| u.id == r.id), !conflict);
                }
            }

            #[test]
            fn prop_owner_and_lists_agree(rows in arb_snapshot()) {
                let records: Vec<_> = rows.into_iter().map(record).collect();
                let mut reconciler = Reconciler::new();
                reconciler.load_records(records.clone());
                let plan = reconciler.reconcile();

                for updated in &plan.to_update {
                    let original = records.iter().find(|r| r.id == updated.id).unwrap();
                    let expected = original.metadata.owner_id.clone()
                        .or(original.metadata.owner_id_snake.clone())
                        .or(original.owner_id.clone())
                        .or(original.owner_id_snake.clone());
                    prop_assert_eq!(&updated.owner_id, &expected);

                    let row = updated.to_row().unwrap();
                    let top = &row["sharingSettings"]["sharedWith"];
                    let meta = &row["metadata"]["sharingSettings"]["sharedWith"];
                    prop_assert_eq!(top, meta);
                    prop_assert!(top.as_array().unwrap().iter().all(Value::is_string));
                }
            }

            #[test]
            fn prop_second_pass_is_noop(rows in arb_snapshot()) {
                let mut reconciler = Reconciler::new();
                reconciler.load_records(rows.into_iter().map(record));
                let first = reconciler.reconcile();

                // Go through the wire encoding, as a second run would.
                let mut reconciler = Reconciler::new();
                reconciler.load_records(
                    first.to_update.iter().map(|r| record(r.to_row().unwrap())),
                );
                let second = reconciler.reconcile();

                prop_assert!(second.to_delete.is_empty());
                prop_assert_eq!(&second.to_update, &first.to_update);
                prop_assert!(second.is_noop());
            }
        }
    }
}
