//! Pure merge and change-planning functions
//!
//! Nothing here performs I/O: the reconciler gathers provider output and
//! stored records, then asks these functions what to write.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::models::{
    ChangeAction, OwnerId, ProviderMetadata, RepositoryMetadata, RepositoryRecord,
};

/// Merge `incoming` into `aggregate`; machine names already present are kept
pub fn merge_metadata(aggregate: &mut ProviderMetadata, incoming: ProviderMetadata) {
    for (machine_name, metadata) in incoming {
        aggregate.entry(machine_name).or_insert(metadata);
    }
}

/// SHA-256 digest over every metadata field
///
/// Fields are length-prefixed so that no two distinct values share an encoding.
pub fn content_hash(metadata: &RepositoryMetadata) -> String {
    let mut hasher = Sha256::new();

    fn field(hasher: &mut Sha256, value: &str) {
        hasher.update((value.len() as u64).to_be_bytes());
        hasher.update(value.as_bytes());
    }

    field(&mut hasher, &metadata.label);
    match &metadata.description {
        Some(description) => {
            hasher.update([1u8]);
            field(&mut hasher, description);
        }
        None => hasher.update([0u8]),
    }
    hasher.update(metadata.num_open_issues.to_be_bytes());
    field(&mut hasher, &metadata.source);
    field(&mut hasher, &metadata.url);

    format!("{:x}", hasher.finalize())
}

/// One write the reconciler should perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedChange {
    /// Unsaved record to insert
    Create(RepositoryRecord),
    /// Stored record with its new field values (id kept)
    Update(RepositoryRecord),
    /// Stored record to remove
    Delete(RepositoryRecord),
}

impl PlannedChange {
    pub fn action(&self) -> ChangeAction {
        match self {
            PlannedChange::Create(_) => ChangeAction::Created,
            PlannedChange::Update(_) => ChangeAction::Updated,
            PlannedChange::Delete(_) => ChangeAction::Deleted,
        }
    }

    pub fn record(&self) -> &RepositoryRecord {
        match self {
            PlannedChange::Create(r) | PlannedChange::Update(r) | PlannedChange::Delete(r) => r,
        }
    }

    pub fn into_record(self) -> RepositoryRecord {
        match self {
            PlannedChange::Create(r) | PlannedChange::Update(r) | PlannedChange::Delete(r) => r,
        }
    }
}

/// Outcome of diffing an aggregate against stored records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    /// Creates and updates in aggregate order, then deletes
    pub changes: Vec<PlannedChange>,
    /// Entries whose stored hash already matches
    pub unchanged: usize,
}

impl ReconcilePlan {
    pub fn count(&self, action: ChangeAction) -> usize {
        self.changes.iter().filter(|c| c.action() == action).count()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Diff an owner's aggregate against their stored records
///
/// Records are matched on `(machine_name, source)`. A stored record whose
/// machine name is missing from the aggregate is deleted.
pub fn plan_changes(
    owner_id: OwnerId,
    aggregate: &ProviderMetadata,
    existing: &[RepositoryRecord],
) -> ReconcilePlan {
    let by_identity: HashMap<(&str, &str), &RepositoryRecord> = existing
        .iter()
        .filter(|r| r.owner_id == owner_id)
        .map(|r| ((r.machine_name.as_str(), r.source.as_str()), r))
        .collect();

    let mut plan = ReconcilePlan::default();

    for (machine_name, metadata) in aggregate {
        let hash = content_hash(metadata);

        match by_identity.get(&(machine_name.as_str(), metadata.source.as_str())) {
            None => plan.changes.push(PlannedChange::Create(
                RepositoryRecord::from_metadata(owner_id, machine_name, metadata, hash),
            )),
            Some(stored) if stored.content_hash != hash => {
                let mut updated = (*stored).clone();
                updated.apply_metadata(metadata, hash);
                plan.changes.push(PlannedChange::Update(updated));
            }
            Some(_) => plan.unchanged += 1,
        }
    }

    let mut stale: Vec<&RepositoryRecord> = existing
        .iter()
        .filter(|r| r.owner_id == owner_id && !aggregate.contains_key(&r.machine_name))
        .collect();
    stale.sort_by(|a, b| (&a.machine_name, &a.source).cmp(&(&b.machine_name, &b.source)));
    stale.dedup_by_key(|r| r.id);

    plan.changes
        .extend(stale.into_iter().cloned().map(PlannedChange::Delete));

    plan
}
