//! Change events emitted for every record mutation

use serde::{Deserialize, Serialize};

use super::RepositoryRecord;

/// Kind of mutation applied to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Created => write!(f, "created"),
            ChangeAction::Updated => write!(f, "updated"),
            ChangeAction::Deleted => write!(f, "deleted"),
        }
    }
}

/// Immutable notification of one mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Record state after the mutation (before it, for deletions)
    pub record: RepositoryRecord,
    pub action: ChangeAction,
}

impl ChangeEvent {
    pub fn new(record: RepositoryRecord, action: ChangeAction) -> Self {
        Self { record, action }
    }
}
