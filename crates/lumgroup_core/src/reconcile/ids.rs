//! Identifier reconciliation.
//!
//! First-seen wins: a record keeps its `id` unless it is NULL or an earlier
//! record already claimed the value. Flagged records receive
//! `max_seen + 1, max_seen + 2, ...` in input order.

use crate::model::feature::{FeatureRecord, InternalId};
use serde::Serialize;
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    /// `max_id + needed` does not fit in an `i64`.
    IdSpaceExhausted { max_id: i64, needed: usize },
}

impl Display for IdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdSpaceExhausted { max_id, needed } => write!(
                f,
                "cannot assign {needed} new IDs above {max_id}: identifier range exhausted"
            ),
        }
    }
}

impl Error for IdError {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdReassignment {
    pub internal_id: InternalId,
    pub previous: Option<i64>,
    pub assigned: i64,
}

/// Outcome of one identifier reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdReconciliation {
    pub null_repaired: usize,
    pub duplicates_repaired: usize,
    pub reassignments: Vec<IdReassignment>,
    /// Highest identifier after reconciliation; `0` for an empty layer.
    pub max_id: i64,
}

impl IdReconciliation {
    pub fn changed(&self) -> bool {
        !self.reassignments.is_empty()
    }
}

/// Assigns a unique non-null `id` to every record.
///
/// # Errors
/// - `IdError::IdSpaceExhausted` when new IDs would overflow `i64`; records are
///   left untouched in that case.
pub fn reconcile_ids(records: &mut [FeatureRecord]) -> Result<IdReconciliation, IdError> {
    let mut seen = HashSet::with_capacity(records.len());
    let mut max_seen: i64 = 0;
    let mut flagged = Vec::new();

    for (index, record) in records.iter().enumerate() {
        match record.id {
            Some(id) if seen.insert(id) => max_seen = max_seen.max(id),
            _ => flagged.push(index),
        }
    }

    let exhausted = || IdError::IdSpaceExhausted {
        max_id: max_seen,
        needed: flagged.len(),
    };
    let needed = i64::try_from(flagged.len()).map_err(|_| exhausted())?;
    max_seen.checked_add(needed).ok_or_else(exhausted)?;

    let mut summary = IdReconciliation::default();
    let mut next_id = max_seen;
    for index in flagged {
        next_id += 1;
        let record = &mut records[index];
        if record.id.is_none() {
            summary.null_repaired += 1;
        } else {
            summary.duplicates_repaired += 1;
        }
        summary.reassignments.push(IdReassignment {
            internal_id: record.internal_id,
            previous: record.id,
            assigned: next_id,
        });
        record.id = Some(next_id);
    }

    summary.max_id = next_id;
    Ok(summary)
}
