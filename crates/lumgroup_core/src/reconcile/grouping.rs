//! Geometry grouping.
//!
//! Records sharing a geometry key form a group. Every member's `item` is the
//! group's minimum `id`; the member holding that minimum gets the group size
//! in `lum_cant_pos`, every other member gets `0`.

use crate::model::feature::{FeatureRecord, InternalId};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupingError {
    /// Identifier reconciliation has not run on this record.
    UnreconciledId(InternalId),
}

impl Display for GroupingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnreconciledId(internal_id) => {
                write!(f, "feature {internal_id} has no ID; reconcile identifiers first")
            }
        }
    }
}

impl Error for GroupingError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GroupingSummary {
    pub groups: usize,
    pub largest_group: usize,
    /// Records whose geometry is shared with at least one other record.
    pub shared_records: usize,
}

#[derive(Debug, Clone, Copy)]
struct GroupStats {
    min_id: i64,
    count: i64,
}

/// Writes `item` and `lum_cant_pos` for every record.
///
/// # Errors
/// - `GroupingError::UnreconciledId` when any record has no `id`; records are
///   left untouched in that case.
pub fn assign_groups(records: &mut [FeatureRecord]) -> Result<GroupingSummary, GroupingError> {
    if let Some(record) = records.iter().find(|record| record.id.is_none()) {
        return Err(GroupingError::UnreconciledId(record.internal_id));
    }

    for record in records.iter_mut() {
        record.item = None;
        record.lum_cant_pos = 0;
    }

    let mut groups: HashMap<&str, GroupStats> = HashMap::new();
    for record in records.iter() {
        let id = record.id.unwrap_or_default();
        groups
            .entry(record.geometry_key.as_str())
            .and_modify(|stats| {
                stats.min_id = stats.min_id.min(id);
                stats.count += 1;
            })
            .or_insert(GroupStats {
                min_id: id,
                count: 1,
            });
    }

    let summary = GroupingSummary {
        groups: groups.len(),
        largest_group: groups.values().map(|stats| stats.count as usize).max().unwrap_or(0),
        shared_records: groups
            .values()
            .filter(|stats| stats.count > 1)
            .map(|stats| stats.count as usize)
            .sum(),
    };

    // Owned copy so the map no longer borrows keys from `records`.
    let groups: HashMap<String, GroupStats> = groups
        .into_iter()
        .map(|(key, stats)| (key.to_string(), stats))
        .collect();

    for record in records.iter_mut() {
        if let Some(stats) = groups.get(&record.geometry_key) {
            record.item = Some(stats.min_id);
            record.lum_cant_pos = if record.id == Some(stats.min_id) {
                stats.count
            } else {
                0
            };
        }
    }

    Ok(summary)
}
