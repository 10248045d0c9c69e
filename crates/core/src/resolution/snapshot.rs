//! Audit trail of a resolution run and comparison between runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::annotation::{AnnotationValue, ConsensusAnnotation, LabelPath};
use crate::types::{ItemId, RowId, UserId};

/// One raw annotation that fed a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub item_id: ItemId,
    pub path: LabelPath,
    pub annotation_id: RowId,
    pub user_id: UserId,
}

/// The consensus row a cell produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotResolution {
    pub item_id: ItemId,
    pub path: LabelPath,
    pub consensus_id: RowId,
}

/// What went into a resolution run and what came out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionSnapshot {
    pub entries: Vec<SnapshotEntry>,
    pub resolutions: Vec<SnapshotResolution>,
}

impl ResolutionSnapshot {
    /// Annotations that fed the cell at `(item_id, path)`.
    pub fn sources<'a>(
        &'a self,
        item_id: &'a str,
        path: &'a LabelPath,
    ) -> impl Iterator<Item = &'a SnapshotEntry> + 'a {
        self.entries
            .iter()
            .filter(move |e| e.item_id == item_id && &e.path == path)
    }

    /// Consensus row produced for `(item_id, path)`, if the cell resolved.
    pub fn consensus_for(&self, item_id: &str, path: &LabelPath) -> Option<RowId> {
        self.resolutions
            .iter()
            .find(|r| r.item_id == item_id && &r.path == path)
            .map(|r| r.consensus_id)
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ChangeKind {
    New {
        value: AnnotationValue,
    },
    Changed {
        before: AnnotationValue,
        after: AnnotationValue,
    },
    Unchanged,
    Removed {
        value: AnnotationValue,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusChange {
    pub item_id: ItemId,
    pub path: LabelPath,
    #[serde(flatten)]
    pub change: ChangeKind,
}

/// Compare two consensus sets cell by cell, in `(item, path)` order.
///
/// Consensus ids are ignored; cells are matched by item and path only.
pub fn diff_consensus(
    previous: &[ConsensusAnnotation],
    current: &[ConsensusAnnotation],
) -> Vec<ConsensusChange> {
    let index = |rows: &[ConsensusAnnotation]| -> BTreeMap<(ItemId, LabelPath), AnnotationValue> {
        rows.iter()
            .map(|c| ((c.item_id.clone(), c.path.clone()), c.value.clone()))
            .collect()
    };
    let mut before = index(previous);
    let after = index(current);

    let mut changes: Vec<ConsensusChange> = Vec::with_capacity(after.len());
    for ((item_id, path), value) in after {
        let change = match before.remove(&(item_id.clone(), path.clone())) {
            None => ChangeKind::New { value },
            Some(old) if old == value => ChangeKind::Unchanged,
            Some(old) => ChangeKind::Changed {
                before: old,
                after: value,
            },
        };
        changes.push(ConsensusChange {
            item_id,
            path,
            change,
        });
    }
    changes.extend(
        before
            .into_iter()
            .map(|((item_id, path), value)| ConsensusChange {
                item_id,
                path,
                change: ChangeKind::Removed { value },
            }),
    );

    changes.sort_by(|a, b| (&a.item_id, &a.path).cmp(&(&b.item_id, &b.path)));
    changes
}
