//! Consensus resolution.
//!
//! Raw annotations from several annotators are bucketed per `(item, path)`
//! in an [`AnnotationMatrix`], each bucket is reduced by [`majority_vote`],
//! and the resulting consensus rows are relinked to their parents. Output is
//! ordered by item then path, so two runs over the same annotations yield
//! the same values in the same order.

pub mod filter;
pub mod majority;
pub mod matrix;
pub mod snapshot;

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, ConsensusAnnotation, LabelPath};
use crate::error::CoreError;
use crate::scheme::{FlattenedLabel, Scheme};
use crate::types::{new_row_id, ItemId, RowId, Timestamp};

pub use filter::AnnotationFilter;
pub use majority::majority_vote;
pub use matrix::{AnnotationMatrix, MatrixOptions};
pub use snapshot::{
    diff_consensus, ChangeKind, ConsensusChange, ResolutionSnapshot, SnapshotEntry,
    SnapshotResolution,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionOptions {
    #[serde(flatten)]
    pub matrix: MatrixOptions,
    /// Fail the whole run on an unsupported label kind instead of skipping
    /// the bucket.
    #[serde(default)]
    pub strict: bool,
    /// Annotators, labels and repeats the run aggregates.
    #[serde(default)]
    pub filter: AnnotationFilter,
}

/// A bucket that produced no consensus row.
#[derive(Debug)]
pub struct SkippedBucket {
    pub item_id: ItemId,
    pub path: LabelPath,
    pub error: CoreError,
}

#[derive(Debug)]
pub struct ResolutionOutcome {
    pub consensus: Vec<ConsensusAnnotation>,
    pub skipped: Vec<SkippedBucket>,
    pub snapshot: ResolutionSnapshot,
}

/// Resolve annotations into one consensus row per `(item, path)`.
///
/// Buckets that cannot be aggregated are skipped and reported in
/// [`ResolutionOutcome::skipped`]: empty buckets, labels unknown to the
/// scheme and, unless `options.strict`, label kinds majority vote does not
/// support. In strict mode the latter fail the run. Annotations outside
/// `options.filter` are not aggregated.
pub fn resolve(
    scheme: &Scheme,
    annotations: &[Annotation],
    options: ResolutionOptions,
) -> Result<ResolutionOutcome, CoreError> {
    let matrix = AnnotationMatrix::build_selected(annotations, options.matrix, &options.filter);
    let mut consensus = Vec::new();
    let mut skipped = Vec::new();
    let mut snapshot = ResolutionSnapshot::default();

    for item_id in matrix.items() {
        let Some(row) = matrix.row(item_id) else {
            continue;
        };

        let mut resolved: HashMap<&LabelPath, RowId> = HashMap::new();
        let mut pruned: BTreeSet<&LabelPath> = BTreeSet::new();
        let mut item_rows: Vec<ConsensusAnnotation> = Vec::new();

        // Paths iterate parents first, so a parent's fate is known before
        // its children are visited.
        for (path, bucket) in row {
            snapshot
                .entries
                .extend(bucket.iter().map(|a| SnapshotEntry {
                    item_id: item_id.clone(),
                    path: path.clone(),
                    annotation_id: a.annotation_id,
                    user_id: a.user_id.clone(),
                }));

            let Some(label) = lookup_label(scheme, path, options.matrix) else {
                skip(
                    &mut skipped,
                    item_id,
                    path,
                    CoreError::NotFound {
                        entity: "label",
                        id: path.to_string(),
                    },
                );
                continue;
            };

            let parent_path = path.parent();
            if let Some(parent_path) = &parent_path {
                if pruned.contains(parent_path) {
                    pruned.insert(path);
                    continue;
                }
            }

            let value = match majority_vote(item_id, path, label.kind, bucket) {
                Ok(value) => value,
                Err(err @ CoreError::UnsupportedAggregation { .. }) if options.strict => {
                    return Err(err)
                }
                Err(err) => {
                    skip(&mut skipped, item_id, path, err);
                    continue;
                }
            };

            // A child whose resolved parent did not select its choice is
            // unreachable.
            if let (Some(parent_path), Some(parent_choice)) = (&parent_path, label.parent_choice) {
                let parent_selects = item_rows
                    .iter()
                    .find(|c| &c.path == parent_path)
                    .map(|c| c.value.selected_choices().contains(&parent_choice));
                if parent_selects == Some(false) {
                    tracing::debug!(
                        item_id = %item_id,
                        path = %path,
                        "Pruning consensus under unselected parent choice"
                    );
                    pruned.insert(path);
                    continue;
                }
            }

            let Some(last) = path.last() else {
                continue;
            };
            let consensus_id = new_row_id();
            resolved.insert(path, consensus_id);
            item_rows.push(ConsensusAnnotation {
                consensus_id,
                item_id: item_id.clone(),
                key: last.key.clone(),
                repeat: last.repeat,
                parent: None,
                path: path.clone(),
                value,
            });
        }

        backfill_parents(&mut item_rows, &resolved);
        snapshot
            .resolutions
            .extend(item_rows.iter().map(|c| SnapshotResolution {
                item_id: c.item_id.clone(),
                path: c.path.clone(),
                consensus_id: c.consensus_id,
            }));
        consensus.extend(item_rows);
    }

    tracing::info!(
        items = matrix.items().count(),
        annotators = matrix.annotators().len(),
        consensus = consensus.len(),
        skipped = skipped.len(),
        dropped = matrix.dropped().len(),
        "Resolution finished"
    );

    Ok(ResolutionOutcome {
        consensus,
        skipped,
        snapshot,
    })
}

fn lookup_label<'s>(
    scheme: &'s Scheme,
    path: &LabelPath,
    options: MatrixOptions,
) -> Option<&'s FlattenedLabel> {
    if options.ignore_hierarchy {
        path.last().and_then(|s| scheme.first_with_key(&s.key))
    } else {
        scheme.label_at(&path.key_path())
    }
}

fn skip(skipped: &mut Vec<SkippedBucket>, item_id: &str, path: &LabelPath, error: CoreError) {
    tracing::warn!(item_id = %item_id, path = %path, error = %error, "Skipping resolution bucket");
    skipped.push(SkippedBucket {
        item_id: item_id.to_string(),
        path: path.clone(),
        error,
    });
}

/// Link each consensus row to the row one path segment up, when that row
/// was resolved. Rows whose parent path never resolved stay roots.
fn backfill_parents(rows: &mut [ConsensusAnnotation], resolved: &HashMap<&LabelPath, RowId>) {
    for row in rows.iter_mut() {
        row.parent = row
            .path
            .parent()
            .and_then(|parent| resolved.get(&parent).copied());
    }
}

/// Number of annotations written after `since`.
///
/// A non-zero count means a previous resolution is stale.
pub fn count_changes_after(annotations: &[Annotation], since: Timestamp) -> usize {
    annotations
        .iter()
        .filter(|a| a.last_modified() > since)
        .count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
