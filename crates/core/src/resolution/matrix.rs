//! Sparse `item × path` matrix of raw annotations.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::filter::AnnotationFilter;
use crate::annotation::{sort_canonical, Annotation, LabelPath, PathSegment};
use crate::scheme::MAX_SCHEME_DEPTH;
use crate::types::{ItemId, RowId, UserId};

/// How annotation paths are folded into buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixOptions {
    /// Key every annotation by its own `(key, repeat)` only, dropping the
    /// ancestor segments.
    #[serde(default)]
    pub ignore_hierarchy: bool,
    /// Force every repeat to 1 so all repetitions share one bucket.
    #[serde(default)]
    pub ignore_repeat: bool,
}

/// Annotations bucketed by item and label path.
///
/// Buckets hold their annotations in canonical order (annotator, creation
/// time, id), independent of the input order.
#[derive(Debug, Clone, Default)]
pub struct AnnotationMatrix {
    cells: BTreeMap<ItemId, BTreeMap<LabelPath, Vec<Annotation>>>,
    labels: BTreeSet<LabelPath>,
    annotators: BTreeSet<UserId>,
    dropped: Vec<RowId>,
}

impl AnnotationMatrix {
    /// Populate the matrix, resolving each annotation's parent chain to a
    /// path.
    ///
    /// Annotations whose chain hits a missing row, a row of another item, or
    /// a cycle are dropped and listed in [`dropped`](Self::dropped).
    pub fn build(annotations: &[Annotation], options: MatrixOptions) -> Self {
        Self::build_selected(annotations, options, &AnnotationFilter::default())
    }

    /// Like [`build`](Self::build), but only annotations matching `filter`
    /// are bucketed. Parent chains are still followed through the full
    /// input.
    pub fn build_selected(
        annotations: &[Annotation],
        options: MatrixOptions,
        filter: &AnnotationFilter,
    ) -> Self {
        let by_id: HashMap<RowId, &Annotation> =
            annotations.iter().map(|a| (a.annotation_id, a)).collect();

        let mut matrix = Self::default();
        for annotation in annotations.iter().filter(|a| filter.matches(a)) {
            let Some(path) = path_of(annotation, &by_id, options) else {
                tracing::warn!(
                    annotation_id = %annotation.annotation_id,
                    item_id = %annotation.item_id,
                    key = %annotation.key,
                    "Dropping annotation with unresolvable parent chain"
                );
                matrix.dropped.push(annotation.annotation_id);
                continue;
            };

            matrix.labels.insert(path.clone());
            matrix.annotators.insert(annotation.user_id.clone());
            matrix
                .cells
                .entry(annotation.item_id.clone())
                .or_default()
                .entry(path)
                .or_default()
                .push(annotation.clone());
        }

        for row in matrix.cells.values_mut() {
            for bucket in row.values_mut() {
                sort_canonical(bucket);
            }
        }
        matrix.dropped.sort();

        matrix
    }

    /// Items with at least one bucket, in ascending order.
    pub fn items(&self) -> impl Iterator<Item = &ItemId> {
        self.cells.keys()
    }

    /// All buckets of one item, ordered by path (parents before children).
    pub fn row(&self, item_id: &str) -> Option<&BTreeMap<LabelPath, Vec<Annotation>>> {
        self.cells.get(item_id)
    }

    /// Every `(item, path, bucket)` in item then path order.
    pub fn cells(&self) -> impl Iterator<Item = (&ItemId, &LabelPath, &[Annotation])> {
        self.cells.iter().flat_map(|(item, row)| {
            row.iter()
                .map(move |(path, bucket)| (item, path, bucket.as_slice()))
        })
    }

    pub fn get(&self, item_id: &str, path: &LabelPath) -> Option<&[Annotation]> {
        self.cells
            .get(item_id)
            .and_then(|row| row.get(path))
            .map(Vec::as_slice)
    }

    /// Column set: every distinct path seen on any item.
    pub fn labels(&self) -> &BTreeSet<LabelPath> {
        &self.labels
    }

    /// Distinct annotators contributing to the matrix.
    pub fn annotators(&self) -> &BTreeSet<UserId> {
        &self.annotators
    }

    /// Ids of annotations left out of the matrix.
    pub fn dropped(&self) -> &[RowId] {
        &self.dropped
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// Root-to-node path of one annotation, or `None` when the parent chain
/// cannot be followed to a root.
fn path_of(
    annotation: &Annotation,
    by_id: &HashMap<RowId, &Annotation>,
    options: MatrixOptions,
) -> Option<LabelPath> {
    let segment = |a: &Annotation| {
        let repeat = if options.ignore_repeat { 1 } else { a.repeat };
        PathSegment::new(a.key.clone(), repeat)
    };

    let mut segments = vec![segment(annotation)];
    let mut visited = HashSet::from([annotation.annotation_id]);
    let mut current = annotation;

    while let Some(parent_id) = current.parent {
        let parent = *by_id.get(&parent_id)?;
        if parent.item_id != annotation.item_id
            || !visited.insert(parent_id)
            || segments.len() > MAX_SCHEME_DEPTH
        {
            return None;
        }
        segments.push(segment(parent));
        current = parent;
    }

    if options.ignore_hierarchy {
        segments.truncate(1);
    } else {
        segments.reverse();
    }
    Some(LabelPath::new(segments))
}
