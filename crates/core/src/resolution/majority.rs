//! Majority vote over one resolution bucket.

use std::collections::BTreeSet;

use crate::annotation::{Annotation, AnnotationValue, LabelPath};
use crate::error::CoreError;
use crate::scheme::LabelKind;

/// Aggregate a bucket into one consensus value.
///
/// `bucket` must already be in canonical order; ties between equally
/// frequent values go to the one seen first. Values that do not match
/// `kind` are ignored.
///
/// - `bool`/`single`: the most frequent value.
/// - `multi`: sorted, deduplicated union of all lists.
/// - anything else: [`CoreError::UnsupportedAggregation`].
pub fn majority_vote(
    item_id: &str,
    path: &LabelPath,
    kind: LabelKind,
    bucket: &[Annotation],
) -> Result<AnnotationValue, CoreError> {
    let value = match kind {
        LabelKind::Bool => plurality(bucket.iter().filter_map(|a| match a.value {
            AnnotationValue::Bool(v) => Some(v),
            _ => None,
        }))
        .map(AnnotationValue::Bool),
        LabelKind::Single => plurality(bucket.iter().filter_map(|a| match a.value {
            AnnotationValue::Int(v) => Some(v),
            _ => None,
        }))
        .map(AnnotationValue::Int),
        LabelKind::Multi => union(bucket).map(AnnotationValue::Multi),
        LabelKind::Str | LabelKind::Int | LabelKind::Float => {
            return Err(CoreError::UnsupportedAggregation {
                item_id: item_id.to_string(),
                path: path.to_string(),
                kind,
            })
        }
    };

    value.ok_or_else(|| CoreError::EmptyBucket {
        item_id: item_id.to_string(),
        path: path.to_string(),
    })
}

/// Most frequent value; the first seen wins a tie.
fn plurality<T: PartialEq>(values: impl Iterator<Item = T>) -> Option<T> {
    let mut counts: Vec<(T, usize)> = Vec::new();
    for value in values {
        match counts.iter_mut().find(|(v, _)| *v == value) {
            Some((_, n)) => *n += 1,
            None => counts.push((value, 1)),
        }
    }

    let mut best: Option<(T, usize)> = None;
    for (value, n) in counts {
        if best.as_ref().map_or(true, |(_, top)| n > *top) {
            best = Some((value, n));
        }
    }
    best.map(|(value, _)| value)
}

fn union(bucket: &[Annotation]) -> Option<Vec<i64>> {
    let mut seen_any = false;
    let mut values = BTreeSet::new();
    for annotation in bucket {
        if let AnnotationValue::Multi(list) = &annotation.value {
            seen_any = true;
            values.extend(list.iter().copied());
        }
    }
    seen_any.then(|| values.into_iter().collect())
}
