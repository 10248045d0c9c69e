//! Property-based tests for the engine's reproducibility guarantees.
//!
//! Properties:
//! - Flattening the same scheme twice yields identical output
//! - An empty annotation set is always OPEN
//! - Annotating every required label once yields FULL
//! - Resolution values do not depend on input order
//! - Distribution with a fixed seed is reproducible and respects budgets

use std::collections::BTreeMap;

use labelwork_core::annotation::{Annotation, AnnotationValue, AssignmentStatus};
use labelwork_core::distribution::{distribute, DistributionRequest};
use labelwork_core::resolution::{resolve, ResolutionOptions};
use labelwork_core::scheme::{flatten, Choice, Label, LabelKind, Scheme};
use labelwork_core::types::new_row_id;
use labelwork_core::validation::validate;
use proptest::prelude::*;

// ============================================================================
// STRATEGIES
// ============================================================================

/// Flat schemes of distinct bool/single/multi labels, some optional.
fn arb_flat_scheme() -> impl Strategy<Value = Vec<Label>> {
    prop::collection::vec((0u8..3, any::<bool>(), 1u32..4), 1..6).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(i, (kind, required, max_repeat))| {
                let kind = match kind {
                    0 => LabelKind::Bool,
                    1 => LabelKind::Single,
                    _ => LabelKind::Multi,
                };
                let mut label = Label::new(format!("l{i}"), kind).with_max_repeat(max_repeat);
                if kind != LabelKind::Bool {
                    label = label.with_choices((0..3).map(Choice::new).collect());
                }
                if !required {
                    label = label.optional();
                }
                label
            })
            .collect()
    })
}

/// Three-level scheme of single labels with `max_repeat` per level.
fn arb_nested_scheme() -> impl Strategy<Value = Vec<Label>> {
    (1u32..4, 1u32..4, 1u32..4).prop_map(|(a, b, c)| {
        let leaf = Label::new("leaf", LabelKind::Bool).with_max_repeat(c);
        let mid = Label::new("mid", LabelKind::Single)
            .with_max_repeat(b)
            .with_choices(vec![Choice::new(1).with_children(vec![leaf])]);
        vec![Label::new("top", LabelKind::Single)
            .with_max_repeat(a)
            .with_choices(vec![Choice::new(1).with_children(vec![mid])])]
    })
}

fn value_for(kind: LabelKind, seed: u8) -> AnnotationValue {
    match kind {
        LabelKind::Bool => AnnotationValue::Bool(seed % 2 == 0),
        LabelKind::Multi => AnnotationValue::Multi(vec![i64::from(seed % 3)]),
        _ => AnnotationValue::Int(i64::from(seed % 3)),
    }
}

/// Votes `(user, item, label index, value seed)` for a scheme.
fn arb_votes() -> impl Strategy<Value = Vec<(u8, u8, usize, u8)>> {
    prop::collection::vec((0u8..5, 0u8..3, 0usize..6, any::<u8>()), 0..40)
}

fn arb_request() -> impl Strategy<Value = DistributionRequest> {
    (
        prop::collection::btree_map("[a-z]{1,3}", 0u32..6, 1..6),
        prop::collection::btree_map(1u32..4, 0u32..4, 0..3),
        8usize..20,
        any::<u64>(),
    )
        .prop_map(|(users, overlaps, n_items, seed)| DistributionRequest {
            scope_id: "scope".into(),
            users,
            overlaps,
            item_ids: (0..n_items).map(|i| format!("item-{i}")).collect(),
            seed,
        })
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #[test]
    fn prop_flatten_is_idempotent(labels in arb_nested_scheme()) {
        prop_assert_eq!(flatten(&labels).unwrap(), flatten(&labels).unwrap());
    }

    #[test]
    fn prop_implicit_repeat_is_product_of_ancestors(labels in arb_nested_scheme()) {
        let flat = flatten(&labels).unwrap();
        let product = flat.iter().map(|l| l.max_repeat).product::<u32>();
        prop_assert_eq!(flat[2].implicit_max_repeat, product);
    }

    #[test]
    fn prop_empty_annotations_are_open(labels in arb_flat_scheme()) {
        prop_assert_eq!(validate(&labels, &[]), AssignmentStatus::Open);
    }

    #[test]
    fn prop_required_labels_once_is_full(labels in arb_flat_scheme(), seed in any::<u8>()) {
        let assignment = new_row_id();
        let rows: Vec<Annotation> = labels
            .iter()
            .map(|l| Annotation::new(assignment, "u", "i", l.key.clone(), value_for(l.kind, seed)))
            .collect();
        prop_assert_eq!(validate(&labels, &rows), AssignmentStatus::Full);
    }

    #[test]
    fn prop_resolution_ignores_input_order(
        labels in arb_flat_scheme(),
        votes in arb_votes(),
    ) {
        let scheme = Scheme::new(labels.clone()).unwrap();
        let assignment = new_row_id();
        let rows: Vec<Annotation> = votes
            .into_iter()
            .filter(|(_, _, idx, _)| *idx < labels.len())
            .map(|(user, item, idx, seed)| {
                let label = &labels[idx];
                Annotation::new(
                    assignment,
                    format!("u{user}"),
                    format!("i{item}"),
                    label.key.clone(),
                    value_for(label.kind, seed),
                )
            })
            .collect();
        let mut reversed = rows.clone();
        reversed.reverse();

        let cells = |rows: &[Annotation]| -> BTreeMap<(String, String), AnnotationValue> {
            resolve(&scheme, rows, ResolutionOptions::default())
                .unwrap()
                .consensus
                .into_iter()
                .map(|c| ((c.item_id, c.path.to_string()), c.value))
                .collect()
        };
        prop_assert_eq!(cells(&rows), cells(&reversed));
    }

    #[test]
    fn prop_distribution_is_reproducible_and_within_budget(request in arb_request()) {
        let first = distribute(&request);
        let second = distribute(&request);
        prop_assert_eq!(first.is_ok(), second.is_ok());

        if let (Ok(first), Ok(second)) = (first, second) {
            prop_assert_eq!(&first, &second);

            let mut used: BTreeMap<&str, u32> = BTreeMap::new();
            let mut per_item: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for a in &first.assignments {
                *used.entry(a.user_id.as_str()).or_default() += 1;
                per_item.entry(a.item_id.as_str()).or_default().push(a.user_id.as_str());
            }
            for (user, budget) in &request.users {
                let spent = used.get(user.as_str()).copied().unwrap_or_default();
                prop_assert!(spent <= *budget);
                prop_assert_eq!(first.remaining_budgets[user], budget - spent);
            }
            for users in per_item.values_mut() {
                let n = users.len();
                users.sort();
                users.dedup();
                prop_assert_eq!(users.len(), n);
            }
            let expected: u32 = request.overlaps.iter().map(|(k, n)| k * n).sum();
            prop_assert_eq!(first.assignments.len() as u32, expected);
        }
    }
}
