//! Assignment distribution.
//!
//! Splits an item pool into overlap tiers and hands each item to as many
//! distinct annotators as its tier requires, within per-annotator budgets.
//! All randomness comes from one generator seeded from the request, so the
//! same request always yields the same plan, assignment ids included.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::annotation::{Assignment, AssignmentStatus};
use crate::error::CoreError;
use crate::types::{ItemId, RowId, ScopeId, UserId};

/// Everything the distributor needs for one scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionRequest {
    pub scope_id: ScopeId,
    /// Maximum number of assignments per annotator.
    pub users: BTreeMap<UserId, u32>,
    /// Overlap count -> number of items that get exactly that many annotators.
    pub overlaps: BTreeMap<u32, u32>,
    /// Candidate items, in presentation order.
    pub item_ids: Vec<ItemId>,
    pub seed: u64,
}

/// A complete allocation plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Distribution {
    pub assignments: Vec<Assignment>,
    /// Budget left per annotator after allocation.
    pub remaining_budgets: BTreeMap<UserId, u32>,
}

/// Produce assignments for every overlap tier, or fail without a partial
/// plan when the tiers cannot all be satisfied.
///
/// Tiers are processed in ascending overlap order. Each tier shuffles the
/// remaining items, takes the number it needs, and assigns every taken item
/// round-robin from an offset given by its position in the tier, skipping
/// annotators without budget. Between tiers, exhausted annotators leave the
/// pool and the rest are ordered by remaining budget, highest first.
pub fn distribute(request: &DistributionRequest) -> Result<Distribution, CoreError> {
    check_feasible(request)?;

    let mut rng = StdRng::seed_from_u64(request.seed);
    let order: HashMap<&str, u32> = request
        .item_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i as u32))
        .collect();

    let mut pool: Vec<&ItemId> = request.item_ids.iter().collect();
    let mut annotators: Vec<(&UserId, u32)> = request
        .users
        .iter()
        .filter(|(_, budget)| **budget > 0)
        .map(|(user, budget)| (user, *budget))
        .collect();
    let mut assignments = Vec::new();

    for (&overlap, &num_items) in &request.overlaps {
        if num_items == 0 {
            continue;
        }

        pool.shuffle(&mut rng);
        let tier: Vec<&ItemId> = pool.drain(..num_items as usize).collect();

        for (position, item_id) in tier.iter().enumerate() {
            let eligible = annotators.iter().filter(|(_, budget)| *budget > 0).count();
            if eligible < overlap as usize {
                return Err(CoreError::AllocationInfeasible(format!(
                    "item {item_id} needs {overlap} annotators, {eligible} have budget left"
                )));
            }

            // One pass over the ring is enough: `eligible >= overlap`.
            let len = annotators.len();
            let start = position % len;
            let mut chosen = 0;
            for step in 0..len {
                if chosen == overlap {
                    break;
                }
                let slot = &mut annotators[(start + step) % len];
                if slot.1 == 0 {
                    continue;
                }
                slot.1 -= 1;
                chosen += 1;
                assignments.push(Assignment {
                    assignment_id: next_id(&mut rng),
                    scope_id: request.scope_id.clone(),
                    user_id: slot.0.clone(),
                    item_id: (*item_id).clone(),
                    order: order.get(item_id.as_str()).copied().unwrap_or_default(),
                    status: AssignmentStatus::Open,
                });
            }
        }

        annotators.retain(|(_, budget)| *budget > 0);
        annotators.sort_by(|a, b| b.1.cmp(&a.1));

        tracing::info!(
            scope_id = %request.scope_id,
            overlap,
            items = num_items,
            annotators_left = annotators.len(),
            "Allocated overlap tier"
        );
    }

    let mut remaining_budgets: BTreeMap<UserId, u32> =
        request.users.keys().map(|u| (u.clone(), 0)).collect();
    for (user, budget) in annotators {
        remaining_budgets.insert(user.clone(), budget);
    }

    Ok(Distribution {
        assignments,
        remaining_budgets,
    })
}

/// Reject requests no allocation could satisfy before touching the
/// generator.
fn check_feasible(request: &DistributionRequest) -> Result<(), CoreError> {
    if request.overlaps.contains_key(&0) {
        return Err(CoreError::Validation("overlap count must be at least 1".into()));
    }

    let mut seen = HashSet::with_capacity(request.item_ids.len());
    if let Some(duplicate) = request.item_ids.iter().find(|id| !seen.insert(id.as_str())) {
        return Err(CoreError::Validation(format!("duplicate item id {duplicate}")));
    }

    let requested: u64 = request.overlaps.values().map(|&n| u64::from(n)).sum();
    if requested > request.item_ids.len() as u64 {
        return Err(CoreError::AllocationInfeasible(format!(
            "{requested} items requested, only {} available",
            request.item_ids.len()
        )));
    }

    let available = request.users.values().filter(|&&b| b > 0).count();
    if let Some((&overlap, _)) = request
        .overlaps
        .iter()
        .find(|(&overlap, &n)| n > 0 && overlap as usize > available)
    {
        return Err(CoreError::AllocationInfeasible(format!(
            "overlap {overlap} exceeds the {available} annotators with budget"
        )));
    }

    let demand: u64 = request
        .overlaps
        .iter()
        .map(|(&overlap, &n)| u64::from(overlap) * u64::from(n))
        .sum();
    let budget: u64 = request.users.values().map(|&b| u64::from(b)).sum();
    if demand > budget {
        return Err(CoreError::AllocationInfeasible(format!(
            "{demand} assignments needed, total budget is {budget}"
        )));
    }

    Ok(())
}

fn next_id(rng: &mut StdRng) -> RowId {
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    uuid::Builder::from_random_bytes(bytes).into_uuid()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn request(users: &[(&str, u32)], overlaps: &[(u32, u32)], items: &[&str]) -> DistributionRequest {
        DistributionRequest {
            scope_id: "scope-1".into(),
            users: users.iter().map(|(u, b)| (u.to_string(), *b)).collect(),
            overlaps: overlaps.iter().copied().collect(),
            item_ids: items.iter().map(|i| i.to_string()).collect(),
            seed: 1337,
        }
    }

    fn users_of<'a>(plan: &'a Distribution, item: &str) -> Vec<&'a str> {
        let mut users: Vec<&str> = plan
            .assignments
            .iter()
            .filter(|a| a.item_id == item)
            .map(|a| a.user_id.as_str())
            .collect();
        users.sort();
        users
    }

    // -- distribute -----------------------------------------------------------

    #[test]
    fn one_item_two_annotators() {
        let plan = distribute(&request(&[("a", 2), ("b", 2)], &[(2, 1)], &["x"])).unwrap();
        assert_eq!(plan.assignments.len(), 2);
        assert_eq!(users_of(&plan, "x"), vec!["a", "b"]);
        assert_eq!(plan.remaining_budgets["a"], 1);
        assert_eq!(plan.remaining_budgets["b"], 1);
        assert!(plan
            .assignments
            .iter()
            .all(|a| a.status == AssignmentStatus::Open && a.order == 0 && a.scope_id == "scope-1"));
    }

    #[test]
    fn single_annotator_cannot_cover_overlap_two() {
        assert_matches!(
            distribute(&request(&[("a", 1)], &[(2, 1)], &["x"])),
            Err(CoreError::AllocationInfeasible(_))
        );
    }

    #[test]
    fn more_items_than_pool_is_infeasible() {
        assert_matches!(
            distribute(&request(&[("a", 5)], &[(1, 3)], &["x", "y"])),
            Err(CoreError::AllocationInfeasible(_))
        );
    }

    #[test]
    fn demand_above_total_budget_is_infeasible() {
        assert_matches!(
            distribute(&request(&[("a", 1), ("b", 1)], &[(2, 2)], &["x", "y"])),
            Err(CoreError::AllocationInfeasible(_))
        );
    }

    #[test]
    fn zero_overlap_and_duplicates_are_rejected() {
        assert_matches!(
            distribute(&request(&[("a", 1)], &[(0, 1)], &["x"])),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            distribute(&request(&[("a", 2)], &[(1, 1)], &["x", "x"])),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn tiers_use_distinct_items() {
        let items = ["i0", "i1", "i2", "i3", "i4", "i5"];
        let plan = distribute(&request(
            &[("a", 10), ("b", 10), ("c", 10)],
            &[(1, 2), (2, 2), (3, 1)],
            &items,
        ))
        .unwrap();

        let mut per_item: BTreeMap<&str, usize> = BTreeMap::new();
        for a in &plan.assignments {
            *per_item.entry(a.item_id.as_str()).or_default() += 1;
        }
        let mut counts: Vec<usize> = per_item.values().copied().collect();
        counts.sort();
        assert_eq!(counts, vec![1, 1, 2, 2, 3]);
        assert_eq!(plan.assignments.len(), 1 + 1 + 2 + 2 + 3);
    }

    #[test]
    fn annotators_within_an_item_are_distinct() {
        let plan = distribute(&request(
            &[("a", 4), ("b", 4), ("c", 4), ("d", 4)],
            &[(3, 4)],
            &["w", "x", "y", "z"],
        ))
        .unwrap();
        for item in ["w", "x", "y", "z"] {
            let users = users_of(&plan, item);
            let mut deduped = users.clone();
            deduped.dedup();
            assert_eq!(users.len(), 3);
            assert_eq!(deduped, users);
        }
    }

    #[test]
    fn budgets_are_respected() {
        let plan = distribute(&request(&[("a", 1), ("b", 3)], &[(1, 4)], &["w", "x", "y", "z"])).unwrap();
        let by_a = plan.assignments.iter().filter(|a| a.user_id == "a").count();
        let by_b = plan.assignments.iter().filter(|a| a.user_id == "b").count();
        assert_eq!((by_a, by_b), (1, 3));
        assert_eq!(plan.remaining_budgets["a"], 0);
        assert_eq!(plan.remaining_budgets["b"], 0);
    }

    #[test]
    fn ring_wraps_past_the_last_annotator() {
        let plan = distribute(&request(&[("a", 2), ("b", 2), ("c", 2)], &[(2, 3)], &["x", "y", "z"])).unwrap();
        assert_eq!(plan.assignments.len(), 6);
        for user in ["a", "b", "c"] {
            assert_eq!(plan.assignments.iter().filter(|a| a.user_id == user).count(), 2);
            assert_eq!(plan.remaining_budgets[user], 0);
        }
        for item in ["x", "y", "z"] {
            assert_eq!(users_of(&plan, item).len(), 2);
        }
    }

    #[test]
    fn order_follows_input_position() {
        let plan = distribute(&request(&[("a", 3)], &[(1, 3)], &["x", "y", "z"])).unwrap();
        for a in &plan.assignments {
            let expected = match a.item_id.as_str() {
                "x" => 0,
                "y" => 1,
                _ => 2,
            };
            assert_eq!(a.order, expected);
        }
    }

    #[test]
    fn same_seed_same_plan() {
        let req = request(&[("a", 3), ("b", 3), ("c", 3)], &[(1, 2), (2, 2)], &["p", "q", "r", "s", "t"]);
        assert_eq!(distribute(&req).unwrap(), distribute(&req).unwrap());
    }

    #[test]
    fn zero_budget_users_never_assigned() {
        let plan = distribute(&request(&[("a", 0), ("b", 2)], &[(1, 2)], &["x", "y"])).unwrap();
        assert!(plan.assignments.iter().all(|a| a.user_id == "b"));
        assert_eq!(plan.remaining_budgets["a"], 0);
    }
}
