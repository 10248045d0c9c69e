//! Scope configuration and item sampling.
//!
//! A scope names the scheme, the annotators with their budgets, the overlap
//! tiers and the way its items are picked from the project pool.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::distribution::DistributionRequest;
use crate::error::CoreError;
use crate::store::ItemFilter;
use crate::types::{ItemId, ProjectId, SchemeId, ScopeId, UserId};

/// Seed used when a scope does not set one.
pub const DEFAULT_SEED: u64 = 1337;

fn default_seed() -> u64 {
    DEFAULT_SEED
}

/// How a scope picks its items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SampleConfig {
    /// Draw `num_items` at random from the items matching `filter`, leaving
    /// out items already assigned in any of `excluded_scopes`.
    Random {
        num_items: u32,
        #[serde(default)]
        filter: ItemFilter,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        excluded_scopes: Vec<ScopeId>,
    },
    /// Take `num_items` from a curated list, starting at `offset`.
    Priority {
        prioritised_ids: Vec<ItemId>,
        #[serde(default)]
        offset: usize,
        num_items: u32,
    },
}

impl SampleConfig {
    pub fn num_items(&self) -> u32 {
        match self {
            Self::Random { num_items, .. } | Self::Priority { num_items, .. } => *num_items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_exclusions"))]
pub struct ScopeConfig {
    #[validate(length(min = 1, message = "scope id must not be empty"))]
    pub scope_id: ScopeId,
    pub project_id: ProjectId,
    pub scheme_id: SchemeId,
    /// Annotator -> maximum number of assignments.
    #[validate(length(min = 1, message = "a scope needs at least one annotator"))]
    pub users: BTreeMap<UserId, u32>,
    /// Overlap count -> number of items.
    #[validate(custom(function = "validate_overlaps"))]
    pub overlaps: BTreeMap<u32, u32>,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[validate(custom(function = "validate_sample"))]
    pub sample: SampleConfig,
}

fn validate_overlaps(overlaps: &BTreeMap<u32, u32>) -> Result<(), ValidationError> {
    if overlaps.is_empty() {
        return Err(ValidationError::new("overlaps_empty"));
    }
    if overlaps.contains_key(&0) {
        return Err(ValidationError::new("overlap_zero"));
    }
    Ok(())
}

fn validate_sample(sample: &SampleConfig) -> Result<(), ValidationError> {
    if sample.num_items() == 0 {
        return Err(ValidationError::new("sample_empty"));
    }
    Ok(())
}

fn validate_exclusions(scope: &ScopeConfig) -> Result<(), ValidationError> {
    if let SampleConfig::Random {
        excluded_scopes, ..
    } = &scope.sample
    {
        if excluded_scopes.contains(&scope.scope_id) {
            return Err(ValidationError::new("excludes_itself"));
        }
    }
    Ok(())
}

impl ScopeConfig {
    /// Run the field checks, mapping failures to [`CoreError::Validation`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::Validation(format!("scope {}: {e}", self.scope_id)))
    }

    /// Distributor input for this scope over the sampled items.
    pub fn distribution_request(&self, item_ids: Vec<ItemId>) -> DistributionRequest {
        DistributionRequest {
            scope_id: self.scope_id.clone(),
            users: self.users.clone(),
            overlaps: self.overlaps.clone(),
            item_ids,
            seed: self.seed,
        }
    }
}

/// Take `num_items` prioritised ids starting at `offset`.
pub fn priority_sample(
    prioritised_ids: &[ItemId],
    offset: usize,
    num_items: u32,
) -> Result<Vec<ItemId>, CoreError> {
    let end = offset.saturating_add(num_items as usize);
    prioritised_ids
        .get(offset..end)
        .map(<[ItemId]>::to_vec)
        .ok_or_else(|| CoreError::NotFound {
            entity: "prioritised items",
            id: format!("{offset}..{end} of {}", prioritised_ids.len()),
        })
}

/// Draw `num_items` distinct ids from `pool` with a seeded generator.
///
/// The pool is sorted and deduplicated first, so the draw depends only on
/// the pool's contents and the seed.
pub fn random_sample(
    mut pool: Vec<ItemId>,
    num_items: u32,
    seed: u64,
) -> Result<Vec<ItemId>, CoreError> {
    pool.sort();
    pool.dedup();
    if pool.len() < num_items as usize {
        return Err(CoreError::AllocationInfeasible(format!(
            "{num_items} items requested, pool holds {}",
            pool.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    pool.shuffle(&mut rng);
    pool.truncate(num_items as usize);
    Ok(pool)
}
