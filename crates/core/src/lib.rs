//! `labelwork-core`: the annotation workflow engine.
//!
//! Pure, synchronous logic with no I/O and zero internal dependencies:
//!
//! - [`scheme`]: hierarchical label schemes and their depth-first flattening.
//! - [`validation`]: assignment completion status from recorded annotations.
//! - [`resolution`]: consensus ("bot") annotations by majority vote.
//! - [`agreement`]: inter-rater agreement per label.
//! - [`distribution`]: seeded allocation of items to annotators.
//! - [`sampling`]: selecting the item pool a scope distributes.
//! - [`store`]: the narrow storage contract implemented by process crates.

pub mod agreement;
pub mod annotation;
pub mod distribution;
pub mod error;
pub mod resolution;
pub mod sampling;
pub mod scheme;
pub mod store;
pub mod types;
pub mod validation;
