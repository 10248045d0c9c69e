use crate::scheme::LabelKind;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Malformed or too deeply nested scheme. Not recoverable.
    #[error("Scheme error at label '{key}': {message}")]
    Scheme { key: String, message: String },

    /// A resolution bucket held no value usable for its label kind.
    #[error("Empty resolution bucket for item {item_id} at {path}")]
    EmptyBucket { item_id: String, path: String },

    /// Majority vote is undefined for free-text and numeric labels.
    #[error("Majority vote not supported for '{kind}' label at {path} (item {item_id})")]
    UnsupportedAggregation {
        item_id: String,
        path: String,
        kind: LabelKind,
    },

    /// The distributor cannot satisfy the requested overlaps and budgets.
    #[error("Allocation infeasible: {0}")]
    AllocationInfeasible(String),

    #[error("Storage error: {0}")]
    Storage(String),
}
