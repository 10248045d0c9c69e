//! Storage contract.
//!
//! The engine never performs I/O. Callers load inputs through a
//! [`WorkflowStore`], run the pure computations, and write the results back
//! through the same store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::annotation::{Annotation, Assignment, AssignmentStatus, ConsensusAnnotation};
use crate::error::CoreError;
use crate::sampling::ScopeConfig;
use crate::scheme::Scheme;
use crate::types::{ItemId, ProjectId, RowId, SchemeId, ScopeId};

/// Opaque item filter.
///
/// Built and evaluated by the store; the engine only passes it through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemFilter(pub serde_json::Value);

impl ItemFilter {
    /// A filter that matches every item.
    pub fn all() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn is_all(&self) -> bool {
        self.0.is_null()
    }
}

/// Which annotations to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotationSelector {
    Assignment(RowId),
    /// Every annotation on these items, across assignments.
    Items(Vec<ItemId>),
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn load_scheme(&self, scheme_id: &SchemeId) -> Result<Scheme, CoreError>;

    async fn load_annotations(
        &self,
        selector: &AnnotationSelector,
    ) -> Result<Vec<Annotation>, CoreError>;

    /// Item ids of a project that match `filter`.
    async fn load_item_pool(
        &self,
        project_id: &ProjectId,
        filter: &ItemFilter,
    ) -> Result<Vec<ItemId>, CoreError>;

    async fn load_scope(&self, scope_id: &ScopeId) -> Result<ScopeConfig, CoreError>;

    async fn load_assignment(&self, assignment_id: RowId) -> Result<Assignment, CoreError>;

    async fn list_assignments(&self, scope_id: &ScopeId) -> Result<Vec<Assignment>, CoreError>;

    /// Store a freshly distributed plan for a scope.
    async fn save_assignments(
        &self,
        scope_id: &ScopeId,
        assignments: Vec<Assignment>,
    ) -> Result<(), CoreError>;

    async fn save_assignment_status(
        &self,
        assignment_id: RowId,
        status: AssignmentStatus,
    ) -> Result<(), CoreError>;

    /// Replace every consensus row of a scope.
    async fn replace_consensus(
        &self,
        scope_id: &ScopeId,
        consensus: Vec<ConsensusAnnotation>,
    ) -> Result<(), CoreError>;

    async fn load_consensus(
        &self,
        scope_id: &ScopeId,
    ) -> Result<Vec<ConsensusAnnotation>, CoreError>;
}
