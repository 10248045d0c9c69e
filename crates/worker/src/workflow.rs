//! Load → compute → write orchestration over a [`WorkflowStore`].
//!
//! Each operation loads what it needs from the store, runs the pure engine
//! and writes the result back. Operations that replace scope-wide data
//! (distribution and resolution) hold a per-scope lock for their whole run,
//! so two runs on one scope never interleave while different scopes proceed
//! in parallel.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;

use labelwork_core::agreement::{agreement, LabelAgreement};
use labelwork_core::annotation::{Annotation, Assignment, AssignmentStatus};
use labelwork_core::distribution::{distribute, Distribution};
use labelwork_core::error::CoreError;
use labelwork_core::resolution::{
    count_changes_after, diff_consensus, resolve, AnnotationMatrix, ChangeKind, ConsensusChange,
    ResolutionOptions,
};
use labelwork_core::sampling::{priority_sample, random_sample, SampleConfig, ScopeConfig};
use labelwork_core::scheme::Scheme;
use labelwork_core::store::{AnnotationSelector, WorkflowStore};
use labelwork_core::types::{ItemId, RowId, ScopeId, Timestamp};
use labelwork_core::validation::validate;

/// Assignment counts per status for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeProgress {
    pub open: usize,
    pub partial: usize,
    pub full: usize,
    pub invalid: usize,
    /// Assignments whose stored status was updated by the refresh.
    pub updated: usize,
}

impl ScopeProgress {
    fn count(&mut self, status: AssignmentStatus) {
        match status {
            AssignmentStatus::Open => self.open += 1,
            AssignmentStatus::Partial => self.partial += 1,
            AssignmentStatus::Full => self.full += 1,
            AssignmentStatus::Invalid => self.invalid += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.open + self.partial + self.full + self.invalid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedCell {
    pub item_id: ItemId,
    pub path: String,
    pub reason: String,
}

/// Result of a scope resolution run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeResolution {
    pub scope_id: ScopeId,
    pub consensus: usize,
    pub skipped: Vec<SkippedCell>,
    /// Cell-level changes against the consensus this run replaced.
    pub changes: Vec<ConsensusChange>,
}

impl ScopeResolution {
    /// Number of cells that are new, changed or removed.
    pub fn changed_cells(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| c.change != ChangeKind::Unchanged)
            .count()
    }
}

pub struct Workflow<S> {
    store: Arc<S>,
    options: ResolutionOptions,
    scope_locks: Mutex<HashMap<ScopeId, Arc<Mutex<()>>>>,
}

impl<S: WorkflowStore> Workflow<S> {
    pub fn new(store: Arc<S>, options: ResolutionOptions) -> Self {
        Self {
            store,
            options,
            scope_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    async fn scope_lock(&self, scope_id: &ScopeId) -> Arc<Mutex<()>> {
        let mut locks = self.scope_locks.lock().await;
        Arc::clone(locks.entry(scope_id.clone()).or_default())
    }

    /// Drop our handle on a scope lock and forget the entry once no other
    /// run holds or waits on it.
    async fn release_scope_lock(&self, scope_id: &ScopeId, lock: Arc<Mutex<()>>) {
        let mut locks = self.scope_locks.lock().await;
        drop(lock);
        if locks
            .get(scope_id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(scope_id);
        }
    }

    async fn scope_and_scheme(&self, scope_id: &ScopeId) -> Result<(ScopeConfig, Scheme), CoreError> {
        let scope = self.store.load_scope(scope_id).await?;
        let scheme = self.store.load_scheme(&scope.scheme_id).await?;
        Ok((scope, scheme))
    }

    /// Sample the scope's items and distribute them to its annotators.
    ///
    /// A scope is distributed once; a second call is a validation error.
    pub async fn create_assignments(&self, scope_id: &ScopeId) -> Result<Distribution, CoreError> {
        let lock = self.scope_lock(scope_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.distribute_locked(scope_id).await
        };
        self.release_scope_lock(scope_id, lock).await;
        result
    }

    async fn distribute_locked(&self, scope_id: &ScopeId) -> Result<Distribution, CoreError> {
        let scope = self.store.load_scope(scope_id).await?;
        scope.check()?;
        if !self.store.list_assignments(scope_id).await?.is_empty() {
            return Err(CoreError::Validation(format!(
                "scope {scope_id} already has assignments"
            )));
        }

        let items = match &scope.sample {
            SampleConfig::Random {
                num_items,
                filter,
                excluded_scopes,
            } => {
                let mut pool = self.store.load_item_pool(&scope.project_id, filter).await?;
                let excluded = self.assigned_items(excluded_scopes).await?;
                if !excluded.is_empty() {
                    let before = pool.len();
                    pool.retain(|item_id| !excluded.contains(item_id));
                    tracing::debug!(
                        scope_id = %scope_id,
                        excluded = before - pool.len(),
                        "Excluded items assigned in other scopes"
                    );
                }
                random_sample(pool, *num_items, scope.seed)?
            }
            SampleConfig::Priority {
                prioritised_ids,
                offset,
                num_items,
            } => priority_sample(prioritised_ids, *offset, *num_items)?,
        };

        let distribution = distribute(&scope.distribution_request(items))?;
        self.store
            .save_assignments(scope_id, distribution.assignments.clone())
            .await?;

        tracing::info!(
            scope_id = %scope_id,
            assignments = distribution.assignments.len(),
            "Created assignments"
        );
        Ok(distribution)
    }

    /// Recompute and store the status of one assignment.
    pub async fn refresh_assignment(&self, assignment_id: RowId) -> Result<AssignmentStatus, CoreError> {
        let assignment = self.store.load_assignment(assignment_id).await?;
        let (_, scheme) = self.scope_and_scheme(&assignment.scope_id).await?;
        self.refresh(&scheme, &assignment).await
    }

    /// Recompute and store the status of every assignment in a scope.
    pub async fn refresh_scope(&self, scope_id: &ScopeId) -> Result<ScopeProgress, CoreError> {
        let (_, scheme) = self.scope_and_scheme(scope_id).await?;
        let mut progress = ScopeProgress::default();

        for assignment in self.store.list_assignments(scope_id).await? {
            let status = self.refresh(&scheme, &assignment).await?;
            if status != assignment.status {
                progress.updated += 1;
            }
            progress.count(status);
        }

        tracing::info!(scope_id = %scope_id, ?progress, "Refreshed scope");
        Ok(progress)
    }

    async fn refresh(&self, scheme: &Scheme, assignment: &Assignment) -> Result<AssignmentStatus, CoreError> {
        let annotations = self
            .store
            .load_annotations(&AnnotationSelector::Assignment(assignment.assignment_id))
            .await?;
        let status = validate(scheme.labels(), &annotations);
        if status != assignment.status {
            tracing::debug!(
                assignment_id = %assignment.assignment_id,
                from = %assignment.status,
                to = %status,
                "Assignment status changed"
            );
            self.store
                .save_assignment_status(assignment.assignment_id, status)
                .await?;
        }
        Ok(status)
    }

    /// Resolve the scope's annotations and replace its consensus.
    pub async fn resolve_scope(&self, scope_id: &ScopeId) -> Result<ScopeResolution, CoreError> {
        self.resolve_scope_with(scope_id, self.options.clone()).await
    }

    /// Resolve with options other than the workflow's own, e.g. to cover a
    /// subset of annotators or labels. The result still replaces the scope's
    /// consensus wholesale.
    pub async fn resolve_scope_with(
        &self,
        scope_id: &ScopeId,
        options: ResolutionOptions,
    ) -> Result<ScopeResolution, CoreError> {
        let lock = self.scope_lock(scope_id).await;
        let result = {
            let _guard = lock.lock().await;
            self.resolve_locked(scope_id, options).await
        };
        self.release_scope_lock(scope_id, lock).await;
        result
    }

    async fn resolve_locked(
        &self,
        scope_id: &ScopeId,
        options: ResolutionOptions,
    ) -> Result<ScopeResolution, CoreError> {
        let (_, scheme) = self.scope_and_scheme(scope_id).await?;
        let annotations = self.scope_annotations(scope_id).await?;

        let filtered = !options.filter.is_empty();
        let outcome = resolve(&scheme, &annotations, options)?;
        let previous = self.store.load_consensus(scope_id).await?;
        let changes = diff_consensus(&previous, &outcome.consensus);
        let consensus = outcome.consensus.len();
        self.store
            .replace_consensus(scope_id, outcome.consensus)
            .await?;

        let result = ScopeResolution {
            scope_id: scope_id.clone(),
            consensus,
            skipped: outcome
                .skipped
                .into_iter()
                .map(|s| SkippedCell {
                    item_id: s.item_id,
                    path: s.path.to_string(),
                    reason: s.error.to_string(),
                })
                .collect(),
            changes,
        };
        tracing::info!(
            scope_id = %scope_id,
            consensus,
            changed = result.changed_cells(),
            skipped = result.skipped.len(),
            filtered,
            "Resolved scope"
        );
        Ok(result)
    }

    /// Inter-rater agreement per label over the scope's annotations.
    ///
    /// Uses the workflow's matrix options and annotation filter.
    pub async fn scope_agreement(&self, scope_id: &ScopeId) -> Result<Vec<LabelAgreement>, CoreError> {
        let annotations = self.scope_annotations(scope_id).await?;
        let matrix = AnnotationMatrix::build_selected(
            &annotations,
            self.options.matrix,
            &self.options.filter,
        );
        let stats = agreement(&matrix);
        tracing::info!(scope_id = %scope_id, labels = stats.len(), "Computed agreement");
        Ok(stats)
    }

    /// Annotations in the scope written after `since`.
    pub async fn pending_changes(&self, scope_id: &ScopeId, since: Timestamp) -> Result<usize, CoreError> {
        let annotations = self.scope_annotations(scope_id).await?;
        Ok(count_changes_after(&annotations, since))
    }

    /// Annotations recorded under the scope's assignments.
    async fn scope_annotations(&self, scope_id: &ScopeId) -> Result<Vec<Annotation>, CoreError> {
        let (assignment_ids, item_ids) = self.scope_members(scope_id).await?;
        Ok(self
            .store
            .load_annotations(&AnnotationSelector::Items(item_ids))
            .await?
            .into_iter()
            .filter(|a| assignment_ids.contains(&a.assignment_id))
            .collect())
    }

    /// Items with at least one assignment in any of `scope_ids`.
    async fn assigned_items(&self, scope_ids: &[ScopeId]) -> Result<HashSet<ItemId>, CoreError> {
        let mut items = HashSet::new();
        for scope_id in scope_ids {
            items.extend(
                self.store
                    .list_assignments(scope_id)
                    .await?
                    .into_iter()
                    .map(|a| a.item_id),
            );
        }
        Ok(items)
    }

    async fn scope_members(&self, scope_id: &ScopeId) -> Result<(HashSet<RowId>, Vec<ItemId>), CoreError> {
        let assignments = self.store.list_assignments(scope_id).await?;
        let assignment_ids = assignments.iter().map(|a| a.assignment_id).collect();
        let item_ids = assignments
            .into_iter()
            .map(|a| a.item_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        Ok((assignment_ids, item_ids))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Snapshot};
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn scope_locks_are_released_after_each_run() {
        let wf = Arc::new(Workflow::new(
            Arc::new(MemoryStore::new(Snapshot::default())),
            ResolutionOptions::default(),
        ));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let wf = Arc::clone(&wf);
                tokio::spawn(async move {
                    let scope_id = format!("scope-{}", i % 2);
                    (
                        wf.resolve_scope(&scope_id).await,
                        wf.create_assignments(&scope_id).await,
                    )
                })
            })
            .collect();
        for handle in handles {
            let (resolved, distributed) = handle.await.unwrap();
            assert_matches!(resolved, Err(CoreError::NotFound { .. }));
            assert_matches!(distributed, Err(CoreError::NotFound { .. }));
        }

        assert!(wf.scope_locks.lock().await.is_empty());
    }
}
