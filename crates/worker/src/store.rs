//! In-memory [`WorkflowStore`] backed by a JSON snapshot file.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use labelwork_core::annotation::{Annotation, Assignment, AssignmentStatus, ConsensusAnnotation};
use labelwork_core::error::CoreError;
use labelwork_core::sampling::ScopeConfig;
use labelwork_core::scheme::Scheme;
use labelwork_core::store::{AnnotationSelector, ItemFilter, WorkflowStore};
use labelwork_core::types::{ItemId, ProjectId, RowId, SchemeId, ScopeId};

/// One item of a project's pool, with the attributes filters match on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    pub item_id: ItemId,
    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Everything the store holds, as persisted on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub schemes: BTreeMap<SchemeId, Scheme>,
    #[serde(default)]
    pub scopes: BTreeMap<ScopeId, ScopeConfig>,
    #[serde(default)]
    pub items: BTreeMap<ProjectId, Vec<StoredItem>>,
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub consensus: BTreeMap<ScopeId, Vec<ConsensusAnnotation>>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<Snapshot>,
}

fn storage_error(action: &str, path: &Path, err: impl std::fmt::Display) -> CoreError {
    CoreError::Storage(format!("{action} {}: {err}", path.display()))
}

impl MemoryStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            state: RwLock::new(snapshot),
        }
    }

    /// Load a snapshot file. A missing file yields an empty store.
    pub async fn open(path: &Path) -> Result<Self, CoreError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Snapshot not found, starting empty");
                return Ok(Self::default());
            }
            Err(err) => return Err(storage_error("reading", path, err)),
        };
        let snapshot: Snapshot =
            serde_json::from_slice(&bytes).map_err(|e| storage_error("parsing", path, e))?;
        tracing::info!(
            path = %path.display(),
            scopes = snapshot.scopes.len(),
            annotations = snapshot.annotations.len(),
            "Loaded snapshot"
        );
        Ok(Self::new(snapshot))
    }

    /// Write the current state to `path` as pretty-printed JSON.
    pub async fn save(&self, path: &Path) -> Result<(), CoreError> {
        let json = {
            let state = self.state.read().await;
            serde_json::to_vec_pretty(&*state).map_err(|e| storage_error("encoding", path, e))?
        };
        tokio::fs::write(path, json)
            .await
            .map_err(|e| storage_error("writing", path, e))
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> Snapshot {
        self.state.read().await.clone()
    }

    /// Append annotations, replacing rows with the same id.
    pub async fn record_annotations(&self, annotations: Vec<Annotation>) {
        let mut state = self.state.write().await;
        let ids: HashSet<RowId> = annotations.iter().map(|a| a.annotation_id).collect();
        state.annotations.retain(|a| !ids.contains(&a.annotation_id));
        state.annotations.extend(annotations);
    }
}

/// Match an item against a filter of `attribute -> expected value` pairs.
fn matches_filter(item: &StoredItem, filter: &ItemFilter) -> Result<bool, CoreError> {
    match &filter.0 {
        serde_json::Value::Null => Ok(true),
        serde_json::Value::Object(expected) => Ok(expected
            .iter()
            .all(|(key, value)| item.attributes.get(key) == Some(value))),
        other => Err(CoreError::Validation(format!(
            "item filter must be an object, got {other}"
        ))),
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn load_scheme(&self, scheme_id: &SchemeId) -> Result<Scheme, CoreError> {
        self.state
            .read()
            .await
            .schemes
            .get(scheme_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "scheme",
                id: scheme_id.clone(),
            })
    }

    async fn load_annotations(
        &self,
        selector: &AnnotationSelector,
    ) -> Result<Vec<Annotation>, CoreError> {
        let state = self.state.read().await;
        let rows = match selector {
            AnnotationSelector::Assignment(assignment_id) => state
                .annotations
                .iter()
                .filter(|a| a.assignment_id == *assignment_id)
                .cloned()
                .collect(),
            AnnotationSelector::Items(item_ids) => {
                let wanted: HashSet<&str> = item_ids.iter().map(String::as_str).collect();
                state
                    .annotations
                    .iter()
                    .filter(|a| wanted.contains(a.item_id.as_str()))
                    .cloned()
                    .collect()
            }
        };
        Ok(rows)
    }

    async fn load_item_pool(
        &self,
        project_id: &ProjectId,
        filter: &ItemFilter,
    ) -> Result<Vec<ItemId>, CoreError> {
        let state = self.state.read().await;
        let items = state.items.get(project_id).ok_or_else(|| CoreError::NotFound {
            entity: "project",
            id: project_id.clone(),
        })?;

        let mut pool = Vec::with_capacity(items.len());
        for item in items {
            if matches_filter(item, filter)? {
                pool.push(item.item_id.clone());
            }
        }
        Ok(pool)
    }

    async fn load_scope(&self, scope_id: &ScopeId) -> Result<ScopeConfig, CoreError> {
        self.state
            .read()
            .await
            .scopes
            .get(scope_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "scope",
                id: scope_id.clone(),
            })
    }

    async fn load_assignment(&self, assignment_id: RowId) -> Result<Assignment, CoreError> {
        self.state
            .read()
            .await
            .assignments
            .iter()
            .find(|a| a.assignment_id == assignment_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            })
    }

    async fn list_assignments(&self, scope_id: &ScopeId) -> Result<Vec<Assignment>, CoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<Assignment> = state
            .assignments
            .iter()
            .filter(|a| &a.scope_id == scope_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.order, &a.user_id).cmp(&(b.order, &b.user_id)));
        Ok(rows)
    }

    async fn save_assignments(
        &self,
        scope_id: &ScopeId,
        assignments: Vec<Assignment>,
    ) -> Result<(), CoreError> {
        if let Some(stray) = assignments.iter().find(|a| &a.scope_id != scope_id) {
            return Err(CoreError::Validation(format!(
                "assignment {} belongs to scope {}, not {scope_id}",
                stray.assignment_id, stray.scope_id
            )));
        }
        self.state.write().await.assignments.extend(assignments);
        Ok(())
    }

    async fn save_assignment_status(
        &self,
        assignment_id: RowId,
        status: AssignmentStatus,
    ) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        let assignment = state
            .assignments
            .iter_mut()
            .find(|a| a.assignment_id == assignment_id)
            .ok_or_else(|| CoreError::NotFound {
                entity: "assignment",
                id: assignment_id.to_string(),
            })?;
        assignment.status = status;
        Ok(())
    }

    async fn replace_consensus(
        &self,
        scope_id: &ScopeId,
        consensus: Vec<ConsensusAnnotation>,
    ) -> Result<(), CoreError> {
        self.state
            .write()
            .await
            .consensus
            .insert(scope_id.clone(), consensus);
        Ok(())
    }

    async fn load_consensus(
        &self,
        scope_id: &ScopeId,
    ) -> Result<Vec<ConsensusAnnotation>, CoreError> {
        Ok(self
            .state
            .read()
            .await
            .consensus
            .get(scope_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn item(id: &str, lang: &str) -> StoredItem {
        let mut attributes = serde_json::Map::new();
        attributes.insert("lang".into(), serde_json::json!(lang));
        StoredItem {
            item_id: id.into(),
            attributes,
        }
    }

    fn store() -> MemoryStore {
        let mut snapshot = Snapshot::default();
        snapshot
            .items
            .insert("p1".into(), vec![item("a", "en"), item("b", "de"), item("c", "en")]);
        MemoryStore::new(snapshot)
    }

    #[tokio::test]
    async fn item_pool_applies_filter() {
        let store = store();
        let all = store.load_item_pool(&"p1".into(), &ItemFilter::all()).await.unwrap();
        assert_eq!(all, vec!["a", "b", "c"]);

        let english = ItemFilter(serde_json::json!({"lang": "en"}));
        let pool = store.load_item_pool(&"p1".into(), &english).await.unwrap();
        assert_eq!(pool, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn malformed_filter_and_unknown_project() {
        let store = store();
        assert_matches!(
            store
                .load_item_pool(&"p1".into(), &ItemFilter(serde_json::json!(["en"])))
                .await,
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            store.load_item_pool(&"nope".into(), &ItemFilter::all()).await,
            Err(CoreError::NotFound { entity: "project", .. })
        );
    }

    #[tokio::test]
    async fn missing_rows_are_not_found() {
        let store = store();
        assert_matches!(
            store.load_scope(&"s".into()).await,
            Err(CoreError::NotFound { entity: "scope", .. })
        );
        assert_matches!(
            store
                .save_assignment_status(RowId::nil(), AssignmentStatus::Full)
                .await,
            Err(CoreError::NotFound { entity: "assignment", .. })
        );
        assert!(store.load_consensus(&"s".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn open_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::open(&dir.path().join("absent.json")).await.unwrap();
        assert_eq!(store.snapshot().await, Snapshot::default());
    }

    #[tokio::test]
    async fn save_then_open_restores_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let store = store();
        store.save(&path).await.unwrap();

        let reopened = MemoryStore::open(&path).await.unwrap();
        assert_eq!(reopened.snapshot().await, store.snapshot().await);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        tokio::fs::write(&path, b"{not json").await.unwrap();
        assert_matches!(MemoryStore::open(&path).await, Err(CoreError::Storage(_)));
    }
}
