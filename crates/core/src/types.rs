/// Annotation, assignment and consensus rows are keyed by UUID.
pub type RowId = uuid::Uuid;

/// Items are referenced by their external identifier.
pub type ItemId = String;

/// Annotators (human or automated) are referenced by their external identifier.
pub type UserId = String;

/// Assignment scopes group the assignments of one allocation run.
pub type ScopeId = String;

/// Annotation schemes are versioned and stored outside the core.
pub type SchemeId = String;

/// Projects own items, schemes and scopes.
pub type ProjectId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Generate a fresh row id (UUIDv7, timestamp-sortable).
pub fn new_row_id() -> RowId {
    uuid::Uuid::now_v7()
}
