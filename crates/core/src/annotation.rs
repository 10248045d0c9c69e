//! Annotation, assignment and consensus records.
//!
//! These are the rows the engine reads and produces. Loading and persisting
//! them is left to a [`WorkflowStore`](crate::store::WorkflowStore).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::scheme::LabelKind;
use crate::types::{new_row_id, ItemId, RowId, ScopeId, Timestamp, UserId};

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// The single value an annotation records.
///
/// Serializes as a one-key object named after the storage column, e.g.
/// `{"value_bool": true}` or `{"multi_int": [1, 3]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationValue {
    #[serde(rename = "value_bool")]
    Bool(bool),
    /// Freeform integers and `single` choice values.
    #[serde(rename = "value_int")]
    Int(i64),
    #[serde(rename = "value_float")]
    Float(f64),
    #[serde(rename = "value_str")]
    Str(String),
    #[serde(rename = "multi_int")]
    Multi(Vec<i64>),
}

impl AnnotationValue {
    /// Storage column name of the populated field.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "value_bool",
            Self::Int(_) => "value_int",
            Self::Float(_) => "value_float",
            Self::Str(_) => "value_str",
            Self::Multi(_) => "multi_int",
        }
    }

    /// Whether this value is the representation used by `kind`.
    pub fn matches_kind(&self, kind: LabelKind) -> bool {
        matches!(
            (self, kind),
            (Self::Bool(_), LabelKind::Bool)
                | (Self::Int(_), LabelKind::Single | LabelKind::Int)
                | (Self::Float(_), LabelKind::Float)
                | (Self::Str(_), LabelKind::Str)
                | (Self::Multi(_), LabelKind::Multi)
        )
    }

    /// Choice values this value selects.
    ///
    /// `true`/`false` select the choices valued 1/0, an int selects its own
    /// value, a multi value selects every listed value. Text and floats never
    /// select a choice.
    pub fn selected_choices(&self) -> Vec<i64> {
        match self {
            Self::Bool(b) => vec![i64::from(*b)],
            Self::Int(v) => vec![*v],
            Self::Multi(values) => values.clone(),
            Self::Float(_) | Self::Str(_) => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Annotation
// ---------------------------------------------------------------------------

/// One annotator's judgment for one label of one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub annotation_id: RowId,
    pub assignment_id: RowId,
    pub user_id: UserId,
    pub item_id: ItemId,
    pub key: String,
    /// Which repetition of a repeatable label this is, starting at 1.
    #[serde(default = "first_repeat")]
    pub repeat: u32,
    /// Annotation of the parent choice this one is nested under.
    #[serde(default)]
    pub parent: Option<RowId>,
    #[serde(flatten)]
    pub value: AnnotationValue,
    pub created_at: Timestamp,
    #[serde(default)]
    pub updated_at: Option<Timestamp>,
}

fn first_repeat() -> u32 {
    1
}

impl Annotation {
    /// A root-level, first-repeat annotation with a fresh id.
    pub fn new(
        assignment_id: RowId,
        user_id: impl Into<UserId>,
        item_id: impl Into<ItemId>,
        key: impl Into<String>,
        value: AnnotationValue,
    ) -> Self {
        Self {
            annotation_id: new_row_id(),
            assignment_id,
            user_id: user_id.into(),
            item_id: item_id.into(),
            key: key.into(),
            repeat: 1,
            parent: None,
            value,
            created_at: chrono::Utc::now(),
            updated_at: None,
        }
    }

    pub fn with_repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_parent(mut self, parent: RowId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    /// Last time the row was written.
    pub fn last_modified(&self) -> Timestamp {
        self.updated_at.unwrap_or(self.created_at).max(self.created_at)
    }
}

/// Canonical order for reproducible aggregation: annotator, then creation
/// time, then id.
pub fn sort_canonical(annotations: &mut [Annotation]) {
    annotations.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.annotation_id.cmp(&b.annotation_id))
    });
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// Completion status of an assignment. Derived, never set by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssignmentStatus {
    /// Nothing recorded yet.
    Open,
    /// Some required label is still missing.
    Partial,
    /// Every required label is present within its repeat limits.
    Full,
    /// Something does not comply with the scheme.
    Invalid,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Partial => "PARTIAL",
            Self::Full => "FULL",
            Self::Invalid => "INVALID",
        }
    }

    /// Rank used when merging sibling branches: INVALID > PARTIAL > FULL.
    ///
    /// OPEN never results from a non-empty annotation set and ranks lowest.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Full => 1,
            Self::Partial => 2,
            Self::Invalid => 3,
        }
    }

    /// The more severe of two statuses.
    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One annotator's obligation to label one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub assignment_id: RowId,
    pub scope_id: ScopeId,
    pub user_id: UserId,
    pub item_id: ItemId,
    /// Presentation order within the scope.
    pub order: u32,
    pub status: AssignmentStatus,
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One `(key, repeat)` step of a path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathSegment {
    pub key: String,
    pub repeat: u32,
}

impl PathSegment {
    pub fn new(key: impl Into<String>, repeat: u32) -> Self {
        Self {
            key: key.into(),
            repeat,
        }
    }
}

/// Root-to-node sequence of `(key, repeat)` steps identifying one node
/// instance of a scheme. Used as the resolution bucket key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelPath(Vec<PathSegment>);

impl LabelPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    pub fn root(key: impl Into<String>, repeat: u32) -> Self {
        Self(vec![PathSegment::new(key, repeat)])
    }

    /// This path extended by one step.
    pub fn child(&self, key: impl Into<String>, repeat: u32) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::new(key, repeat));
        Self(segments)
    }

    /// This path without its last step, or `None` for root paths.
    pub fn parent(&self) -> Option<Self> {
        match self.0.len() {
            0 | 1 => None,
            n => Some(Self(self.0[..n - 1].to_vec())),
        }
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.0.last()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys of every step, root first (repeats dropped).
    pub fn key_path(&self) -> Vec<&str> {
        self.0.iter().map(|s| s.key.as_str()).collect()
    }
}

impl fmt::Display for LabelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}({})", segment.key, segment.repeat)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// A resolved judgment for one `(item, path)` cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusAnnotation {
    pub consensus_id: RowId,
    pub item_id: ItemId,
    pub key: String,
    pub repeat: u32,
    /// Consensus row of the parent choice, when that was resolved too.
    pub parent: Option<RowId>,
    pub path: LabelPath,
    #[serde(flatten)]
    pub value: AnnotationValue,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // -- AnnotationValue ------------------------------------------------------

    #[test]
    fn value_serializes_under_column_name() {
        let json = serde_json::to_value(AnnotationValue::Multi(vec![1, 2])).unwrap();
        assert_eq!(json, serde_json::json!({"multi_int": [1, 2]}));
    }

    #[test]
    fn annotation_flattens_value_field() {
        let json = serde_json::json!({
            "annotation_id": "0190a5b2-0000-7000-8000-000000000001",
            "assignment_id": "0190a5b2-0000-7000-8000-000000000002",
            "user_id": "u1",
            "item_id": "i1",
            "key": "rel",
            "value_bool": true,
            "created_at": "2024-01-01T00:00:00Z"
        });
        let annotation: Annotation = serde_json::from_value(json).unwrap();
        assert_eq!(annotation.value, AnnotationValue::Bool(true));
        assert_eq!(annotation.repeat, 1);
        assert!(annotation.parent.is_none());
    }

    #[test]
    fn value_kind_matching() {
        assert!(AnnotationValue::Int(1).matches_kind(LabelKind::Single));
        assert!(AnnotationValue::Int(1).matches_kind(LabelKind::Int));
        assert!(!AnnotationValue::Bool(true).matches_kind(LabelKind::Single));
        assert!(!AnnotationValue::Multi(vec![]).matches_kind(LabelKind::Single));
        assert!(AnnotationValue::Str("x".into()).matches_kind(LabelKind::Str));
    }

    #[test]
    fn selected_choices_per_value() {
        assert_eq!(AnnotationValue::Bool(true).selected_choices(), vec![1]);
        assert_eq!(AnnotationValue::Bool(false).selected_choices(), vec![0]);
        assert_eq!(AnnotationValue::Int(4).selected_choices(), vec![4]);
        assert_eq!(AnnotationValue::Multi(vec![2, 3]).selected_choices(), vec![2, 3]);
        assert!(AnnotationValue::Float(1.0).selected_choices().is_empty());
    }

    // -- sort_canonical -------------------------------------------------------

    #[test]
    fn canonical_sort_orders_by_user_then_creation() {
        let t0 = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let assignment = new_row_id();
        let mut rows = vec![
            Annotation::new(assignment, "b", "i", "k", AnnotationValue::Int(1)).with_created_at(t0),
            Annotation::new(assignment, "a", "i", "k", AnnotationValue::Int(2)).with_created_at(t1),
            Annotation::new(assignment, "a", "i", "k", AnnotationValue::Int(3)).with_created_at(t0),
        ];
        sort_canonical(&mut rows);
        let values: Vec<_> = rows.iter().map(|r| r.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                AnnotationValue::Int(3),
                AnnotationValue::Int(2),
                AnnotationValue::Int(1)
            ]
        );
    }

    // -- AssignmentStatus -----------------------------------------------------

    #[test]
    fn invalid_beats_partial_beats_full() {
        use AssignmentStatus::*;
        assert_eq!(Full.worst(Partial), Partial);
        assert_eq!(Partial.worst(Invalid), Invalid);
        assert_eq!(Invalid.worst(Partial), Invalid);
        assert_eq!(Full.worst(Full), Full);
    }

    #[test]
    fn status_serializes_uppercase() {
        let json = serde_json::to_value(AssignmentStatus::Partial).unwrap();
        assert_eq!(json, serde_json::json!("PARTIAL"));
    }

    // -- LabelPath ------------------------------------------------------------

    #[test]
    fn path_parent_drops_last_segment() {
        let path = LabelPath::root("rel", 1).child("claim", 2);
        assert_eq!(path.parent(), Some(LabelPath::root("rel", 1)));
        assert_eq!(LabelPath::root("rel", 1).parent(), None);
        assert_eq!(path.key_path(), vec!["rel", "claim"]);
    }

    #[test]
    fn path_display() {
        let path = LabelPath::root("rel", 1).child("claim", 2);
        assert_eq!(path.to_string(), "rel(1)/claim(2)");
    }
}
