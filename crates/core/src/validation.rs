//! Assignment completion status.
//!
//! Classifies one assignment's recorded annotations against its scheme as
//! OPEN, PARTIAL, FULL or INVALID. The validator never fails: anything it
//! cannot reconcile with the scheme is reported as an issue and degrades the
//! status, with INVALID > PARTIAL > FULL when merging across branches.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::annotation::{Annotation, AssignmentStatus};
use crate::scheme::{Label, LabelKind, MAX_SCHEME_DEPTH};
use crate::types::RowId;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// What went wrong for one label under one parent annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IssueKind {
    /// A required label has no annotation under this parent.
    MissingRequired,
    /// More annotations under this parent than `max_repeat` allows.
    TooManyRepeats { count: usize, max_repeat: u32 },
    /// `repeat` is 0 or above `max_repeat`.
    RepeatOutOfRange { repeat: u32, max_repeat: u32 },
    /// Two annotations share `(key, parent, repeat)`.
    DuplicateRepeat { repeat: u32 },
    /// The recorded value is not the representation of the label kind.
    KindMismatch {
        expected: LabelKind,
        found: &'static str,
    },
    /// Nesting deeper than the scheme depth guard.
    TooDeep,
}

impl IssueKind {
    /// Status this issue forces on the assignment.
    pub fn status(&self) -> AssignmentStatus {
        match self {
            Self::MissingRequired => AssignmentStatus::Partial,
            _ => AssignmentStatus::Invalid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub key: String,
    pub parent: Option<RowId>,
    #[serde(flatten)]
    pub kind: IssueKind,
}

/// Status plus every finding that contributed to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub status: AssignmentStatus,
    pub issues: Vec<ValidationIssue>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Compute the status of an assignment from its annotations.
pub fn validate(scheme: &[Label], annotations: &[Annotation]) -> AssignmentStatus {
    validate_detailed(scheme, annotations).status
}

/// Compute the status of an assignment and list the issues behind it.
///
/// Annotations whose key does not occur in the scheme, or whose parent is
/// never reached by the walk, are ignored.
pub fn validate_detailed(scheme: &[Label], annotations: &[Annotation]) -> ValidationReport {
    if annotations.is_empty() {
        return ValidationReport {
            status: AssignmentStatus::Open,
            issues: Vec::new(),
        };
    }

    let lookup = index_by_key(annotations);
    let mut issues = Vec::new();
    let mut stack: Vec<(&[Label], Option<RowId>, usize)> = vec![(scheme, None, 1)];

    while let Some((labels, parent, depth)) = stack.pop() {
        for label in labels {
            let mut issue = |kind: IssueKind| {
                issues.push(ValidationIssue {
                    key: label.key.clone(),
                    parent,
                    kind,
                })
            };

            if depth > MAX_SCHEME_DEPTH {
                issue(IssueKind::TooDeep);
                continue;
            }

            let matching: Vec<&Annotation> = lookup
                .get(label.key.as_str())
                .map(|rows| rows.iter().copied().filter(|a| a.parent == parent).collect())
                .unwrap_or_default();

            if matching.is_empty() {
                if label.required {
                    issue(IssueKind::MissingRequired);
                }
                continue;
            }

            if matching.len() > label.max_repeat as usize {
                issue(IssueKind::TooManyRepeats {
                    count: matching.len(),
                    max_repeat: label.max_repeat,
                });
            }

            let mut seen_repeats = HashSet::with_capacity(matching.len());
            for annotation in matching {
                if annotation.repeat == 0 || annotation.repeat > label.max_repeat {
                    issue(IssueKind::RepeatOutOfRange {
                        repeat: annotation.repeat,
                        max_repeat: label.max_repeat,
                    });
                }
                if !seen_repeats.insert(annotation.repeat) {
                    issue(IssueKind::DuplicateRepeat {
                        repeat: annotation.repeat,
                    });
                }
                if !annotation.value.matches_kind(label.kind) {
                    issue(IssueKind::KindMismatch {
                        expected: label.kind,
                        found: annotation.value.field_name(),
                    });
                    continue;
                }

                let selected = annotation.value.selected_choices();
                for choice in label.selected_choices(&selected) {
                    if !choice.children.is_empty() {
                        stack.push((&choice.children, Some(annotation.annotation_id), depth + 1));
                    }
                }
            }
        }
    }

    let status = issues
        .iter()
        .fold(AssignmentStatus::Full, |acc, i| acc.worst(i.kind.status()));

    ValidationReport { status, issues }
}

/// Group annotations by key, each group sorted by `repeat`.
fn index_by_key(annotations: &[Annotation]) -> HashMap<&str, Vec<&Annotation>> {
    let mut lookup: HashMap<&str, Vec<&Annotation>> = HashMap::new();
    for annotation in annotations {
        lookup
            .entry(annotation.key.as_str())
            .or_default()
            .push(annotation);
    }
    for rows in lookup.values_mut() {
        rows.sort_by_key(|a| a.repeat);
    }
    lookup
}

// ---------------------------------------------------------------------------
// Annotated tree
// ---------------------------------------------------------------------------

/// A scheme label paired with the annotations recorded for it under one
/// parent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedLabel {
    pub key: String,
    pub kind: LabelKind,
    pub required: bool,
    pub max_repeat: u32,
    pub instances: Vec<AnnotatedInstance>,
}

/// One recorded annotation and the labels of the choices it selected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedInstance {
    pub annotation: Annotation,
    pub children: Vec<AnnotatedLabel>,
}

/// The scheme with an assignment's annotations merged into it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedAssignment {
    pub status: AssignmentStatus,
    pub labels: Vec<AnnotatedLabel>,
}

/// Merge annotations into a copy of the scheme tree for display.
///
/// Labels without annotations are kept with no instances, so the result
/// always mirrors the scheme's shape down to the selected choices.
pub fn annotated_tree(scheme: &[Label], annotations: &[Annotation]) -> AnnotatedAssignment {
    let status = validate(scheme, annotations);
    let lookup = index_by_key(annotations);
    AnnotatedAssignment {
        status,
        labels: annotate_level(scheme, None, &lookup, 1),
    }
}

fn annotate_level(
    labels: &[Label],
    parent: Option<RowId>,
    lookup: &HashMap<&str, Vec<&Annotation>>,
    depth: usize,
) -> Vec<AnnotatedLabel> {
    if depth > MAX_SCHEME_DEPTH {
        return Vec::new();
    }

    labels
        .iter()
        .map(|label| {
            let instances = lookup
                .get(label.key.as_str())
                .into_iter()
                .flatten()
                .filter(|a| a.parent == parent)
                .map(|annotation| {
                    let selected = annotation.value.selected_choices();
                    let children = label
                        .selected_choices(&selected)
                        .into_iter()
                        .flat_map(|choice| {
                            annotate_level(
                                &choice.children,
                                Some(annotation.annotation_id),
                                lookup,
                                depth + 1,
                            )
                        })
                        .collect();
                    AnnotatedInstance {
                        annotation: (*annotation).clone(),
                        children,
                    }
                })
                .collect();

            AnnotatedLabel {
                key: label.key.clone(),
                kind: label.kind,
                required: label.required,
                max_repeat: label.max_repeat,
                instances,
            }
        })
        .collect()
}

/// Flatten an annotated tree back into annotation rows.
///
/// Each instance's `parent` is rewritten from its position in the tree, so
/// rows edited in the tree come back consistently linked.
pub fn annotations_from_tree(labels: &[AnnotatedLabel]) -> Vec<Annotation> {
    let mut out = Vec::new();
    let mut stack: Vec<(&[AnnotatedLabel], Option<RowId>)> = vec![(labels, None)];

    while let Some((level, parent)) = stack.pop() {
        for label in level {
            for instance in &label.instances {
                let mut annotation = instance.annotation.clone();
                annotation.parent = parent;
                if !instance.children.is_empty() {
                    stack.push((&instance.children, Some(annotation.annotation_id)));
                }
                out.push(annotation);
            }
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
