//! Hierarchical label schemes and their flattening.
//!
//! A scheme is a list of root [`Label`]s. Labels with choices may nest further
//! labels under individual [`Choice`]s, to arbitrary (but guarded) depth. The
//! tree is owned by [`Scheme`] and read-only once constructed; the derived
//! [`FlattenedLabel`] list is the depth-first pre-order view used for display,
//! diffing and label lookup during resolution.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum nesting depth of a scheme. Root labels sit at depth 1.
pub const MAX_SCHEME_DEPTH: usize = 32;

/// Default `max_repeat` for labels that do not declare one.
pub const DEFAULT_MAX_REPEAT: u32 = 1;

// ---------------------------------------------------------------------------
// Label kinds
// ---------------------------------------------------------------------------

/// The kind of value a label records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelKind {
    /// Binary label, stored as a bool.
    Bool,
    /// Single choice from the label's choices, stored as the choice value.
    #[default]
    Single,
    /// Any number of choices, stored as a list of choice values.
    Multi,
    /// Free text.
    Str,
    /// Extracted integer.
    Int,
    /// Extracted number.
    Float,
}

impl LabelKind {
    /// Return the kind as a lowercase string slice.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Single => "single",
            Self::Multi => "multi",
            Self::Str => "str",
            Self::Int => "int",
            Self::Float => "float",
        }
    }

    /// Whether labels of this kind may declare choices (and thus children).
    pub fn allows_choices(&self) -> bool {
        matches!(self, Self::Bool | Self::Single | Self::Multi)
    }
}

impl fmt::Display for LabelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tree types
// ---------------------------------------------------------------------------

/// One option of a `bool`, `single` or `multi` label.
///
/// For `bool` labels, value `1` stands for `true` and `0` for `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Labels that apply only when this choice is selected.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Label>,
}

impl Choice {
    pub fn new(value: i64) -> Self {
        Self {
            value,
            name: None,
            hint: None,
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_children(mut self, children: Vec<Label>) -> Self {
        self.children = children;
        self
    }
}

/// One node of a scheme.
///
/// `key` is unique among the labels nested under the same parent label (or
/// among the roots), not globally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Label {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub kind: LabelKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_max_repeat")]
    pub max_repeat: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<Choice>,
}

fn default_required() -> bool {
    true
}

fn default_max_repeat() -> u32 {
    DEFAULT_MAX_REPEAT
}

impl Label {
    /// A required, non-repeatable label without choices.
    pub fn new(key: impl Into<String>, kind: LabelKind) -> Self {
        Self {
            key: key.into(),
            name: None,
            hint: None,
            kind,
            required: true,
            max_repeat: DEFAULT_MAX_REPEAT,
            choices: Vec::new(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_max_repeat(mut self, max_repeat: u32) -> Self {
        self.max_repeat = max_repeat;
        self
    }

    pub fn with_choices(mut self, choices: Vec<Choice>) -> Self {
        self.choices = choices;
        self
    }

    /// Look up a choice by value.
    pub fn choice(&self, value: i64) -> Option<&Choice> {
        self.choices.iter().find(|c| c.value == value)
    }

    /// Choices whose value is in `values`, in declaration order.
    pub fn selected_choices(&self, values: &[i64]) -> Vec<&Choice> {
        self.choices
            .iter()
            .filter(|c| values.contains(&c.value))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Flattening
// ---------------------------------------------------------------------------

/// Non-owning, flat view of one label node.
///
/// Several flattened labels may share a `key` when it recurs under different
/// parents; `key_path` (or `parent_key`) disambiguates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedLabel {
    pub key: String,
    pub kind: LabelKind,
    pub required: bool,
    pub max_repeat: u32,
    /// `max_repeat` times the product of every ancestor's `max_repeat`.
    pub implicit_max_repeat: u32,
    pub parent_key: Option<String>,
    /// Value of the parent choice this label hangs under.
    pub parent_choice: Option<i64>,
    /// Keys from the root label down to this one (inclusive).
    pub key_path: Vec<String>,
    /// 1 for root labels.
    pub depth: usize,
    /// Values of this label's own choices.
    pub choices: Vec<i64>,
}

impl FlattenedLabel {
    /// Whether this label sits exactly at `key_path` (root key first).
    pub fn is_at<S: AsRef<str>>(&self, key_path: &[S]) -> bool {
        self.key_path.len() == key_path.len()
            && self.key_path.iter().zip(key_path).all(|(a, b)| a == b.as_ref())
    }
}

struct Frame<'a> {
    label: &'a Label,
    parent_key: Option<&'a str>,
    parent_choice: Option<i64>,
    parent_path: Vec<String>,
    ancestor_repeat: u32,
    depth: usize,
}

/// Flatten a label tree in depth-first pre-order.
///
/// Walks with an explicit stack; exceeding [`MAX_SCHEME_DEPTH`] fails with a
/// scheme error instead of recursing further.
pub fn flatten(labels: &[Label]) -> Result<Vec<FlattenedLabel>, CoreError> {
    let mut out = Vec::new();
    let mut stack: Vec<Frame<'_>> = labels
        .iter()
        .rev()
        .map(|label| Frame {
            label,
            parent_key: None,
            parent_choice: None,
            parent_path: Vec::new(),
            ancestor_repeat: 1,
            depth: 1,
        })
        .collect();

    while let Some(frame) = stack.pop() {
        let label = frame.label;
        if frame.depth > MAX_SCHEME_DEPTH {
            return Err(too_deep(&label.key));
        }

        let implicit_max_repeat = label.max_repeat.saturating_mul(frame.ancestor_repeat);
        let mut key_path = frame.parent_path;
        key_path.push(label.key.clone());

        // Reverse push so the first child of the first choice is popped next.
        for choice in label.choices.iter().rev() {
            for child in choice.children.iter().rev() {
                stack.push(Frame {
                    label: child,
                    parent_key: Some(&label.key),
                    parent_choice: Some(choice.value),
                    parent_path: key_path.clone(),
                    ancestor_repeat: implicit_max_repeat,
                    depth: frame.depth + 1,
                });
            }
        }

        out.push(FlattenedLabel {
            key: label.key.clone(),
            kind: label.kind,
            required: label.required,
            max_repeat: label.max_repeat,
            implicit_max_repeat,
            parent_key: frame.parent_key.map(str::to_owned),
            parent_choice: frame.parent_choice,
            key_path,
            depth: frame.depth,
            choices: label.choices.iter().map(|c| c.value).collect(),
        });
    }

    Ok(out)
}

fn too_deep(key: &str) -> CoreError {
    CoreError::Scheme {
        key: key.to_string(),
        message: format!("nesting exceeds {MAX_SCHEME_DEPTH} levels"),
    }
}

// ---------------------------------------------------------------------------
// Structural checks
// ---------------------------------------------------------------------------

fn scheme_error(key: &str, message: impl Into<String>) -> CoreError {
    CoreError::Scheme {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Check the structural rules of a label tree.
///
/// - `key` is non-empty and unique among the labels nested under the same
///   parent label (across all of that label's choices) or among the roots.
/// - `max_repeat` is at least 1.
/// - Only `bool`, `single` and `multi` labels declare choices; choice values
///   are unique per label; `bool` choices use the values 0 and 1.
/// - Nesting stays within [`MAX_SCHEME_DEPTH`].
pub fn check_structure(labels: &[Label]) -> Result<(), CoreError> {
    let mut stack: Vec<(Vec<&Label>, usize)> = vec![(labels.iter().collect(), 1)];

    while let Some((siblings, depth)) = stack.pop() {
        let mut seen_keys = HashSet::with_capacity(siblings.len());
        for label in siblings {
            if depth > MAX_SCHEME_DEPTH {
                return Err(too_deep(&label.key));
            }
            if label.key.trim().is_empty() {
                return Err(scheme_error(&label.key, "label key must not be empty"));
            }
            if !seen_keys.insert(label.key.as_str()) {
                return Err(scheme_error(&label.key, "duplicate key under the same parent"));
            }
            if label.max_repeat == 0 {
                return Err(scheme_error(&label.key, "max_repeat must be at least 1"));
            }
            if !label.choices.is_empty() && !label.kind.allows_choices() {
                return Err(scheme_error(
                    &label.key,
                    format!("'{}' labels cannot declare choices", label.kind),
                ));
            }

            let mut seen_values = HashSet::with_capacity(label.choices.len());
            for choice in &label.choices {
                if !seen_values.insert(choice.value) {
                    return Err(scheme_error(
                        &label.key,
                        format!("duplicate choice value {}", choice.value),
                    ));
                }
                if label.kind == LabelKind::Bool && !matches!(choice.value, 0 | 1) {
                    return Err(scheme_error(
                        &label.key,
                        format!("bool choice value must be 0 or 1, got {}", choice.value),
                    ));
                }
            }

            let nested: Vec<&Label> = label
                .choices
                .iter()
                .flat_map(|c| c.children.iter())
                .collect();
            if !nested.is_empty() {
                stack.push((nested, depth + 1));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Scheme
// ---------------------------------------------------------------------------

/// A validated, immutable label tree with its cached flattening.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Label>", into = "Vec<Label>")]
pub struct Scheme {
    labels: Vec<Label>,
    flat: Vec<FlattenedLabel>,
}

impl Scheme {
    pub fn new(labels: Vec<Label>) -> Result<Self, CoreError> {
        check_structure(&labels)?;
        let flat = flatten(&labels)?;
        Ok(Self { labels, flat })
    }

    /// Root labels of the tree.
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Flattened labels in depth-first pre-order.
    pub fn flattened(&self) -> &[FlattenedLabel] {
        &self.flat
    }

    /// Every flattened label at an exact key path (root key first).
    ///
    /// Structurally checked schemes yield at most one.
    pub fn labels_at<'a, S: AsRef<str>>(
        &'a self,
        key_path: &'a [S],
    ) -> impl Iterator<Item = &'a FlattenedLabel> + 'a {
        self.flat.iter().filter(move |l| l.is_at(key_path))
    }

    /// The first flattened label at an exact key path.
    ///
    /// The result borrows from the scheme only, so `key_path` may be a
    /// temporary.
    pub fn label_at<S: AsRef<str>>(&self, key_path: &[S]) -> Option<&FlattenedLabel> {
        self.flat.iter().find(|l| l.is_at(key_path))
    }

    /// The first flattened label (pre-order) with this key, at any depth.
    pub fn first_with_key(&self, key: &str) -> Option<&FlattenedLabel> {
        self.flat.iter().find(|l| l.key == key)
    }

    /// Whether `key` names any label of the scheme.
    pub fn contains_key(&self, key: &str) -> bool {
        self.flat.iter().any(|l| l.key == key)
    }
}

impl TryFrom<Vec<Label>> for Scheme {
    type Error = CoreError;

    fn try_from(labels: Vec<Label>) -> Result<Self, Self::Error> {
        Self::new(labels)
    }
}

impl From<Scheme> for Vec<Label> {
    fn from(scheme: Scheme) -> Self {
        scheme.labels
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
