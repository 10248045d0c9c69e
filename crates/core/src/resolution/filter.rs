//! Annotation subsets covered by a resolution run.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::annotation::Annotation;
use crate::types::UserId;

/// Restricts which annotations a resolution run aggregates.
///
/// Each set left empty selects everything along that axis. `keys` and
/// `repeats` match an annotation's own key and repeat, not its ancestors',
/// so a run over `claim` still follows `claim`'s parent chain to build its
/// path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationFilter {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub users: BTreeSet<UserId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub keys: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub repeats: BTreeSet<u32>,
}

impl AnnotationFilter {
    pub fn users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_repeats(mut self, repeats: impl IntoIterator<Item = u32>) -> Self {
        self.repeats = repeats.into_iter().collect();
        self
    }

    /// Whether the filter selects every annotation.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.keys.is_empty() && self.repeats.is_empty()
    }

    pub fn matches(&self, annotation: &Annotation) -> bool {
        (self.users.is_empty() || self.users.contains(&annotation.user_id))
            && (self.keys.is_empty() || self.keys.contains(&annotation.key))
            && (self.repeats.is_empty() || self.repeats.contains(&annotation.repeat))
    }
}
