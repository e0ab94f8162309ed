use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Tag in the canonical form: lower-cased, with whitespace replaced by
/// underscores, so `Open Source` and `open_source` are the same tag.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct NormalizedTag(String);

impl NormalizedTag {
    /// Returns `None` if the input has no visible characters.
    pub(crate) fn new(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let tag = raw
            .chars()
            .flat_map(char::to_lowercase)
            .map(|char| if char.is_whitespace() { '_' } else { char })
            .collect();

        Some(Self(tag))
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of tags a subscriber wants to receive. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct TagFilter(BTreeSet<NormalizedTag>);

impl TagFilter {
    pub(crate) fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn contains(&self, tag: &NormalizedTag) -> bool {
        self.0.contains(tag)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &NormalizedTag> {
        self.0.iter()
    }
}

impl FromIterator<NormalizedTag> for TagFilter {
    fn from_iter<I: IntoIterator<Item = NormalizedTag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for TagFilter {
    type Item = NormalizedTag;
    type IntoIter = std::collections::btree_set::IntoIter<NormalizedTag>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Splits user input on whitespace into a de-duplicated set of tags.
pub(crate) fn parse_tag_list(input: &str) -> TagFilter {
    input.split_whitespace().filter_map(NormalizedTag::new).collect()
}
