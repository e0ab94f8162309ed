use super::FeedEntry;
use crate::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

const DEFAULT_RECENT_LINKS_CAPACITY: usize = 60;

/// Strategy of deciding which feed entries weren't seen yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum NoveltyPolicy {
    /// Remember the last `capacity` links. Tolerates republished and
    /// out-of-order entries.
    RecentLinks { capacity: usize },

    /// Remember the publication time of the newest delivered entry.
    /// Relies on the feed being sorted newest-first.
    Timestamp,
}

impl Default for NoveltyPolicy {
    fn default() -> Self {
        Self::RecentLinks {
            capacity: DEFAULT_RECENT_LINKS_CAPACITY,
        }
    }
}

/// Cursor separating already processed feed entries from the unseen ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Watermark {
    RecentLinks(RecentLinks),
    Timestamp { newest: Option<DateTime<Utc>> },
}

impl Watermark {
    pub(crate) fn empty(policy: &NoveltyPolicy) -> Self {
        match *policy {
            NoveltyPolicy::RecentLinks { capacity } => Self::RecentLinks(RecentLinks::new(capacity)),
            NoveltyPolicy::Timestamp => Self::Timestamp { newest: None },
        }
    }

    /// Watermark that treats all of the given entries as already seen
    pub(crate) fn primed(policy: &NoveltyPolicy, entries: &[FeedEntry]) -> Self {
        let (_, watermark) = Self::empty(policy).filter_new(entries);
        watermark
    }

    /// Makes the watermark usable with the given policy. The persisted state
    /// may have been produced with a different policy or capacity.
    ///
    /// A watermark of the other policy tells nothing about `entries`, so it is
    /// replaced with the one primed from them.
    pub(crate) fn conform_to(self, policy: &NoveltyPolicy, entries: &[FeedEntry]) -> Self {
        match (self, policy) {
            (Self::RecentLinks(mut links), &NoveltyPolicy::RecentLinks { capacity }) => {
                links.set_capacity(capacity, &fetched_links(entries));
                Self::RecentLinks(links)
            }
            (this @ Self::Timestamp { .. }, NoveltyPolicy::Timestamp) => this,
            (this, policy) => {
                warn!(
                    ?policy,
                    watermark = ?this,
                    "Watermark doesn't match the novelty policy, priming it from the current feed"
                );
                Self::primed(policy, entries)
            }
        }
    }

    /// Returns the entries that weren't seen yet ordered oldest-first, and the
    /// watermark that includes them. `entries` must be ordered newest-first.
    ///
    /// If there are no new entries, the returned watermark is equal to `self`.
    pub(crate) fn filter_new(&self, entries: &[FeedEntry]) -> (Vec<FeedEntry>, Watermark) {
        match self {
            Self::RecentLinks(links) => {
                let mut batch_links = HashSet::new();
                let mut new_entries: Vec<_> = entries
                    .iter()
                    .filter(|entry| !links.contains(&entry.link))
                    .filter(|entry| batch_links.insert(entry.link.as_str()))
                    .cloned()
                    .collect();

                if new_entries.is_empty() {
                    return (new_entries, self.clone());
                }

                new_entries.reverse();

                let mut links = links.clone();
                links
                    .links
                    .extend(new_entries.iter().map(|entry| entry.link.clone()));

                // Links that are still in the feed must survive, otherwise
                // they would be treated as new by the next fetch
                links.evict_overflow(&fetched_links(entries));

                (new_entries, Self::RecentLinks(links))
            }
            Self::Timestamp { newest } => {
                // Undated entries can't be compared with the watermark. `None`
                // is less than any `Some`, so the first fetch takes all dated ones.
                let mut new_entries: Vec<_> = entries
                    .iter()
                    .filter(|entry| entry.published_at.is_some())
                    .take_while(|entry| entry.published_at > *newest)
                    .cloned()
                    .collect();

                if new_entries.is_empty() {
                    return (new_entries, self.clone());
                }

                // Guard against a feed with broken ordering
                let newest = (*newest).max(new_entries[0].published_at);

                new_entries.reverse();

                (new_entries, Self::Timestamp { newest })
            }
        }
    }
}

/// Bounded FIFO set of links. The oldest link is evicted on overflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecentLinks {
    capacity: usize,
    links: VecDeque<String>,
}

impl RecentLinks {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            links: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn contains(&self, link: &str) -> bool {
        self.links.iter().any(|recent| recent == link)
    }

    /// Adds the link as the newest one unless it is already present.
    pub(crate) fn push(&mut self, link: String) {
        if self.contains(&link) {
            return;
        }
        self.links.push_back(link);
        self.evict_overflow(&HashSet::new());
    }

    pub(crate) fn len(&self) -> usize {
        self.links.len()
    }

    fn set_capacity(&mut self, capacity: usize, keep: &HashSet<&str>) {
        self.capacity = capacity;
        self.evict_overflow(keep);
    }

    /// Evicts the oldest links over the capacity except the ones in `keep`.
    /// The set stays over the capacity if `keep` alone doesn't fit into it.
    fn evict_overflow(&mut self, keep: &HashSet<&str>) {
        let mut overflow = self.links.len().saturating_sub(self.capacity);
        self.links.retain(|link| {
            if overflow == 0 || keep.contains(link.as_str()) {
                return true;
            }
            overflow -= 1;
            false
        });
    }
}

fn fetched_links(entries: &[FeedEntry]) -> HashSet<&str> {
    entries.iter().map(|entry| entry.link.as_str()).collect()
}
