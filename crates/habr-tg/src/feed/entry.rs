use super::{FeedError, NormalizedTag};
use crate::prelude::*;
use crate::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// Single article announced by a feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FeedEntry {
    pub(crate) title: String,
    pub(crate) link: String,
    /// Absent if the feed gives neither the publication nor the update time
    pub(crate) published_at: Option<DateTime<Utc>>,
    pub(crate) categories: BTreeSet<NormalizedTag>,
}

/// Parses RSS or Atom document preserving the document order of the entries,
/// which for the feeds we consume is newest-first.
///
/// Entries without a link are dropped, because there is nothing to deliver
/// for them and they can't participate in deduplication.
pub(crate) fn parse_feed(payload: &[u8]) -> Result<Vec<FeedEntry>> {
    let feed = feed_rs::parser::parse(payload).map_err(err_ctx!(FeedError::Parse))?;

    let total = feed.entries.len();

    let entries: Vec<_> = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry.links.into_iter().next()?.href;
            let title = entry
                .title
                .map(|title| title.content.trim().to_owned())
                .unwrap_or_default();

            let published_at = entry.published.or(entry.updated);

            let categories = entry
                .categories
                .iter()
                .filter_map(|category| NormalizedTag::new(&category.term))
                .collect();

            Some(FeedEntry {
                title,
                link,
                published_at,
                categories,
            })
        })
        .collect();

    if entries.len() != total {
        debug!(
            dropped = total - entries.len(),
            "Dropped feed entries without a link"
        );
    }

    Ok(entries)
}
