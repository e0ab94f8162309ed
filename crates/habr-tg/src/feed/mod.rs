//! Everything about the syndication feeds of the sites: fetching, parsing,
//! and tracking which entries were already processed.
mod entry;
mod fetcher;
mod novelty;
mod site;
mod tag;
mod watermark;

pub(crate) use entry::*;
pub(crate) use fetcher::*;
pub(crate) use novelty::*;
pub(crate) use site::*;
pub(crate) use tag::*;
pub(crate) use watermark::*;

#[cfg(test)]
pub(crate) use entry::tests::entry as entry_for_tests;

use retry_policies::policies::ExponentialBackoff;
use serde::Deserialize;
use serde_with::serde_as;
use std::time::Duration;
use url::Url;

#[serde_as]
#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    /// JSON array of site definitions
    #[serde_as(as = "serde_with::json::JsonString")]
    #[serde(default = "default_sites")]
    pub(crate) sites: Vec<Site>,

    #[serde(default = "default_fetch_attempts")]
    pub(crate) fetch_attempts: u32,

    #[serde(default = "default_fetch_backoff_ms")]
    pub(crate) fetch_backoff_ms: u64,
}

fn default_fetch_attempts() -> u32 {
    10
}

fn default_fetch_backoff_ms() -> u64 {
    500
}

impl Config {
    /// Constant delay between the attempts
    pub(crate) fn retry_policy(&self) -> ExponentialBackoff {
        let backoff = Duration::from_millis(self.fetch_backoff_ms);
        ExponentialBackoff::builder()
            .retry_bounds(backoff, backoff)
            .build_with_max_retries(self.fetch_attempts.saturating_sub(1))
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum FeedError {
    #[error("Failed to fetch the feed {url} after {attempts} attempts")]
    RetryLimitExceeded {
        url: Url,
        attempts: u32,
        source: crate::Error,
    },

    #[error("Failed to parse the feed")]
    Parse {
        source: feed_rs::parser::ParseFeedError,
    },
}
