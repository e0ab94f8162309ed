use super::{parse_feed, FeedEntry, FeedError};
use crate::http;
use crate::prelude::*;
use crate::util::retry::retry;
use crate::Result;
use async_trait::async_trait;
use retry_policies::policies::ExponentialBackoff;
use url::Url;

/// Source of feed entries. The production implementation goes to the network.
#[async_trait]
pub(crate) trait FeedSource: Send + Sync {
    /// Returns the entries in the order of the feed document (newest-first).
    async fn fetch(&self, url: &Url) -> Result<Vec<FeedEntry>>;
}

pub(crate) struct FeedFetcher {
    http: http::Client,
    retry: ExponentialBackoff,
}

impl FeedFetcher {
    pub(crate) fn new(http: http::Client, retry: ExponentialBackoff) -> Self {
        Self { http, retry }
    }

    async fn fetch_once(&self, url: &Url) -> Result<Vec<FeedEntry>> {
        let payload = self.http.get(url.clone()).read_bytes().await?;
        parse_feed(&payload)
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    #[instrument(skip(self, url), fields(url = %url))]
    async fn fetch(&self, url: &Url) -> Result<Vec<FeedEntry>> {
        let mut attempts: u32 = 0;
        let entries = retry(&self.retry, || {
            attempts += 1;
            self.fetch_once(url)
        })
        .await
        .map_err(|source| {
            err!(FeedError::RetryLimitExceeded {
                url: url.clone(),
                attempts,
                source,
            })
        })?;

        debug!(entries = entries.len(), "Fetched feed");

        Ok(entries)
    }
}
