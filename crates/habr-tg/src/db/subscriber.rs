use crate::feed::{NormalizedTag, SiteId, TagFilter};
use crate::prelude::*;
use crate::Result;
use itertools::Itertools;
use std::collections::HashMap;
use teloxide::types::ChatId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Subscriber {
    pub(crate) id: ChatId,
    pub(crate) mailout_enabled: bool,

    /// Tags of the particular site the subscriber was queried for
    pub(crate) tags: TagFilter,
}

#[derive(sqlx::FromRow)]
struct SubscriberRecord {
    id: i64,
    mailout_enabled: bool,
}

#[derive(sqlx::FromRow)]
struct SubscriberTagRecord {
    subscriber_id: i64,
    tag: String,
}

impl SubscriberRecord {
    fn into_subscriber(self, tags: TagFilter) -> Subscriber {
        Subscriber {
            id: ChatId(self.id),
            mailout_enabled: self.mailout_enabled,
            tags,
        }
    }
}

/// Tags are normalized before being written, anything else was put there by hand
fn tag_from_db(tag: &str) -> Option<NormalizedTag> {
    let normalized = NormalizedTag::new(tag);
    if normalized.as_ref().map(NormalizedTag::as_str) != Some(tag) {
        warn!(tag, "Found a non-normalized tag in the database");
    }
    normalized
}

pub(crate) struct SubscriberRepo {
    pool: sqlx::SqlitePool,
}

impl SubscriberRepo {
    pub(crate) fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns `true` if the subscriber didn't exist before
    #[instrument(skip(self))]
    pub(crate) async fn create_if_absent(&self, id: ChatId) -> Result<bool> {
        let result = sqlx::query("insert into subscriber (id) values (?) on conflict (id) do nothing")
            .bind(id.0)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    pub(crate) async fn enable_mailout(&self, id: ChatId) -> Result {
        self.set_mailout_enabled(id, true).await
    }

    #[instrument(skip(self))]
    pub(crate) async fn disable_mailout(&self, id: ChatId) -> Result {
        self.set_mailout_enabled(id, false).await
    }

    async fn set_mailout_enabled(&self, id: ChatId, enabled: bool) -> Result {
        sqlx::query(
            "insert into subscriber (id, mailout_enabled) values (?1, ?2)
            on conflict (id) do update set mailout_enabled = ?2",
        )
        .bind(id.0)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub(crate) async fn get(&self, id: ChatId, site: &SiteId) -> Result<Option<Subscriber>> {
        let record: Option<SubscriberRecord> =
            sqlx::query_as("select id, mailout_enabled from subscriber where id = ?")
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let tags = self.get_tags(id, site).await?;

        Ok(Some(record.into_subscriber(tags)))
    }

    #[instrument(skip(self))]
    pub(crate) async fn get_tags(&self, id: ChatId, site: &SiteId) -> Result<TagFilter> {
        let tags: Vec<String> = sqlx::query_scalar(
            "select tag from subscriber_tag where subscriber_id = ? and site = ?",
        )
        .bind(id.0)
        .bind(site.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(tags.iter().filter_map(|tag| tag_from_db(tag)).collect())
    }

    /// Returns the resulting set of tags
    #[instrument(skip(self, tags))]
    pub(crate) async fn add_tags(
        &self,
        id: ChatId,
        site: &SiteId,
        tags: &TagFilter,
    ) -> Result<TagFilter> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("insert into subscriber (id) values (?) on conflict (id) do nothing")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        for tag in tags.iter() {
            sqlx::query(
                "insert into subscriber_tag (subscriber_id, site, tag) values (?, ?, ?)
                on conflict do nothing",
            )
            .bind(id.0)
            .bind(site.as_str())
            .bind(tag.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_tags(id, site).await
    }

    /// Returns the resulting set of tags
    #[instrument(skip(self, tags))]
    pub(crate) async fn remove_tags(
        &self,
        id: ChatId,
        site: &SiteId,
        tags: &TagFilter,
    ) -> Result<TagFilter> {
        let mut tx = self.pool.begin().await?;

        for tag in tags.iter() {
            sqlx::query("delete from subscriber_tag where subscriber_id = ? and site = ? and tag = ?")
                .bind(id.0)
                .bind(site.as_str())
                .bind(tag.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        self.get_tags(id, site).await
    }

    #[instrument(skip(self))]
    pub(crate) async fn clear_tags(&self, id: ChatId, site: &SiteId) -> Result {
        sqlx::query("delete from subscriber_tag where subscriber_id = ? and site = ?")
            .bind(id.0)
            .bind(site.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, tags))]
    pub(crate) async fn replace_tags(&self, id: ChatId, site: &SiteId, tags: &TagFilter) -> Result {
        let mut tx = self.pool.begin().await?;

        sqlx::query("insert into subscriber (id) values (?) on conflict (id) do nothing")
            .bind(id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query("delete from subscriber_tag where subscriber_id = ? and site = ?")
            .bind(id.0)
            .bind(site.as_str())
            .execute(&mut *tx)
            .await?;

        for tag in tags.iter() {
            sqlx::query("insert into subscriber_tag (subscriber_id, site, tag) values (?, ?, ?)")
                .bind(id.0)
                .bind(site.as_str())
                .bind(tag.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Snapshot of all subscribers with their tags of the given site.
    /// Disabled subscribers are included.
    #[instrument(skip(self))]
    pub(crate) async fn get_all(&self, site: &SiteId) -> Result<Vec<Subscriber>> {
        let mut tx = self.pool.begin().await?;

        let subscribers: Vec<SubscriberRecord> =
            sqlx::query_as("select id, mailout_enabled from subscriber order by id")
                .fetch_all(&mut *tx)
                .await?;

        let tags: Vec<SubscriberTagRecord> =
            sqlx::query_as("select subscriber_id, tag from subscriber_tag where site = ?")
                .bind(site.as_str())
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;

        let mut tags: HashMap<i64, TagFilter> = tags
            .into_iter()
            .into_group_map_by(|record| record.subscriber_id)
            .into_iter()
            .map(|(id, records)| {
                let tags = records.iter().filter_map(|record| tag_from_db(&record.tag));
                (id, tags.collect())
            })
            .collect();

        let subscribers = subscribers
            .into_iter()
            .map(|record| {
                let tags = tags.remove(&record.id).unwrap_or_default();
                record.into_subscriber(tags)
            })
            .collect();

        Ok(subscribers)
    }

    #[instrument(skip(self))]
    pub(crate) async fn get_mailout_enabled_ids(&self) -> Result<Vec<ChatId>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("select id from subscriber where mailout_enabled order by id")
                .fetch_all(&self.pool)
                .await?;

        Ok(ids.into_iter().map(ChatId).collect())
    }

    #[instrument(skip(self))]
    pub(crate) async fn get_all_ids(&self) -> Result<Vec<ChatId>> {
        let ids: Vec<i64> = sqlx::query_scalar("select id from subscriber order by id")
            .fetch_all(&self.pool)
            .await?;

        Ok(ids.into_iter().map(ChatId).collect())
    }

    #[instrument(skip(self))]
    pub(crate) async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("select count(*) from subscriber")
            .fetch_one(&self.pool)
            .await?;

        Ok(count.try_into().unwrap_or_default())
    }
}
