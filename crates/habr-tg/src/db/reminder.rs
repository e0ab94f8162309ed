use crate::prelude::*;
use crate::Result;
use chrono::{DateTime, TimeZone, Utc};
use teloxide::types::ChatId;

/// Id of a delivered entry whose text is kept for the reminders
pub(crate) type ArticleId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Reminder {
    pub(crate) id: i64,
    pub(crate) chat: ChatId,
    pub(crate) text: String,
    pub(crate) due_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReminderRecord {
    id: i64,
    chat_id: i64,
    text: String,
    due_at: i64,
}

impl From<ReminderRecord> for Reminder {
    fn from(record: ReminderRecord) -> Self {
        Self {
            id: record.id,
            chat: ChatId(record.chat_id),
            text: record.text,
            due_at: from_unix_secs(record.due_at),
        }
    }
}

/// Out of range values mean the row was edited by hand. Such reminders
/// are treated as overdue.
fn from_unix_secs(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(|| {
        warn!(secs, "Found an out of range timestamp in the database");
        DateTime::<Utc>::MIN_UTC
    })
}

pub(crate) struct ReminderRepo {
    pool: sqlx::SqlitePool,
}

impl ReminderRepo {
    pub(crate) fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Remembers the text of the delivered entry. The same link always maps
    /// to the same id, the text is refreshed.
    #[instrument(skip(self, text))]
    pub(crate) async fn save_article(&self, link: &str, text: &str) -> Result<ArticleId> {
        let id = sqlx::query_scalar(
            "insert into article (link, text, created_at) values (?1, ?2, ?3)
            on conflict (link) do update set text = ?2
            returning id",
        )
        .bind(link)
        .bind(text)
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    #[instrument(skip(self))]
    pub(crate) async fn get_article(&self, id: ArticleId) -> Result<Option<String>> {
        let text = sqlx::query_scalar("select text from article where id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(text)
    }

    /// Returns the number of the removed articles
    #[instrument(skip(self))]
    pub(crate) async fn prune_articles(&self, created_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("delete from article where created_at < ?")
            .bind(created_before.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, text))]
    pub(crate) async fn add_reminder(
        &self,
        chat: ChatId,
        text: &str,
        due_at: DateTime<Utc>,
    ) -> Result<Reminder> {
        let record: ReminderRecord = sqlx::query_as(
            "insert into reminder (chat_id, text, due_at) values (?, ?, ?)
            returning id, chat_id, text, due_at",
        )
        .bind(chat.0)
        .bind(text)
        .bind(due_at.timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.into())
    }

    /// All the reminders that weren't sent yet, the earliest first
    #[instrument(skip(self))]
    pub(crate) async fn get_pending_reminders(&self) -> Result<Vec<Reminder>> {
        let records: Vec<ReminderRecord> =
            sqlx::query_as("select id, chat_id, text, due_at from reminder order by due_at, id")
                .fetch_all(&self.pool)
                .await?;

        Ok(records.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    pub(crate) async fn remove_reminder(&self, id: i64) -> Result {
        sqlx::query("delete from reminder where id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_db;
    use chrono::Duration;

    #[test_log::test(tokio::test)]
    async fn articles_are_deduplicated_by_link() {
        let (_dir, db) = temp_db().await;
        let repo = db.reminders;

        let first = repo.save_article("https://habr.com/1", "old").await.unwrap();
        let second = repo.save_article("https://habr.com/2", "other").await.unwrap();
        assert_ne!(first, second);

        let again = repo.save_article("https://habr.com/1", "new").await.unwrap();
        assert_eq!(again, first);
        assert_eq!(repo.get_article(first).await.unwrap().as_deref(), Some("new"));

        assert_eq!(repo.get_article(second + 100).await.unwrap(), None);

        assert_eq!(repo.prune_articles(Utc::now() - Duration::hours(1)).await.unwrap(), 0);
        assert_eq!(repo.prune_articles(Utc::now() + Duration::hours(1)).await.unwrap(), 2);
        assert_eq!(repo.get_article(first).await.unwrap(), None);
    }

    #[test_log::test(tokio::test)]
    async fn reminders_lifecycle() {
        let (_dir, db) = temp_db().await;
        let repo = db.reminders;

        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        let later = repo.add_reminder(ChatId(1), "later", now + Duration::hours(6)).await.unwrap();
        let sooner = repo.add_reminder(ChatId(2), "sooner", now).await.unwrap();

        assert_eq!(
            later,
            Reminder {
                id: later.id,
                chat: ChatId(1),
                text: "later".to_owned(),
                due_at: now + Duration::hours(6),
            }
        );

        assert_eq!(
            repo.get_pending_reminders().await.unwrap(),
            [sooner.clone(), later.clone()]
        );

        repo.remove_reminder(sooner.id).await.unwrap();
        assert_eq!(repo.get_pending_reminders().await.unwrap(), [later]);
    }
}
