use super::{Courier, OutgoingMessage};
use crate::db::{ArticleId, Reminder, ReminderRepo};
use crate::prelude::*;
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use teloxide::types::ChatId;
use tokio::task::JoinHandle;

/// Delayed repeats of the delivered entries. Every reminder lives in the
/// database until it is sent, so the ones scheduled before a restart are
/// picked up by [`Reminders::restore`].
pub(crate) struct Reminders {
    repo: Arc<ReminderRepo>,
    courier: Arc<dyn Courier>,
    delay: Duration,
}

impl Reminders {
    pub(crate) fn new(repo: Arc<ReminderRepo>, courier: Arc<dyn Courier>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            repo,
            courier,
            delay,
        })
    }

    /// Returns `None` if the article is already forgotten
    #[instrument(skip(self))]
    pub(crate) async fn schedule(
        self: &Arc<Self>,
        chat: ChatId,
        article: ArticleId,
    ) -> Result<Option<JoinHandle<()>>> {
        let Some(text) = self.repo.get_article(article).await? else {
            return Ok(None);
        };

        let due_at = Utc::now() + chrono::Duration::from_std(self.delay).unwrap_or_default();
        let reminder = self.repo.add_reminder(chat, &text, due_at).await?;

        info!(%due_at, reminder = reminder.id, "Scheduled a reminder");

        Ok(Some(self.spawn(reminder)))
    }

    /// Spawns the reminders saved before the restart. The overdue ones are
    /// sent right away.
    pub(crate) async fn restore(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let pending = self.repo.get_pending_reminders().await?;

        info!(pending = pending.len(), "Restored the reminders");

        Ok(pending.into_iter().map(|reminder| self.spawn(reminder)).collect())
    }

    fn spawn(self: &Arc<Self>, reminder: Reminder) -> JoinHandle<()> {
        let span = info_span!("reminder", id = reminder.id, chat = %reminder.chat);
        let this = self.clone();
        tokio::spawn(async move { this.remind(reminder).await }.instrument(span))
    }

    async fn remind(&self, reminder: Reminder) {
        let delay = (reminder.due_at - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(delay).await;

        let message = OutgoingMessage::from(format!("#reminder\n{}", reminder.text));

        match self.courier.send(reminder.chat, &message).await {
            Ok(()) => {
                metrics::increment_counter!("reminders_sent_total");
                debug!("Sent the reminder");
            }
            // Retrying won't help if the user has blocked the bot
            Err(err) => warn!(err = tracing_err(&err), "Failed to send the reminder, dropping it"),
        }

        if let Err(err) = self.repo.remove_reminder(reminder.id).await {
            warn!(
                err = tracing_err(&err),
                "Failed to remove the sent reminder, it'll be repeated after a restart"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::temp_db;
    use crate::mailout::dispatch::tests::FakeCourier;

    #[test_log::test(tokio::test)]
    async fn reminder_repeats_the_article() {
        let (_dir, db) = temp_db().await;
        let repo = Arc::new(db.reminders);
        let courier = Arc::new(FakeCourier::default());
        let reminders = Reminders::new(repo.clone(), courier.clone(), Duration::ZERO);

        let article = repo.save_article("https://habr.com/1", "<b>Title</b>").await.unwrap();

        let task = reminders.schedule(ChatId(1), article).await.unwrap().unwrap();
        task.await.unwrap();

        assert_eq!(courier.sent_to(ChatId(1)), ["#reminder\n<b>Title</b>"]);
        assert_eq!(courier.messages_to(ChatId(1))[0].remind_about, None);
        assert!(repo.get_pending_reminders().await.unwrap().is_empty());

        assert!(reminders.schedule(ChatId(1), article + 1).await.unwrap().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn overdue_reminders_are_sent_after_restart() {
        let (_dir, db) = temp_db().await;
        let repo = Arc::new(db.reminders);

        let now = Utc::now();
        repo.add_reminder(ChatId(1), "overdue", now - chrono::Duration::hours(1))
            .await
            .unwrap();
        let pending = repo
            .add_reminder(ChatId(2), "pending", now + chrono::Duration::hours(1))
            .await
            .unwrap();

        let courier = Arc::new(FakeCourier::default());
        let reminders = Reminders::new(repo.clone(), courier.clone(), Duration::from_secs(6 * 3600));

        let mut tasks = reminders.restore().await.unwrap();
        assert_eq!(tasks.len(), 2);

        tasks.remove(0).await.unwrap();
        assert_eq!(courier.sent_to(ChatId(1)), ["#reminder\noverdue"]);
        assert!(courier.sent_to(ChatId(2)).is_empty());
        assert_eq!(repo.get_pending_reminders().await.unwrap(), [pending]);

        tasks[0].abort();
    }

    #[test_log::test(tokio::test)]
    async fn failed_reminder_is_not_repeated() {
        let (_dir, db) = temp_db().await;
        let repo = Arc::new(db.reminders);
        let courier = Arc::new(FakeCourier {
            blocked: vec![ChatId(1)],
            ..Default::default()
        });
        let reminders = Reminders::new(repo.clone(), courier.clone(), Duration::ZERO);

        let article = repo.save_article("https://habr.com/1", "text").await.unwrap();
        let task = reminders.schedule(ChatId(1), article).await.unwrap().unwrap();
        task.await.unwrap();

        assert!(courier.sent.lock().unwrap().is_empty());
        assert!(repo.get_pending_reminders().await.unwrap().is_empty());
    }
}
