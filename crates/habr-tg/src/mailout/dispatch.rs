use crate::db::ArticleId;
use crate::prelude::*;
use crate::tg;
use async_trait::async_trait;
use futures::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::{ApiError, RequestError};
use tokio::sync::Mutex;

/// HTML text with an optional button that asks to remind about the article
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutgoingMessage {
    pub(crate) text: String,
    pub(crate) remind_about: Option<ArticleId>,
}

impl From<String> for OutgoingMessage {
    fn from(text: String) -> Self {
        Self {
            text,
            remind_about: None,
        }
    }
}

/// Something that can deliver a message to a chat
#[async_trait]
pub(crate) trait Courier: Send + Sync {
    async fn send(&self, chat: ChatId, message: &OutgoingMessage) -> Result<(), RequestError>;
}

#[async_trait]
impl Courier for tg::Bot {
    async fn send(&self, chat: ChatId, message: &OutgoingMessage) -> Result<(), RequestError> {
        let request = self
            .send_message(chat, &message.text)
            .disable_web_page_preview(true);

        match message.remind_about {
            Some(article) => request.reply_markup(tg::remind_keyboard(article)).await?,
            None => request.await?,
        };

        Ok(())
    }
}

/// Messages for a single chat. They are sent sequentially in the given order.
#[derive(Debug, Clone)]
pub(crate) struct Delivery {
    pub(crate) chat: ChatId,
    pub(crate) messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub(crate) enum DeliveryStatus {
    Delivered,

    /// The chat can't receive messages from the bot (blocked, deactivated, etc.).
    /// The rest of the messages for such a chat are not even attempted.
    Unreachable,

    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeliveryOutcome {
    pub(crate) chat: ChatId,

    /// Index of the message in [`Delivery::messages`]
    pub(crate) message: usize,
    pub(crate) status: DeliveryStatus,
}

#[derive(Debug, Default)]
pub(crate) struct DeliveryReport {
    pub(crate) outcomes: Vec<DeliveryOutcome>,
    pub(crate) throttle_pauses: u32,
}

impl DeliveryReport {
    pub(crate) fn count(&self, status: DeliveryStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DispatchConfig {
    /// Number of messages that can be sent before a pause
    pub(crate) send_ceiling: u32,
    pub(crate) throttle_pause: Duration,
    pub(crate) max_concurrent_sends: usize,
}

/// Blocking throttle shared by all concurrent senders of a single batch.
/// Once the ceiling is reached, the next sender sleeps while holding the
/// lock, so the rest of the senders wait too.
struct SendCeiling {
    ceiling: u32,
    pause: Duration,
    state: Mutex<SendCeilingState>,
}

#[derive(Default)]
struct SendCeilingState {
    sent: u32,
    pauses: u32,
}

impl SendCeiling {
    fn new(ceiling: u32, pause: Duration) -> Self {
        Self {
            ceiling: ceiling.max(1),
            pause,
            state: Default::default(),
        }
    }

    async fn acquire(&self) {
        let mut state = self.state.lock().await;
        if state.sent >= self.ceiling {
            debug!(pause = tracing_duration(self.pause), "Send ceiling reached, pausing");
            metrics::increment_counter!("mailout_throttle_pauses_total");

            tokio::time::sleep(self.pause).await;

            state.sent = 0;
            state.pauses += 1;
        }
        state.sent += 1;
    }
}

pub(crate) struct Dispatcher {
    courier: Arc<dyn Courier>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub(crate) fn new(courier: Arc<dyn Courier>, config: DispatchConfig) -> Self {
        Self { courier, config }
    }

    /// Never fails as a whole. Failures of individual messages are logged
    /// and reported in the outcomes.
    pub(crate) async fn deliver(&self, deliveries: Vec<Delivery>) -> DeliveryReport {
        let ceiling = SendCeiling::new(self.config.send_ceiling, self.config.throttle_pause);
        let ceiling = &ceiling;

        let outcomes: Vec<Vec<DeliveryOutcome>> = stream::iter(deliveries)
            .map(|delivery| self.deliver_to_chat(delivery, ceiling))
            .buffer_unordered(self.config.max_concurrent_sends.max(1))
            .collect()
            .await;

        let report = DeliveryReport {
            outcomes: outcomes.into_iter().flatten().collect(),
            throttle_pauses: ceiling.state.lock().await.pauses,
        };

        for status in [
            DeliveryStatus::Delivered,
            DeliveryStatus::Unreachable,
            DeliveryStatus::Failed,
        ] {
            let count = report.count(status);
            if count > 0 {
                let outcome: &'static str = status.into();
                metrics::counter!("mailout_deliveries_total", count as u64, "outcome" => outcome);
            }
        }

        report
    }

    async fn deliver_to_chat(&self, delivery: Delivery, ceiling: &SendCeiling) -> Vec<DeliveryOutcome> {
        let chat = delivery.chat;
        let mut outcomes = Vec::with_capacity(delivery.messages.len());
        let mut unreachable = false;

        for (index, message) in delivery.messages.iter().enumerate() {
            let status = if unreachable {
                DeliveryStatus::Unreachable
            } else {
                ceiling.acquire().await;
                match self.courier.send(chat, message).await {
                    Ok(()) => DeliveryStatus::Delivered,
                    Err(err) if is_unreachable_chat(&err) => {
                        debug!(%chat, err = tracing_err(&err), "Chat is unreachable");
                        unreachable = true;
                        DeliveryStatus::Unreachable
                    }
                    Err(err) => {
                        warn!(%chat, err = tracing_err(&err), "Failed to deliver a message");
                        DeliveryStatus::Failed
                    }
                }
            };

            outcomes.push(DeliveryOutcome {
                chat,
                message: index,
                status,
            });
        }

        outcomes
    }
}

/// Expected failures that happen when users leave the bot. These aren't
/// worth a warning.
fn is_unreachable_chat(err: &RequestError) -> bool {
    matches!(
        err,
        RequestError::Api(
            ApiError::BotBlocked
                | ApiError::UserDeactivated
                | ApiError::ChatNotFound
                | ApiError::BotKicked
                | ApiError::BotKickedFromSupergroup
                | ApiError::CantInitiateConversation
        )
    )
}
