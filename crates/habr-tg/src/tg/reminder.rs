use crate::db::ArticleId;
use crate::prelude::*;
use crate::{tg, Result};
use crate::util::DynResult;
use std::sync::Arc;
use teloxide::payloads::AnswerCallbackQuerySetters;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

const CALLBACK_PREFIX: &str = "remind:";

pub(crate) fn remind_keyboard(article: ArticleId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new([[InlineKeyboardButton::callback(
        "Remind me later",
        format!("{CALLBACK_PREFIX}{article}"),
    )]])
}

fn parse_callback(data: &str) -> Option<ArticleId> {
    data.strip_prefix(CALLBACK_PREFIX)?.parse().ok()
}

pub(crate) fn filter(query: CallbackQuery) -> Option<ArticleId> {
    query.data.as_deref().and_then(parse_callback)
}

pub(crate) async fn handle(ctx: Arc<tg::Ctx>, query: CallbackQuery, article: ArticleId) -> DynResult {
    let chat = query
        .message
        .as_ref()
        .map(|msg| msg.chat.id)
        .unwrap_or_else(|| query.from.id.into());

    let span = info_span!("handle_reminder_request", sender = %query.from.debug_id(), %chat, article);

    answer(&ctx, query.id, chat, article)
        .instrument(span)
        .await
        .map_err(Into::into)
}

async fn answer(ctx: &tg::Ctx, query_id: String, chat: ChatId, article: ArticleId) -> Result {
    let answer = if !ctx.cfg.is_allowed(chat) {
        warn!("Reminder was requested from a chat that isn't allowed");
        "You are not allowed to use this bot"
    } else {
        match ctx.reminders.schedule(chat, article).await {
            Ok(Some(_)) => "I'll remind you about this article later",
            Ok(None) => "This article is too old, I don't remember it anymore",
            Err(err) => {
                warn!(err = tracing_err(&err), "Failed to schedule the reminder");
                "Something went wrong, please try again later"
            }
        }
    };

    ctx.bot.answer_callback_query(query_id).text(answer).await?;

    Ok(())
}
