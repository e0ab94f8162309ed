//! Telegram commands root module

mod cmd;
mod config;
mod instant_view;
mod profile;
mod reminder;

use crate::db::SubscriberRepo;
use crate::feed::{FeedSource, Site};
use crate::mailout;
use crate::prelude::*;
use crate::util::DynResult;
use crate::{http, Result};
use dptree::di::DependencyMap;
use std::sync::Arc;
use teloxide::adaptors::{CacheMe, DefaultParseMode, Throttle, Trace};
use teloxide::prelude::*;
use teloxide::types::{ParseMode, User};
use teloxide::utils::html;
use teloxide::utils::command::BotCommands;

pub(crate) use cmd::CommandError;
pub(crate) use config::*;
pub(crate) use reminder::remind_keyboard;

pub(crate) type Bot = Trace<CacheMe<DefaultParseMode<Throttle<teloxide::Bot>>>>;

pub(crate) struct Ctx {
    bot: Bot,
    cfg: Config,
    sites: Arc<Vec<Site>>,
    subscribers: Arc<SubscriberRepo>,
    feeds: Arc<dyn FeedSource>,
    http: http::Client,
    dispatcher: Arc<mailout::Dispatcher>,
    reminders: Arc<mailout::Reminders>,
}

pub(crate) fn create_bot(cfg: &Config) -> Bot {
    teloxide::Bot::with_client(cfg.token.clone(), teloxide::net::client_from_env())
        .throttle(Default::default())
        .parse_mode(ParseMode::Html)
        .cache_me()
        .trace(teloxide::adaptors::trace::Settings::all())
}

pub(crate) struct RunBotOptions {
    pub(crate) bot: Bot,
    pub(crate) tg_cfg: Config,
    pub(crate) sites: Arc<Vec<Site>>,
    pub(crate) subscribers: Arc<SubscriberRepo>,
    pub(crate) feeds: Arc<dyn FeedSource>,
    pub(crate) http: http::Client,
    pub(crate) dispatcher: Arc<mailout::Dispatcher>,
    pub(crate) reminders: Arc<mailout::Reminders>,
}

fn is_disallowed_chat(ctx: Arc<Ctx>, msg: Message) -> bool {
    !ctx.cfg.is_allowed(msg.chat.id)
}

async fn reject_disallowed_chat(ctx: Arc<Ctx>, msg: Message) -> DynResult {
    warn!(
        sender = msg.from().map(User::debug_id).as_deref(),
        chat = %msg.chat.debug_id(),
        text = msg.text(),
        "Message from a chat that isn't allowed"
    );

    let reply = format!(
        "You are not allowed to use this bot. Ask the maintainer to add your chat ID: {}",
        html::code_inline(&msg.chat.id.to_string())
    );
    ctx.bot.reply_to(&msg, reply).await?;

    Ok(())
}

/// Processes the updates until Ctrl+C
pub(crate) async fn run_bot(opts: RunBotOptions) -> Result {
    let mut di = DependencyMap::new();

    let bot = opts.bot;

    di.insert(Arc::new(Ctx {
        bot: bot.clone(),
        cfg: opts.tg_cfg,
        sites: opts.sites,
        subscribers: opts.subscribers,
        feeds: opts.feeds,
        http: opts.http,
        dispatcher: opts.dispatcher,
        reminders: opts.reminders,
    }));

    info!("Starting bot...");

    bot.set_my_commands(cmd::regular::Cmd::bot_commands()).await?;

    let handler = dptree::entry()
        .inspect(|update: Update| {
            metrics::increment_counter!("tg_updates_total", "kind" => update.kind.discriminator());
        })
        .branch(
            Update::filter_message()
                .chain(dptree::filter(is_disallowed_chat))
                .endpoint(reject_disallowed_chat),
        )
        .branch(
            Update::filter_callback_query()
                .chain(dptree::filter_map(reminder::filter))
                .endpoint(reminder::handle),
        )
        .branch(
            Update::filter_message()
                .filter_command::<cmd::regular::Cmd>()
                .endpoint(cmd::handle::<cmd::regular::Cmd>()),
        )
        .branch(
            Update::filter_message()
                .filter_command::<cmd::maintainer::Cmd>()
                .chain(dptree::filter(cmd::maintainer::filter))
                .endpoint(cmd::handle::<cmd::maintainer::Cmd>()),
        )
        .branch(
            Update::filter_message()
                .chain(dptree::filter_map(instant_view::filter))
                .endpoint(instant_view::handle),
        );

    Dispatcher::builder(bot, handler)
        .dependencies(di)
        // We don't handle all possible messages that users send,
        // so to suppress the warning that we don't do this we have
        // a noop default handler here
        .default_handler(|_| std::future::ready(()))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped");

    Ok(())
}
