mod config;
mod db;
mod error;
mod feed;
mod http;
mod mailout;
mod observability;
mod tg;

pub mod util;

pub use crate::error::*;
pub use config::*;
pub use observability::*;

#[allow(unused_imports)]
mod prelude {
    pub(crate) use crate::error::prelude::*;
    pub(crate) use crate::http::prelude::*;
    pub(crate) use crate::observability::logging::prelude::*;
    pub(crate) use crate::util::prelude::*;
}

use crate::prelude::*;
use feed::{FeedFetcher, JsonFileWatermarkStore};
use std::sync::Arc;
use teloxide::requests::Requester;

/// Run the telegram bot processing loop along with the mailout
pub async fn run(config: Config) -> Result<()> {
    if config.feed.sites.is_empty() {
        return Err(fatal!("No sites are configured, check FEED_SITES"));
    }

    let db = db::init(config.db)
        .with_duration_log("Initialized the database")
        .await?;

    let bot = tg::create_bot(&config.tg);

    let me = bot
        .get_me()
        .await
        .fatal_ctx(|| "Failed to authenticate in Telegram, check TG_BOT_TOKEN")?;
    info!(bot = %me.user.debug_id(), "Authenticated in Telegram");

    let http = http::create_client();
    let subscribers = Arc::new(db.subscribers);
    let articles = Arc::new(db.reminders);
    let sites = Arc::new(config.feed.sites.clone());
    let feeds: Arc<dyn feed::FeedSource> = Arc::new(FeedFetcher::new(
        http.clone(),
        config.feed.retry_policy(),
    ));
    let courier: Arc<dyn mailout::Courier> = Arc::new(bot.clone());
    let dispatcher = Arc::new(mailout::Dispatcher::new(
        courier.clone(),
        config.mailout.dispatch(),
    ));

    let reminders = mailout::Reminders::new(
        articles.clone(),
        courier,
        config.mailout.reminder_delay(),
    );
    // Detached, the unsent ones are restored once again after the next restart
    reminders.restore().await?;

    let mailout = mailout::Mailout {
        sites: sites.clone(),
        feeds: feeds.clone(),
        subscribers: subscribers.clone(),
        articles,
        dispatcher: dispatcher.clone(),
        store: Arc::new(JsonFileWatermarkStore::new(&config.mailout.watermark_path)),
        schedule: mailout::Schedule::from(&config.mailout),
    };

    let (shutdown, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut mailout_task = tokio::spawn(mailout.run(shutdown_rx));

    let result = tg::run_bot(tg::RunBotOptions {
        bot,
        tg_cfg: config.tg,
        sites,
        subscribers,
        feeds,
        http,
        dispatcher,
        reminders,
    })
    .await;

    // The mailout may be in the middle of a cycle. Give it a chance to finish.
    if shutdown.send(true).is_err() {
        warn!("Mailout has already stopped before the shutdown");
    }

    let grace = config.mailout.shutdown_grace();

    match tokio::time::timeout(grace, &mut mailout_task).await {
        Ok(Ok(())) => info!("Mailout has finished gracefully"),
        Ok(Err(err)) => error!(err = tracing_err(&err), "Mailout task has failed"),
        Err(_) => {
            warn!(
                grace = tracing_duration(grace),
                "Mailout didn't finish within the grace period, aborting it"
            );
            mailout_task.abort();
        }
    }

    result
}
