use super::CommandError;
use crate::mailout::{Delivery, DeliveryStatus};
use crate::prelude::*;
use crate::{tg, Result};
use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

#[derive(BotCommands, Clone, Debug)]
#[command(
    rename_rule = "snake_case",
    description = "Commands for bot maintainer only:"
)]
pub(crate) enum Cmd {
    #[command(description = "show the guide")]
    MaintainerHelp,

    #[command(description = "display version info")]
    Version,

    #[command(description = "display the number of subscribers")]
    UsersCount,

    #[command(description = "display the subscriber with the given chat ID")]
    User(String),

    #[command(description = "send the message to every subscriber")]
    Broadcast(String),
}

#[async_trait]
impl tg::cmd::Command for Cmd {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        match self {
            Cmd::MaintainerHelp => {
                ctx.bot.reply_help::<Cmd>(msg).await?;
            }
            Cmd::Version => {
                ctx.bot.reply_to(msg, version_info()).await?;
            }
            Cmd::UsersCount => {
                let count = ctx.subscribers.count().await?;
                ctx.bot.reply_to(msg, format!("Subscribers: {count}")).await?;
            }
            Cmd::User(input) => {
                let input = input.trim();
                let id = input.parse::<i64>().map_err(|_| {
                    err!(CommandError::InvalidUserId {
                        input: input.to_owned()
                    })
                })?;

                let mut reply = vec![];
                for site in ctx.sites.iter() {
                    let Some(subscriber) = ctx.subscribers.get(ChatId(id), &site.id).await? else {
                        reply.push(format!("Subscriber {id} doesn't exist"));
                        break;
                    };
                    if reply.is_empty() {
                        reply.push(format!(
                            "Subscriber {id}, mailout enabled: {}",
                            subscriber.mailout_enabled
                        ));
                    }
                    let tags = subscriber.tags.iter().join(" ");
                    reply.push(format!(
                        "{}: {}",
                        html::escape(site.id.as_str()),
                        html::code_inline(&tags)
                    ));
                }

                ctx.bot.reply_to(msg, reply.join("\n")).await?;
            }
            Cmd::Broadcast(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(err!(CommandError::EmptyBroadcast));
                }

                let deliveries = ctx
                    .subscribers
                    .get_all_ids()
                    .await?
                    .into_iter()
                    .map(|chat| Delivery {
                        chat,
                        messages: vec![text.to_owned().into()],
                    })
                    .collect();

                info!("Broadcasting a message from the maintainer");

                let report = ctx.dispatcher.deliver(deliveries).await;

                let reply = format!(
                    "Broadcast is finished.\nDelivered: {}\nUnreachable: {}\nFailed: {}",
                    report.count(DeliveryStatus::Delivered),
                    report.count(DeliveryStatus::Unreachable),
                    report.count(DeliveryStatus::Failed),
                );

                ctx.bot.reply_to(msg, reply).await?;
            }
        };

        Ok(())
    }
}

fn version_info() -> String {
    /// Generate the key-value pairs with vergen metadata
    macro_rules! vergen_meta {
        ( $($meta_name:literal),* $(,)? ) => {
            [$( ($meta_name, env!(concat!("VERGEN_", $meta_name))) ),*]
        }
    }

    let meta = vergen_meta![
        "BUILD_TIMESTAMP",
        "RUSTC_SEMVER",
        "RUSTC_CHANNEL",
        "CARGO_TARGET_TRIPLE",
        "CARGO_DEBUG",
        "CARGO_OPT_LEVEL",
    ];

    let meta = [("VERSION", env!("CARGO_PKG_VERSION"))]
        .into_iter()
        .chain(meta);

    let max_name_len = meta.clone().map(|(name, _)| name.len()).max().unwrap_or(0);

    let metadata = meta
        .map(|(name, val)| {
            let name = name.to_lowercase();
            format!("{name:<max_name_len$} = {val}")
        })
        .join("\n");

    format!("<pre>{}</pre>", html::escape(&metadata))
}

pub(crate) fn filter(ctx: Arc<tg::Ctx>, msg: Message) -> bool {
    matches!(msg.from(), Some(sender) if sender.id == ctx.cfg.maintainer)
}
