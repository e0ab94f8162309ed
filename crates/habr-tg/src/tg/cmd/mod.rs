pub(crate) mod maintainer;
pub(crate) mod regular;

use crate::feed::{find_site, Site};
use crate::prelude::*;
use crate::util::DynResult;
use crate::{tg, Result};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use teloxide::types::{Message, User};
use teloxide::utils::html;

#[async_trait]
pub(crate) trait Command: fmt::Debug + Send + Sync + 'static {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result;
}

pub(crate) fn handle<'a, C: Command>(
) -> impl Fn(Arc<tg::Ctx>, Message, C) -> BoxFuture<'a, DynResult> {
    move |ctx, msg, cmd| {
        let info = info_span!(
            "handle_message",
            sender = msg.from().map(User::debug_id).as_deref(),
            chat = %msg.chat.debug_id(),
            cmd = format_args!("{cmd:?}")
        );

        let fut = async move {
            debug!("Processing command");

            let result = cmd.handle(&ctx, &msg).await;
            if let Err(err) = &result {
                let span = warn_span!("err", err = tracing_err(err), id = err.id());
                async {
                    let reply_msg = if err.is_user_error() {
                        html::escape(&err.display_chain().to_string())
                    } else {
                        warn!("Command handler returned an error");
                        format!(
                            "Something went wrong, please try again later.\n\n{}",
                            html::code_inline(&format!("error id: {}", err.id()))
                        )
                    };

                    let msg_result = ctx.bot.reply_to(&msg, reply_msg).await;

                    if let Err(err) = msg_result {
                        warn!(
                            err = tracing_err(&err),
                            "Failed to reply with the error message to the user"
                        );
                    }
                }
                .instrument(span)
                .await;
            }
            result.map_err(Into::into)
        };

        Box::pin(fut.instrument(info))
    }
}

/// Errors caused by the wrong input from the user
#[derive(Debug, thiserror::Error)]
pub(crate) enum CommandError {
    #[error("The list of tags is empty. Separate the tags with spaces: /add_tags rust go")]
    EmptyTagList,

    #[error("The link doesn't look like a user profile on any of the supported sites: {url}")]
    UnrecognizedProfileUrl { url: String },

    #[error("No tags were found in the profile {url}")]
    NoTagsScraped { url: String },

    #[error("Expected a positive number of articles, but got '{input}'")]
    InvalidArticlesCount { input: String },

    #[error("There are no best articles on {site} right now")]
    NoBestArticles { site: String },

    #[error("Expected a numeric user ID, but got '{input}'")]
    InvalidUserId { input: String },

    #[error("The broadcast message is empty")]
    EmptyBroadcast,
}

/// Splits off the leading site id from the command arguments. If the first
/// word isn't a site id, the arguments are left intact and the first site
/// is selected.
pub(crate) fn split_site_arg<'s, 'a>(sites: &'s [Site], args: &'a str) -> Result<(&'s Site, &'a str)> {
    let args = args.trim();
    let (first, rest) = args
        .split_once(char::is_whitespace)
        .unwrap_or((args, ""));

    if let Some(site) = find_site(sites, first) {
        return Ok((site, rest.trim_start()));
    }

    let site = sites.first().fatal_ctx(|| "No sites are configured")?;

    Ok((site, args))
}
