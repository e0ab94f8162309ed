//! Replies with Instant View links to the article links that users send

use crate::feed::Site;
use crate::prelude::*;
use crate::util::DynResult;
use crate::{tg, Result};
use itertools::Itertools;
use std::sync::Arc;
use teloxide::payloads::SendMessageSetters;
use teloxide::types::Message;
use teloxide::utils::html;
use url::Url;

#[derive(Debug, Clone)]
pub(crate) struct ArticleLinks(Vec<ArticleLink>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArticleLink {
    article: String,
    instant_view: Url,
}

pub(crate) fn filter(ctx: Arc<tg::Ctx>, msg: Message) -> Option<ArticleLinks> {
    let text = msg.text()?;
    if text.starts_with('/') {
        return None;
    }
    let links = find_article_links(&ctx.sites, text);
    (!links.is_empty()).then_some(ArticleLinks(links))
}

fn find_article_links(sites: &[Site], text: &str) -> Vec<ArticleLink> {
    sites
        .iter()
        .flat_map(|site| {
            site.find_article_links(text).into_iter().filter_map(|article| {
                let article = if article.starts_with("http") {
                    article.to_owned()
                } else {
                    format!("https://{article}")
                };
                let instant_view = site.instant_view_url(&article)?;
                Some(ArticleLink {
                    article,
                    instant_view,
                })
            })
        })
        .unique_by(|link| link.article.clone())
        .collect()
}

fn format_links(links: &[ArticleLink]) -> String {
    links
        .iter()
        .map(|link| {
            let instant_view = format!(
                "<a href=\"{}\">Instant View</a>",
                html::escape(link.instant_view.as_str())
            );
            let article = html::escape(&link.article);
            format!(
                "{instant_view}\n\n\
                <a href=\"{article}\">Open the article</a>\n\n\
                <a href=\"{article}#comments\">Go to the comments</a>"
            )
        })
        .join("\n\n")
}

pub(crate) async fn handle(ctx: Arc<tg::Ctx>, msg: Message, links: ArticleLinks) -> DynResult {
    reply_with_links(&ctx, &msg, &links).await.map_err(Into::into)
}

async fn reply_with_links(ctx: &tg::Ctx, msg: &Message, links: &ArticleLinks) -> Result {
    debug!(links = links.0.len(), chat = %msg.chat.debug_id(), "Replying with Instant View links");

    // Instant View preview is the whole point here
    ctx.bot
        .reply_to(msg, format_links(&links.0))
        .disable_web_page_preview(false)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn finds_links_once() {
        let text = "look: habr.com/ru/articles/100/ and https://habr.com/ru/articles/200/ \
            and again https://habr.com/ru/articles/200/";

        let links = find_article_links(&[Site::habr()], text);

        expect![[r#"
            <a href="https://t.me/iv?url=https%3A%2F%2Fhabr.com%2Fru%2Farticles%2F100%2F&amp;rhash=640326b822845b">Instant View</a>

            <a href="https://habr.com/ru/articles/100/">Open the article</a>

            <a href="https://habr.com/ru/articles/100/#comments">Go to the comments</a>

            <a href="https://t.me/iv?url=https%3A%2F%2Fhabr.com%2Fru%2Farticles%2F200%2F&amp;rhash=640326b822845b">Instant View</a>

            <a href="https://habr.com/ru/articles/200/">Open the article</a>

            <a href="https://habr.com/ru/articles/200/#comments">Go to the comments</a>"#]]
        .assert_eq(&format_links(&links));
    }

    #[test]
    fn sites_without_instant_view_are_ignored() {
        let mut site = Site::habr();
        site.instant_view_rhash = None;

        assert!(find_article_links(&[site], "https://habr.com/ru/articles/100/").is_empty());
    }
}
