use super::{split_site_arg, CommandError};
use crate::db::Subscriber;
use crate::feed::{parse_tag_list, Site, TagFilter};
use crate::mailout::format_best;
use crate::prelude::*;
use crate::tg::profile::{profile_url, scrape_profile_tags};
use crate::{tg, Result};
use async_trait::async_trait;
use itertools::Itertools;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use teloxide::utils::html;

const DEFAULT_BEST_COUNT: usize = 5;

#[derive(BotCommands, Clone, Debug)]
#[command(rename_rule = "snake_case", description = "Commands:")]
pub(crate) enum Cmd {
    #[command(description = "subscribe to the mailout or resume it")]
    Start,

    #[command(description = "show the guide")]
    Help,

    #[command(description = "show your tags: /tags [site]")]
    Tags(String),

    #[command(description = "add tags: /add_tags [site] tag1 tag2")]
    AddTags(String),

    #[command(description = "remove tags: /del_tags [site] tag1 tag2")]
    DelTags(String),

    #[command(description = "remove all tags: /del_all_tags [site]")]
    DelAllTags(String),

    #[command(description = "replace your tags with the ones from your profile: /copy_tags profile_url")]
    CopyTags(String),

    #[command(description = "best articles of the day: /best [site] [count]")]
    Best(String),

    #[command(description = "pause the mailout, /start resumes it")]
    Stop,
}

#[async_trait]
impl tg::cmd::Command for Cmd {
    async fn handle(self, ctx: &tg::Ctx, msg: &Message) -> Result {
        let chat = msg.chat.id;

        let reply = match self {
            Cmd::Start => {
                let created = ctx.subscribers.create_if_absent(chat).await?;
                ctx.subscribers.enable_mailout(chat).await?;

                let greeting = if created {
                    "Hi! You are subscribed to the mailout of new articles. \
                    Without tags you receive all of them, add tags to receive only \
                    the articles you are interested in."
                } else {
                    "The mailout is resumed."
                };

                format!("{greeting}\n\n{}", help_text(&ctx.sites))
            }
            Cmd::Help => help_text(&ctx.sites),
            Cmd::Tags(args) => {
                let (site, _) = split_site_arg(&ctx.sites, &args)?;
                match ctx.subscribers.get(chat, &site.id).await? {
                    Some(subscriber) => format_status(site, &subscriber),
                    None => "You are not subscribed yet, use /start".to_owned(),
                }
            }
            Cmd::AddTags(args) => {
                let (site, tags) = parse_tags_args(&ctx.sites, &args)?;
                let current = ctx.subscribers.add_tags(chat, &site.id, &tags).await?;
                format!("Tags were added.\n\n{}", format_tags(site, &current))
            }
            Cmd::DelTags(args) => {
                let (site, tags) = parse_tags_args(&ctx.sites, &args)?;
                let current = ctx.subscribers.remove_tags(chat, &site.id, &tags).await?;
                format!("Tags were removed.\n\n{}", format_tags(site, &current))
            }
            Cmd::DelAllTags(args) => {
                let (site, _) = split_site_arg(&ctx.sites, &args)?;
                ctx.subscribers.clear_tags(chat, &site.id).await?;
                format!(
                    "All tags of {} were removed, you will receive all articles",
                    html::escape(&site.name)
                )
            }
            Cmd::CopyTags(args) => copy_tags(ctx, chat, args.trim()).await?,
            Cmd::Best(args) => {
                let (site, count) = parse_best_args(&ctx.sites, &args)?;
                let entries = ctx.feeds.fetch(&site.best_feed_url).await?;
                format_best(site, &entries, count).ok_or_else(|| {
                    err!(CommandError::NoBestArticles {
                        site: site.name.clone()
                    })
                })?
            }
            Cmd::Stop => {
                ctx.subscribers.disable_mailout(chat).await?;
                "The mailout is paused. Use /start to resume it".to_owned()
            }
        };

        ctx.bot.reply_to(msg, reply).await?;

        Ok(())
    }
}

async fn copy_tags(ctx: &tg::Ctx, chat: ChatId, input: &str) -> Result<String> {
    let site = ctx
        .sites
        .iter()
        .find(|site| site.profile_pattern.is_match(input))
        .ok_or_else(|| {
            err!(CommandError::UnrecognizedProfileUrl {
                url: input.to_owned()
            })
        })?;

    let url = profile_url(input);

    let html = ctx.http.get(&url).read_text().await?;

    let tags = scrape_profile_tags(&html);

    if tags.is_empty() {
        return Err(err!(CommandError::NoTagsScraped { url }));
    }

    ctx.subscribers.replace_tags(chat, &site.id, &tags).await?;

    Ok(format!("Tags were replaced.\n\n{}", format_tags(site, &tags)))
}

fn help_text(sites: &[Site]) -> String {
    let sites = sites
        .iter()
        .format_with("\n", |site, f| {
            f(&format_args!("• {} ({})", html::escape(site.id.as_str()), html::escape(&site.name)))
        });

    let commands = html::escape(&Cmd::descriptions().to_string());

    format!(
        "{commands}\n\n\
        Sites, the first one is used when the site is omitted:\n{sites}\n\n\
        Send me a link to an article to get its Instant View."
    )
}

fn parse_tags_args<'s>(sites: &'s [Site], args: &str) -> Result<(&'s Site, TagFilter)> {
    let (site, rest) = split_site_arg(sites, args)?;
    let tags = parse_tag_list(rest);
    if tags.is_empty() {
        return Err(err!(CommandError::EmptyTagList));
    }
    Ok((site, tags))
}

fn parse_best_args<'s>(sites: &'s [Site], args: &str) -> Result<(&'s Site, usize)> {
    let (site, rest) = split_site_arg(sites, args)?;
    if rest.is_empty() {
        return Ok((site, DEFAULT_BEST_COUNT));
    }
    match rest.parse::<usize>() {
        Ok(count) if count > 0 => Ok((site, count)),
        _ => Err(err!(CommandError::InvalidArticlesCount {
            input: rest.to_owned()
        })),
    }
}

fn format_tags(site: &Site, tags: &TagFilter) -> String {
    let name = html::escape(&site.name);
    if tags.is_empty() {
        return format!("You have no tags on {name}, so you receive all articles");
    }

    let tags = tags
        .iter()
        .format_with("\n", |tag, f| f(&format_args!("• {}", html::escape(tag.as_str()))));

    format!("Your tags on {name}:\n{tags}")
}

fn format_status(site: &Site, subscriber: &Subscriber) -> String {
    let mailout = if subscriber.mailout_enabled {
        "The mailout is active"
    } else {
        "The mailout is paused, use /start to resume it"
    };

    format!("{mailout}\n\n{}", format_tags(site, &subscriber.tags))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::SiteId;
    use expect_test::expect;
    use teloxide::types::ChatId;

    fn sites() -> Vec<Site> {
        let mut geektimes = Site::habr();
        geektimes.id = SiteId::new("geektimes");
        geektimes.name = "Geektimes".to_owned();
        vec![Site::habr(), geektimes]
    }

    #[test]
    fn commands_are_parsed() {
        let cmd = Cmd::parse("/add_tags geektimes DIY Arduino", "habr_bot").unwrap();
        assert!(matches!(&cmd, Cmd::AddTags(args) if args == "geektimes DIY Arduino"), "{cmd:?}");

        let cmd = Cmd::parse("/best", "habr_bot").unwrap();
        assert!(matches!(&cmd, Cmd::Best(args) if args.is_empty()), "{cmd:?}");

        assert!(matches!(Cmd::parse("/stop", "habr_bot").unwrap(), Cmd::Stop));
    }

    #[test]
    fn tags_args() {
        let sites = sites();

        let (site, tags) = parse_tags_args(&sites, "geektimes DIY  Arduino").unwrap();
        assert_eq!(site.id.as_str(), "geektimes");
        assert_eq!(tags, parse_tag_list("arduino diy"));

        let (site, tags) = parse_tags_args(&sites, "Rust").unwrap();
        assert_eq!(site.id.as_str(), "habr");
        assert_eq!(tags, parse_tag_list("rust"));

        for args in ["", "   ", "geektimes"] {
            let err = parse_tags_args(&sites, args).unwrap_err();
            assert!(err.is_user_error(), "{err:?}");
        }
    }

    #[test]
    fn best_args() {
        let sites = sites();

        let (site, count) = parse_best_args(&sites, "").unwrap();
        assert_eq!((site.id.as_str(), count), ("habr", 5));

        let (site, count) = parse_best_args(&sites, "geektimes 10").unwrap();
        assert_eq!((site.id.as_str(), count), ("geektimes", 10));

        let (site, count) = parse_best_args(&sites, "3").unwrap();
        assert_eq!((site.id.as_str(), count), ("habr", 3));

        for args in ["0", "-1", "many", "geektimes ten"] {
            let err = parse_best_args(&sites, args).unwrap_err();
            assert!(err.is_user_error(), "{err:?}");
        }
    }

    #[test]
    fn status_message() {
        let site = Site::habr();
        let subscriber = Subscriber {
            id: ChatId(1),
            mailout_enabled: false,
            tags: parse_tag_list("rust c++ <script>"),
        };

        expect![[r#"
            The mailout is paused, use /start to resume it

            Your tags on Habr:
            • &lt;script&gt;
            • c++
            • rust"#]]
        .assert_eq(&format_status(&site, &subscriber));

        let subscriber = Subscriber {
            tags: TagFilter::default(),
            mailout_enabled: true,
            ..subscriber
        };

        expect![[r#"
            The mailout is active

            You have no tags on Habr, so you receive all articles"#]]
        .assert_eq(&format_status(&site, &subscriber));
    }
}
