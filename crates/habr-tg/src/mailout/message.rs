use crate::feed::{FeedEntry, Site};
use itertools::Itertools;
use teloxide::utils::html;

fn link(url: &str, text: &str) -> String {
    format!("<a href=\"{}\">{}</a>", html::escape(url), html::escape(text))
}

/// Announcement of a single article. The markup is HTML.
pub(crate) fn format_entry(site: &Site, entry: &FeedEntry) -> String {
    let mut title = html::escape(&entry.title);

    if let Some(iv) = site.instant_view_url(&entry.link) {
        title = format!("{title} {}", link(iv.as_str(), "(IV)"));
    }

    let article = link(&entry.link, "Open the article");
    let comments = link(&format!("{}#comments", entry.link), "Go to the comments");

    format!("{title}\n\n{article}\n\n{comments}")
}

/// Numbered list of the top `limit` entries, or `None` if there are no entries.
pub(crate) fn format_best(site: &Site, entries: &[FeedEntry], limit: usize) -> Option<String> {
    if entries.is_empty() || limit == 0 {
        return None;
    }

    let list = entries
        .iter()
        .take(limit)
        .enumerate()
        .format_with("\n", |(i, entry), f| {
            f(&format_args!("{}) {}", i + 1, link(&entry.link, &entry.title)))
        });

    let header = html::bold(&html::escape(&format!(
        "Best articles of the day on {}:",
        site.name
    )));

    Some(format!("{header}\n{list}"))
}
