use super::NoveltyPolicy;
use lazy_regex::Regex;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};
use std::fmt;
use url::Url;

/// Short stable identifier of a site, e.g. `habr`. It is used as the key for
/// the persisted watermarks and subscriber tags, and users type it in commands.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct SiteId(String);

impl SiteId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Site {
    pub(crate) id: SiteId,
    pub(crate) name: String,
    pub(crate) all_feed_url: Url,
    pub(crate) best_feed_url: Url,

    /// Matches links to the articles of the site
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) article_pattern: Regex,

    /// Matches links to the user profiles of the site
    #[serde_as(as = "DisplayFromStr")]
    pub(crate) profile_pattern: Regex,

    /// Telegram Instant View template hash. Without it no IV links are produced.
    #[serde(default)]
    pub(crate) instant_view_rhash: Option<String>,

    #[serde(default)]
    pub(crate) policy: NoveltyPolicy,
}

impl Site {
    pub(crate) fn habr() -> Self {
        let id = SiteId::new("habr");
        Self {
            name: "Habr".to_owned(),
            all_feed_url: habr_url("https://habr.com/ru/rss/all/"),
            best_feed_url: habr_url("https://habr.com/ru/rss/best/"),
            article_pattern: (*lazy_regex::regex!(
                r"(?:https?://)?(?:www\.)?(?:habrahabr\.ru|habr\.com|habr\.ru)/(?:(?:ru|en)/)?(?:post|articles|news|company/[\w\-]+/blog)/\d{1,7}/?"
            ))
            .clone(),
            profile_pattern: (*lazy_regex::regex!(
                r"^(?:https?://)?(?:www\.)?(?:habrahabr\.ru|habr\.com|habr\.ru)/(?:(?:ru|en)/)?users/[\w\-]+/?$"
            ))
            .clone(),
            instant_view_rhash: Some("640326b822845b".to_owned()),
            policy: NoveltyPolicy::default(),
            id,
        }
    }

    /// Instant View link for the article, if the site has an IV template.
    pub(crate) fn instant_view_url(&self, article: &str) -> Option<Url> {
        let rhash = self.instant_view_rhash.as_deref()?;
        Url::parse_with_params(
            "https://t.me/iv",
            [("url", article), ("rhash", rhash)],
        )
        .ok()
    }

    /// Finds all article links in the text, in the order of appearance.
    pub(crate) fn find_article_links<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.article_pattern
            .find_iter(text)
            .map(|found| found.as_str())
            .collect()
    }
}

fn habr_url(url: &'static str) -> Url {
    Url::parse(url).unwrap_or_else(|err| panic!("BUG: invalid built-in URL {url}: {err}"))
}

/// Resolves the site the user refers to by its id
pub(crate) fn find_site<'s>(sites: &'s [Site], id: &str) -> Option<&'s Site> {
    sites.iter().find(|site| site.id.as_str().eq_ignore_ascii_case(id))
}

pub(crate) fn default_sites() -> Vec<Site> {
    vec![Site::habr()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    #[test]
    fn habr_article_links() {
        let site = Site::habr();
        let text = "see https://habr.com/ru/articles/765432/ and habr.com/ru/company/yandex/blog/123456/, \
            but not https://habr.com/ru/users/someone/";

        let links = site.find_article_links(text);
        assert_eq!(
            links,
            [
                "https://habr.com/ru/articles/765432/",
                "habr.com/ru/company/yandex/blog/123456/",
            ]
        );
    }

    #[test]
    fn habr_profile_links() {
        let site = Site::habr();
        assert!(site.profile_pattern.is_match("https://habr.com/ru/users/someone/"));
        assert!(site.profile_pattern.is_match("habr.com/users/some-one"));
        assert!(!site.profile_pattern.is_match("https://habr.com/ru/articles/765432/"));
    }

    #[test]
    fn instant_view_link() {
        let url = Site::habr()
            .instant_view_url("https://habr.com/ru/articles/765432/")
            .unwrap();

        expect![[r#"https://t.me/iv?url=https%3A%2F%2Fhabr.com%2Fru%2Farticles%2F765432%2F&rhash=640326b822845b"#]]
            .assert_eq(url.as_str());

        let mut site = Site::habr();
        site.instant_view_rhash = None;
        assert_eq!(site.instant_view_url("https://habr.com/ru/articles/1/"), None);
    }

    #[test]
    fn sites_from_json() {
        let json = r#"[{
            "id": "habr",
            "name": "Habr",
            "all_feed_url": "https://habr.com/ru/rss/articles/",
            "best_feed_url": "https://habr.com/ru/rss/articles/top/daily/",
            "article_pattern": "habr\\.com/ru/articles/\\d+",
            "profile_pattern": "habr\\.com/ru/users/\\w+",
            "policy": { "kind": "timestamp" }
        }]"#;

        let sites: Vec<Site> = serde_json::from_str(json).unwrap();
        assert_eq!(sites[0].policy, NoveltyPolicy::Timestamp);
        assert_eq!(sites[0].instant_view_rhash, None);
        assert!(find_site(&sites, "HABR").is_some());
        assert!(find_site(&sites, "geektimes").is_none());
    }
}
