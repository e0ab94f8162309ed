//! Importing the tags from the user's profile page on the site

use crate::feed::{NormalizedTag, TagFilter};
use lazy_regex::Lazy;
use scraper::{Html, Selector};

/// Hubs the user is subscribed to
static HUB_SELECTOR: Lazy<Selector> = Lazy::new(|| selector(r#"li[rel="hub-popover"] a"#));

/// Company blogs the user is subscribed to
static COMPANY_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("a.list-snippet__title-link"));

/// Feed categories of company blogs have this prefix
const COMPANY_BLOG_PREFIX: &str = "Блог компании";

fn selector(selector: &str) -> Selector {
    Selector::parse(selector)
        .unwrap_or_else(|err| panic!("BUG: invalid selector `{selector}`: {err:?}"))
}

pub(crate) fn scrape_profile_tags(html: &str) -> TagFilter {
    let document = Html::parse_document(html);

    let text = |element: scraper::ElementRef<'_>| element.text().collect::<String>();

    let hubs = document
        .select(&HUB_SELECTOR)
        .filter_map(|hub| NormalizedTag::new(&text(hub)));

    let companies = document.select(&COMPANY_SELECTOR).filter_map(|company| {
        let company = text(company);
        let company = company.trim();
        if company.is_empty() {
            return None;
        }
        NormalizedTag::new(&format!("{COMPANY_BLOG_PREFIX} {company}"))
    });

    hubs.chain(companies).collect()
}

/// Adds the scheme if the user omitted it
pub(crate) fn profile_url(input: &str) -> String {
    if input.starts_with("http://") || input.starts_with("https://") {
        input.to_owned()
    } else {
        format!("https://{input}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expect_test::expect;

    const PROFILE: &str = r#"
        <html><body>
          <ul class="profile-section__hubs">
            <li rel="hub-popover" data-id="1"><a href="/hub/rust/">Rust</a></li>
            <li rel="hub-popover" data-id="2"><a href="/hub/open_source/"> Open source </a></li>
            <li rel="hub-popover" data-id="3"><a href="/hub/empty/">  </a></li>
            <li class="other"><a href="/hub/ignored/">Ignored</a></li>
          </ul>
          <div class="list-snippet">
            <a class="list-snippet__title-link" href="/company/yandex/">Яндекс</a>
            <a class="list-snippet__title-link" href="/company/jetbrains/">JetBrains</a>
          </div>
        </body></html>
    "#;

    #[test]
    fn scrapes_hubs_and_companies() {
        let tags = scrape_profile_tags(PROFILE);
        let tags: Vec<_> = tags.iter().map(NormalizedTag::as_str).collect();

        expect![[r#"
            [
                "open_source",
                "rust",
                "блог_компании_jetbrains",
                "блог_компании_яндекс",
            ]
        "#]]
        .assert_debug_eq(&tags);
    }

    #[test]
    fn page_without_tags() {
        assert!(scrape_profile_tags("<html><body>404</body></html>").is_empty());
    }

    #[test]
    fn scheme_is_added() {
        assert_eq!(profile_url("habr.com/users/x/"), "https://habr.com/users/x/");
        assert_eq!(profile_url("http://habr.com/users/x/"), "http://habr.com/users/x/");
    }
}
