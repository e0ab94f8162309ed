use crate::db::Subscriber;
use crate::feed::FeedEntry;

/// Subscribers without tags receive everything, the rest receive
/// entries that have at least one of their tags.
pub(crate) fn should_deliver(entry: &FeedEntry, subscriber: &Subscriber) -> bool {
    subscriber.tags.is_empty() || entry.categories.iter().any(|tag| subscriber.tags.contains(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::entry_for_tests as entry;
    use crate::feed::parse_tag_list;
    use teloxide::types::ChatId;

    fn subscriber(tags: &str) -> Subscriber {
        Subscriber {
            id: ChatId(1),
            mailout_enabled: true,
            tags: parse_tag_list(tags),
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        let subscriber = subscriber("");
        for tags in [&[][..], &["rust"], &["Open Source", "go"]] {
            assert!(should_deliver(&entry("a", 0, tags), &subscriber));
        }
    }

    #[test]
    fn tag_intersection() {
        let subscriber = subscriber("go rust");

        assert!(should_deliver(&entry("a", 0, &["python", "go"]), &subscriber));
        assert!(!should_deliver(&entry("a", 0, &["python", "java"]), &subscriber));
        assert!(!should_deliver(&entry("a", 0, &[]), &subscriber));
    }

    #[test]
    fn categories_are_compared_normalized() {
        let subscriber = subscriber("open_source");
        assert!(should_deliver(&entry("a", 0, &["Open Source"]), &subscriber));
    }
}
