use super::digest::next_occurrence;
use super::{
    format_best, format_entry, should_deliver, Delivery, DeliveryReport, DeliveryStatus, Dispatcher,
    OutgoingMessage,
};
use crate::db::{ReminderRepo, SubscriberRepo};
use crate::feed::{FeedEntry, FeedSource, Site, Watermark, WatermarkStore, Watermarks};
use crate::prelude::*;
use crate::Result;
use chrono::{NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// State that lives across the mailout cycles. It is owned by the mailout
/// loop and nothing else mutates it.
#[derive(Debug, Default)]
pub(crate) struct MailoutState {
    pub(crate) watermarks: Watermarks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CycleOutcome {
    /// The site had no watermark. It was initialized from the current feed
    /// and nothing was delivered.
    Primed,

    NoNewEntries,

    Delivered {
        new_entries: usize,
        delivered: usize,
        undelivered: usize,
    },
}

#[derive(Debug, Clone)]
pub(crate) struct Schedule {
    pub(crate) period: Duration,
    pub(crate) site_pause: Duration,
    pub(crate) best_digest_time: NaiveTime,
    pub(crate) best_digest_limit: usize,
    pub(crate) article_retention: Duration,
}

impl From<&super::Config> for Schedule {
    fn from(config: &super::Config) -> Self {
        Self {
            period: Duration::from_secs(config.period_secs),
            site_pause: Duration::from_secs(config.site_pause_secs),
            best_digest_time: config.best_digest_time,
            best_digest_limit: config.best_digest_limit,
            article_retention: Duration::from_secs(config.article_retention_hours * 60 * 60),
        }
    }
}

pub(crate) struct Mailout {
    pub(crate) sites: Arc<Vec<Site>>,
    pub(crate) feeds: Arc<dyn FeedSource>,
    pub(crate) subscribers: Arc<SubscriberRepo>,
    pub(crate) articles: Arc<ReminderRepo>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) store: Arc<dyn WatermarkStore>,
    pub(crate) schedule: Schedule,
}

impl Mailout {
    /// Runs until the shutdown signal. The cycle that is in progress when the
    /// signal arrives is finished, but no new ones are started.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut state = self.load_state().await;

        let mut interval = tokio::time::interval(self.schedule.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut next_digest = next_occurrence(Utc::now(), self.schedule.best_digest_time);

        info!(
            period = tracing_duration(self.schedule.period),
            %next_digest,
            sites = self.sites.len(),
            "Mailout started"
        );

        loop {
            let until_digest = (next_digest - Utc::now()).to_std().unwrap_or_default();

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => self.run_all_sites(&mut state).await,
                () = tokio::time::sleep(until_digest) => {
                    self.send_best_digest().await;
                    // The timer and the wall clock may disagree a bit. Never
                    // schedule the same digest twice.
                    let now = Utc::now().max(next_digest);
                    next_digest = next_occurrence(now, self.schedule.best_digest_time);
                    info!(%next_digest, "Scheduled the next best articles digest");
                }
            }
        }

        info!("Mailout stopped");
    }

    /// Sites without a watermark are primed by their first cycle. That is
    /// wrong if the saved state exists but is unreadable: the entries that
    /// appeared while the bot was down would be skipped. Such sites start
    /// from an empty watermark instead, so those entries are delivered.
    pub(crate) async fn load_state(&self) -> MailoutState {
        let watermarks = match self.store.load().await {
            Ok(watermarks) => watermarks,
            Err(err) => {
                warn!(
                    err = tracing_err(&err),
                    "Failed to load the watermarks, all sites start from the empty ones"
                );
                self.sites
                    .iter()
                    .map(|site| (site.id.clone(), Watermark::empty(&site.policy)))
                    .collect()
            }
        };

        MailoutState { watermarks }
    }

    async fn run_all_sites(&self, state: &mut MailoutState) {
        for (i, site) in self.sites.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.schedule.site_pause).await;
            }

            let span = info_span!("mailout_cycle", site = %site.id);

            async {
                match self.run_cycle(site, state).with_duration().await {
                    (Ok(outcome), duration) => {
                        info!(?outcome, duration = tracing_duration(duration), "Mailout cycle finished");
                    }
                    (Err(err), _) => {
                        warn!(err = tracing_err(&err), "Mailout cycle was skipped");
                    }
                }
            }
            .instrument(span)
            .await;
        }
    }

    /// fetch → filter → match → deliver → persist
    ///
    /// Any error returned from here means the watermark of the site wasn't changed.
    pub(crate) async fn run_cycle(&self, site: &Site, state: &mut MailoutState) -> Result<CycleOutcome> {
        let fetched = self.feeds.fetch(&site.all_feed_url).await;

        let result = if fetched.is_ok() { "ok" } else { "error" };
        metrics::increment_counter!(
            "feed_fetches_total",
            "site" => site.id.to_string(),
            "result" => result
        );

        let entries = fetched?;

        let Some(watermark) = state.watermarks.get(&site.id) else {
            info!(entries = entries.len(), "Site has no watermark yet, priming it");

            let watermark = Watermark::primed(&site.policy, &entries);
            state.watermarks.insert(site.id.clone(), watermark);
            self.persist(state).await;

            return Ok(CycleOutcome::Primed);
        };

        let (new_entries, watermark) = watermark
            .clone()
            .conform_to(&site.policy, &entries)
            .filter_new(&entries);

        if new_entries.is_empty() {
            state.watermarks.insert(site.id.clone(), watermark);
            self.persist(state).await;
            return Ok(CycleOutcome::NoNewEntries);
        }

        metrics::counter!(
            "feed_new_entries_total",
            new_entries.len() as u64,
            "site" => site.id.to_string()
        );

        // Snapshot of the subscribers. Changes made while delivering are seen
        // only by the next cycle.
        let subscribers = self.subscribers.get_all(&site.id).await?;

        let messages = self.remember_articles(site, &new_entries).await;

        let deliveries: Vec<_> = subscribers
            .iter()
            .filter(|subscriber| subscriber.mailout_enabled)
            .filter_map(|subscriber| {
                let messages: Vec<_> = messages
                    .iter()
                    .filter(|(entry, _)| should_deliver(entry, subscriber))
                    .map(|(_, message)| message.clone())
                    .collect();

                (!messages.is_empty()).then_some(Delivery {
                    chat: subscriber.id,
                    messages,
                })
            })
            .collect();

        info!(
            new_entries = new_entries.len(),
            recipients = deliveries.len(),
            "Delivering new entries"
        );

        let report = self.dispatcher.deliver(deliveries).await;

        // Advanced only after the delivery was attempted. If the process
        // dies before this point, the entries are delivered once again.
        state.watermarks.insert(site.id.clone(), watermark);
        self.persist(state).await;

        let delivered = report.count(DeliveryStatus::Delivered);

        Ok(CycleOutcome::Delivered {
            new_entries: new_entries.len(),
            delivered,
            undelivered: report.outcomes.len() - delivered,
        })
    }

    /// Formats the entries and saves them for the reminders. If the database
    /// is unavailable, the entries are delivered without the reminder button.
    async fn remember_articles<'e>(
        &self,
        site: &Site,
        entries: &'e [FeedEntry],
    ) -> Vec<(&'e FeedEntry, OutgoingMessage)> {
        let mut messages = Vec::with_capacity(entries.len());

        for entry in entries {
            let text = format_entry(site, entry);
            let remind_about = self
                .articles
                .save_article(entry.link.as_str(), &text)
                .await
                .map_err(|err| warn!(err = tracing_err(&err), "Failed to save the article for reminders"))
                .ok();

            messages.push((entry, OutgoingMessage { text, remind_about }));
        }

        let retention = chrono::Duration::from_std(self.schedule.article_retention).unwrap_or_default();
        match self.articles.prune_articles(Utc::now() - retention).await {
            Ok(0) => {}
            Ok(pruned) => debug!(pruned, "Forgot the old articles"),
            Err(err) => warn!(err = tracing_err(&err), "Failed to prune the old articles"),
        }

        messages
    }

    async fn persist(&self, state: &MailoutState) {
        if let Err(err) = self.store.save(&state.watermarks).await {
            error!(
                err = tracing_err(&err),
                "Failed to save the watermarks, keeping them only in memory"
            );
        }
    }

    /// Sends the top entries of the best feed of every site to every
    /// subscriber with the enabled mailout.
    #[instrument(skip(self))]
    pub(crate) async fn send_best_digest(&self) -> Option<DeliveryReport> {
        let mut digests = vec![];

        for site in self.sites.iter() {
            match self.feeds.fetch(&site.best_feed_url).await {
                Ok(entries) => {
                    digests.extend(format_best(site, &entries, self.schedule.best_digest_limit));
                }
                Err(err) => {
                    warn!(site = %site.id, err = tracing_err(&err), "Failed to fetch the best articles");
                }
            }
        }

        if digests.is_empty() {
            warn!("There are no best articles to send");
            return None;
        }

        let chats = self
            .subscribers
            .get_mailout_enabled_ids()
            .await
            .map_err(|err| warn!(err = tracing_err(&err), "Failed to list the subscribers"))
            .ok()?;

        let deliveries = chats
            .into_iter()
            .map(|chat| Delivery {
                chat,
                messages: digests.iter().cloned().map(OutgoingMessage::from).collect(),
            })
            .collect();

        let report = self.dispatcher.deliver(deliveries).await;

        info!(
            delivered = report.count(DeliveryStatus::Delivered),
            total = report.outcomes.len(),
            "Sent the best articles digest"
        );

        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{lazy_db, temp_db};
    use crate::feed::{entry_for_tests as entry, parse_tag_list, FeedEntry, NoveltyPolicy, SiteId};
    use crate::mailout::dispatch::tests::{FakeCourier, CONFIG};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use teloxide::types::ChatId;
    use url::Url;

    #[derive(Default)]
    struct FakeFeeds {
        feeds: Mutex<HashMap<Url, Vec<FeedEntry>>>,
        fetched: Mutex<Vec<Url>>,
    }

    impl FakeFeeds {
        fn set(&self, url: &Url, entries: Vec<FeedEntry>) {
            self.feeds.lock().unwrap().insert(url.clone(), entries);
        }

        fn unset(&self, url: &Url) {
            self.feeds.lock().unwrap().remove(url);
        }

        fn fetches(&self, url: &Url) -> usize {
            self.fetched.lock().unwrap().iter().filter(|it| *it == url).count()
        }
    }

    #[async_trait]
    impl FeedSource for FakeFeeds {
        async fn fetch(&self, url: &Url) -> Result<Vec<FeedEntry>> {
            self.fetched.lock().unwrap().push(url.clone());
            self.feeds
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| fatal!("Feed {url} is unavailable"))
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Watermarks>,
        saves: AtomicUsize,
        broken: bool,
        corrupted: bool,
    }

    #[async_trait]
    impl WatermarkStore for MemoryStore {
        async fn load(&self) -> Result<Watermarks> {
            if self.corrupted {
                return Err(fatal!("Unexpected end of the watermarks file"));
            }
            Ok(self.saved.lock().unwrap().clone())
        }

        async fn save(&self, watermarks: &Watermarks) -> Result {
            if self.broken {
                return Err(fatal!("Disk is full"));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.saved.lock().unwrap() = watermarks.clone();
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        mailout: Mailout,
        feeds: Arc<FakeFeeds>,
        store: Arc<MemoryStore>,
        courier: Arc<FakeCourier>,
        site: Site,
    }

    async fn fixture(store: MemoryStore) -> Fixture {
        let (dir, db) = temp_db().await;
        let repo = db.subscribers;

        let habr = SiteId::new("habr");
        repo.add_tags(ChatId(1), &habr, &parse_tag_list("rust")).await.unwrap();
        repo.create_if_absent(ChatId(2)).await.unwrap();
        repo.disable_mailout(ChatId(3)).await.unwrap();

        let site = Site::habr();
        let feeds = Arc::new(FakeFeeds::default());
        let store = Arc::new(store);
        let courier = Arc::new(FakeCourier::default());

        let mailout = Mailout {
            sites: Arc::new(vec![site.clone()]),
            feeds: feeds.clone(),
            subscribers: Arc::new(repo),
            articles: Arc::new(db.reminders),
            dispatcher: Arc::new(Dispatcher::new(courier.clone(), CONFIG)),
            store: store.clone(),
            schedule: Schedule {
                period: Duration::from_secs(60),
                site_pause: Duration::from_secs(1),
                best_digest_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                best_digest_limit: 2,
                article_retention: Duration::from_secs(3600),
            },
        };

        Fixture {
            _dir: dir,
            mailout,
            feeds,
            store,
            courier,
            site,
        }
    }

    fn titles(courier: &FakeCourier, chat: i64) -> Vec<String> {
        courier
            .sent_to(ChatId(chat))
            .iter()
            .map(|text| text.lines().next().unwrap_or_default().split(" <a").next().unwrap().to_owned())
            .collect()
    }

    #[test_log::test(tokio::test)]
    async fn first_fetch_primes_then_only_new_entries_are_delivered() {
        let Fixture {
            _dir,
            mailout,
            feeds,
            store,
            courier,
            site,
        } = fixture(MemoryStore::default()).await;
        let mut state = MailoutState::default();

        feeds.set(&site.all_feed_url, vec![entry("b", 200, &["rust"]), entry("a", 100, &[])]);
        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Primed);
        assert!(courier.sent.lock().unwrap().is_empty());

        feeds.set(
            &site.all_feed_url,
            vec![
                entry("d", 400, &["go"]),
                entry("c", 300, &["Rust"]),
                entry("b", 200, &["rust"]),
                entry("a", 100, &[]),
            ],
        );
        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Delivered {
                new_entries: 2,
                delivered: 3,
                undelivered: 0,
            }
        );

        assert_eq!(titles(&courier, 1), ["Title of c"]);
        assert_eq!(titles(&courier, 2), ["Title of c", "Title of d"]);
        assert!(titles(&courier, 3).is_empty());

        // Same feed once again
        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoNewEntries);
        assert_eq!(courier.sent.lock().unwrap().len(), 3);

        // Persisted after every successful fetch
        assert_eq!(store.saves.load(Ordering::SeqCst), 3);

        // Restart: the state is restored from the store
        let mut state = mailout.load_state().await;
        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoNewEntries);
        assert_eq!(courier.sent.lock().unwrap().len(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn fetch_failure_skips_the_cycle() {
        let Fixture {
            _dir,
            mailout,
            feeds,
            store,
            courier,
            site,
        } = fixture(MemoryStore::default()).await;

        let mut state = MailoutState::default();
        state
            .watermarks
            .insert(site.id.clone(), Watermark::empty(&site.policy));

        feeds.unset(&site.all_feed_url);
        mailout.run_cycle(&site, &mut state).await.unwrap_err();

        assert_eq!(state.watermarks[&site.id], Watermark::empty(&site.policy));
        assert_eq!(store.saves.load(Ordering::SeqCst), 0);
        assert!(courier.sent.lock().unwrap().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn save_failure_keeps_the_watermark_in_memory() {
        let Fixture {
            _dir,
            mailout,
            feeds,
            courier,
            site,
            ..
        } = fixture(MemoryStore {
            broken: true,
            ..Default::default()
        })
        .await;

        let mut state = MailoutState::default();
        state
            .watermarks
            .insert(site.id.clone(), Watermark::empty(&NoveltyPolicy::Timestamp));

        feeds.set(&site.all_feed_url, vec![entry("a", 100, &[])]);

        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Delivered { new_entries: 1, .. }), "{outcome:?}");

        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoNewEntries);

        assert_eq!(titles(&courier, 2), ["Title of a"]);
    }

    #[test_log::test(tokio::test)]
    async fn new_entries_can_be_reminded_about() {
        let Fixture {
            _dir,
            mailout,
            feeds,
            courier,
            site,
            ..
        } = fixture(MemoryStore::default()).await;

        let mut state = MailoutState::default();
        state
            .watermarks
            .insert(site.id.clone(), Watermark::empty(&site.policy));

        feeds.set(&site.all_feed_url, vec![entry("b", 200, &["rust"]), entry("a", 100, &[])]);
        mailout.run_cycle(&site, &mut state).await.unwrap();

        let messages = courier.messages_to(ChatId(2));
        assert_eq!(messages.len(), 2);

        // The same article for both subscribers
        let rust = messages.iter().find(|m| m.text.contains("Title of b")).unwrap();
        assert_eq!(courier.messages_to(ChatId(1)), [rust.clone()]);

        let article = rust.remind_about.unwrap();
        let text = mailout.articles.get_article(article).await.unwrap();
        assert_eq!(text.as_ref(), Some(&rust.text));

        // Digests have no button
        feeds.set(&site.best_feed_url, vec![entry("x", 0, &[])]);
        mailout.send_best_digest().await.unwrap();
        assert_eq!(courier.messages_to(ChatId(2))[2].remind_about, None);
    }

    #[test_log::test(tokio::test)]
    async fn best_digest_goes_to_enabled_subscribers() {
        let Fixture {
            _dir,
            mailout,
            feeds,
            courier,
            site,
            ..
        } = fixture(MemoryStore::default()).await;

        assert!(mailout.send_best_digest().await.is_none());

        feeds.set(
            &site.best_feed_url,
            vec![entry("x", 0, &[]), entry("y", 0, &[]), entry("z", 0, &[])],
        );

        let report = mailout.send_best_digest().await.unwrap();
        assert_eq!(report.count(DeliveryStatus::Delivered), 2);

        let digest = &courier.sent_to(ChatId(1))[0];
        assert!(digest.contains("Title of y"), "{digest}");
        assert!(!digest.contains("Title of z"), "{digest}");
        assert_eq!(courier.sent_to(ChatId(2)), [digest.clone()]);
        assert!(courier.sent_to(ChatId(3)).is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn unreadable_state_delivers_instead_of_priming() {
        let Fixture {
            _dir,
            mailout,
            feeds,
            store,
            courier,
            site,
        } = fixture(MemoryStore {
            corrupted: true,
            ..Default::default()
        })
        .await;

        let mut state = mailout.load_state().await;
        assert_eq!(state.watermarks[&site.id], Watermark::empty(&site.policy));

        feeds.set(&site.all_feed_url, vec![entry("b", 200, &[]), entry("a", 100, &[])]);

        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Delivered { new_entries: 2, .. }), "{outcome:?}");
        assert_eq!(titles(&courier, 2), ["Title of a", "Title of b"]);
        assert_eq!(store.saves.load(Ordering::SeqCst), 1);
    }

    #[test_log::test(tokio::test)]
    async fn policy_change_doesnt_flood_the_subscribers() {
        let Fixture {
            _dir,
            mailout,
            feeds,
            courier,
            site,
            ..
        } = fixture(MemoryStore::default()).await;

        let entries = vec![entry("b", 200, &[]), entry("a", 100, &[])];
        let mut state = MailoutState::default();
        state.watermarks.insert(
            site.id.clone(),
            Watermark::primed(&NoveltyPolicy::Timestamp, &entries[1..]),
        );

        feeds.set(&site.all_feed_url, entries);

        let outcome = mailout.run_cycle(&site, &mut state).await.unwrap();
        assert_eq!(outcome, CycleOutcome::NoNewEntries);
        assert!(courier.sent.lock().unwrap().is_empty());
        assert!(matches!(state.watermarks[&site.id], Watermark::RecentLinks(_)));
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn loop_runs_cycles_and_digest_until_shutdown() {
        let habr = Site::habr();
        let other = Site {
            id: SiteId::new("geektimes"),
            all_feed_url: "https://geektimes.example/rss/all/".parse().unwrap(),
            best_feed_url: "https://geektimes.example/rss/best/".parse().unwrap(),
            ..Site::habr()
        };

        let feeds = Arc::new(FakeFeeds::default());
        feeds.set(&habr.all_feed_url, vec![entry("a", 100, &[])]);
        feeds.set(&other.all_feed_url, vec![entry("x", 100, &[])]);

        let store = Arc::new(MemoryStore::default());
        let db = lazy_db();

        // The digest fetches nothing, so the subscribers aren't queried
        let best_digest_time = (Utc::now() + chrono::Duration::seconds(90)).time();

        let mailout = Mailout {
            sites: Arc::new(vec![habr.clone(), other.clone()]),
            feeds: feeds.clone(),
            subscribers: Arc::new(db.subscribers),
            articles: Arc::new(db.reminders),
            dispatcher: Arc::new(Dispatcher::new(Arc::new(FakeCourier::default()), CONFIG)),
            store: store.clone(),
            schedule: Schedule {
                period: Duration::from_secs(60),
                site_pause: Duration::from_secs(1),
                best_digest_time,
                best_digest_limit: 2,
                article_retention: Duration::from_secs(3600),
            },
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(mailout.run(shutdown_rx));

        let fetches = || {
            [
                feeds.fetches(&habr.all_feed_url),
                feeds.fetches(&other.all_feed_url),
                feeds.fetches(&habr.best_feed_url),
                feeds.fetches(&other.best_feed_url),
            ]
        };

        // The first cycle starts immediately, the next site waits for the pause
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fetches(), [1, 0, 0, 0]);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(fetches(), [1, 1, 0, 0]);
        assert_eq!(store.saved.lock().unwrap().len(), 2);

        // 60.5s
        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fetches(), [2, 1, 0, 0]);

        // 91.5s, the digest has fired once
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(fetches(), [2, 2, 1, 1]);

        shutdown.send(true).unwrap();
        task.await.unwrap();

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fetches(), [2, 2, 1, 1]);
    }
}
