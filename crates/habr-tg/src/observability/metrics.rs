use super::GLOBAL_LABELS;
use crate::config::from_env_or_panic;
use serde::Deserialize;

#[derive(Deserialize)]
struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    metrics_port: u16,
}

fn default_metrics_port() -> u16 {
    2000
}

pub fn init_metrics() {
    let config: MetricsConfig = from_env_or_panic("");

    let mut builder = metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port));

    for (key, value) in GLOBAL_LABELS {
        builder = builder.add_global_label(*key, *value);
    }

    builder
        .install()
        .expect("BUG: failed to initialize the metrics listener");

    describe_metrics();
}

fn describe_metrics() {
    metrics::describe_counter!(
        "feed_fetches_total",
        "Number of attempts to fetch a site's feed, labeled by the final result"
    );
    metrics::describe_counter!(
        "feed_new_entries_total",
        "Number of entries that the novelty filter considered new"
    );
    metrics::describe_counter!(
        "mailout_deliveries_total",
        "Number of messages the mailout tried to deliver, labeled by the outcome"
    );
    metrics::describe_counter!(
        "mailout_throttle_pauses_total",
        "Number of times the mailout paused to stay under the send-rate ceiling"
    );
    metrics::describe_counter!(
        "reminders_sent_total",
        "Number of the reminders delivered to the subscribers"
    );
    metrics::describe_counter!(
        "tg_updates_total",
        "Number of updates received from Telegram"
    );
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "Duration of a single outgoing HTTP request"
    );
}
