//! Periodic delivery of the new feed entries to the subscribers.
mod digest;
mod dispatch;
mod matcher;
mod message;
mod reminder;
mod service;

pub(crate) use dispatch::*;
pub(crate) use matcher::*;
pub(crate) use message::*;
pub(crate) use reminder::*;
pub(crate) use service::*;

use chrono::NaiveTime;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub(crate) struct Config {
    #[serde(default = "default_period_secs")]
    pub(crate) period_secs: u64,

    /// Pause between the cycles of different sites
    #[serde(default = "default_site_pause_secs")]
    pub(crate) site_pause_secs: u64,

    #[serde(default = "default_send_ceiling")]
    pub(crate) send_ceiling: u32,

    #[serde(default = "default_throttle_pause_ms")]
    pub(crate) throttle_pause_ms: u64,

    #[serde(default = "default_max_concurrent_sends")]
    pub(crate) max_concurrent_sends: usize,

    #[serde(default = "default_watermark_path")]
    pub(crate) watermark_path: PathBuf,

    /// UTC time of the day when the best articles are sent
    #[serde(default = "default_best_digest_time")]
    pub(crate) best_digest_time: NaiveTime,

    #[serde(default = "default_best_digest_limit")]
    pub(crate) best_digest_limit: usize,

    #[serde(default = "default_shutdown_grace_secs")]
    pub(crate) shutdown_grace_secs: u64,

    /// How long after the button press the entry is sent once again
    #[serde(default = "default_reminder_delay_secs")]
    pub(crate) reminder_delay_secs: u64,

    /// How long the delivered entries can be reminded about
    #[serde(default = "default_article_retention_hours")]
    pub(crate) article_retention_hours: u64,
}

fn default_period_secs() -> u64 {
    20 * 60
}

fn default_site_pause_secs() -> u64 {
    5
}

fn default_send_ceiling() -> u32 {
    // Telegram allows about 30 messages per second for a bot
    25
}

fn default_throttle_pause_ms() -> u64 {
    1000
}

fn default_max_concurrent_sends() -> usize {
    8
}

fn default_watermark_path() -> PathBuf {
    "data/watermarks.json".into()
}

fn default_best_digest_time() -> NaiveTime {
    NaiveTime::from_hms_opt(18, 0, 0).unwrap_or_default()
}

fn default_best_digest_limit() -> usize {
    7
}

fn default_shutdown_grace_secs() -> u64 {
    2
}

fn default_reminder_delay_secs() -> u64 {
    6 * 60 * 60
}

fn default_article_retention_hours() -> u64 {
    7 * 24
}

impl Config {
    pub(crate) fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            send_ceiling: self.send_ceiling,
            throttle_pause: Duration::from_millis(self.throttle_pause_ms),
            max_concurrent_sends: self.max_concurrent_sends,
        }
    }

    pub(crate) fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub(crate) fn reminder_delay(&self) -> Duration {
        Duration::from_secs(self.reminder_delay_secs)
    }
}
