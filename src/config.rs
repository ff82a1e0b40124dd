//! Configuration types for pin-relay

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Upper bound on album size imposed by the delivery channel
pub const MAX_ALBUM_SIZE: usize = 10;

/// Largest accepted `retry.backoff_multiplier`
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// Search API settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchApiConfig {
    /// Search resource endpoint
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Results requested per search call (default: 250)
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Scroll cursor sent with every search (default: 1000)
    #[serde(default = "default_scroll")]
    pub scroll: u32,

    /// Request timeout (default: 30 seconds)
    #[serde(default = "default_search_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for SearchApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            page_size: default_page_size(),
            scroll: default_scroll(),
            timeout: default_search_timeout(),
        }
    }
}

/// Download staging settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Directory where image bytes are staged before delivery (default: "./images")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum number of new images staged per run (default: 9)
    #[serde(default = "default_max_per_run")]
    pub max_per_run: usize,

    /// Per-image download timeout (default: 60 seconds)
    #[serde(default = "default_download_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_per_run: default_max_per_run(),
            timeout: default_download_timeout(),
        }
    }
}

/// Which item of an album carries the caption
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionPlacement {
    /// First item of each album (default)
    #[default]
    First,
    /// Last item of each album
    Last,
}

/// Album delivery settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Chat or channel the albums are sent to (e.g. "@my_channel")
    #[serde(default)]
    pub chat_target: String,

    /// Images per album (default: 9, channel maximum: 10)
    #[serde(default = "default_images_per_album")]
    pub images_per_album: usize,

    /// Caption attached to one item per album (Markdown)
    #[serde(default)]
    pub caption: Option<String>,

    /// Which album item carries the caption
    #[serde(default)]
    pub caption_placement: CaptionPlacement,

    /// Pause after each successfully delivered album (default: 2 seconds)
    #[serde(default = "default_inter_batch_delay", with = "duration_serde")]
    pub inter_batch_delay: Duration,

    /// Also redeliver items of the same query left unsent by earlier runs (default: false)
    #[serde(default)]
    pub recover_backlog: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chat_target: String::new(),
            images_per_album: default_images_per_album(),
            caption: None,
            caption_placement: CaptionPlacement::default(),
            inter_batch_delay: default_inter_batch_delay(),
            recover_backlog: false,
        }
    }
}

/// Retry behavior for album sends
///
/// Defaults give a fixed delay: three attempts, five seconds apart.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of attempts, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 5 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each retry (default: 1.0 = fixed delay)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite state store path (default: "images.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Chat front end settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotConfig {
    /// Shared password users send to unlock the bot (None = bot stays locked)
    #[serde(default)]
    pub password: Option<String>,

    /// Telegram bot token
    #[serde(default)]
    pub token: Option<String>,

    /// Telegram Bot API base URL
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,

    /// Timeout for a single album upload (default: 60 seconds)
    #[serde(default = "default_send_timeout", with = "duration_serde")]
    pub send_timeout: Duration,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            password: None,
            token: None,
            api_base: default_telegram_api_base(),
            send_timeout: default_send_timeout(),
        }
    }
}

/// Main configuration for the relay
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Search API settings
    #[serde(default)]
    pub search: SearchApiConfig,

    /// Download staging settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Album delivery settings
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Retry policy for album sends
    #[serde(default)]
    pub retry: RetryConfig,

    /// State store settings
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Chat front end settings
    #[serde(default)]
    pub bot: BotConfig,
}

impl Config {
    /// Check settings that would make a run meaningless or violate channel limits
    pub fn validate(&self) -> Result<()> {
        if self.search.page_size == 0 {
            return Err(config_error("page size must be at least 1", "search.page_size"));
        }
        if !(1..=MAX_ALBUM_SIZE).contains(&self.delivery.images_per_album) {
            return Err(config_error(
                &format!("album size must be between 1 and {}", MAX_ALBUM_SIZE),
                "delivery.images_per_album",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(config_error(
                "at least one send attempt is required",
                "retry.max_attempts",
            ));
        }
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&self.retry.backoff_multiplier) {
            return Err(config_error(
                &format!(
                    "backoff multiplier must be between 1.0 and {}",
                    MAX_BACKOFF_MULTIPLIER
                ),
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_search_endpoint() -> String {
    "https://tr.pinterest.com/resource/BaseSearchResource/get/".to_string()
}

fn default_page_size() -> usize {
    250
}

fn default_scroll() -> u32 {
    1000
}

fn default_search_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./images")
}

fn default_max_per_run() -> usize {
    9
}

fn default_download_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_images_per_album() -> usize {
    9
}

fn default_inter_batch_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    1.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("images.db")
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_send_timeout() -> Duration {
    Duration::from_secs(60)
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
