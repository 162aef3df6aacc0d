use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    /// Search result URLs to paginate through, in order.
    #[serde(default)]
    pub search_urls: Vec<String>,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Base used to build product URLs from ASINs, e.g. `https://www.amazon.in`.
    #[serde(default = "default_product_base")]
    pub product_base: String,

    #[serde(default = "default_database")]
    pub database: String,

    /// Single upstream proxy for all requests, if any.
    #[serde(default)]
    pub proxy: Option<String>,

    /// Directory where raw response bodies are dumped for later inspection.
    #[serde(default)]
    pub debug_dir: Option<PathBuf>,

    #[serde(default)]
    pub limiter: LimiterConfig,

    #[serde(default = "default_listing_retry")]
    pub listing_retry: RetryConfig,

    #[serde(default = "default_product_retry")]
    pub product_retry: RetryConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default = "default_run_retries")]
    pub run_retries: u32,

    #[serde(default = "default_run_retry_delay_secs")]
    pub run_retry_delay_secs: u64,

    /// Titles containing any of these (case-insensitive) are dropped.
    #[serde(default = "default_combo_keywords")]
    pub combo_keywords: Vec<String>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            search_urls: vec![],
            max_pages: default_max_pages(),
            product_base: default_product_base(),
            database: default_database(),
            proxy: None,
            debug_dir: None,
            limiter: LimiterConfig::default(),
            listing_retry: default_listing_retry(),
            product_retry: default_product_retry(),
            pacing: PacingConfig::default(),
            timeouts: TimeoutConfig::default(),
            run_retries: default_run_retries(),
            run_retry_delay_secs: default_run_retry_delay_secs(),
            combo_keywords: default_combo_keywords(),
        }
    }
}

fn default_max_pages() -> u32 {
    20
}

fn default_product_base() -> String {
    String::from("https://www.amazon.in")
}

fn default_database() -> String {
    String::from("sqlite://data/raw_pages.db")
}

fn default_listing_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 5,
        base_delay_secs: 10.0,
        jitter: Some(DelayRange {
            min_secs: 1.0,
            max_secs: 5.0,
        }),
        max_delay_secs: default_max_delay_secs(),
    }
}

fn default_product_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_secs: 5.0,
        jitter: None,
        max_delay_secs: default_max_delay_secs(),
    }
}

fn default_run_retries() -> u32 {
    3
}

fn default_run_retry_delay_secs() -> u64 {
    60
}

fn default_combo_keywords() -> Vec<String> {
    [
        "combo",
        "bundle",
        "with bag",
        "with mouse",
        "with accessories",
        "+ mouse",
        "+ bag",
        "with backpack",
        "+ backpack",
        "with headphone",
        "with keyboard",
        "+ keyboard",
        "+ headphone",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Per-domain admission control settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterConfig {
    /// Starting target rate in requests per second.
    #[serde(default = "default_initial_rate")]
    pub initial_rate: f64,

    #[serde(default = "default_min_rate")]
    pub min_rate: f64,

    #[serde(default = "default_max_rate")]
    pub max_rate: f64,

    /// Admitted requests allowed within one spacing interval before a
    /// cooldown is forced.
    #[serde(default = "default_burst_limit")]
    pub burst_limit: usize,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Random delay added after every admission.
    #[serde(default = "default_limiter_jitter")]
    pub jitter: DelayRange,

    /// Feedback-driven rate adjustment on/off.
    #[serde(default = "default_adaptive")]
    pub adaptive: bool,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            initial_rate: default_initial_rate(),
            min_rate: default_min_rate(),
            max_rate: default_max_rate(),
            burst_limit: default_burst_limit(),
            cooldown_secs: default_cooldown_secs(),
            jitter: default_limiter_jitter(),
            adaptive: default_adaptive(),
        }
    }
}

impl LimiterConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

fn default_initial_rate() -> f64 {
    0.5
}

fn default_min_rate() -> f64 {
    0.1
}

fn default_max_rate() -> f64 {
    2.0
}

fn default_burst_limit() -> usize {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_limiter_jitter() -> DelayRange {
    DelayRange {
        min_secs: 0.1,
        max_secs: 0.5,
    }
}

fn default_adaptive() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_secs: f64,
    /// Extra random delay added on top of the exponential backoff.
    #[serde(default)]
    pub jitter: Option<DelayRange>,
    /// Ceiling for a single backoff sleep.
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
}

fn default_max_delay_secs() -> f64 {
    300.0
}

/// Coarse pacing between orchestration steps, separate from the limiter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingConfig {
    #[serde(default = "default_product_pause")]
    pub between_products: DelayRange,

    #[serde(default = "default_page_pause")]
    pub between_pages: DelayRange,

    #[serde(default = "default_url_pause")]
    pub between_urls: DelayRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            between_products: default_product_pause(),
            between_pages: default_page_pause(),
            between_urls: default_url_pause(),
        }
    }
}

fn default_product_pause() -> DelayRange {
    DelayRange {
        min_secs: 1.0,
        max_secs: 3.0,
    }
}

fn default_page_pause() -> DelayRange {
    DelayRange {
        min_secs: 2.0,
        max_secs: 5.0,
    }
}

fn default_url_pause() -> DelayRange {
    DelayRange {
        min_secs: 5.0,
        max_secs: 10.0,
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    #[serde(default = "default_read_secs")]
    pub read_secs: u64,

    #[serde(default = "default_total_secs")]
    pub total_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            read_secs: default_read_secs(),
            total_secs: default_total_secs(),
        }
    }
}

fn default_connect_secs() -> u64 {
    10
}

fn default_read_secs() -> u64 {
    30
}

fn default_total_secs() -> u64 {
    60
}

/// A uniform random delay in `[min_secs, max_secs]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelayRange {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl DelayRange {
    pub fn sample(&self) -> Duration {
        let span = (self.max_secs - self.min_secs).max(0.0);
        Duration::from_secs_f64(self.min_secs + fastrand::f64() * span)
    }
}
