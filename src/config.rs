use serde::Deserialize;
use std::time::Duration;

use crate::jobs::discover::DiscoverOptions;
use crate::jobs::process_queue::ProcessOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Per-request timeout for page fetches, in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Fixed part of the delay before each outbound request
    #[serde(default = "default_base_delay_ms")]
    pub politeness_base_delay_ms: u64,

    /// Upper bound of the uniform random delay added on top of the base delay
    #[serde(default = "default_jitter_ms")]
    pub politeness_jitter_ms: u64,

    /// Detail pages fetched in parallel by one process-queue run
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Monthly prices above this are treated as mis-parsed sale prices
    #[serde(default = "default_max_monthly_price_usd")]
    pub max_monthly_price_usd: f64,

    #[serde(default = "default_stale_window_days")]
    pub stale_window_days: i64,

    #[serde(default = "default_discover_page_cap")]
    pub discover_page_cap: u32,

    #[serde(default = "default_process_batch_size")]
    pub process_batch_size: usize,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_browser_headless")]
    pub browser_headless: bool,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_base_delay_ms() -> u64 {
    1500
}

fn default_jitter_ms() -> u64 {
    1500
}

fn default_fetch_concurrency() -> usize {
    2
}

fn default_max_monthly_price_usd() -> f64 {
    20_000.0
}

fn default_stale_window_days() -> i64 {
    7
}

fn default_discover_page_cap() -> u32 {
    3
}

fn default_process_batch_size() -> usize {
    25
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_browser_headless() -> bool {
    true
}

/// How adapters talk to a source
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
    pub browser_headless: bool,
}

/// Delay applied before every outbound request: `base + uniform(0, jitter)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Politeness {
    pub base_delay: Duration,
    pub jitter: Duration,
}

impl Politeness {
    pub fn none() -> Self {
        Self {
            base_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            browser_headless: self.browser_headless,
        }
    }

    pub fn politeness(&self) -> Politeness {
        Politeness {
            base_delay: Duration::from_millis(self.politeness_base_delay_ms),
            jitter: Duration::from_millis(self.politeness_jitter_ms),
        }
    }

    pub fn discover_options(&self) -> DiscoverOptions {
        DiscoverOptions {
            page_cap: self.discover_page_cap,
            url_cap: None,
            politeness: self.politeness(),
        }
    }

    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            batch_size: self.process_batch_size,
            concurrency: self.fetch_concurrency.max(1),
            fetch_timeout: Duration::from_secs(self.request_timeout_secs),
            politeness: self.politeness(),
            max_monthly_price_usd: self.max_monthly_price_usd,
        }
    }
}
