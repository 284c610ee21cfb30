//! Run-scoped network configuration.
//!
//! Every component that talks to the network receives a [`RunConfig`] (or the
//! client built from it). Nothing in the core reads proxy or timeout settings
//! from the process environment.

use crate::error::{PaperbotError, Result};
use std::time::Duration;

/// Default Google Scholar URL
pub const DEFAULT_SCHOLAR_URL: &str = "https://scholar.google.com";

/// Crossref API base URL
pub const DEFAULT_CROSSREF_URL: &str = "https://api.crossref.org";

/// Polite pool email for Crossref API
pub const DEFAULT_MAILTO: &str = "paperbot@example.com";

/// User agent string for requests
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Network behaviour shared by all components of one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Timeout applied to every single request
    pub request_timeout: Duration,
    /// Proxy URL (e.g., "http://127.0.0.1:7890")
    pub proxy: Option<String>,
    /// User agent sent with every request
    pub user_agent: String,
    /// Number of papers processed concurrently
    pub workers: usize,
    /// Random pause between two search result pages, `(min, max)`
    pub page_delay: (Duration, Duration),
    /// Search backend base URL (mirror sites allowed)
    pub scholar_url: String,
    /// Crossref API base URL
    pub crossref_url: String,
    /// Contact address for the Crossref polite pool
    pub mailto: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            proxy: None,
            user_agent: USER_AGENT.to_string(),
            workers: 3,
            page_delay: (Duration::from_millis(500), Duration::from_millis(2000)),
            scholar_url: DEFAULT_SCHOLAR_URL.to_string(),
            crossref_url: DEFAULT_CROSSREF_URL.to_string(),
            mailto: DEFAULT_MAILTO.to_string(),
        }
    }
}

impl RunConfig {
    /// Check values that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(PaperbotError::Config(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(PaperbotError::Config(
                "request timeout must be positive".to_string(),
            ));
        }
        if self.page_delay.0 > self.page_delay.1 {
            return Err(PaperbotError::Config(format!(
                "page delay range is inverted: {:?} > {:?}",
                self.page_delay.0, self.page_delay.1
            )));
        }
        Ok(())
    }

    /// Pick a pause inside the configured page delay range.
    pub fn jittered_page_delay(&self) -> Duration {
        let (min, max) = self.page_delay;
        if max <= min {
            return min;
        }
        let spread = (max - min).as_millis() as u64;
        min + Duration::from_millis(rand::random::<u64>() % (spread + 1))
    }
}

/// Build the HTTP client used by every component of a run.
pub fn build_http_client(config: &RunConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout)
        .cookie_store(true);

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            PaperbotError::Config(format!("Invalid proxy URL '{}': {}", proxy_url, e))
        })?;
        builder = builder.proxy(proxy);
    }

    builder
        .build()
        .map_err(|e| PaperbotError::Config(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = RunConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PaperbotError::Config(_))));
    }

    #[test]
    fn test_jittered_delay_stays_in_range() {
        let config = RunConfig {
            page_delay: (Duration::from_millis(10), Duration::from_millis(20)),
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = config.jittered_page_delay();
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn test_invalid_proxy_is_config_error() {
        let config = RunConfig {
            proxy: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_http_client(&config),
            Err(PaperbotError::Config(_))
        ));
    }
}
