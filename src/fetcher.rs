//! "Fetch rendered HTML for a URL" capability used by the search resolver.
//!
//! Browser automation lives outside this crate; anything able to return the
//! rendered HTML of a page can implement [`PageFetcher`]. The crate ships a
//! plain HTTP implementation.

use crate::error::{PaperbotError, Result};
use async_trait::async_trait;
use url::Url;

/// Source of rendered HTML pages.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Return the HTML of the page at `url`.
    async fn fetch(&self, url: &Url) -> Result<String>;
}

/// Plain HTTP page fetcher with browser-like request headers.
pub struct HttpPageFetcher {
    client: reqwest::Client,
}

impl HttpPageFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cache-Control", "no-cache")
            .header("Pragma", "no-cache")
            .header("Sec-Fetch-Dest", "document")
            .header("Sec-Fetch-Mode", "navigate")
            .header("Sec-Fetch-Site", "none")
            .header("Upgrade-Insecure-Requests", "1")
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PaperbotError::Captcha);
        }
        if !status.is_success() {
            return Err(PaperbotError::Parse(format!(
                "search page returned HTTP {}",
                status
            )));
        }

        Ok(response.text().await?)
    }
}
