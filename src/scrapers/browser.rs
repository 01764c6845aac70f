use crate::scrapers::types::ScrapeError;
use anyhow::{Context, Result};
use headless_chrome::{Browser, LaunchOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dismisses the cookie banner some sources overlay on every page
const ACCEPT_COOKIES_JS: &str = r#"
    const button = document.querySelector('button[id*="accept"], button[class*="accept"]');
    if (button) button.click();
"#;

/// A headless Chrome instance shared by every fetch of one job run.
///
/// The browser process is shut down when the session is dropped, so it is
/// released even when a fetch or a parse fails halfway through the run.
pub struct BrowserSession {
    browser: Option<Browser>,
    timeout: Duration,
}

impl BrowserSession {
    /// Launch headless Chrome
    pub fn launch(headless: bool, timeout: Duration) -> Result<Self> {
        info!("Launching headless Chrome...");

        let options = LaunchOptions::default_builder()
            .headless(headless)
            .idle_browser_timeout(timeout * 4)
            .build()
            .context("Failed to build launch options")?;

        let browser = Browser::new(options).context("Failed to launch Chrome browser")?;

        Ok(Self {
            browser: Some(browser),
            timeout,
        })
    }

    /// Render `url` in a fresh tab and return the resulting document HTML.
    ///
    /// Rendering runs on the blocking pool; the whole call is bounded by the
    /// session timeout.
    pub async fn render(&self, url: &str, ready_selector: &'static str) -> Result<String, ScrapeError> {
        let browser = self
            .browser
            .clone()
            .ok_or_else(|| ScrapeError::Browser("browser session already closed".to_string()))?;
        let url = url.to_string();
        let timeout = self.timeout;

        let task = tokio::task::spawn_blocking(move || {
            render_blocking(&browser, &url, ready_selector, timeout)
        });

        match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(ScrapeError::Timeout(timeout)),
            Ok(Err(join_err)) => Err(ScrapeError::Browser(join_err.to_string())),
            Ok(Ok(result)) => result,
        }
    }

    fn shutdown(&mut self) {
        if let Some(browser) = self.browser.take() {
            info!("Closing headless Chrome");
            drop(browser);
        }
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_blocking(
    browser: &Browser,
    url: &str,
    ready_selector: &str,
    timeout: Duration,
) -> Result<String, ScrapeError> {
    let browser_err = |e: anyhow::Error| ScrapeError::Browser(format!("{:#}", e));

    let tab = browser.new_tab().map_err(browser_err)?;
    tab.set_default_timeout(timeout);

    let html = (|| -> Result<String, ScrapeError> {
        tab.navigate_to(url).map_err(browser_err)?;
        tab.wait_until_navigated().map_err(browser_err)?;

        // Accept cookies if present
        let _ = tab.evaluate(ACCEPT_COOKIES_JS, false);

        if let Err(e) = tab.wait_for_element(ready_selector) {
            // Parsing reports the real problem if the content never showed up
            warn!("Selector '{}' did not appear on {}: {}", ready_selector, url, e);
        }

        tab.get_content().map_err(browser_err)
    })();

    if let Err(e) = tab.close(true) {
        debug!("Failed to close tab for {}: {}", url, e);
    }

    html
}
