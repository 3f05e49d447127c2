//! Browser seam: the pipeline only talks to these traits, so tests drive it with
//! in-memory pages and production drives Chromium over CDP.

pub mod chromium;

use crate::error::BrowserError;
use crate::models::StoredCookie;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// One open tab. Methods take CSS selectors; text search lives in
/// [`BrowserPage::mark_by_text`].
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the load to complete. Returns the main document's HTTP
    /// status, or `None` when the browser produced no response.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<Option<u16>, BrowserError>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String, BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError>;

    async fn is_visible(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Tag the first element under `scope` whose text (or value) contains `needle`
    /// (case-insensitive) with `data-locator-mark="<mark>"`. Returns whether one was found.
    async fn mark_by_text(&self, scope: &str, needle: &str, mark: &str) -> Result<bool, BrowserError>;

    async fn click(&self, selector: &str) -> Result<(), BrowserError>;

    /// Clear the field, then type `text` into it.
    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError>;

    async fn press_enter(&self, selector: &str) -> Result<(), BrowserError>;

    async fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError>;

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError>;

    /// Full-page PNG of the current document.
    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError>;
}

/// A launched browser owning one page.
#[async_trait]
pub trait BrowserSession: Send {
    fn page(&self) -> Arc<dyn BrowserPage>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// Poll until `selector` is present (or visible) or `limit` elapses.
/// Returns `Ok(false)` on timeout; protocol errors end the wait early.
pub async fn wait_for_selector(
    page: &dyn BrowserPage,
    selector: &str,
    visible: bool,
    limit: Duration,
    poll: Duration,
) -> Result<bool, BrowserError> {
    let polling = async {
        loop {
            let found = if visible {
                page.is_visible(selector).await?
            } else {
                page.exists(selector).await?
            };
            if found {
                return Ok::<(), BrowserError>(());
            }
            sleep(poll).await;
        }
    };

    match timeout(limit, polling).await {
        Ok(Ok(())) => Ok(true),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(false),
    }
}

/// Poll until `predicate` holds for the current URL or `limit` elapses.
pub async fn wait_for_url(
    page: &dyn BrowserPage,
    predicate: impl Fn(&str) -> bool + Send + Sync,
    limit: Duration,
    poll: Duration,
) -> Result<bool, BrowserError> {
    let polling = async {
        loop {
            if predicate(&page.current_url().await?) {
                return Ok::<(), BrowserError>(());
            }
            sleep(poll).await;
        }
    };

    match timeout(limit, polling).await {
        Ok(Ok(())) => Ok(true),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(false),
    }
}

#[cfg(test)]
pub mod testing;
