//! Ordered element-discovery strategies. The first strategy that finds something wins.

use crate::browser::{BrowserPage, wait_for_selector};
use crate::error::BrowserError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

static MARK_SEQ: AtomicU64 = AtomicU64::new(0);

#[async_trait]
pub trait Locator: Send + Sync {
    /// Human-readable form for logs.
    fn describe(&self) -> String;

    /// A CSS selector addressing the located element, or `None`.
    async fn try_locate(&self, page: &dyn BrowserPage) -> Result<Option<String>, BrowserError>;
}

/// Plain CSS selector, optionally waiting for it to become visible.
pub struct Css {
    selector: &'static str,
    wait: Option<(Duration, Duration)>,
}

impl Css {
    pub fn new(selector: &'static str) -> Self {
        Self { selector, wait: None }
    }

    /// Wait up to `limit` (polling every `poll`) for the element to be visible.
    pub fn visible_within(selector: &'static str, limit: Duration, poll: Duration) -> Self {
        Self {
            selector,
            wait: Some((limit, poll)),
        }
    }
}

#[async_trait]
impl Locator for Css {
    fn describe(&self) -> String {
        self.selector.to_string()
    }

    async fn try_locate(&self, page: &dyn BrowserPage) -> Result<Option<String>, BrowserError> {
        let found = match self.wait {
            Some((limit, poll)) => wait_for_selector(page, self.selector, true, limit, poll).await?,
            None => page.exists(self.selector).await?,
        };
        Ok(found.then(|| self.selector.to_string()))
    }
}

/// First element under `scope` whose text contains `needle`, case-insensitive.
pub struct Text {
    scope: &'static str,
    needle: &'static str,
}

impl Text {
    pub fn new(scope: &'static str, needle: &'static str) -> Self {
        Self { scope, needle }
    }
}

#[async_trait]
impl Locator for Text {
    fn describe(&self) -> String {
        format!("{} containing {:?}", self.scope, self.needle)
    }

    async fn try_locate(&self, page: &dyn BrowserPage) -> Result<Option<String>, BrowserError> {
        let mark = format!("m{}", MARK_SEQ.fetch_add(1, Ordering::Relaxed));
        if page.mark_by_text(self.scope, self.needle, &mark).await? {
            Ok(Some(format!("[data-locator-mark=\"{mark}\"]")))
        } else {
            Ok(None)
        }
    }
}

/// Run the strategies in order and return the first hit. Individual strategy errors
/// are logged and treated as a miss.
pub async fn locate_first(
    page: &dyn BrowserPage,
    strategies: &[Box<dyn Locator>],
) -> Option<String> {
    for strategy in strategies {
        match strategy.try_locate(page).await {
            Ok(Some(selector)) => {
                debug!("located {} via {}", selector, strategy.describe());
                return Some(selector);
            }
            Ok(None) => debug!("no match for {}", strategy.describe()),
            Err(e) => debug!("locator {} failed: {}", strategy.describe(), e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::FakePage;

    const URL: &str = "https://example.com/signin";

    async fn page_with(html: &str) -> FakePage {
        let page = FakePage::new().with_document(URL, html);
        page.navigate(URL, Duration::from_secs(1)).await.unwrap();
        page
    }

    #[tokio::test]
    async fn test_first_matching_strategy_wins() {
        let page = page_with(r#"<button name="Email">Email</button><input type="email">"#).await;
        let strategies: Vec<Box<dyn Locator>> = vec![
            Box::new(Css::new("button[data-name=\"Email\"]")),
            Box::new(Css::new("button[name=\"Email\"]")),
            Box::new(Css::new("input[type=\"email\"]")),
        ];
        assert_eq!(
            locate_first(&page, &strategies).await.as_deref(),
            Some("button[name=\"Email\"]")
        );
    }

    #[tokio::test]
    async fn test_text_fallback_marks_element() {
        let page = page_with(r#"<button class="x">Continue with EMAIL</button>"#).await;
        let strategies: Vec<Box<dyn Locator>> = vec![
            Box::new(Css::new("button[name=\"Email\"]")),
            Box::new(Text::new("button", "email")),
        ];
        let selector = locate_first(&page, &strategies).await.unwrap();
        assert!(selector.starts_with("[data-locator-mark="));
        assert!(page.exists(&selector).await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_selector_is_a_miss() {
        let page = page_with("<input name=\"password\">").await;
        let strategies: Vec<Box<dyn Locator>> = vec![
            Box::new(Css::new("input[[")),
            Box::new(Css::visible_within(
                "input[name=\"password\"]",
                Duration::from_millis(50),
                Duration::from_millis(5),
            )),
        ];
        assert_eq!(
            locate_first(&page, &strategies).await.as_deref(),
            Some("input[name=\"password\"]")
        );
    }

    #[tokio::test]
    async fn test_nothing_found() {
        let page = page_with("<div></div>").await;
        let strategies: Vec<Box<dyn Locator>> = vec![Box::new(Text::new("button", "sign in"))];
        assert_eq!(locate_first(&page, &strategies).await, None);
    }
}
