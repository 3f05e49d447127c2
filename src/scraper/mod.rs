pub mod classifier;
pub mod cleaner;
pub mod extractor;
pub mod locator;
pub mod retry;

use crate::browser::BrowserPage;
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::ChartFields;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use self::classifier::SignalPalette;
use self::extractor::Extractor;
use self::retry::{FetchOutcome, RetryPolicy, check_response};

// ── Chart scraper ─────────────────────────────────────────────────────────────

/// Loads one chart URL in an already signed-in page and turns it into result fields.
pub struct ChartScraper {
    extractor: Extractor,
    palette: SignalPalette,
    policy: RetryPolicy,
    nav_timeout: Duration,
    link_delay_ms: u64,
    jitter_ms: u64,
}

impl ChartScraper {
    pub fn new(config: &ScraperConfig, palette: &SignalPalette) -> Self {
        Self {
            extractor: Extractor::new(config),
            palette: palette.clone(),
            policy: config.retry_policy(),
            nav_timeout: config.nav_timeout(),
            link_delay_ms: config.link_delay_ms,
            jitter_ms: config.jitter_ms,
        }
    }

    /// Fetch, extract and classify `url` under the retry policy.
    ///
    /// Never fails: once the attempts are spent the fields are UNAVAILABLE and the
    /// last error is handed back for logging.
    pub async fn fetch_with_retry(&self, page: &dyn BrowserPage, url: &str) -> FetchOutcome {
        self.polite_delay().await;

        let attempts = AtomicU32::new(0);
        let (this, counter) = (self, &attempts);

        let result = self
            .policy
            .run(move || async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("GET {} (attempt {})", url, n);
                this.attempt(page, url).await.inspect_err(|e| {
                    warn!("Attempt {} for {} failed: {}", n, url, e);
                })
            })
            .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(fields) => FetchOutcome {
                fields,
                attempts,
                error: None,
            },
            Err(e) => FetchOutcome {
                fields: ChartFields::unavailable(),
                attempts,
                error: Some(e),
            },
        }
    }

    async fn attempt(&self, page: &dyn BrowserPage, url: &str) -> Result<ChartFields, ScrapeError> {
        let status = page
            .navigate(url, self.nav_timeout)
            .await
            .map_err(ScrapeError::Navigation)?;
        check_response(status)?;

        let snapshot = self.extractor.extract(page).await?;
        let status = self.palette.classify(&snapshot);

        let hl2 = snapshot.indicator(classifier::HL2_SOURCE).map(|i| i.color.as_str());
        let high = snapshot.indicator(classifier::HIGH_SOURCE).map(|i| i.color.as_str());
        debug!(
            "hl2: {:?}, high: {:?} → {}, volume: {:?}, volume MA: {:?}",
            hl2, high, status, snapshot.volume, snapshot.volume_ma
        );

        Ok(ChartFields::from_snapshot(&snapshot, status))
    }

    /// Sleep for the configured delay + random jitter.
    async fn polite_delay(&self) {
        if self.link_delay_ms == 0 && self.jitter_ms == 0 {
            return;
        }
        let jitter = rand::random::<u64>() % (self.jitter_ms + 1);
        sleep(Duration::from_millis(self.link_delay_ms + jitter)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::testing::{FakePage, NavStep};
    use crate::models::ChartStatus;
    use crate::scraper::extractor::fixtures::{GREEN, RED, chart_html};

    const URL: &str = "https://charts.example.com/chart/xyz/";

    fn fast_config() -> ScraperConfig {
        ScraperConfig {
            ready_timeout_secs: 0,
            poll_interval_ms: 1,
            settle_interval_ms: 1,
            settle_max_rounds: 1,
            retry_delay_ms: 1,
            ..ScraperConfig::default()
        }
    }

    fn scraper() -> ChartScraper {
        ChartScraper::new(&fast_config(), &SignalPalette::default())
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let page = FakePage::new().with_document(URL, &chart_html(RED, RED));
        let outcome = scraper().fetch_with_retry(&page, URL).await;

        assert!(outcome.is_available());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.fields.status, ChartStatus::Sell);
        assert_eq!(outcome.fields.hl2_value, "1,210.12");
        assert_eq!(outcome.fields.high, "1,230.00");
        assert_eq!(outcome.fields.volume_ma, "2.98M");
    }

    #[tokio::test]
    async fn test_navigation_fails_once_then_succeeds() {
        let page = FakePage::new()
            .with_document(URL, &chart_html(GREEN, GREEN))
            .with_nav_script([NavStep::Fail]);
        let outcome = scraper().fetch_with_retry(&page, URL).await;

        assert!(outcome.is_available());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.fields.status, ChartStatus::Buy);
        assert_eq!(page.navigations().len(), 2);
    }

    #[tokio::test]
    async fn test_all_attempts_fail_gives_unavailable() {
        let page = FakePage::new()
            .with_document(URL, &chart_html(GREEN, GREEN))
            .with_nav_script([NavStep::Status(503), NavStep::NoResponse]);
        let outcome = scraper().fetch_with_retry(&page, URL).await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.fields, ChartFields::unavailable());
        assert!(matches!(outcome.error, Some(ScrapeError::NoResponse)));
    }

    #[tokio::test]
    async fn test_readiness_timeout_retries_with_fresh_navigation() {
        let page = FakePage::new().with_document(URL, "<html><body>blank</body></html>");
        let outcome = scraper().fetch_with_retry(&page, URL).await;

        assert_eq!(outcome.fields.status, ChartStatus::Unavailable);
        assert!(matches!(outcome.error, Some(ScrapeError::ExtractionTimeout(_))));
        assert_eq!(page.navigations(), vec![URL.to_string(), URL.to_string()]);
    }

    #[tokio::test]
    async fn test_closed_browser_is_not_retried() {
        let page = FakePage::new().with_nav_script([NavStep::Closed]);
        let outcome = scraper().fetch_with_retry(&page, URL).await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.fields.status, ChartStatus::Unavailable);
    }
}
