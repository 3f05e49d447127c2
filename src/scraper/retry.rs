use crate::error::ScrapeError;
use crate::models::ChartFields;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::FixedInterval;

/// How many times one link is attempted, and how long to wait between attempts.
/// Every attempt is a fresh navigation followed by a fresh extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Delays between attempts; one fewer than `max_attempts`.
    pub fn strategy(&self) -> impl Iterator<Item = Duration> + use<> {
        FixedInterval::new(self.delay).take(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `attempt` under this policy. Non-retryable errors end the loop early.
    pub async fn run<F, Fut, T>(&self, attempt: F) -> Result<T, ScrapeError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScrapeError>>,
    {
        RetryIf::start(self.strategy(), attempt, |e: &ScrapeError| e.is_retryable()).await
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_secs(5))
    }
}

/// Outcome of one link after the retry budget is spent.
#[derive(Debug)]
pub struct FetchOutcome {
    pub fields: ChartFields,
    pub attempts: u32,
    /// Last error, when the link ended up UNAVAILABLE.
    pub error: Option<ScrapeError>,
}

impl FetchOutcome {
    pub fn is_available(&self) -> bool {
        self.error.is_none()
    }
}

/// Reject absent responses and HTTP error statuses.
pub fn check_response(status: Option<u16>) -> Result<u16, ScrapeError> {
    match status {
        None => Err(ScrapeError::NoResponse),
        Some(code) if code >= 400 => Err(ScrapeError::BadStatus(code)),
        Some(code) => Ok(code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrowserError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_strategy_yields_one_delay_per_retry() {
        assert_eq!(quick(2).strategy().count(), 1);
        assert_eq!(quick(1).strategy().count(), 0);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn test_check_response() {
        assert_eq!(check_response(Some(200)).unwrap(), 200);
        assert!(matches!(check_response(Some(404)), Err(ScrapeError::BadStatus(404))));
        assert!(matches!(check_response(None), Err(ScrapeError::NoResponse)));
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result = quick(2)
            .run(move || async move {
                if calls_ref.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ScrapeError::BadStatus(502))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_stops_on_closed_browser() {
        let calls = AtomicU32::new(0);
        let calls_ref = &calls;
        let result: Result<(), _> = quick(5)
            .run(move || async move {
                calls_ref.fetch_add(1, Ordering::SeqCst);
                Err(ScrapeError::Navigation(BrowserError::Closed))
            })
            .await;
        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
