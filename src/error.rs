use thiserror::Error;

/// Failures reported by a browser adapter.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("timed out after {0:?} waiting for {1}")]
    Timeout(std::time::Duration, String),

    #[error("browser session closed")]
    Closed,

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Per-link failures. All of them end up as an UNAVAILABLE row.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("navigation failed: {0}")]
    Navigation(#[source] BrowserError),

    #[error("bad response status {0}")]
    BadStatus(u16),

    #[error("no navigation response")]
    NoResponse,

    #[error("chart legend not ready after {0:?}")]
    ExtractionTimeout(std::time::Duration),

    #[error("extraction failed: {0}")]
    Extraction(#[source] BrowserError),
}

impl ScrapeError {
    /// Everything except a dead browser is worth another fresh navigation.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ScrapeError::Navigation(BrowserError::Closed)
                | ScrapeError::Extraction(BrowserError::Closed)
        )
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("could not find {0} field")]
    MissingField(&'static str),

    #[error("login rejected: {0}")]
    Rejected(String),

    #[error("still on sign-in page after submit")]
    StillOnSignIn,

    #[error("no credentials configured ({0})")]
    NotConfigured(&'static str),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Request(String),

    #[error("sink rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("sink io error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential io: {0}")]
    Io(#[from] std::io::Error),

    #[error("credential format: {0}")]
    Format(#[from] serde_json::Error),

    #[error("credential bootstrap is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}
