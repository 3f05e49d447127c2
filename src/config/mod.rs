use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::models::BatchWindow;
use crate::scraper::classifier::SignalPalette;
use crate::scraper::retry::RetryPolicy;

/// Top-level application configuration, built once at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub palette: SignalPalette,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Per-chunk browser launch flags
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default = "default_true")]
    pub no_sandbox: bool,

    #[serde(default)]
    pub chrome_path: Option<PathBuf>,

    #[serde(default)]
    pub extra_args: Vec<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_launch_timeout_secs")]
    pub launch_timeout_secs: u64,
}

/// Chart loading and extraction
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScraperConfig {
    #[serde(default = "default_nav_timeout_secs")]
    pub nav_timeout_secs: u64,

    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_settle_interval_ms")]
    pub settle_interval_ms: u64,

    #[serde(default = "default_settle_max_rounds")]
    pub settle_max_rounds: u32,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    #[serde(default)]
    pub link_delay_ms: u64,

    #[serde(default)]
    pub jitter_ms: u64,
}

/// Sign-in form flow
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_signin_url")]
    pub signin_url: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_auth_nav_timeout_secs")]
    pub nav_timeout_secs: u64,

    #[serde(default = "default_field_timeout_secs")]
    pub field_timeout_secs: u64,

    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,

    #[serde(default = "default_form_delay_ms")]
    pub form_delay_ms: u64,

    /// Where to save a page screenshot when sign-in stays on the form.
    #[serde(default = "default_failure_screenshot")]
    pub failure_screenshot: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_cookie_path")]
    pub cookie_path: PathBuf,
}

/// Google Sheets link source / result sink
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SheetsConfig {
    #[serde(default = "default_sheets_api_base")]
    pub api_base: String,

    #[serde(default)]
    pub sheet_id: Option<String>,

    #[serde(default = "default_sheet_name")]
    pub sheet_name: String,

    /// Fixed OAuth bearer token. Takes precedence over the service account.
    #[serde(default)]
    pub access_token: Option<String>,

    #[serde(default)]
    pub service_account_email: Option<String>,

    /// PEM private key of the service account; literal `\n` sequences are accepted.
    #[serde(default)]
    pub private_key: Option<String>,

    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    #[serde(default)]
    pub include_volume: bool,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl SheetsConfig {
    /// A spreadsheet is named and some way to obtain a bearer token is set.
    pub fn is_configured(&self) -> bool {
        let set = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        set(&self.sheet_id)
            && (set(&self.access_token)
                || (set(&self.service_account_email) && set(&self.private_key)))
    }
}

/// Batch window and chunking
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub batch_index: u32,

    #[serde(default = "default_rows_per_batch")]
    pub rows_per_batch: u32,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

/// Local run history
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_launch_timeout_secs() -> u64 {
    30
}
fn default_nav_timeout_secs() -> u64 {
    60
}
fn default_ready_timeout_secs() -> u64 {
    15
}
fn default_poll_interval_ms() -> u64 {
    250
}
fn default_settle_interval_ms() -> u64 {
    3000
}
fn default_settle_max_rounds() -> u32 {
    3
}
fn default_max_attempts() -> u32 {
    2
}
fn default_retry_delay_ms() -> u64 {
    5000
}
fn default_signin_url() -> String {
    "https://www.tradingview.com/accounts/signin/".to_string()
}
fn default_auth_nav_timeout_secs() -> u64 {
    30
}
fn default_field_timeout_secs() -> u64 {
    5
}
fn default_submit_timeout_secs() -> u64 {
    20
}
fn default_form_delay_ms() -> u64 {
    1000
}
fn default_failure_screenshot() -> Option<PathBuf> {
    Some(PathBuf::from("login_failed_debug.png"))
}
fn default_cookie_path() -> PathBuf {
    PathBuf::from("cookies.json")
}
fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}
fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}
fn default_sheet_name() -> String {
    "Sheet1".to_string()
}
fn default_http_timeout_secs() -> u64 {
    30
}
fn default_rows_per_batch() -> u32 {
    151
}
fn default_chunk_size() -> usize {
    20
}
fn default_concurrency() -> usize {
    1
}
fn default_db_path() -> PathBuf {
    PathBuf::from("data/history.duckdb")
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            no_sandbox: true,
            chrome_path: None,
            extra_args: Vec::new(),
            user_agent: default_user_agent(),
            launch_timeout_secs: default_launch_timeout_secs(),
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            nav_timeout_secs: default_nav_timeout_secs(),
            ready_timeout_secs: default_ready_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            settle_interval_ms: default_settle_interval_ms(),
            settle_max_rounds: default_settle_max_rounds(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            link_delay_ms: 0,
            jitter_ms: 0,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            signin_url: default_signin_url(),
            email: None,
            password: None,
            nav_timeout_secs: default_auth_nav_timeout_secs(),
            field_timeout_secs: default_field_timeout_secs(),
            submit_timeout_secs: default_submit_timeout_secs(),
            form_delay_ms: default_form_delay_ms(),
            failure_screenshot: default_failure_screenshot(),
        }
    }
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            cookie_path: default_cookie_path(),
        }
    }
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_base: default_sheets_api_base(),
            sheet_id: None,
            sheet_name: default_sheet_name(),
            access_token: None,
            service_account_email: None,
            private_key: None,
            token_uri: default_token_uri(),
            include_volume: false,
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_index: 0,
            rows_per_batch: default_rows_per_batch(),
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            db_path: default_db_path(),
            run_migrations: true,
        }
    }
}

// ── Derived values ───────────────────────────────────────────────────────────

impl ScraperConfig {
    pub fn nav_timeout(&self) -> Duration {
        Duration::from_secs(self.nav_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.retry_delay_ms))
    }
}

impl PipelineConfig {
    pub fn window(&self) -> BatchWindow {
        BatchWindow {
            batch_index: self.batch_index,
            batch_size: self.rows_per_batch.max(1),
        }
    }
}

// ── Loader ───────────────────────────────────────────────────────────────────

/// Environment names used by earlier deployments, mapped onto config keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("EMAIL", "auth.email"),
    ("PASSWORD", "auth.password"),
    ("SHEET_ID", "sheets.sheet_id"),
    ("SHEET_NAME", "sheets.sheet_name"),
    ("SHEETS_ACCESS_TOKEN", "sheets.access_token"),
    ("GOOGLE_SERVICE_ACCOUNT_EMAIL", "sheets.service_account_email"),
    ("GOOGLE_PRIVATE_KEY", "sheets.private_key"),
    ("ROWS_PER_BATCH", "pipeline.rows_per_batch"),
    ("BATCH_INDEX", "pipeline.batch_index"),
];

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix("CHARTSIG")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let cfg = builder.build().context("Failed to build configuration")?;
        cfg.try_deserialize()
            .context("Invalid configuration")
    }

    /// Parse a TOML document on top of the defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}
