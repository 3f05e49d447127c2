//! Bearer tokens for the Sheets API.
//!
//! A fixed `access_token` wins when set. Otherwise a service-account assertion is signed
//! with RS256 and exchanged at the token endpoint, and the access token is reused until
//! a minute before it expires.

use crate::config::SheetsConfig;
use anyhow::{Context, Result, bail};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: SystemTime,
}

impl CachedToken {
    fn usable_at(&self, now: SystemTime) -> bool {
        now + REFRESH_MARGIN < self.expires_at
    }
}

pub struct ServiceAccount {
    email: String,
    key: EncodingKey,
    token_uri: String,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccount {
    /// `private_key` may carry escaped `\n` sequences, as env vars usually do.
    pub fn new(email: &str, private_key: &str, token_uri: &str) -> Result<Self> {
        let pem = private_key.trim().replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .context("GOOGLE_PRIVATE_KEY is not a PEM RSA private key")?;
        Ok(Self {
            email: email.trim().to_string(),
            key,
            token_uri: token_uri.to_string(),
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: SystemTime) -> Result<String> {
        let iat = unix_secs(now);
        let claims = Claims {
            iss: self.email.clone(),
            scope: SPREADSHEETS_SCOPE.to_string(),
            aud: self.token_uri.clone(),
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .context("Failed to sign service account assertion")
    }

    async fn exchange(&self, http: &reqwest::Client, now: SystemTime) -> Result<CachedToken> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &self.assertion(now)?)
            .finish();

        let resp = http
            .post(&self.token_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .context("Token request failed")?
            .error_for_status()
            .context("Token request rejected")?;

        let token: TokenResponse = resp.json().await.context("Bad token response")?;
        info!("Sheets access token minted for {} ({}s)", self.email, token.expires_in);
        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + Duration::from_secs(token.expires_in),
        })
    }

    async fn token(&self, http: &reqwest::Client) -> Result<String> {
        let mut cached = self.cached.lock().await;
        let now = SystemTime::now();
        if let Some(token) = cached.as_ref().filter(|t| t.usable_at(now)) {
            return Ok(token.value.clone());
        }
        debug!("Refreshing Sheets access token");
        let fresh = self.exchange(http, now).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

/// Where the Sheets client gets its bearer token.
pub enum TokenSource {
    Static(String),
    ServiceAccount(ServiceAccount),
}

impl TokenSource {
    /// `None` when neither a fixed token nor a complete service account is configured.
    pub fn from_config(config: &SheetsConfig) -> Result<Option<Self>> {
        let set = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());

        if let Some(token) = set(&config.access_token) {
            return Ok(Some(Self::Static(token)));
        }
        match (set(&config.service_account_email), set(&config.private_key)) {
            (Some(email), Some(key)) => Ok(Some(Self::ServiceAccount(ServiceAccount::new(
                &email,
                &key,
                &config.token_uri,
            )?))),
            (None, None) => Ok(None),
            _ => bail!("GOOGLE_SERVICE_ACCOUNT_EMAIL and GOOGLE_PRIVATE_KEY must be set together"),
        }
    }

    pub async fn bearer(&self, http: &reqwest::Client) -> Result<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::ServiceAccount(account) => account.token(http).await,
        }
    }
}
