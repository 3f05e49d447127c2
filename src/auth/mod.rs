//! Sign-in flow that turns a fresh browser page into a session credential.

use crate::browser::{BrowserPage, wait_for_url};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::models::Credential;
use crate::scraper::locator::{Css, Locator, Text, locate_first};
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const POLL: Duration = Duration::from_millis(250);

const ERROR_SELECTORS: &[&str] = &[
    ".error-message",
    ".alert-danger",
    ".tv-dialog__error",
    r#"[data-name="error"]"#,
    ".login-error",
    ".form-error",
    ".validation-error",
];

#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, page: &dyn BrowserPage) -> Result<Credential, AuthError>;
}

/// True while the location still points at a sign-in or login page.
pub fn on_signin_page(url: &str) -> bool {
    url.contains("/signin") || url.contains("/login")
}

// ── Form login ────────────────────────────────────────────────────────────────

/// Email + password login through the site's sign-in form.
pub struct FormAuthenticator {
    signin_url: String,
    email: Option<String>,
    password: Option<String>,
    nav_timeout: Duration,
    field_timeout: Duration,
    submit_timeout: Duration,
    form_delay: Duration,
    failure_screenshot: Option<PathBuf>,
}

impl FormAuthenticator {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            signin_url: config.signin_url.clone(),
            email: config.email.clone(),
            password: config.password.clone(),
            nav_timeout: Duration::from_secs(config.nav_timeout_secs),
            field_timeout: Duration::from_secs(config.field_timeout_secs),
            submit_timeout: Duration::from_secs(config.submit_timeout_secs),
            form_delay: Duration::from_millis(config.form_delay_ms),
            failure_screenshot: config
                .failure_screenshot
                .clone()
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }

    fn email_button(&self) -> Vec<Box<dyn Locator>> {
        vec![
            Box::new(Css::new(r#"button[name="Email"]"#)),
            Box::new(Css::new(r#"button[data-name="Email"]"#)),
            Box::new(Text::new("button", "Email")),
            Box::new(Text::new("button", "Continue with Email")),
            Box::new(Css::new(r#"button[aria-label*="email"]"#)),
            Box::new(Css::new(r#"button[title*="email"]"#)),
        ]
    }

    fn username_field(&self) -> Vec<Box<dyn Locator>> {
        [
            r#"input[name="id_username"]"#,
            r#"input[name="username"]"#,
            r#"input[name="email"]"#,
            r#"input[type="email"]"#,
            r#"input[placeholder*="email" i]"#,
            r#"input[placeholder*="username" i]"#,
            r#"input[id*="username"]"#,
            r#"input[id*="email"]"#,
        ]
        .into_iter()
        .map(|s| self.visible(s))
        .collect()
    }

    fn password_field(&self) -> Vec<Box<dyn Locator>> {
        [
            r#"input[name="id_password"]"#,
            r#"input[name="password"]"#,
            r#"input[type="password"]"#,
            r#"input[id*="password"]"#,
            r#"input[placeholder*="password" i]"#,
        ]
        .into_iter()
        .map(|s| self.visible(s))
        .collect()
    }

    fn submit_button(&self) -> Vec<Box<dyn Locator>> {
        const CLICKABLE: &str = r#"button, input[type="submit"]"#;
        vec![
            Box::new(Css::new(r#"button[type="submit"]"#)),
            Box::new(Css::new(r#"input[type="submit"]"#)),
            Box::new(Css::new("button.submitButton-LQwxK8Bm")),
            Box::new(Css::new(r#"button[data-name="submit"]"#)),
            Box::new(Css::new("form button:last-child")),
            Box::new(Text::new(CLICKABLE, "Sign in")),
            Box::new(Text::new(CLICKABLE, "Login")),
            Box::new(Text::new(CLICKABLE, "Continue")),
        ]
    }

    fn visible(&self, selector: &'static str) -> Box<dyn Locator> {
        Box::new(Css::visible_within(selector, self.field_timeout, POLL))
    }

    async fn save_failure_screenshot(&self, page: &dyn BrowserPage) {
        let Some(path) = &self.failure_screenshot else {
            return;
        };
        let saved = match page.screenshot().await {
            Ok(png) => tokio::fs::write(path, png).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match saved {
            Ok(()) => info!("Sign-in page screenshot saved to {:?}", path),
            Err(e) => warn!("Could not save screenshot to {:?}: {}", path, e),
        }
    }

    /// Text of the first non-empty site error message on the current page.
    async fn error_message(&self, page: &dyn BrowserPage) -> Result<Option<String>, AuthError> {
        let html = Html::parse_document(&page.content().await?);
        let message = ERROR_SELECTORS
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .find_map(|sel| {
                html.select(&sel)
                    .map(|el| el.text().collect::<String>().trim().to_string())
                    .find(|t| !t.is_empty())
            });
        Ok(message)
    }
}

#[async_trait]
impl Authenticator for FormAuthenticator {
    async fn authenticate(&self, page: &dyn BrowserPage) -> Result<Credential, AuthError> {
        let email = self.email.as_deref().ok_or(AuthError::NotConfigured("email"))?;
        let password = self
            .password
            .as_deref()
            .ok_or(AuthError::NotConfigured("password"))?;

        info!("Navigating to sign-in page {}", self.signin_url);
        page.navigate(&self.signin_url, self.nav_timeout).await?;
        sleep(self.form_delay).await;

        if !on_signin_page(&page.current_url().await?) {
            info!("Already signed in");
            return Ok(Credential::new(page.cookies().await?));
        }

        match locate_first(page, &self.email_button()).await {
            Some(button) => {
                page.click(&button).await?;
                debug!("email button clicked, waiting for form");
                sleep(self.form_delay).await;
            }
            None => debug!("no email button, expecting the form to be visible"),
        }

        let username = locate_first(page, &self.username_field())
            .await
            .ok_or(AuthError::MissingField("username"))?;
        page.fill(&username, email).await?;

        sleep(self.form_delay).await;
        let password_field = locate_first(page, &self.password_field())
            .await
            .ok_or(AuthError::MissingField("password"))?;
        page.fill(&password_field, password).await?;

        sleep(self.form_delay).await;
        match locate_first(page, &self.submit_button()).await {
            Some(submit) => page.click(&submit).await?,
            None => {
                warn!("No submit button found, pressing Enter");
                page.press_enter(&password_field).await?;
            }
        }

        let left = wait_for_url(page, |u| !on_signin_page(u), self.submit_timeout, POLL).await?;
        if !left {
            let url = page.current_url().await?;
            warn!("Still on sign-in page after submit: {}", url);
            self.save_failure_screenshot(page).await;
            return Err(match self.error_message(page).await? {
                Some(msg) => AuthError::Rejected(msg),
                None => AuthError::StillOnSignIn,
            });
        }

        let cookies = page.cookies().await?;
        info!("Signed in, {} cookies captured", cookies.len());
        Ok(Credential::new(cookies))
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::models::StoredCookie;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub fn session_cookie(value: &str) -> StoredCookie {
        StoredCookie {
            name: "sessionid".into(),
            value: value.into(),
            domain: Some(".tradingview.com".into()),
            path: Some("/".into()),
            expires: None,
            http_only: Some(true),
            secure: Some(true),
            same_site: None,
        }
    }

    /// Succeeds except on the listed (1-based) calls.
    #[derive(Default)]
    pub struct ScriptedAuthenticator {
        failing_calls: HashSet<usize>,
        calls: AtomicUsize,
    }

    impl ScriptedAuthenticator {
        pub fn failing_on(calls: impl IntoIterator<Item = usize>) -> Self {
            Self {
                failing_calls: calls.into_iter().collect(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Authenticator for ScriptedAuthenticator {
        async fn authenticate(&self, _page: &dyn BrowserPage) -> Result<Credential, AuthError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.failing_calls.contains(&n) {
                Err(AuthError::Rejected(format!("scripted failure on call {n}")))
            } else {
                Ok(Credential::new(vec![session_cookie(&format!("s{n}"))]))
            }
        }
    }
}
