//! Chromium over CDP via `chromiumoxide`.

use super::{BrowserLauncher, BrowserPage, BrowserSession};
use crate::config::BrowserConfig as LaunchConfig;
use crate::error::BrowserError;
use crate::models::StoredCookie;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::network::{Cookie, CookieParam, TimeSinceEpoch};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

fn protocol(e: impl std::fmt::Display) -> BrowserError {
    BrowserError::Protocol(e.to_string())
}

/// JS string literal for embedding selectors and text in evaluated scripts.
fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

// ── Launcher ──────────────────────────────────────────────────────────────────

pub struct ChromiumLauncher {
    config: LaunchConfig,
}

impl ChromiumLauncher {
    pub fn new(config: &LaunchConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    fn browser_config(&self) -> Result<BrowserConfig, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .arg(format!("--user-agent={}", self.config.user_agent))
            .args(self.config.extra_args.iter().cloned());

        if !self.config.headless {
            builder = builder.with_head();
        }
        if self.config.no_sandbox {
            builder = builder.no_sandbox().arg("--disable-setuid-sandbox");
        }
        if let Some(path) = &self.config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let config = self.browser_config()?;
        let limit = Duration::from_secs(self.config.launch_timeout_secs);

        let (browser, mut handler) = timeout(limit, Browser::launch(config))
            .await
            .map_err(|_| BrowserError::Timeout(limit, "browser launch".into()))?
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("cdp handler event error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        Ok(Box::new(ChromiumSession {
            browser,
            page: Arc::new(ChromiumPage { page }),
            handler_task,
        }))
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Upper bound for the close command and for the process to exit afterwards.
const EXIT_GRACE: Duration = Duration::from_secs(10);

#[async_trait]
trait ChildProcess: Send {
    async fn wait_exit(&mut self) -> std::io::Result<()>;
    async fn kill(&mut self) -> std::io::Result<()>;
}

#[async_trait]
impl ChildProcess for Browser {
    async fn wait_exit(&mut self) -> std::io::Result<()> {
        self.wait().await.map(|_| ())
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        Browser::kill(self).await.unwrap_or(Ok(()))
    }
}

/// Wait up to `grace` for the process to exit, then kill it.
/// Returns whether it exited on its own.
async fn reap(process: &mut impl ChildProcess, grace: Duration) -> bool {
    let exited = timeout(grace, process.wait_exit()).await;
    match exited {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("browser process did not exit cleanly: {}", e);
            true
        }
        Err(_) => {
            warn!("browser still running after {:?}, killing it", grace);
            if let Err(e) = process.kill().await {
                warn!("could not kill browser process: {}", e);
            }
            false
        }
    }
}

pub struct ChromiumSession {
    browser: Browser,
    page: Arc<ChromiumPage>,
    handler_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    fn page(&self) -> Arc<dyn BrowserPage> {
        self.page.clone()
    }

    async fn close(mut self: Box<Self>) -> Result<(), BrowserError> {
        let closed = match timeout(EXIT_GRACE, self.browser.close()).await {
            Ok(result) => result.map(|_| ()).map_err(protocol),
            Err(_) => Err(BrowserError::Timeout(EXIT_GRACE, "browser close".into())),
        };
        reap(&mut self.browser, EXIT_GRACE).await;
        self.handler_task.abort();
        closed
    }
}

// ── Page ──────────────────────────────────────────────────────────────────────

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn eval_bool(&self, script: String) -> Result<bool, BrowserError> {
        let value = self.page.evaluate(script).await.map_err(protocol)?;
        Ok(value.into_value::<bool>().unwrap_or(false))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn navigate(&self, url: &str, limit: Duration) -> Result<Option<u16>, BrowserError> {
        let load = async {
            self.page.goto(url).await?;
            let request = self.page.wait_for_navigation_response().await?;
            Ok::<_, chromiumoxide::error::CdpError>(
                request.and_then(|r| r.response.as_ref().map(|resp| resp.status)),
            )
        };

        match timeout(limit, load).await {
            Err(_) => Err(BrowserError::Timeout(limit, url.to_string())),
            Ok(Err(e)) => Err(protocol(e)),
            Ok(Ok(status)) => Ok(status.and_then(|s| u16::try_from(s).ok())),
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page.content().await.map_err(protocol)
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.page.url().await.map_err(protocol)?.unwrap_or_default())
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        self.eval_bool(format!("document.querySelector({}) !== null", js_str(selector)))
            .await
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, BrowserError> {
        self.eval_bool(format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                return style.visibility !== 'hidden' && style.display !== 'none'
                    && rect.width > 0 && rect.height > 0;
            }})()"#,
            js_str(selector)
        ))
        .await
    }

    async fn mark_by_text(&self, scope: &str, needle: &str, mark: &str) -> Result<bool, BrowserError> {
        self.eval_bool(format!(
            r#"(() => {{
                const needle = {}.toLowerCase();
                const el = Array.from(document.querySelectorAll({})).find((e) =>
                    (e.textContent || '').toLowerCase().includes(needle) ||
                    (e.value || '').toString().toLowerCase().includes(needle));
                if (!el) return false;
                el.setAttribute('data-locator-mark', {});
                return true;
            }})()"#,
            js_str(needle),
            js_str(scope),
            js_str(mark)
        ))
        .await
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        element.click().await.map_err(protocol)?;
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        element.click().await.map_err(protocol)?;
        self.page
            .evaluate(format!(
                "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
                js_str(selector)
            ))
            .await
            .map_err(protocol)?;
        element.type_str(text).await.map_err(protocol)?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), BrowserError> {
        let element = self
            .page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::NotFound(selector.to_string()))?;
        element.press_key("Enter").await.map_err(protocol)?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
        let cookies = self.page.get_cookies().await.map_err(protocol)?;
        Ok(cookies.into_iter().map(stored_from_cdp).collect())
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
        let params = cookies
            .iter()
            .map(cdp_from_stored)
            .collect::<Result<Vec<_>, _>>()?;
        self.page.set_cookies(params).await.map_err(protocol)?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        let params = ScreenshotParams::builder().full_page(true).build();
        self.page.screenshot(params).await.map_err(protocol)
    }
}

// ── Cookie conversion ─────────────────────────────────────────────────────────

fn stored_from_cdp(c: Cookie) -> StoredCookie {
    StoredCookie {
        name: c.name,
        value: c.value,
        domain: Some(c.domain),
        path: Some(c.path),
        expires: Some(c.expires),
        http_only: Some(c.http_only),
        secure: Some(c.secure),
        same_site: c.same_site.map(|s| format!("{:?}", s)),
    }
}

fn cdp_from_stored(c: &StoredCookie) -> Result<CookieParam, BrowserError> {
    let mut builder = CookieParam::builder().name(c.name.clone()).value(c.value.clone());
    if let Some(domain) = &c.domain {
        builder = builder.domain(domain.clone());
    }
    if let Some(path) = &c.path {
        builder = builder.path(path.clone());
    }
    if let Some(secure) = c.secure {
        builder = builder.secure(secure);
    }
    if let Some(http_only) = c.http_only {
        builder = builder.http_only(http_only);
    }
    if let Some(expires) = c.expires.filter(|e| *e > 0.0) {
        builder = builder.expires(TimeSinceEpoch::new(expires));
    }
    builder
        .build()
        .map_err(|e| BrowserError::Protocol(format!("cookie {}: {}", c.name, e)))
}
