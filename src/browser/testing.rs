//! In-memory browser used by unit tests. Element queries run against the scripted
//! HTML with `scraper`, so selectors behave like they do in a real page.

use super::{BrowserLauncher, BrowserPage, BrowserSession};
use crate::error::BrowserError;
use crate::models::StoredCookie;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum NavStep {
    Status(u16),
    NoResponse,
    Fail,
    Closed,
}

#[derive(Default)]
struct FakeState {
    nav_script: VecDeque<NavStep>,
    documents: HashMap<String, VecDeque<String>>,
    current_url: String,
    cookies: Vec<StoredCookie>,
    reject_cookies: bool,
    marks: HashSet<String>,
    on_click: HashMap<String, String>,
    on_enter: Option<String>,
    navigations: Vec<String>,
    clicks: Vec<String>,
    fills: Vec<(String, String)>,
    cookies_set: usize,
    screenshots: usize,
}

#[derive(Default)]
pub struct FakePage {
    state: Mutex<FakeState>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `html` for `url`. Repeated calls queue further documents, served in turn
    /// by `content()`; the last one repeats.
    pub fn with_document(self, url: &str, html: &str) -> Self {
        self.lock()
            .documents
            .entry(url.to_string())
            .or_default()
            .push_back(html.to_string());
        self
    }

    pub fn with_nav_script(self, steps: impl IntoIterator<Item = NavStep>) -> Self {
        self.lock().nav_script.extend(steps);
        self
    }

    pub fn with_cookies(self, cookies: Vec<StoredCookie>) -> Self {
        self.lock().cookies = cookies;
        self
    }

    pub fn rejecting_cookies(self) -> Self {
        self.lock().reject_cookies = true;
        self
    }

    /// Clicking `selector` moves the page to `url`.
    pub fn on_click(self, selector: &str, url: &str) -> Self {
        self.lock()
            .on_click
            .insert(selector.to_string(), url.to_string());
        self
    }

    pub fn on_enter(self, url: &str) -> Self {
        self.lock().on_enter = Some(url.to_string());
        self
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn clicks(&self) -> Vec<String> {
        self.lock().clicks.clone()
    }

    pub fn fills(&self) -> Vec<(String, String)> {
        self.lock().fills.clone()
    }

    pub fn cookies_set(&self) -> usize {
        self.lock().cookies_set
    }

    pub fn screenshots(&self) -> usize {
        self.lock().screenshots
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn current_html(&self) -> String {
        let mut state = self.lock();
        let url = state.current_url.clone();
        match state.documents.get_mut(&url) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_default(),
            Some(queue) => queue.front().cloned().unwrap_or_default(),
            None => String::new(),
        }
    }

    fn peek_html(&self) -> String {
        let state = self.lock();
        state
            .documents
            .get(&state.current_url)
            .and_then(|q| q.front().cloned())
            .unwrap_or_default()
    }

    fn matches(&self, selector: &str) -> Result<bool, BrowserError> {
        if let Some(mark) = mark_of(selector) {
            return Ok(self.lock().marks.contains(mark));
        }
        let sel = Selector::parse(selector)
            .map_err(|e| BrowserError::Protocol(format!("bad selector {selector}: {e:?}")))?;
        Ok(Html::parse_document(&self.peek_html()).select(&sel).next().is_some())
    }

    fn follow(&self, target: Option<String>) {
        if let Some(url) = target {
            self.lock().current_url = url;
        }
    }
}

fn mark_of(selector: &str) -> Option<&str> {
    selector
        .strip_prefix("[data-locator-mark=\"")
        .and_then(|s| s.strip_suffix("\"]"))
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<Option<u16>, BrowserError> {
        let mut state = self.lock();
        state.navigations.push(url.to_string());
        let step = state.nav_script.pop_front().unwrap_or(NavStep::Status(200));
        match step {
            NavStep::Status(code) => {
                state.current_url = url.to_string();
                Ok(Some(code))
            }
            NavStep::NoResponse => Ok(None),
            NavStep::Fail => Err(BrowserError::Timeout(Duration::from_secs(60), url.to_string())),
            NavStep::Closed => Err(BrowserError::Closed),
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.current_html())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        Ok(self.lock().current_url.clone())
    }

    async fn exists(&self, selector: &str) -> Result<bool, BrowserError> {
        self.matches(selector)
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, BrowserError> {
        self.matches(selector)
    }

    async fn mark_by_text(&self, scope: &str, needle: &str, mark: &str) -> Result<bool, BrowserError> {
        let sel = Selector::parse(scope)
            .map_err(|e| BrowserError::Protocol(format!("bad selector {scope}: {e:?}")))?;
        let html = Html::parse_document(&self.peek_html());
        let needle = needle.to_lowercase();
        let found = html.select(&sel).any(|el| {
            let text = el.text().collect::<String>().to_lowercase();
            let value = el.value().attr("value").unwrap_or_default().to_lowercase();
            text.contains(&needle) || value.contains(&needle)
        });
        if found {
            self.lock().marks.insert(mark.to_string());
        }
        Ok(found)
    }

    async fn click(&self, selector: &str) -> Result<(), BrowserError> {
        if !self.matches(selector)? {
            return Err(BrowserError::NotFound(selector.to_string()));
        }
        let target = {
            let mut state = self.lock();
            state.clicks.push(selector.to_string());
            state.on_click.get(selector).cloned()
        };
        self.follow(target);
        Ok(())
    }

    async fn fill(&self, selector: &str, text: &str) -> Result<(), BrowserError> {
        if !self.matches(selector)? {
            return Err(BrowserError::NotFound(selector.to_string()));
        }
        self.lock()
            .fills
            .push((selector.to_string(), text.to_string()));
        Ok(())
    }

    async fn press_enter(&self, _selector: &str) -> Result<(), BrowserError> {
        let target = self.lock().on_enter.clone();
        self.follow(target);
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<StoredCookie>, BrowserError> {
        Ok(self.lock().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[StoredCookie]) -> Result<(), BrowserError> {
        let mut state = self.lock();
        if state.reject_cookies {
            return Err(BrowserError::Protocol("cookies rejected".into()));
        }
        state.cookies_set += 1;
        state.cookies = cookies.to_vec();
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, BrowserError> {
        self.lock().screenshots += 1;
        Ok(b"\x89PNG\r\n\x1a\n".to_vec())
    }
}

pub struct FakeSession {
    page: Arc<FakePage>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    fn page(&self) -> Arc<dyn BrowserPage> {
        self.page.clone()
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type PageFactory = dyn Fn(usize) -> Option<FakePage> + Send + Sync;

/// Hands out a fresh [`FakePage`] per launch; the factory gets the 1-based launch
/// number and returns `None` to simulate a launch failure.
pub struct FakeLauncher {
    factory: Box<PageFactory>,
    launches: AtomicUsize,
    closes: Arc<AtomicUsize>,
    pages: Mutex<Vec<Arc<FakePage>>>,
}

impl FakeLauncher {
    pub fn new(factory: impl Fn(usize) -> Option<FakePage> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            launches: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            pages: Mutex::new(Vec::new()),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn pages(&self) -> Vec<Arc<FakePage>> {
        self.pages.lock().unwrap().clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let n = self.launches.fetch_add(1, Ordering::SeqCst) + 1;
        let page = (self.factory)(n)
            .map(Arc::new)
            .ok_or_else(|| BrowserError::Launch(format!("launch {n} refused")))?;
        self.pages.lock().unwrap().push(page.clone());
        Ok(Box::new(FakeSession {
            page,
            closes: self.closes.clone(),
        }))
    }
}
