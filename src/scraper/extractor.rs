//! Reads indicator, OHLC and volume values out of a rendered chart page.
//!
//! The page is read as serialized HTML and parsed with `scraper`, so extraction
//! never touches the live DOM and the parsing half is a pure function of the markup.

use crate::browser::{BrowserPage, wait_for_selector};
use crate::config::ScraperConfig;
use crate::error::ScrapeError;
use crate::models::{ChartSnapshot, IndicatorReading};
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::cleaner::{clean_text, looks_numeric, style_color};

pub const LEGEND_ITEM: &str = r#"[data-name="legend-source-item"]"#;
const LEGEND_DESCRIPTION: &str = r#"[data-name="legend-source-description"]"#;
const VALUE_TITLE: &str = "[data-test-id-value-title]";
const VALUE_ELEMENT: &str = r#"[class*="valueValue-"]"#;
const SOURCE_LABEL: &str = "Source";
const VOLUME_TITLE: &str = "Volume";
const VOLUME_MA_TITLE: &str = "Volume MA";

struct Selectors {
    legend_item: Selector,
    description: Selector,
    div: Selector,
    value_title: Selector,
    value: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    legend_item: parse(LEGEND_ITEM),
    description: parse(LEGEND_DESCRIPTION),
    div: parse("div"),
    value_title: parse(VALUE_TITLE),
    value: parse(VALUE_ELEMENT),
});

/// Only used on the constant selectors above.
fn parse(s: &str) -> Selector {
    Selector::parse(s).unwrap_or_else(|e| panic!("invalid built-in selector {s}: {e:?}"))
}

// ── Pure parsing ──────────────────────────────────────────────────────────────

/// Build a snapshot from the page markup.
pub fn parse_snapshot(html: &str) -> ChartSnapshot {
    let doc = Html::parse_document(html);
    let sel = &*SELECTORS;

    let indicators = doc
        .select(&sel.legend_item)
        .filter_map(|item| {
            let source = source_name(item, sel)?;
            let (color, value) = color_and_value(item, sel)?;
            Some(IndicatorReading { source, color, value })
        })
        .collect();

    let mut snapshot = ChartSnapshot {
        indicators,
        ..Default::default()
    };

    for el in doc.select(&sel.value_title) {
        let Some(title) = el.value().attr("data-test-id-value-title") else { continue };
        let Some(value) = value_text(el, sel) else { continue };
        match title {
            VOLUME_TITLE if snapshot.volume.is_empty() => snapshot.volume = value,
            VOLUME_MA_TITLE if snapshot.volume_ma.is_empty() => snapshot.volume_ma = value,
            _ => {
                if let Some(slot) = snapshot.ohlc.slot_mut(title) {
                    *slot = Some(value);
                }
            }
        }
    }

    snapshot
}

/// Text of the first `div` inside the description whose title is "Source".
fn source_name(item: ElementRef<'_>, sel: &Selectors) -> Option<String> {
    item.select(&sel.description)
        .find(|d| d.value().attr("title") == Some(SOURCE_LABEL))
        .and_then(|d| d.select(&sel.div).next())
        .and_then(|div| clean_text(div.text()))
}

/// Color and text of the first value element that holds a number.
fn color_and_value(item: ElementRef<'_>, sel: &Selectors) -> Option<(String, String)> {
    let el = item
        .select(&sel.value)
        .find(|v| clean_text(v.text()).is_some_and(|t| looks_numeric(&t)))?;
    let color = el.value().attr("style").and_then(style_color)?;
    let value = clean_text(el.text())?;
    Some((color, value))
}

fn value_text(el: ElementRef<'_>, sel: &Selectors) -> Option<String> {
    el.select(&sel.value).next().and_then(|v| clean_text(v.text()))
}

// ── Live page extraction ──────────────────────────────────────────────────────

pub struct Extractor {
    ready_timeout: Duration,
    poll_interval: Duration,
    settle_interval: Duration,
    settle_max_rounds: u32,
}

impl Extractor {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            ready_timeout: config.ready_timeout(),
            poll_interval: config.poll_interval(),
            settle_interval: config.settle_interval(),
            settle_max_rounds: config.settle_max_rounds,
        }
    }

    /// Wait for the legend, let the chart settle, and read a snapshot.
    ///
    /// Settling re-reads the page every `settle_interval` until two consecutive
    /// readings agree, giving up after `settle_max_rounds` waits and keeping the last.
    pub async fn extract(&self, page: &dyn BrowserPage) -> Result<ChartSnapshot, ScrapeError> {
        let ready = wait_for_selector(page, LEGEND_ITEM, false, self.ready_timeout, self.poll_interval)
            .await
            .map_err(ScrapeError::Extraction)?;
        if !ready {
            return Err(ScrapeError::ExtractionTimeout(self.ready_timeout));
        }

        let mut previous = self.read(page).await?;
        for round in 1..=self.settle_max_rounds {
            sleep(self.settle_interval).await;
            let current = self.read(page).await?;
            if current == previous {
                debug!("chart settled after {} round(s)", round);
                return Ok(current);
            }
            previous = current;
        }

        if self.settle_max_rounds > 0 {
            debug!("chart still changing after {} rounds, keeping last reading", self.settle_max_rounds);
        }
        Ok(previous)
    }

    async fn read(&self, page: &dyn BrowserPage) -> Result<ChartSnapshot, ScrapeError> {
        let html = page.content().await.map_err(ScrapeError::Extraction)?;
        Ok(parse_snapshot(&html))
    }
}
