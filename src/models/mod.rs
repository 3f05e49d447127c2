use serde::{Deserialize, Serialize};
use std::fmt;

// ── Link entries ──────────────────────────────────────────────────────────────

/// One chart to scrape. `row_index` is the destination sheet row (first data row is 2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub row_index: u32,
    pub url: String,
}

impl LinkEntry {
    pub fn new(row_index: u32, url: impl Into<String>) -> Self {
        Self {
            row_index,
            url: url.into(),
        }
    }
}

/// Row-range slice of the link list assigned to one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWindow {
    pub batch_index: u32,
    pub batch_size: u32,
}

// Bounds are u64: any u32 index times any u32 size fits without wrapping.
impl BatchWindow {
    /// First sheet row in the window (inclusive).
    pub fn first_row(&self) -> u64 {
        u64::from(self.batch_index) * u64::from(self.batch_size) + 2
    }

    /// Last sheet row in the window (inclusive).
    pub fn last_row(&self) -> u64 {
        self.first_row() + u64::from(self.batch_size) - 1
    }

    pub fn contains(&self, row_index: u32) -> bool {
        (self.first_row()..=self.last_row()).contains(&u64::from(row_index))
    }
}

// ── Raw extraction ────────────────────────────────────────────────────────────

/// A legend entry that had a source name, a display color and a numeric value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorReading {
    pub source: String,
    pub color: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ohlc {
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
}

impl Ohlc {
    /// Slot for a legend value title ("O", "H", "L", "C").
    pub fn slot_mut(&mut self, title: &str) -> Option<&mut Option<String>> {
        match title {
            "O" => Some(&mut self.open),
            "H" => Some(&mut self.high),
            "L" => Some(&mut self.low),
            "C" => Some(&mut self.close),
            _ => None,
        }
    }
}

/// Everything read from one loaded chart page, before classification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartSnapshot {
    pub indicators: Vec<IndicatorReading>,
    pub ohlc: Ohlc,
    pub volume: String,
    pub volume_ma: String,
}

impl ChartSnapshot {
    pub fn indicator(&self, source: &str) -> Option<&IndicatorReading> {
        self.indicators.iter().find(|i| i.source == source)
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChartStatus {
    Buy,
    Sell,
    Neutral,
    Unavailable,
}

impl ChartStatus {
    /// Cell value written to the sheet. Existing sheets use "N" and "NO".
    pub fn sheet_value(&self) -> &'static str {
        match self {
            ChartStatus::Buy => "BUY",
            ChartStatus::Sell => "SELL",
            ChartStatus::Neutral => "N",
            ChartStatus::Unavailable => "NO",
        }
    }
}

impl fmt::Display for ChartStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChartStatus::Buy => "BUY",
            ChartStatus::Sell => "SELL",
            ChartStatus::Neutral => "NEUTRAL",
            ChartStatus::Unavailable => "UNAVAILABLE",
        };
        f.write_str(s)
    }
}

/// A chart result without its destination row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartFields {
    pub status: ChartStatus,
    pub hl2_value: String,
    pub high_value: String,
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
    pub volume_ma: String,
}

impl ChartFields {
    pub fn unavailable() -> Self {
        Self {
            status: ChartStatus::Unavailable,
            hl2_value: String::new(),
            high_value: String::new(),
            open: String::new(),
            high: String::new(),
            low: String::new(),
            close: String::new(),
            volume: String::new(),
            volume_ma: String::new(),
        }
    }

    /// Compose the result fields from a snapshot and its classification.
    pub fn from_snapshot(snapshot: &ChartSnapshot, status: ChartStatus) -> Self {
        let value_of = |source: &str| {
            snapshot
                .indicator(source)
                .map(|i| i.value.clone())
                .unwrap_or_default()
        };
        Self {
            status,
            hl2_value: value_of("hl2"),
            high_value: value_of("high"),
            open: snapshot.ohlc.open.clone().unwrap_or_default(),
            high: snapshot.ohlc.high.clone().unwrap_or_default(),
            low: snapshot.ohlc.low.clone().unwrap_or_default(),
            close: snapshot.ohlc.close.clone().unwrap_or_default(),
            volume: snapshot.volume.clone(),
            volume_ma: snapshot.volume_ma.clone(),
        }
    }

    pub fn into_result(self, row_index: u32) -> ChartResult {
        ChartResult {
            row_index,
            fields: self,
        }
    }
}

/// Terminal record for one link, keyed to its sheet row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartResult {
    pub row_index: u32,
    #[serde(flatten)]
    pub fields: ChartFields,
}

impl ChartResult {
    /// Cells C..I (status, hl2, high, O, H, L, C), optionally followed by J..K volumes.
    pub fn sheet_row(&self, include_volume: bool) -> Vec<String> {
        let f = &self.fields;
        let mut row = vec![
            f.status.sheet_value().to_string(),
            f.hl2_value.clone(),
            f.high_value.clone(),
            f.open.clone(),
            f.high.clone(),
            f.low.clone(),
            f.close.clone(),
        ];
        if include_volume {
            row.push(f.volume.clone());
            row.push(f.volume_ma.clone());
        }
        row
    }
}

// ── Session credentials ───────────────────────────────────────────────────────

/// Persisted cookie. Field names follow the browser's JSON cookie dump so existing
/// `cookies.json` files load unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Seconds since epoch; -1 for session cookies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Opaque cookie set for one signed-in browser session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential {
    pub cookies: Vec<StoredCookie>,
}

impl Credential {
    pub fn new(cookies: Vec<StoredCookie>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_window_rows() {
        let w = BatchWindow { batch_index: 0, batch_size: 151 };
        assert_eq!((w.first_row(), w.last_row()), (2, 152));

        let w = BatchWindow { batch_index: 2, batch_size: 10 };
        assert_eq!((w.first_row(), w.last_row()), (22, 31));
        assert!(w.contains(22) && w.contains(31));
        assert!(!w.contains(21) && !w.contains(32));
    }

    #[test]
    fn test_batch_window_beyond_u32_rows() {
        let w = BatchWindow { batch_index: 30_000_000, batch_size: 151 };
        assert_eq!(w.first_row(), 4_530_000_002);
        assert!(!w.contains(2));
        assert!(!w.contains(u32::MAX));

        let w = BatchWindow { batch_index: u32::MAX, batch_size: u32::MAX };
        assert!(w.last_row() > w.first_row());
        assert!(!w.contains(u32::MAX));
    }

    #[test]
    fn test_sheet_row_layout() {
        let mut fields = ChartFields::unavailable();
        fields.status = ChartStatus::Neutral;
        fields.hl2_value = "1.5".into();
        fields.volume = "10K".into();
        let result = fields.into_result(7);

        assert_eq!(result.sheet_row(false), vec!["N", "1.5", "", "", "", "", ""]);
        assert_eq!(result.sheet_row(true).len(), 9);
        assert_eq!(result.sheet_row(true)[7], "10K");
    }

    #[test]
    fn test_cookie_dump_compat() {
        let json = r#"[{"name":"sessionid","value":"abc","domain":".example.com",
            "path":"/","expires":1767225600.5,"size":17,"httpOnly":true,"secure":true,
            "session":false,"sameSite":"Lax","priority":"Medium"}]"#;
        let cred: Credential = serde_json::from_str(json).unwrap();
        assert_eq!(cred.cookies.len(), 1);
        assert_eq!(cred.cookies[0].http_only, Some(true));
        assert_eq!(cred.cookies[0].same_site.as_deref(), Some("Lax"));
    }
}
