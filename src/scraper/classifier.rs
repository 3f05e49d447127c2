//! Maps the colors of the `hl2` and `high` legend indicators to a signal.

use crate::models::{ChartSnapshot, ChartStatus};
use serde::{Deserialize, Serialize};

pub const HL2_SOURCE: &str = "hl2";
pub const HIGH_SOURCE: &str = "high";

/// The two display colors the chart uses for its signal. Compared by exact string match.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SignalPalette {
    #[serde(default = "default_positive")]
    pub positive: String,
    #[serde(default = "default_negative")]
    pub negative: String,
}

fn default_positive() -> String {
    "rgb(76, 175, 80)".to_string()
}
fn default_negative() -> String {
    "rgb(255, 82, 82)".to_string()
}

impl Default for SignalPalette {
    fn default() -> Self {
        Self {
            positive: default_positive(),
            negative: default_negative(),
        }
    }
}

impl SignalPalette {
    /// BUY when both indicators are positive, SELL when both are negative, NEUTRAL
    /// otherwise. A missing indicator never matches.
    pub fn classify(&self, snapshot: &ChartSnapshot) -> ChartStatus {
        let hl2 = snapshot.indicator(HL2_SOURCE).map(|i| i.color.as_str());
        let high = snapshot.indicator(HIGH_SOURCE).map(|i| i.color.as_str());

        let both = |token: &str| hl2 == Some(token) && high == Some(token);

        if both(self.positive.as_str()) {
            ChartStatus::Buy
        } else if both(self.negative.as_str()) {
            ChartStatus::Sell
        } else {
            ChartStatus::Neutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IndicatorReading;

    const GREEN: &str = "rgb(76, 175, 80)";
    const RED: &str = "rgb(255, 82, 82)";
    const GREY: &str = "rgb(120, 123, 134)";

    fn reading(source: &str, color: &str) -> IndicatorReading {
        IndicatorReading {
            source: source.into(),
            color: color.into(),
            value: "1.00".into(),
        }
    }

    fn snapshot(hl2: Option<&str>, high: Option<&str>) -> ChartSnapshot {
        let mut s = ChartSnapshot::default();
        if let Some(c) = hl2 {
            s.indicators.push(reading(HL2_SOURCE, c));
        }
        if let Some(c) = high {
            s.indicators.push(reading(HIGH_SOURCE, c));
        }
        s
    }

    #[test]
    fn test_color_matrix() {
        use ChartStatus::*;
        let palette = SignalPalette::default();
        let cases = [
            (GREEN, GREEN, Buy),
            (GREEN, RED, Neutral),
            (GREEN, GREY, Neutral),
            (RED, GREEN, Neutral),
            (RED, RED, Sell),
            (RED, GREY, Neutral),
            (GREY, GREEN, Neutral),
            (GREY, RED, Neutral),
            (GREY, GREY, Neutral),
        ];
        for (hl2, high, expected) in cases {
            assert_eq!(
                palette.classify(&snapshot(Some(hl2), Some(high))),
                expected,
                "hl2={hl2} high={high}"
            );
        }
    }

    #[test]
    fn test_missing_indicators_are_neutral() {
        let palette = SignalPalette::default();
        for (hl2, high) in [
            (None, Some(GREEN)),
            (Some(GREEN), None),
            (None, Some(RED)),
            (Some(RED), None),
            (None, None),
        ] {
            assert_eq!(palette.classify(&snapshot(hl2, high)), ChartStatus::Neutral);
        }
    }

    #[test]
    fn test_exact_match_only() {
        let palette = SignalPalette::default();
        let spaced = "rgb(76,175,80)";
        assert_eq!(
            palette.classify(&snapshot(Some(spaced), Some(spaced))),
            ChartStatus::Neutral
        );
    }

    #[test]
    fn test_other_sources_ignored() {
        let palette = SignalPalette::default();
        let mut s = snapshot(Some(RED), Some(RED));
        s.indicators.insert(0, reading("close", GREEN));
        assert_eq!(palette.classify(&s), ChartStatus::Sell);
        assert_eq!(palette.classify(&s), palette.classify(&s.clone()));
    }

    #[test]
    fn test_custom_palette() {
        let palette = SignalPalette {
            positive: "green".into(),
            negative: "red".into(),
        };
        assert_eq!(palette.classify(&snapshot(Some("green"), Some("green"))), ChartStatus::Buy);
        assert_eq!(palette.classify(&snapshot(Some(GREEN), Some(GREEN))), ChartStatus::Neutral);
    }
}
