//! Spreadsheet-facing collaborators: where links come from and where results go.

pub mod token;

use crate::config::SheetsConfig;
use crate::error::SinkError;
use crate::models::{ChartResult, LinkEntry};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use self::token::TokenSource;

#[async_trait]
pub trait LinkSource: Send + Sync {
    /// Every chart link in sheet order, tagged with its row.
    async fn get_links(&self) -> Result<Vec<LinkEntry>>;
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    fn name(&self) -> &str;

    /// Persist one flushed chunk. Called once per chunk with a non-empty batch.
    async fn write_results(&self, results: &[ChartResult]) -> Result<(), SinkError>;
}

/// Turn a single-column value range starting at row 2 into link entries.
/// Blank cells keep their row number but produce no entry.
pub fn links_from_values(values: &[Vec<String>]) -> Vec<LinkEntry> {
    values
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let url = row.first()?.trim();
            (!url.is_empty()).then(|| LinkEntry::new(i as u32 + 2, url))
        })
        .collect()
}

/// Sheet name in A1 notation, quoted when it holds anything but letters, digits or `_`.
pub fn a1_sheet(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

/// Destination range for one result row.
pub fn result_range(sheet: &str, row_index: u32, include_volume: bool) -> String {
    let last = if include_volume { 'K' } else { 'I' };
    format!("{}!C{row_index}:{last}{row_index}", a1_sheet(sheet))
}

// ── Google Sheets v4 ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ValueRange {
    range: String,
    values: Vec<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BatchUpdateRequest {
    value_input_option: &'static str,
    data: Vec<ValueRange>,
}

pub struct SheetsClient {
    http: reqwest::Client,
    api_base: Url,
    sheet_id: String,
    sheet_name: String,
    token: TokenSource,
    include_volume: bool,
}

impl SheetsClient {
    pub fn new(config: &SheetsConfig) -> Result<Self> {
        let sheet_id = config
            .sheet_id
            .clone()
            .context("sheets.sheet_id (SHEET_ID) is not set")?;
        let token = TokenSource::from_config(config)?.context(
            "No Sheets credentials: set GOOGLE_SERVICE_ACCOUNT_EMAIL and GOOGLE_PRIVATE_KEY, or SHEETS_ACCESS_TOKEN",
        )?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        let api_base = Url::parse(&config.api_base)
            .with_context(|| format!("Invalid sheets.api_base {:?}", config.api_base))?;
        if api_base.cannot_be_a_base() {
            bail!("sheets.api_base {:?} cannot take path segments", config.api_base);
        }

        Ok(Self {
            http,
            api_base,
            sheet_id,
            sheet_name: config.sheet_name.clone(),
            token,
            include_volume: config.include_volume,
        })
    }

    fn endpoint(&self, tail: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push("spreadsheets")
                .push(&self.sheet_id)
                .extend(tail);
        }
        url
    }

    fn batch_update_body(&self, results: &[ChartResult]) -> BatchUpdateRequest {
        BatchUpdateRequest {
            value_input_option: "RAW",
            data: results
                .iter()
                .map(|r| ValueRange {
                    range: result_range(&self.sheet_name, r.row_index, self.include_volume),
                    values: vec![r.sheet_row(self.include_volume)],
                })
                .collect(),
        }
    }
}

#[async_trait]
impl LinkSource for SheetsClient {
    async fn get_links(&self) -> Result<Vec<LinkEntry>> {
        let range = format!("{}!B2:B", a1_sheet(&self.sheet_name));
        let url = self.endpoint(&["values", range.as_str()]);
        debug!("GET {}", url);

        let bearer = self.token.bearer(&self.http).await?;
        let resp = self
            .http
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .context("Sheets values.get request failed")?
            .error_for_status()
            .context("Sheets values.get rejected")?;

        let body: ValueRangeResponse = resp.json().await.context("Bad values.get response")?;
        let links = links_from_values(&body.values);
        info!("{} links read from {}", links.len(), range);
        Ok(links)
    }
}

#[async_trait]
impl ResultSink for SheetsClient {
    fn name(&self) -> &str {
        "sheets"
    }

    async fn write_results(&self, results: &[ChartResult]) -> Result<(), SinkError> {
        let url = self.endpoint(&["values:batchUpdate"]);
        let body = self.batch_update_body(results);
        let bearer = self
            .token
            .bearer(&self.http)
            .await
            .map_err(|e| SinkError::Request(format!("{:#}", e)))?;

        let resp = self
            .http
            .post(url)
            .bearer_auth(bearer)
            .json(&body)
            .send()
            .await
            .map_err(|e| SinkError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SinkError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!("Sheet updated: {} rows ({})", results.len(), status);
        Ok(())
    }
}
