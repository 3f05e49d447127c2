//! CSV link source and result sink for runs without Sheets API access.
//!
//! The link file is a CSV export of the spreadsheet: the header is sheet row 1 and the
//! chart link sits in the second column. A record's sheet row is the file line it starts
//! on, so blank lines still count as rows.

use crate::error::SinkError;
use crate::models::{ChartResult, LinkEntry};
use crate::sheets::{LinkSource, ResultSink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};

const LINK_COLUMN: usize = 1;

const RESULT_HEADER: [&str; 10] = [
    "row", "status", "hl2", "high_value", "open", "high", "low", "close", "volume", "volume_ma",
];

/// Read chart links from a sheet export.
pub fn load_links(path: &Path) -> Result<Vec<LinkEntry>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open {:?}", path))?;

    let mut links = Vec::new();
    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping record in {:?}: {}", path, e);
                continue;
            }
        };
        let Some(row_index) = record
            .position()
            .and_then(|p| u32::try_from(p.line()).ok())
        else {
            warn!("Record without a usable line number in {:?}", path);
            continue;
        };
        match record.get(LINK_COLUMN).map(str::trim) {
            Some(url) if !url.is_empty() => links.push(LinkEntry::new(row_index, url)),
            _ => debug!("row {} has no link", row_index),
        }
    }

    info!("{} links loaded from {:?}", links.len(), path);
    Ok(links)
}

pub struct CsvLinkSource {
    path: PathBuf,
}

impl CsvLinkSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LinkSource for CsvLinkSource {
    async fn get_links(&self) -> Result<Vec<LinkEntry>> {
        load_links(&self.path)
    }
}

/// Appends every flushed row to a CSV file, writing the header once.
pub struct CsvResultSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl CsvResultSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn append(&self, results: &[ChartResult]) -> Result<(), SinkError> {
        let _guard = self.lock.lock().map_err(|e| SinkError::Io(e.to_string()))?;
        let io = |e: std::io::Error| SinkError::Io(format!("{:?}: {}", self.path, e));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let fresh = std::fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io)?;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        let csv_err = |e: csv::Error| SinkError::Io(e.to_string());
        if fresh {
            writer.write_record(RESULT_HEADER).map_err(csv_err)?;
        }
        for r in results {
            let mut record = vec![r.row_index.to_string()];
            record.extend(r.sheet_row(true));
            writer.write_record(&record).map_err(csv_err)?;
        }
        writer.flush().map_err(io)?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for CsvResultSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write_results(&self, results: &[ChartResult]) -> Result<(), SinkError> {
        self.append(results)?;
        debug!("{} rows appended to {:?}", results.len(), self.path);
        Ok(())
    }
}
