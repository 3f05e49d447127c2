//! Batch controller: window → chunks → one browser session per chunk.
//!
//! ## Chunk lifecycle
//!
//! `Idle → Launching → Authenticating → Processing → Flushing → Closed`
//!
//! A failed launch or sign-in short-circuits to `Aborted → Closed`: the chunk's links
//! produce no rows and the run moves on to the next chunk. Link failures never abort a
//! chunk; they end up as UNAVAILABLE rows.
//!
//! Chunks run one at a time unless `pipeline.concurrency` > 1, in which case up to that
//! many sessions run side by side. Chunks are disjoint, so no row is written twice.

pub mod batch;

use crate::auth::Authenticator;
use crate::browser::{BrowserLauncher, BrowserPage, BrowserSession};
use crate::config::PipelineConfig;
use crate::credentials::CredentialStore;
use crate::error::AuthError;
use crate::models::{BatchWindow, ChartResult, ChartStatus, LinkEntry};
use crate::scraper::ChartScraper;
use crate::sheets::ResultSink;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use self::batch::{into_chunks, select_window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Launching,
    Authenticating,
    Processing,
    Flushing,
    Aborted,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-chunk phase tracker; every transition is logged.
struct Lifecycle {
    chunk: usize,
    phase: SessionPhase,
}

impl Lifecycle {
    fn new(chunk: usize) -> Self {
        Self {
            chunk,
            phase: SessionPhase::Idle,
        }
    }

    fn advance(&mut self, next: SessionPhase) {
        debug!("chunk {}: {} → {}", self.chunk, self.phase, next);
        self.phase = next;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ChunkReport {
    completed: bool,
    rows_written: usize,
    rows_unavailable: usize,
    sink_errors: usize,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PipelineStats {
    pub chunks: usize,
    pub chunks_completed: usize,
    pub chunks_aborted: usize,
    pub rows_written: usize,
    pub rows_unavailable: usize,
    pub sink_errors: usize,
}

impl PipelineStats {
    fn absorb(&mut self, report: ChunkReport) {
        if report.completed {
            self.chunks_completed += 1;
        } else {
            self.chunks_aborted += 1;
        }
        self.rows_written += report.rows_written;
        self.rows_unavailable += report.rows_unavailable;
        self.sink_errors += report.sink_errors;
    }

    /// Every chunk ran to completion.
    pub fn is_complete(&self) -> bool {
        self.chunks_aborted == 0
    }
}

// ── Chunk runner ──────────────────────────────────────────────────────────────

struct ChunkRunner {
    launcher: Arc<dyn BrowserLauncher>,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn CredentialStore>,
    scraper: ChartScraper,
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl ChunkRunner {
    async fn run(&self, chunk: usize, links: Vec<LinkEntry>) -> ChunkReport {
        let mut life = Lifecycle::new(chunk);
        info!("Chunk {}: {} links (rows {:?}..={:?})", chunk, links.len(),
            links.first().map(|l| l.row_index), links.last().map(|l| l.row_index));

        life.advance(SessionPhase::Launching);
        let session = match self.launcher.launch().await {
            Ok(s) => s,
            Err(e) => {
                error!("Chunk {}: browser launch failed: {}", chunk, e);
                life.advance(SessionPhase::Aborted);
                life.advance(SessionPhase::Closed);
                return ChunkReport::default();
            }
        };
        let page = session.page();

        life.advance(SessionPhase::Authenticating);
        if let Err(e) = self.sign_in(page.as_ref()).await {
            error!("Chunk {}: login failed, skipping {} links: {}", chunk, links.len(), e);
            life.advance(SessionPhase::Aborted);
            drop(page);
            close(chunk, session).await;
            life.advance(SessionPhase::Closed);
            return ChunkReport::default();
        }

        life.advance(SessionPhase::Processing);
        let mut buffer: Vec<ChartResult> = Vec::with_capacity(links.len());
        for link in &links {
            let outcome = self.scraper.fetch_with_retry(page.as_ref(), &link.url).await;
            if let Some(e) = &outcome.error {
                warn!("Row {} failed after {} attempt(s): {}", link.row_index, outcome.attempts, e);
            }
            info!("Row {}: {}", link.row_index, outcome.fields.status);
            buffer.push(outcome.fields.into_result(link.row_index));
        }

        life.advance(SessionPhase::Flushing);
        let sink_errors = self.flush(chunk, &buffer).await;

        drop(page);
        close(chunk, session).await;
        life.advance(SessionPhase::Closed);

        ChunkReport {
            completed: true,
            rows_written: buffer.len(),
            rows_unavailable: buffer
                .iter()
                .filter(|r| r.fields.status == ChartStatus::Unavailable)
                .count(),
            sink_errors,
        }
    }

    /// Restore the stored credential, or sign in and store a fresh one.
    async fn sign_in(&self, page: &dyn BrowserPage) -> Result<(), AuthError> {
        let stored = match self.store.load().await {
            Ok(c) => c,
            Err(e) => {
                warn!("Stored credential unreadable, signing in again: {}", e);
                None
            }
        };

        if let Some(credential) = stored {
            match page.set_cookies(&credential.cookies).await {
                Ok(()) => {
                    debug!("restored {} cookies", credential.cookies.len());
                    return Ok(());
                }
                Err(e) => warn!("Browser rejected stored cookies: {}", e),
            }
        }

        let credential = self.authenticator.authenticate(page).await?;
        if let Err(e) = self.store.save(&credential).await {
            warn!("Could not persist credential: {}", e);
        }
        Ok(())
    }

    /// One batch write per sink. Returns the number of failed writes.
    async fn flush(&self, chunk: usize, results: &[ChartResult]) -> usize {
        if results.is_empty() {
            return 0;
        }
        let mut failures = 0;
        for sink in &self.sinks {
            match sink.write_results(results).await {
                Ok(()) => debug!("chunk {}: {} rows → {}", chunk, results.len(), sink.name()),
                Err(e) => {
                    error!("Chunk {}: failed to write {} rows to {}: {}", chunk, results.len(), sink.name(), e);
                    failures += 1;
                }
            }
        }
        failures
    }
}

async fn close(chunk: usize, session: Box<dyn BrowserSession>) {
    if let Err(e) = session.close().await {
        warn!("Chunk {}: browser did not close cleanly: {}", chunk, e);
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

pub struct Pipeline {
    runner: Arc<ChunkRunner>,
    chunk_size: usize,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn CredentialStore>,
        scraper: ChartScraper,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            runner: Arc::new(ChunkRunner {
                launcher,
                authenticator,
                store,
                scraper,
                sinks: Vec::new(),
            }),
            chunk_size: config.chunk_size.max(1),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Add a destination for flushed chunks. Must be called before `run`.
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        if let Some(runner) = Arc::get_mut(&mut self.runner) {
            runner.sinks.push(sink);
        }
        self
    }

    pub async fn run(&self, links: Vec<LinkEntry>, window: BatchWindow) -> PipelineStats {
        let selected = select_window(links, window);
        info!(
            "=== Batch {}: rows {}..={}, {} links ===",
            window.batch_index,
            window.first_row(),
            window.last_row(),
            selected.len()
        );

        let chunks = into_chunks(selected, self.chunk_size);
        let mut stats = PipelineStats {
            chunks: chunks.len(),
            ..Default::default()
        };

        let sem = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.into_iter().enumerate() {
            let chunk_no = i + 1;
            // Acquired before spawning so chunks start in order.
            let permit = match Arc::clone(&sem).acquire_owned().await {
                Ok(p) => p,
                Err(e) => {
                    error!("Chunk {}: semaphore closed: {}", chunk_no, e);
                    stats.chunks_aborted += 1;
                    continue;
                }
            };
            let runner = Arc::clone(&self.runner);

            let handle = tokio::spawn(async move {
                let _permit = permit;
                runner.run(chunk_no, chunk).await
            });
            handles.push((chunk_no, handle));
        }

        for (chunk_no, handle) in handles {
            match handle.await {
                Ok(report) => stats.absorb(report),
                Err(e) => {
                    error!("Task panic for chunk {}: {}", chunk_no, e);
                    stats.chunks_aborted += 1;
                }
            }
        }

        info!(
            "=== Done: {}/{} chunks | {} rows ({} unavailable) | {} sink errors ===",
            stats.chunks_completed,
            stats.chunks,
            stats.rows_written,
            stats.rows_unavailable,
            stats.sink_errors
        );
        stats
    }
}
