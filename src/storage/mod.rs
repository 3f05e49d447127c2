use crate::error::SinkError;
use crate::models::ChartResult;
use crate::pipeline::PipelineStats;
use crate::sheets::ResultSink;
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use duckdb::{Connection, params};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &str = r#"
CREATE SEQUENCE IF NOT EXISTS seq_scrape_runs START 1;

CREATE TABLE IF NOT EXISTS scrape_runs (
    id                  BIGINT PRIMARY KEY DEFAULT nextval('seq_scrape_runs'),
    started_at          TIMESTAMP NOT NULL,
    finished_at         TIMESTAMP,
    status              VARCHAR NOT NULL DEFAULT 'running',
    batch_index         BIGINT  NOT NULL,
    chunks              BIGINT  DEFAULT 0,
    chunks_aborted      BIGINT  DEFAULT 0,
    rows_written        BIGINT  DEFAULT 0,
    rows_unavailable    BIGINT  DEFAULT 0
);

CREATE TABLE IF NOT EXISTS chart_results (
    run_id      BIGINT   NOT NULL,
    row_index   INTEGER  NOT NULL,
    status      VARCHAR  NOT NULL,
    hl2_value   VARCHAR  NOT NULL DEFAULT '',
    high_value  VARCHAR  NOT NULL DEFAULT '',
    open        VARCHAR  NOT NULL DEFAULT '',
    high        VARCHAR  NOT NULL DEFAULT '',
    low         VARCHAR  NOT NULL DEFAULT '',
    close       VARCHAR  NOT NULL DEFAULT '',
    volume      VARCHAR  NOT NULL DEFAULT '',
    volume_ma   VARCHAR  NOT NULL DEFAULT '',
    scraped_at  TIMESTAMP NOT NULL,
    PRIMARY KEY (run_id, row_index)
);

CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TIMESTAMP NOT NULL
);
"#;

const INDEXES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_results_row ON chart_results (row_index);
"#;

/// Most recent run, as shown by `stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub id: i64,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
    pub status: String,
    pub batch_index: i64,
    pub rows_written: i64,
    pub rows_unavailable: i64,
}

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: Mutex<Connection>,
}

impl Repository {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Could not create dir {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DuckDB at {:?}", path))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self { conn: Mutex::new(Connection::open_in_memory()?) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("DuckDB connection lock poisoned"))
    }

    pub fn run_migrations(&self) -> Result<()> {
        info!("Running migrations…");
        let conn = self.conn()?;
        conn.execute_batch(DDL).context("DDL failed")?;
        conn.execute_batch(INDEXES).context("Index creation failed")?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, ?)",
            params![Utc::now().naive_utc()],
        )?;
        info!("Migrations done.");
        Ok(())
    }

    // ── Scrape run log ────────────────────────────────────────────────────────

    pub fn begin_scrape_run(&self, batch_index: u32) -> Result<i64> {
        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            "INSERT INTO scrape_runs (started_at, status, batch_index) VALUES (?, 'running', ?) RETURNING id",
            params![Utc::now().naive_utc(), batch_index],
            |r| r.get(0),
        )?;
        Ok(id)
    }

    pub fn finish_scrape_run(&self, run_id: i64, stats: &PipelineStats) -> Result<()> {
        self.conn()?.execute(
            r#"UPDATE scrape_runs SET
               finished_at = ?, status = ?,
               chunks = ?, chunks_aborted = ?, rows_written = ?, rows_unavailable = ?
               WHERE id = ?"#,
            params![
                Utc::now().naive_utc(),
                if stats.is_complete() { "success" } else { "partial" },
                stats.chunks as i64,
                stats.chunks_aborted as i64,
                stats.rows_written as i64,
                stats.rows_unavailable as i64,
                run_id,
            ],
        )?;
        Ok(())
    }

    pub fn last_run(&self) -> Result<Option<RunSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id, started_at, finished_at, status, batch_index, rows_written, rows_unavailable
               FROM scrape_runs ORDER BY id DESC LIMIT 1"#,
        )?;
        let mut rows = stmt.query_map([], |r| {
            Ok(RunSummary {
                id: r.get(0)?,
                started_at: r.get(1)?,
                finished_at: r.get(2)?,
                status: r.get(3)?,
                batch_index: r.get(4)?,
                rows_written: r.get(5)?,
                rows_unavailable: r.get(6)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn run_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM scrape_runs")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    // ── Chart results ─────────────────────────────────────────────────────────

    /// Upsert one chunk of results for `run_id`; idempotent on (run, row).
    pub fn insert_results(&self, run_id: i64, results: &[ChartResult]) -> Result<usize> {
        if results.is_empty() {
            return Ok(0);
        }

        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        let sql = r#"
            INSERT INTO chart_results
                (run_id, row_index, status, hl2_value, high_value, open, high, low, close,
                 volume, volume_ma, scraped_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (run_id, row_index) DO UPDATE SET
                status     = excluded.status,
                hl2_value  = excluded.hl2_value,
                high_value = excluded.high_value,
                open       = excluded.open,
                high       = excluded.high,
                low        = excluded.low,
                close      = excluded.close,
                volume     = excluded.volume,
                volume_ma  = excluded.volume_ma,
                scraped_at = excluded.scraped_at
        "#;

        let now = Utc::now().naive_utc();
        for r in results {
            let f = &r.fields;
            tx.execute(
                sql,
                params![
                    run_id,
                    r.row_index,
                    f.status.to_string(),
                    f.hl2_value,
                    f.high_value,
                    f.open,
                    f.high,
                    f.low,
                    f.close,
                    f.volume,
                    f.volume_ma,
                    now,
                ],
            )
            .with_context(|| format!("insert result run {} row {}", run_id, r.row_index))?;
        }

        tx.commit()?;
        Ok(results.len())
    }

    pub fn result_count(&self) -> Result<i64> {
        let conn = self.conn()?;
        let mut s = conn.prepare("SELECT COUNT(*) FROM chart_results")?;
        Ok(s.query_row([], |r| r.get(0))?)
    }

    /// Rows per status for one run, ordered by status.
    pub fn status_counts(&self, run_id: i64) -> Result<Vec<(String, i64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM chart_results WHERE run_id = ? GROUP BY status ORDER BY status",
        )?;
        let counts = stmt
            .query_map(params![run_id], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }
}

/// Result sink recording every flushed chunk under one run id.
pub struct HistorySink {
    repo: Arc<Repository>,
    run_id: i64,
}

impl HistorySink {
    pub fn new(repo: Arc<Repository>, run_id: i64) -> Self {
        Self { repo, run_id }
    }
}

#[async_trait]
impl ResultSink for HistorySink {
    fn name(&self) -> &str {
        "history"
    }

    async fn write_results(&self, results: &[ChartResult]) -> Result<(), SinkError> {
        self.repo
            .insert_results(self.run_id, results)
            .map(|_| ())
            .map_err(|e| SinkError::Io(format!("{:#}", e)))
    }
}
