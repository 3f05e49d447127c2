mod auth;
mod browser;
mod config;
mod credentials;
mod error;
mod loader;
mod models;
mod pipeline;
mod scraper;
mod sheets;
mod storage;
mod utils;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::auth::{Authenticator, FormAuthenticator};
use crate::browser::BrowserLauncher;
use crate::browser::chromium::ChromiumLauncher;
use crate::config::AppConfig;
use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::loader::{CsvLinkSource, CsvResultSink};
use crate::pipeline::Pipeline;
use crate::scraper::ChartScraper;
use crate::sheets::{LinkSource, SheetsClient};
use crate::storage::{HistorySink, Repository};

#[derive(Parser)]
#[command(name = "chart-signal-sync", about = "Chart signal scraper → spreadsheet sync", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Base64 cookie dump used to seed the cookie file when it does not exist yet
    #[arg(long, env = "COOKIES_BASE64", hide_env_values = true, global = true)]
    cookies_base64: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Scrape the configured batch window and write results back
    Run {
        /// Which slice of the sheet to process (0-based)
        #[arg(long, env = "BATCH_INDEX")]
        batch_index: Option<u32>,

        /// Rows per batch window
        #[arg(long, env = "ROWS_PER_BATCH")]
        rows_per_batch: Option<u32>,

        /// Links per browser session
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Read links from a CSV export instead of the Sheets API
        #[arg(long)]
        links_csv: Option<PathBuf>,

        /// Also append results to this CSV file
        #[arg(long)]
        results_csv: Option<PathBuf>,
    },

    /// Sign in once and store the session cookies
    Login,

    /// Print the stored cookies as base64 (for COOKIES_BASE64)
    ExportCookies,

    /// Show run history statistics
    Stats,

    /// Apply schema migrations to the history database
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "chart_signal_sync=info,warn",
        1 => "chart_signal_sync=debug,info",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(EnvFilter::new(filter))
        .init();

    let mut config = AppConfig::load()?;

    let store = FileCredentialStore::new(&config.credentials.cookie_path);
    if let Some(encoded) = cli.cookies_base64.as_deref().filter(|s| !s.trim().is_empty()) {
        store
            .bootstrap_from_base64(encoded)
            .await
            .context("COOKIES_BASE64 bootstrap failed")?;
    }

    match cli.command {
        Command::Run {
            batch_index,
            rows_per_batch,
            chunk_size,
            links_csv,
            results_csv,
        } => {
            if let Some(v) = batch_index {
                config.pipeline.batch_index = v;
            }
            if let Some(v) = rows_per_batch {
                config.pipeline.rows_per_batch = v;
            }
            if let Some(v) = chunk_size {
                config.pipeline.chunk_size = v;
            }
            run(config, store, links_csv, results_csv).await?;
        }

        Command::Login => {
            let _t = utils::Timer::start("Login");
            let launcher = ChromiumLauncher::new(&config.browser);
            let authenticator = FormAuthenticator::new(&config.auth);
            if let Some(email) = &config.auth.email {
                info!("Signing in as {}", utils::mask_email(email));
            }

            let session = launcher.launch().await?;
            let page = session.page();
            let result = authenticator.authenticate(page.as_ref()).await;
            drop(page);
            if let Err(e) = session.close().await {
                warn!("Browser did not close cleanly: {}", e);
            }

            let credential = result.context("Login failed")?;
            store.save(&credential).await?;
            println!("Saved {} cookies to {:?}", credential.cookies.len(), store.path());
        }

        Command::ExportCookies => match store.export_base64().await? {
            Some(encoded) => println!("{}", encoded),
            None => bail!("No cookie file at {:?}; run `chart-signal-sync login` first", store.path()),
        },

        Command::Stats => {
            let repo = Repository::open(&config.storage.db_path)?;
            repo.run_migrations()?;
            let runs = repo.run_count()?;
            let results = repo.result_count()?;
            println!("─────────────────────────────────");
            println!("  Chart Signal Sync: History");
            println!("─────────────────────────────────");
            println!("  Runs     : {}", utils::fmt_number(runs));
            println!("  Results  : {}", utils::fmt_number(results));
            match repo.last_run()? {
                Some(last) => {
                    println!("  Last run : #{} (batch {}, {})", last.id, last.batch_index, last.status);
                    println!("  Started  : {}", last.started_at);
                    println!(
                        "  Finished : {}",
                        last.finished_at.map(|d| d.to_string()).unwrap_or("—".into())
                    );
                    println!(
                        "  Rows     : {} ({} unavailable)",
                        utils::fmt_number(last.rows_written),
                        utils::fmt_number(last.rows_unavailable)
                    );
                    for (status, n) in repo.status_counts(last.id)? {
                        println!("    {:<12}: {}", status, utils::fmt_number(n));
                    }
                }
                None => println!("  Last run : —"),
            }
            println!("─────────────────────────────────");
        }

        Command::Migrate => {
            Repository::open(&config.storage.db_path)?.run_migrations()?;
            println!("Migrations applied.");
        }
    }

    Ok(())
}

async fn run(
    config: AppConfig,
    store: FileCredentialStore,
    links_csv: Option<PathBuf>,
    results_csv: Option<PathBuf>,
) -> Result<()> {
    let _t = utils::Timer::start(format!("Batch {}", config.pipeline.batch_index));

    let sheets = if config.sheets.is_configured() {
        Some(Arc::new(SheetsClient::new(&config.sheets)?))
    } else {
        None
    };

    let links = match (&links_csv, &sheets) {
        (Some(path), _) => CsvLinkSource::new(path).get_links().await?,
        (None, Some(client)) => client.get_links().await?,
        (None, None) => bail!("No link source: configure SHEET_ID with Sheets credentials or pass --links-csv"),
    };

    let scraper = ChartScraper::new(&config.scraper, &config.palette);
    let launcher: Arc<dyn BrowserLauncher> = Arc::new(ChromiumLauncher::new(&config.browser));
    let authenticator: Arc<dyn Authenticator> = Arc::new(FormAuthenticator::new(&config.auth));
    let store: Arc<dyn CredentialStore> = Arc::new(store);

    let mut pipeline = Pipeline::new(launcher, authenticator, store, scraper, &config.pipeline);
    let mut sink_count = 0;

    if let Some(client) = sheets {
        pipeline = pipeline.with_sink(client);
        sink_count += 1;
    }
    if let Some(path) = results_csv {
        pipeline = pipeline.with_sink(Arc::new(CsvResultSink::new(path)));
        sink_count += 1;
    }

    let history = if config.storage.enabled {
        let repo = Arc::new(Repository::open(&config.storage.db_path)?);
        if config.storage.run_migrations {
            repo.run_migrations()?;
        }
        let run_id = repo.begin_scrape_run(config.pipeline.batch_index)?;
        pipeline = pipeline.with_sink(Arc::new(HistorySink::new(repo.clone(), run_id)));
        sink_count += 1;
        Some((repo, run_id))
    } else {
        None
    };

    if sink_count == 0 {
        bail!("No result sink: configure the Sheets API, pass --results-csv or enable storage");
    }

    let stats = pipeline.run(links, config.pipeline.window()).await;

    if let Some((repo, run_id)) = history {
        if let Err(e) = repo.finish_scrape_run(run_id, &stats) {
            warn!("Could not record run {}: {:#}", run_id, e);
        }
    }

    if !stats.is_complete() {
        bail!("{} of {} chunks aborted", stats.chunks_aborted, stats.chunks);
    }
    Ok(())
}
