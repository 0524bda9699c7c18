//! catalog-ingest: ingest web game bundles into the catalog handoff queue.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use catalog_ingest::pipeline::bundle_dir;
use catalog_ingest::{
    BundleFetcher, CaptureController, Candidate, IngestConfig, Pipeline, RunSummary,
    StrategyChain, TrafficRecorder,
};
use catalog_ingest_cli::{
    append_report, logging, read_links, ArchiveFetcher, ChromiumProvider, HandoffQueue,
    HttpClient, LazyRecorder, RemoteCatalog, UNATTENDED_FINISH_POLLS,
};

#[derive(Parser)]
#[command(
    name = "catalog-ingest",
    about = "Ingest interactive web game bundles: extract content, capture a cover, hand off",
    version
)]
struct Cli {
    /// Path to a JSON config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Directory for per-run log files.
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every URL in a links file.
    Run {
        /// Text file with one URL per line.
        links: PathBuf,

        /// Capture again even when a screenshot already exists.
        #[arg(long)]
        force_capture: bool,

        /// Finish captures without operator input.
        #[arg(long)]
        unattended: bool,
    },

    /// Fetch one bundle and print its canonical document.
    Extract {
        url: String,

        /// Print JSON instead of Markdown.
        #[arg(long)]
        json: bool,
    },

    /// Re-capture the screenshot of one URL into the handoff queue.
    Capture {
        url: String,

        /// Finish the capture without operator input.
        #[arg(long)]
        unattended: bool,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   catalog-ingest completions bash > ~/.local/share/bash-completion/completions/catalog-ingest
    ///   catalog-ingest completions zsh > ~/.zfunc/_catalog-ingest
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "catalog-ingest",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let mut config = IngestConfig::load(cli.config.as_deref())?;
    let log_dir = cli.log_dir.clone().unwrap_or_else(|| config.output.logs.clone());
    logging::init(&cli.log_level, &log_dir)?;
    if let Some(source) = &config.source {
        tracing::info!("Loaded config from {}", source.display());
    }

    match cli.command {
        Commands::Run {
            links,
            force_capture,
            unattended,
        } => {
            config.force_capture |= force_capture;
            if unattended {
                set_unattended(&mut config);
            }
            run(&config, &links, unattended).await
        }
        Commands::Extract { url, json } => extract(&config, &url, json).await,
        Commands::Capture { url, unattended } => {
            if unattended {
                set_unattended(&mut config);
            }
            capture(&config, &url, unattended).await
        }
        Commands::Completions { .. } => Ok(()),
    }
}

fn set_unattended(config: &mut IngestConfig) {
    config
        .capture
        .auto_finish_after
        .get_or_insert(UNATTENDED_FINISH_POLLS);
}

async fn run(config: &IngestConfig, links: &std::path::Path, headless: bool) -> Result<()> {
    let urls = read_links(links)?;
    tracing::info!("Loaded {} URLs from {}", urls.len(), links.display());

    let (email, password) = config.require_credentials()?;
    let mut catalog_fetch = config.fetch.clone();
    catalog_fetch.timeout_ms = config.catalog.timeout_ms;
    let catalog = RemoteCatalog::new(HttpClient::new(&catalog_fetch)?, &config.catalog);
    let snapshot = catalog.snapshot(&email, &password).await?;
    tracing::info!("Catalog snapshot holds {} entries", snapshot.len());

    let browser = Arc::new(ChromiumProvider::launch(headless).await?);
    let recorder: Arc<dyn TrafficRecorder> = browser.clone();
    let pipeline = Pipeline::new(
        config,
        Arc::new(snapshot),
        Arc::new(ArchiveFetcher::new(HttpClient::new(&config.fetch)?, config)),
        StrategyChain::standard(&config.extraction, Some(recorder)),
        CaptureController::new(browser, &config.capture),
        Arc::new(HandoffQueue::new(config)),
    );

    match pipeline.run(&urls).await {
        Ok(summary) => report(config, &summary),
        Err(aborted) => {
            report(config, &aborted.summary)?;
            Err(aborted.error.into())
        }
    }
}

fn report(config: &IngestConfig, summary: &RunSummary) -> Result<()> {
    let report = summary.render();
    for line in report.lines() {
        tracing::info!("{line}");
    }
    println!("\n=== Processing Report ===\n{report}");
    append_report(&config.output.report_log, &report)
}

async fn extract(config: &IngestConfig, url: &str, json: bool) -> Result<()> {
    let candidate = Candidate::from_url(url);
    let dest = bundle_dir(&config.output.bundles, &candidate);
    let fetcher = ArchiveFetcher::new(HttpClient::new(&config.fetch)?, config);
    let (bundle, stats) = fetcher.fetch(&candidate, &dest).await?;
    tracing::info!("Fetched {}: {stats}", dest.display());

    let recorder: Arc<dyn TrafficRecorder> = Arc::new(LazyRecorder::new());
    let chain = StrategyChain::standard(&config.extraction, Some(recorder));
    let document = chain.extract(&bundle).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
    } else {
        print!("{}", document.to_markdown());
    }
    Ok(())
}

async fn capture(config: &IngestConfig, url: &str, headless: bool) -> Result<()> {
    let candidate = Candidate::from_url(url);
    let name = candidate.output_name();
    let browser = Arc::new(ChromiumProvider::launch(headless).await?);
    let controller = CaptureController::new(browser, &config.capture);
    let artifact = controller
        .run(&candidate.source_url, &name)
        .await
        .with_context(|| format!("capture of {url} failed"))?;
    let path = HandoffQueue::new(config).store_artifact(&name, &artifact).await?;
    println!("{}", path.display());
    Ok(())
}
