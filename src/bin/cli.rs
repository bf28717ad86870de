//! dumptool CLI
//!
//! Bulk-downloads catalog metadata into `{output}/{bucket}/{id}.json`.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dumptool::{
    error::Result,
    models::{Config, ModelId},
    pipeline::{Engine, Mode},
    services::HttpCatalog,
};
use tokio_util::sync::CancellationToken;

/// dumptool - resumable catalog metadata dumper
#[derive(Parser, Debug)]
#[command(name = "dumptool", version, about = "Resumable catalog metadata dumper")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "dumptool.toml")]
    config: PathBuf,

    /// Output directory (overrides storage.output_dir)
    #[arg(short, long, global = true)]
    out: Option<PathBuf>,

    /// Concurrent fetches (overrides scheduler.concurrency)
    #[arg(short, long, global = true)]
    threads: Option<usize>,

    /// Re-download even when a valid file already exists
    #[arg(long, global = true)]
    force: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored log output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download every id in [start, end] not yet captured
    Range {
        #[arg(long)]
        start: ModelId,
        #[arg(long)]
        end: ModelId,
        /// Also re-probe ids previously logged as not found
        #[arg(long)]
        include_not_found: bool,
    },

    /// Fill gaps below the recorded watermark
    Resume {
        /// Upper bound (default: last_max.txt)
        #[arg(long)]
        ceiling: Option<ModelId>,
    },

    /// Fetch ids newer than the watermark, up to the upstream's latest
    #[command(alias = "delta")]
    Auto,

    /// Replay retryable failures from errors.txt
    Retry,

    /// Probe beyond the highest download until a run of misses
    Crawl {
        /// First id to probe (default: highest download + 1)
        #[arg(long)]
        start: Option<ModelId>,
    },

    /// Re-probe ids logged as not found
    Recheck {
        #[arg(long, requires = "end")]
        start: Option<ModelId>,
        #[arg(long, requires = "start")]
        end: Option<ModelId>,
    },

    /// Rebuild downloaded.txt from the files on disk
    Rebuild,

    /// Show ledger and file counts without fetching
    Status,

    /// Validate configuration
    Validate,
}

/// Initialize logging based on verbosity and color flags.
fn init_logging(verbose: bool, no_color: bool) {
    let level = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    builder.format_timestamp_secs();
    if no_color {
        builder.write_style(env_logger::WriteStyle::Never);
    }
    builder.init();
}

/// Cancel the token on Ctrl+C; in-flight fetches still finish and log.
fn install_stop_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Graceful shutdown requested. Finishing current downloads...");
            cancel.cancel();
        }
    });
}

/// Open the engine over the configured output directory.
fn open_engine(config: Config, cancel: CancellationToken) -> Result<Engine> {
    let catalog = Arc::new(HttpCatalog::new(&config.fetcher)?);
    Engine::new(Arc::new(config), catalog, cancel)
}

fn validate(config: &Config) -> Result<()> {
    log::info!("Validating configuration...");
    if let Err(e) = config.validate() {
        log::error!("Config validation failed: {}", e);
        return Err(e);
    }
    log::info!("✓ Config OK");
    log::info!("    base_url: {}", config.fetcher.base_url);
    log::info!("    concurrency: {}", config.scheduler.concurrency);
    log::info!("    output_dir: {}", config.storage.output_dir.display());
    Ok(())
}

async fn rebuild(engine: Engine) -> Result<()> {
    let count = engine.rebuild().await?;
    log::info!("downloaded.txt now lists {} ids", count);
    Ok(())
}

async fn status(engine: Engine) -> Result<()> {
    let status = engine.status().await?;
    log::info!("Output directory: {}", engine.ledger().root().display());
    log::info!("    logged downloads: {}", status.logged_downloaded);
    log::info!("    valid files: {}", status.valid_files);
    log::info!("    corrupt files: {}", status.invalid_files);
    log::info!("    not found: {}", status.not_found);
    log::info!(
        "    error lines: {} ({} retryable)",
        status.error_lines,
        status.retryable
    );
    log::info!("    discovered by crawl: {}", status.discovered);
    log::info!(
        "    watermark: {}",
        status
            .watermark
            .map_or_else(|| "none".to_string(), |id| id.to_string())
    );
    Ok(())
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.no_color);

    let mut config = Config::load_or_default(&cli.config);
    if let Some(out) = cli.out {
        config.storage.output_dir = out;
    }
    if let Some(threads) = cli.threads {
        config.scheduler.concurrency = threads;
    }

    let cancel = CancellationToken::new();

    let mode = match cli.command {
        Command::Validate => return validate(&config),
        Command::Rebuild => return rebuild(open_engine(config, cancel)?).await,
        Command::Status => return status(open_engine(config, cancel)?).await,
        Command::Range {
            start,
            end,
            include_not_found,
        } => Mode::Range {
            start,
            end,
            include_not_found,
        },
        Command::Resume { ceiling } => Mode::Resume { ceiling },
        Command::Auto => Mode::Delta,
        Command::Retry => Mode::Retry,
        Command::Crawl { start } => Mode::Crawl { start },
        Command::Recheck { start, end } => Mode::Recheck {
            range: start.zip(end),
        },
    };

    install_stop_handler(cancel.clone());
    let engine = open_engine(config, cancel)?;

    let report = engine.run(mode, cli.force).await?;
    if report.stats.not_dispatched > 0 {
        log::warn!("Run interrupted; re-run the same command to continue.");
    } else {
        log::info!("Done!");
    }

    Ok(())
}
