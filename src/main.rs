use anyhow::{Context, Result};
use clap::Parser;
use request_counter::config::{CliArgs, Config};
use request_counter::logging::{effective_level, setup_logging};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "request-counter")]
#[command(about = "Serve an approximate count of requests over a rolling window")]
#[command(version)]
struct Cli {
    /// Config file (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Number of buckets in the window
    #[arg(long)]
    interval_count: Option<usize>,

    /// Width of one bucket in milliseconds
    #[arg(long)]
    interval_duration_ms: Option<u64>,

    /// Keep counts in a memory-mapped file across restarts
    #[arg(long)]
    persistent: Option<bool>,

    /// Backing file for persistent counts
    #[arg(long)]
    filename: Option<PathBuf>,

    /// Flush cadence of the backing file in milliseconds
    #[arg(long)]
    persist_duration_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Increase verbosity")]
    verbose: u8,

    #[arg(short, long, help = "Only log errors")]
    quiet: bool,
}

impl Cli {
    fn args(&self) -> CliArgs {
        CliArgs {
            config_file: self.config.clone(),
            host: self.host.clone(),
            port: self.port,
            interval_count: self.interval_count,
            interval_duration_ms: self.interval_duration_ms,
            persistent: self.persistent,
            filename: self.filename.clone(),
            persist_duration_ms: self.persist_duration_ms,
            log_level: self.log_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_with_cli(&cli.args()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let level = config.log_level()?;
    setup_logging(effective_level(level, cli.verbose, cli.quiet))?;

    request_counter::run(config).await
}
