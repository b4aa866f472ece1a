use anyhow::Result;
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Pick the effective level: `-q` wins, each `-v` raises the configured level
/// by one step.
pub fn effective_level(configured: Level, verbose: u8, quiet: bool) -> Level {
    if quiet {
        return Level::ERROR;
    }
    const ORDER: [Level; 5] = [
        Level::ERROR,
        Level::WARN,
        Level::INFO,
        Level::DEBUG,
        Level::TRACE,
    ];
    let base = ORDER.iter().position(|l| *l == configured).unwrap_or(2);
    ORDER[(base + verbose as usize).min(ORDER.len() - 1)]
}

/// Install the global fmt subscriber. `RUST_LOG` directives override `level`.
pub fn setup_logging(level: Level) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
