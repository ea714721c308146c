//! emcast aggregator — entry point.
//!
//! ```text
//! emcast-aggregator                  Run with defaults
//! emcast-aggregator --config <path>  Load a custom config TOML
//! emcast-aggregator --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use emcast_aggregator::config::AggregatorConfig;
use emcast_aggregator::console::ConsoleCommand;
use emcast_aggregator::Aggregator;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "emcast-aggregator", about = "emcast session hub and stream relay")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "emcast-aggregator.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&AggregatorConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let config = AggregatorConfig::load(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("emcast-aggregator v{}", env!("CARGO_PKG_VERSION"));

    let mut aggregator = Aggregator::new(config);
    aggregator.start().await?;

    println!("type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received — shutting down");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match ConsoleCommand::parse(line) {
                        Ok(cmd) => {
                            if !aggregator.handle(cmd).await {
                                break;
                            }
                        }
                        Err(e) => println!("{e}"),
                    }
                }
                Ok(None) | Err(_) => break,
            },
        }
    }

    aggregator.shutdown().await;
    Ok(())
}
