//! emcast emitter — entry point.
//!
//! ```text
//! emcast-emitter                  Idle until an aggregator probes us
//! emcast-emitter --config <path>  Load a custom config TOML
//! emcast-emitter --id <id>        Override the configured id
//! emcast-emitter --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use emcast_core::FrameShape;
use emcast_emitter::capture::NoiseSource;
use emcast_emitter::config::EmitterConfig;
use emcast_emitter::entity::EmitterEntity;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "emcast-emitter", about = "emcast frame emitter")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "emcast-emitter.toml")]
    config: PathBuf,

    /// Override the configured emitter id.
    #[arg(long)]
    id: Option<String>,

    /// Override the configured aggregator address.
    #[arg(long)]
    aggregator: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&EmitterConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = EmitterConfig::load(&cli.config);
    if let Some(id) = cli.id {
        config.identity.id = id;
    }
    if let Some(aggregator) = cli.aggregator {
        config.network.aggregator_ip = aggregator;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("emcast-emitter v{}", env!("CARGO_PKG_VERSION"));
    info!("id: {}", config.identity.id);
    info!("shape: {}", config.capture.shape);

    let shape = FrameShape::parse(&config.capture.shape)?;
    let source = NoiseSource::new(shape);
    let mut entity = EmitterEntity::new(config, Box::new(source));

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Ctrl-C received — shutting down");
        token.cancel();
    });

    entity.run(&cancel).await?;
    Ok(())
}
