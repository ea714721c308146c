//! emcast subscriber — entry point.
//!
//! ```text
//! emcast-subscriber                  Probe, connect, stream until Ctrl-C
//! emcast-subscriber --config <path>  Load a custom config TOML
//! emcast-subscriber --emitter <expr> Override the probe expression
//! emcast-subscriber --rc-test        Also push random RC tokens
//! emcast-subscriber --gen-config     Write default config to stdout
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use emcast_subscriber::DirectConnection;
use emcast_subscriber::config::SubscriberConfig;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "emcast-subscriber", about = "emcast direct stream subscriber")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "emcast-subscriber.toml")]
    config: PathBuf,

    /// Override the configured emitter probe expression.
    #[arg(long)]
    emitter: Option<String>,

    /// Push random remote-control tokens while streaming.
    #[arg(long)]
    rc_test: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

/// Tokens the RC test cycles through, gimbal-style.
const RC_TOKENS: [&str; 4] = [">", "<", "A", "V"];

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        let text = toml::to_string_pretty(&SubscriberConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    let mut config = SubscriberConfig::load(&cli.config);
    if let Some(expr) = cli.emitter {
        config.network.emitter_expr = expr;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("emcast-subscriber v{}", env!("CARGO_PKG_VERSION"));
    info!("probing {}", config.network.emitter_expr);

    let mut direct = DirectConnection::new(config);
    if !direct.establish().await? {
        warn!("no emitter found; giving up");
        return Ok(());
    }

    direct.start_stream().await?;

    // Optional RC exerciser: push one random token every 200ms.
    let rc_cancel = CancellationToken::new();
    if cli.rc_test {
        let token = rc_cancel.clone();
        let rc_sock = direct.rc_handle()?;
        tokio::spawn(async move {
            let mut pace = tokio::time::interval(Duration::from_millis(200));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = pace.tick() => {}
                }
                let pick = rand::thread_rng().gen_range(0..RC_TOKENS.len());
                let payload = format!("{};", RC_TOKENS[pick]);
                if let Err(e) = emcast_core::net::write_all(&rc_sock, payload.as_bytes()).await {
                    warn!("rc test ended: {e}");
                    break;
                }
            }
        });
    }

    tokio::signal::ctrl_c().await.ok();
    info!("Ctrl-C received — shutting down");
    rc_cancel.cancel();

    match direct.teardown(Duration::from_secs(2)).await {
        Some(outcome) => info!("emitter shutdown: {outcome:?}"),
        None => info!("no session to tear down"),
    }
    Ok(())
}
