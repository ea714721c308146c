//! The aggregator service: listeners, registry and console handling.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use emcast_core::{EmcastError, ProbeFilter, Prober, Registry};

use crate::config::AggregatorConfig;
use crate::console::{ConsoleCommand, HELP_TEXT};
use crate::listener::{ListenerSet, accept_loop};

/// The aggregator: owns the registry and the accept loop.
///
/// Construction builds state only; [`start`](Aggregator::start) binds
/// the sockets and spawns the loop.
pub struct Aggregator {
    config: AggregatorConfig,
    registry: Arc<Mutex<Registry>>,
    cancel: CancellationToken,
    accept_task: Option<JoinHandle<()>>,
    prober: Prober,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        let prober = Prober::with_port(config.network.probe_port);
        Self {
            config,
            registry: Arc::new(Mutex::new(Registry::new())),
            cancel: CancellationToken::new(),
            accept_task: None,
            prober,
        }
    }

    pub fn registry(&self) -> Arc<Mutex<Registry>> {
        self.registry.clone()
    }

    /// Bind the three listeners and spawn the accept loop.
    pub async fn start(&mut self) -> Result<(), EmcastError> {
        let listeners = ListenerSet::bind(&self.config.network).await?;
        info!(
            "listening on {} (messaging {}, stream {}, rc {})",
            self.config.network.bind_ip,
            self.config.network.message_port,
            self.config.network.stream_port,
            self.config.network.rc_port,
        );
        self.accept_task = Some(tokio::spawn(accept_loop(
            listeners,
            self.registry.clone(),
            self.cancel.clone(),
        )));
        Ok(())
    }

    fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.config.shutdown.wait_ms)
    }

    /// Execute one console command. Returns `false` on shutdown.
    pub async fn handle(&mut self, cmd: ConsoleCommand) -> bool {
        match cmd {
            ConsoleCommand::Help => println!("{HELP_TEXT}"),
            ConsoleCommand::Status => self.print_status().await,
            ConsoleCommand::Emitters => {
                let ids = self.registry.lock().await.emitter_ids();
                if ids.is_empty() {
                    println!("no live emitters");
                } else {
                    println!("{}", ids.join(", "));
                }
            }
            ConsoleCommand::Probe(expr) => {
                match self.prober.sweep(&expr, ProbeFilter::Any).await {
                    Ok(found) => {
                        let online: Vec<_> = found.into_iter().filter(|r| r.is_online()).collect();
                        if online.is_empty() {
                            println!("nothing answered");
                        }
                        for report in online {
                            println!("{report}");
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
            ConsoleCommand::Sweep(expr) => {
                match self.prober.sweep(&expr, ProbeFilter::Any).await {
                    Ok(found) => {
                        println!("{:<17} {:<17} status", "address", "identity");
                        for report in &found {
                            let (identity, status) = match &report.tag {
                                Some(tag) => (tag.to_string(), "online"),
                                None => ("-".to_string(), "offline"),
                            };
                            println!("{:<17} {identity:<17} {status}", report.ip.to_string());
                        }
                    }
                    Err(e) => println!("{e}"),
                }
            }
            ConsoleCommand::Connect(ip) => match ip.parse() {
                Ok(ip) => match self.prober.initiate(ip).await {
                    Ok(report) => match report.tag {
                        Some(tag) => println!("asked {tag} @ {ip} to join"),
                        None => println!("{ip} did not answer"),
                    },
                    Err(e) => println!("{e}"),
                },
                Err(_) => println!("not an IP address: {ip}"),
            },
            ConsoleCommand::Watch(id) => {
                match self.registry.lock().await.watch(&id).await {
                    Ok(()) => println!("watching emitter-{id}"),
                    Err(e) => println!("{e}"),
                }
            }
            ConsoleCommand::Unwatch(id) => {
                match self.registry.lock().await.unwatch(&id).await {
                    Ok(frames) => println!("emitter-{id}: {frames} frames seen"),
                    Err(e) => println!("{e}"),
                }
            }
            ConsoleCommand::Message { kind, id, text } => {
                match self.registry.lock().await.message(kind, &id, &text).await {
                    Ok(()) => {}
                    Err(e) => println!("{e}"),
                }
            }
            ConsoleCommand::Kill(id) => {
                let wait = self.shutdown_wait();
                match self.registry.lock().await.kill_emitter(&id, wait).await {
                    Ok(true) => println!("emitter-{id} confirmed and closed"),
                    Ok(false) => println!("emitter-{id} dropped without confirmation"),
                    Err(e) => println!("{e}"),
                }
            }
            ConsoleCommand::Shutdown => return false,
        }
        true
    }

    async fn print_status(&self) {
        let registry = self.registry.lock().await;
        let emitters = registry.emitter_ids();
        let subscribers = registry.subscriber_ids();
        println!("emitters: {}", emitters.len());
        for id in &emitters {
            if let Some(bundle) = registry.emitter(id) {
                let watched = if registry.is_watching(id) { ", watched" } else { "" };
                println!(
                    "  emitter-{id} @ {}  shape {}  {}{watched}",
                    bundle.peer(),
                    bundle.shape(),
                    bundle.phase(),
                );
            }
        }
        println!("subscribers: {}", subscribers.len());
        for id in &subscribers {
            if let Some(bundle) = registry.subscriber(id) {
                let attached = match bundle.attached_to() {
                    Some(eid) => format!("attached to emitter-{eid}"),
                    None => "unattached".into(),
                };
                println!(
                    "  subscriber-{id} @ {}  {}  {attached} ({:?} rc)",
                    bundle.peer(),
                    bundle.phase(),
                    bundle.rc_mode(),
                );
            }
        }
    }

    /// Stop accepting, then sweep every live session.
    pub async fn shutdown(&mut self) {
        info!("shutting down");
        self.cancel.cancel();
        if let Some(task) = self.accept_task.take() {
            let _ = task.await;
        }
        let wait = self.shutdown_wait();
        let report = self.registry.lock().await.shutdown_sweep(wait).await;
        for line in report {
            println!("{line}");
        }
        info!("shutdown complete");
    }
}
