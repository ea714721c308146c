//! Accept loop: turn incoming connections into registered sessions.
//!
//! One task accepts on the messaging port and runs the three-socket
//! handshake for each connection. Subscribers additionally get a
//! dispatcher task that serves their control commands for as long as
//! the session lives.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use emcast_core::interface::OFFLINE_STATUS;
use emcast_core::{ControlCommand, EntityKind, Interface, InterfaceFactory, Registry};

use crate::config::NetworkConfig;

/// The three aggregator-side listening sockets.
pub struct ListenerSet {
    pub messaging: TcpListener,
    pub data: TcpListener,
    pub rc: TcpListener,
}

impl ListenerSet {
    pub async fn bind(cfg: &NetworkConfig) -> std::io::Result<Self> {
        let ip: std::net::IpAddr = cfg
            .bind_ip
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        Ok(Self {
            messaging: TcpListener::bind((ip, cfg.message_port)).await?,
            data: TcpListener::bind((ip, cfg.stream_port)).await?,
            rc: TcpListener::bind((ip, cfg.rc_port)).await?,
        })
    }
}

/// Accept and negotiate sessions until `cancel` fires.
pub async fn accept_loop(
    listeners: ListenerSet,
    registry: Arc<Mutex<Registry>>,
    cancel: CancellationToken,
) {
    let factory = InterfaceFactory::new();
    info!(
        "accepting on {}",
        listeners
            .messaging
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into())
    );

    loop {
        let stream = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listeners.messaging.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("incoming connection from {peer}");
                    stream
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            },
        };

        let interface = tokio::select! {
            _ = cancel.cancelled() => break,
            result = factory.negotiate(stream, &listeners.data, &listeners.rc) => match result {
                Ok(Some(interface)) => interface,
                Ok(None) => continue,
                Err(e) => {
                    warn!("handshake failed: {e}");
                    continue;
                }
            },
        };

        register(interface, &registry, &cancel).await;
    }
    info!("accept loop exiting");
}

async fn register(
    mut interface: Interface,
    registry: &Arc<Mutex<Registry>>,
    cancel: &CancellationToken,
) {
    // Subscribers drive the aggregator over their own channel; hand
    // their inbound queue to a dispatcher before registering.
    let dispatcher_input = match &mut interface {
        Interface::Subscriber(bundle) => bundle.take_inbox().map(|rx| (bundle.id().to_string(), rx)),
        Interface::Emitter(_) => None,
    };

    let id = interface.id().to_string();
    let kind = interface.kind();
    if let Err(e) = registry.lock().await.register(interface) {
        warn!("rejecting {kind}-{id}: {e}");
        return;
    }

    if let Some((id, rx)) = dispatcher_input {
        tokio::spawn(dispatch_subscriber(
            id,
            rx,
            registry.clone(),
            cancel.clone(),
        ));
    }
}

/// Serve one subscriber's control commands.
///
/// Incoming payloads carry the subscriber's own tag prefix; it is
/// stripped before parsing. The loop ends when the subscriber reports
/// offline, its channel dies, or the aggregator shuts down.
async fn dispatch_subscriber(
    id: String,
    mut rx: mpsc::Receiver<String>,
    registry: Arc<Mutex<Registry>>,
    cancel: CancellationToken,
) {
    let prefix = format!("subscriber-{id}:");
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };
        let line = line.strip_prefix(&prefix).unwrap_or(&line);

        if line == OFFLINE_STATUS {
            info!("subscriber-{id} went offline");
            let mut registry = registry.lock().await;
            if let Some(bundle) = registry.subscriber_mut(&id) {
                bundle.teardown().await;
            }
            registry.remove_subscriber(&id);
            break;
        }

        match ControlCommand::parse(line) {
            Ok(ControlCommand::Emitters) => {
                let registry = registry.lock().await;
                let listing = registry.emitter_ids().join(",");
                if let Err(e) = registry
                    .message(EntityKind::Subscriber, &id, &format!("emitters:{listing}"))
                    .await
                {
                    warn!("subscriber-{id}: listing reply failed: {e}");
                }
            }
            Ok(ControlCommand::Attach(emitter_id)) => {
                let mut registry = registry.lock().await;
                if let Err(e) = registry.attach_subscriber(&id, &emitter_id).await {
                    warn!("subscriber-{id}: attach {emitter_id} failed: {e}");
                    let _ = registry
                        .message(EntityKind::Subscriber, &id, &format!("error:{e}"))
                        .await;
                }
            }
            Ok(ControlCommand::Detach) => {
                let mut registry = registry.lock().await;
                if let Err(e) = registry.detach_subscriber(&id).await {
                    warn!("subscriber-{id}: detach failed: {e}");
                }
            }
            Ok(other) => {
                warn!("subscriber-{id}: unsupported command {other:?}");
            }
            Err(e) => {
                warn!("subscriber-{id}: {e}");
            }
        }
    }
    debug!("dispatcher for subscriber-{id} exiting");
}
