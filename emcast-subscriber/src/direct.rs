//! Direct peer connection: the subscriber plays the accepting side of
//! the handshake toward a single emitter, no aggregator in between.
//!
//! Sequence: sweep the configured expression for an idle emitter, ask
//! it to connect, accept its three sockets on one-time listeners and
//! negotiate the emitter interface. From there streaming and RC work
//! exactly as they do on an aggregator.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use emcast_core::{
    EmcastError, EmitterBundle, EntityKind, Interface, InterfaceFactory, ProbeFilter, ProbeReport,
    Prober, ShutdownOutcome, net,
};

use crate::config::SubscriberConfig;

/// Probe sweeps before giving up on finding an emitter.
const PROBE_RETRIES: u32 = 3;

/// How long to wait for the emitter to dial back after `connect`.
const DIAL_BACK_TIMEOUT: Duration = Duration::from_secs(5);

struct Listeners {
    messaging: TcpListener,
    data: TcpListener,
    rc: TcpListener,
}

/// A frame-counting consumer on the emitter's data socket.
struct Display {
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
    frames: Arc<AtomicU64>,
}

impl Display {
    fn start(bundle: &EmitterBundle) -> Self {
        let cancel = CancellationToken::new();
        let frames = Arc::new(AtomicU64::new(0));
        let mut stream = bundle.frame_stream();

        let token = cancel.clone();
        let counter = frames.clone();
        let worker = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    batch = stream.next_batch() => match batch {
                        Ok(batch) => {
                            counter.fetch_add(batch.len() as u64, Ordering::Relaxed);
                        }
                        Err(e) => {
                            debug!("display ended: {e}");
                            break;
                        }
                    },
                }
            }
        });

        Self {
            cancel,
            worker: Some(worker),
            frames,
        }
    }

    async fn stop(mut self) -> u64 {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        self.frames.load(Ordering::Relaxed)
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One direct subscriber-to-emitter session.
pub struct DirectConnection {
    config: SubscriberConfig,
    prober: Prober,
    listeners: Option<Listeners>,
    bundle: Option<EmitterBundle>,
    display: Option<Display>,
}

impl DirectConnection {
    pub fn new(config: SubscriberConfig) -> Self {
        let prober = Prober::with_port(config.network.probe_port);
        Self {
            config,
            prober,
            listeners: None,
            bundle: None,
            display: None,
        }
    }

    /// Bind the one-time listeners the emitter will dial back on.
    pub async fn bind(&mut self) -> Result<(), EmcastError> {
        let ip: IpAddr =
            self.config
                .network
                .bind_ip
                .parse()
                .map_err(|_| EmcastError::InvalidIpExpression {
                    expr: self.config.network.bind_ip.clone(),
                    reason: "not an address",
                })?;
        self.listeners = Some(Listeners {
            messaging: TcpListener::bind((ip, self.config.network.message_port)).await?,
            data: TcpListener::bind((ip, self.config.network.stream_port)).await?,
            rc: TcpListener::bind((ip, self.config.network.rc_port)).await?,
        });
        Ok(())
    }

    /// Bound (messaging, data, rc) ports, for configs that bind 0.
    pub fn local_ports(&self) -> Result<(u16, u16, u16), EmcastError> {
        let listeners = self.listeners.as_ref().ok_or(EmcastError::ChannelClosed)?;
        Ok((
            listeners.messaging.local_addr()?.port(),
            listeners.data.local_addr()?.port(),
            listeners.rc.local_addr()?.port(),
        ))
    }

    /// Find an emitter, ask it to connect and negotiate its session.
    ///
    /// `Ok(false)` means no emitter was found or none dialed back in
    /// time; the caller may retry.
    pub async fn establish(&mut self) -> Result<bool, EmcastError> {
        if self.listeners.is_none() {
            self.bind().await?;
        }

        let mut target = None;
        for attempt in 1..=PROBE_RETRIES {
            let found = self
                .prober
                .sweep(
                    &self.config.network.emitter_expr,
                    ProbeFilter::Only(EntityKind::Emitter),
                )
                .await?;
            match found.into_iter().find(ProbeReport::is_online) {
                Some(report) => {
                    target = Some(report);
                    break;
                }
                None => info!(
                    "probe sweep {attempt}/{PROBE_RETRIES}: no emitter on {}",
                    self.config.network.emitter_expr
                ),
            }
        }
        let Some(report) = target else {
            return Ok(false);
        };
        info!("found {report}");

        if !self.prober.initiate(report.ip).await?.is_online() {
            warn!("{} stopped answering", report.ip);
            return Ok(false);
        }

        // One-time accept; the listeners are dropped after negotiation.
        let listeners = self.listeners.take().ok_or(EmcastError::ChannelClosed)?;
        let accepted = timeout(DIAL_BACK_TIMEOUT, listeners.messaging.accept()).await;
        let (stream, peer) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!("emitter did not dial back within {DIAL_BACK_TIMEOUT:?}");
                return Ok(false);
            }
        };
        debug!("dial-back from {peer}");

        let interface = InterfaceFactory::new()
            .negotiate(stream, &listeners.data, &listeners.rc)
            .await?;
        match interface {
            Some(Interface::Emitter(bundle)) => {
                info!(
                    "direct session with emitter-{} (shape {})",
                    bundle.id(),
                    bundle.shape()
                );
                self.bundle = Some(bundle);
                Ok(true)
            }
            Some(Interface::Subscriber(mut bundle)) => {
                bundle.teardown().await;
                Err(EmcastError::Handshake(
                    "peer introduced itself as a subscriber".into(),
                ))
            }
            None => Ok(false),
        }
    }

    pub fn emitter_id(&self) -> Option<&str> {
        self.bundle.as_ref().map(|b| b.id())
    }

    /// Switch the stream on and start counting frames.
    pub async fn start_stream(&mut self) -> Result<(), EmcastError> {
        let bundle = self.bundle.as_mut().ok_or(EmcastError::ChannelClosed)?;
        if self.display.is_some() {
            return Err(EmcastError::AlreadyWatching(bundle.id().to_string()));
        }
        bundle.set_streaming(true).await?;
        self.display = Some(Display::start(bundle));
        Ok(())
    }

    /// Switch the stream off; report how many frames arrived.
    pub async fn stop_stream(&mut self) -> Result<u64, EmcastError> {
        let bundle = self.bundle.as_mut().ok_or(EmcastError::ChannelClosed)?;
        let display = self
            .display
            .take()
            .ok_or_else(|| EmcastError::InvalidCommand("stream is not on".into()))?;
        let frames = display.stop().await;
        bundle.set_streaming(false).await?;
        info!("stream off after {frames} frames");
        Ok(frames)
    }

    /// Write raw remote-control bytes to the emitter.
    pub async fn rc_command(&self, bytes: &[u8]) -> Result<(), EmcastError> {
        let bundle = self.bundle.as_ref().ok_or(EmcastError::ChannelClosed)?;
        net::write_all(&bundle.rc_socket(), bytes).await?;
        Ok(())
    }

    /// Shared handle on the emitter's RC socket, for long-lived
    /// writer tasks.
    pub fn rc_handle(&self) -> Result<Arc<TcpStream>, EmcastError> {
        Ok(self
            .bundle
            .as_ref()
            .ok_or(EmcastError::ChannelClosed)?
            .rc_socket())
    }

    /// Ask the emitter to shut down, then close everything local.
    pub async fn teardown(&mut self, wait: Duration) -> Option<ShutdownOutcome> {
        if self.display.is_some() {
            let _ = self.stop_stream().await;
        }
        let mut bundle = self.bundle.take()?;
        let outcome = match bundle.remote_shutdown(wait).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("shutdown request failed: {e}");
                ShutdownOutcome::NoResponse
            }
        };
        bundle.teardown().await;
        Some(outcome)
    }
}
