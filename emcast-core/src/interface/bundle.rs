//! Per-peer session bundles: one messaging channel plus the data and
//! RC companion sockets, tagged by entity type.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::channel::MessageChannel;
use crate::entity::EntityKind;
use crate::error::EmcastError;
use crate::frame::{FrameShape, FrameStream};
use crate::relay::Relay;
use crate::state::BundlePhase;

/// Status payload an entity sends just before closing.
pub const OFFLINE_STATUS: &str = "offline";

/// Outcome of asking a remote entity to shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The entity confirmed with its `{type}-{id}:offline` status.
    Confirmed,
    /// Nothing came back within the wait.
    NoResponse,
    /// Something came back, but not the offline status.
    UnknownStatus(String),
}

/// The sockets and state shared by both bundle flavors.
pub struct BundleCore {
    id: String,
    channel: MessageChannel,
    data: Arc<TcpStream>,
    rc: Arc<TcpStream>,
    peer: IpAddr,
    phase: BundlePhase,
}

impl BundleCore {
    pub fn new(
        id: String,
        channel: MessageChannel,
        data: Arc<TcpStream>,
        rc: Arc<TcpStream>,
        peer: IpAddr,
        phase: BundlePhase,
    ) -> Self {
        Self {
            id,
            channel,
            data,
            rc,
            peer,
            phase,
        }
    }

    /// Ask the remote side to shut down and wait for its status.
    async fn remote_shutdown(
        &mut self,
        kind: EntityKind,
        wait: Duration,
    ) -> Result<ShutdownOutcome, EmcastError> {
        self.phase.begin_teardown();
        self.channel.send("shutdown").await?;
        let expected = format!("{kind}-{}:{OFFLINE_STATUS}", self.id);
        Ok(match self.channel.recv(wait).await {
            Some(status) if status == expected => ShutdownOutcome::Confirmed,
            Some(other) => ShutdownOutcome::UnknownStatus(other),
            None => ShutdownOutcome::NoResponse,
        })
    }

    /// Stop the messaging flows and mark the bundle closed.
    async fn teardown(&mut self) {
        if self.phase == BundlePhase::Closed {
            return;
        }
        self.phase.begin_teardown();
        self.channel.teardown().await;
        let _ = self.phase.close();
        debug!("bundle {} closed", self.id);
    }
}

// ── Emitter side ─────────────────────────────────────────────────

/// Aggregator-side handle for one connected emitter.
pub struct EmitterBundle {
    core: BundleCore,
    shape: FrameShape,
}

impl EmitterBundle {
    pub fn new(core: BundleCore, shape: FrameShape) -> Self {
        Self { core, shape }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn peer(&self) -> IpAddr {
        self.core.peer
    }

    pub fn shape(&self) -> &FrameShape {
        &self.shape
    }

    pub fn phase(&self) -> BundlePhase {
        self.core.phase
    }

    /// Shared handle on the data socket, for relays and watchers.
    pub fn data_socket(&self) -> Arc<TcpStream> {
        self.core.data.clone()
    }

    /// Shared handle on the RC socket, for relays.
    pub fn rc_socket(&self) -> Arc<TcpStream> {
        self.core.rc.clone()
    }

    /// A decoding reader over this emitter's data socket.
    pub fn frame_stream(&self) -> FrameStream {
        FrameStream::new(self.core.data.clone(), self.shape.clone())
    }

    /// Forward an arbitrary text payload over the messaging channel.
    pub async fn message(&self, text: &str) -> Result<(), EmcastError> {
        self.core.channel.send(text).await
    }

    /// Switch the remote stream on or off, tracking the phase.
    pub async fn set_streaming(&mut self, on: bool) -> Result<(), EmcastError> {
        if on {
            self.core.phase.stream_on()?;
            self.core.channel.send("stream on").await
        } else {
            self.core.phase.stream_off()?;
            self.core.channel.send("stream off").await
        }
    }

    /// Send `shutdown` and wait up to `wait` for the offline status.
    pub async fn remote_shutdown(&mut self, wait: Duration) -> Result<ShutdownOutcome, EmcastError> {
        self.core.remote_shutdown(EntityKind::Emitter, wait).await
    }

    pub async fn teardown(&mut self) {
        self.core.teardown().await;
    }
}

// ── Subscriber side ──────────────────────────────────────────────

/// Whether a subscriber's RC socket is spliced back to its emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RcMode {
    /// Relay subscriber RC bytes to the attached emitter.
    Active,
    /// Leave the RC socket idle.
    #[default]
    Passive,
}

struct Attachment {
    emitter_id: String,
    data_relay: Relay,
    rc_relay: Option<Relay>,
}

/// Aggregator-side handle for one connected subscriber.
pub struct SubscriberBundle {
    core: BundleCore,
    mode: RcMode,
    attached: Option<Attachment>,
}

impl SubscriberBundle {
    pub fn new(core: BundleCore) -> Self {
        Self {
            core,
            mode: RcMode::default(),
            attached: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.core.id
    }

    pub fn peer(&self) -> IpAddr {
        self.core.peer
    }

    pub fn phase(&self) -> BundlePhase {
        self.core.phase
    }

    pub fn rc_mode(&self) -> RcMode {
        self.mode
    }

    pub fn set_rc_mode(&mut self, mode: RcMode) {
        self.mode = mode;
    }

    /// The emitter this subscriber is spliced to, if any.
    pub fn attached_to(&self) -> Option<&str> {
        self.attached.as_ref().map(|a| a.emitter_id.as_str())
    }

    /// Forward an arbitrary text payload over the messaging channel.
    pub async fn message(&self, text: &str) -> Result<(), EmcastError> {
        self.core.channel.send(text).await
    }

    /// Pop one inbound payload from this subscriber.
    pub async fn recv(&mut self, timeout: Duration) -> Option<String> {
        self.core.channel.recv(timeout).await
    }

    /// Detach the inbound queue for a dispatcher task.
    pub fn take_inbox(&mut self) -> Option<tokio::sync::mpsc::Receiver<String>> {
        self.core.channel.take_inbox()
    }

    /// Splice this subscriber onto an emitter's stream.
    ///
    /// Tells the subscriber the emitter's frame shape, then starts the
    /// data relay (emitter to subscriber) and, in active RC mode, the
    /// reverse RC relay.
    pub async fn attach(&mut self, emitter: &EmitterBundle) -> Result<(), EmcastError> {
        if let Some(att) = &self.attached {
            return Err(EmcastError::AlreadyAttached {
                subscriber: self.core.id.clone(),
                emitter: att.emitter_id.clone(),
            });
        }

        self.core.channel.send(emitter.shape().to_string()).await?;

        let data_relay = Relay::start(
            format!("data {}->{}", emitter.id(), self.core.id),
            emitter.data_socket(),
            self.core.data.clone(),
        );
        let rc_relay = match self.mode {
            RcMode::Active => Some(Relay::start(
                format!("rc {}->{}", self.core.id, emitter.id()),
                self.core.rc.clone(),
                emitter.rc_socket(),
            )),
            RcMode::Passive => None,
        };

        info!(
            "subscriber-{} attached to emitter-{} ({:?} rc)",
            self.core.id,
            emitter.id(),
            self.mode
        );
        self.attached = Some(Attachment {
            emitter_id: emitter.id().to_string(),
            data_relay,
            rc_relay,
        });
        Ok(())
    }

    /// Stop the relays. Returns the id of the emitter detached from.
    pub async fn detach(&mut self) -> Result<String, EmcastError> {
        let att = self
            .attached
            .take()
            .ok_or_else(|| EmcastError::NotAttached(self.core.id.clone()))?;
        att.data_relay.stop().await;
        if let Some(rc) = att.rc_relay {
            rc.stop().await;
        }
        info!("subscriber-{} detached from emitter-{}", self.core.id, att.emitter_id);
        Ok(att.emitter_id)
    }

    /// Send `shutdown` and wait up to `wait` for the offline status.
    pub async fn remote_shutdown(&mut self, wait: Duration) -> Result<ShutdownOutcome, EmcastError> {
        self.core.remote_shutdown(EntityKind::Subscriber, wait).await
    }

    /// Detach if attached, then close the messaging channel.
    pub async fn teardown(&mut self) {
        if self.attached.is_some() {
            let _ = self.detach().await;
        }
        self.core.teardown().await;
    }
}

// ── Tagged union ─────────────────────────────────────────────────

/// A fully negotiated session, tagged by entity type.
pub enum Interface {
    Emitter(EmitterBundle),
    Subscriber(SubscriberBundle),
}

impl Interface {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Emitter(_) => EntityKind::Emitter,
            Self::Subscriber(_) => EntityKind::Subscriber,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Emitter(b) => b.id(),
            Self::Subscriber(b) => b.id(),
        }
    }

    pub fn peer(&self) -> IpAddr {
        match self {
            Self::Emitter(b) => b.peer(),
            Self::Subscriber(b) => b.peer(),
        }
    }
}
