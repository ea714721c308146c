//! The emitter session: discovery, handshake, command loop, teardown.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use emcast_core::interface::{ACK, OFFLINE_STATUS};
use emcast_core::{
    ControlCommand, EmcastError, EntityKind, MessageChannel, ProbeResponder,
};

use crate::capture::CaptureSource;
use crate::config::EmitterConfig;
use crate::rc::RcReceiver;
use crate::streamer::Streamer;

/// How many times to wait for the handshake ack before giving up.
const ACK_RETRIES: u32 = 5;
const ACK_WAIT: Duration = Duration::from_secs(1);

/// Poll cadence of the command loop.
const COMMAND_POLL: Duration = Duration::from_millis(500);

/// One emitter: a capture source bound to an aggregator session.
pub struct EmitterEntity {
    id: String,
    config: EmitterConfig,
    streamer: Streamer,
    channel: Option<MessageChannel>,
    rc: Option<RcReceiver>,
}

impl EmitterEntity {
    pub fn new(config: EmitterConfig, source: Box<dyn CaptureSource>) -> Self {
        Self {
            id: config.identity.id.clone(),
            config,
            streamer: Streamer::new(source),
            channel: None,
            rc: None,
        }
    }

    /// Full session: find an aggregator, serve it, go offline.
    ///
    /// With no configured aggregator address the emitter idles behind
    /// a probe responder until one asks it to connect. Cancelling
    /// while idle returns cleanly without a session.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), EmcastError> {
        let ip = match self.aggregator_ip(cancel).await? {
            Some(ip) => ip,
            None => return Ok(()),
        };
        self.connect(ip).await?;
        self.command_loop(cancel).await;
        self.shutdown().await;
        Ok(())
    }

    async fn aggregator_ip(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<IpAddr>, EmcastError> {
        let expr = &self.config.network.aggregator_ip;
        if !expr.is_empty() {
            return expr
                .parse()
                .map(Some)
                .map_err(|_| EmcastError::InvalidIpExpression {
                    expr: expr.clone(),
                    reason: "not an address",
                });
        }
        let bind: IpAddr = self.config.network.bind_ip.parse().map_err(|_| {
            EmcastError::InvalidIpExpression {
                expr: self.config.network.bind_ip.clone(),
                reason: "not an address",
            }
        })?;
        let responder = ProbeResponder::bind(
            bind,
            self.config.network.probe_port,
            EntityKind::Emitter,
            &self.id,
        )
        .await?;
        info!("idling as {}", responder.tag());
        responder.run(cancel).await
    }

    /// Handshake with the aggregator and connect companion sockets.
    pub async fn connect(&mut self, ip: IpAddr) -> Result<(), EmcastError> {
        let net = &self.config.network;
        let tag = format!("emitter-{}:", self.id);
        let mut channel = MessageChannel::connect(ip, net.message_port, tag.into_bytes()).await?;
        channel.start();
        channel
            .send(format!("HELLO;{}", self.streamer.shape()))
            .await?;

        let mut acked = false;
        for _ in 0..ACK_RETRIES {
            match channel.recv(ACK_WAIT).await {
                Some(reply) if reply == ACK => {
                    acked = true;
                    break;
                }
                Some(reply) => {
                    channel.teardown().await;
                    return Err(EmcastError::Handshake(format!("unexpected ack: {reply}")));
                }
                None => {}
            }
        }
        if !acked {
            channel.teardown().await;
            return Err(EmcastError::Handshake("no ack from aggregator".into()));
        }

        let data = TcpStream::connect((ip, net.stream_port)).await?;
        self.streamer.attach(Arc::new(data));
        let rc = TcpStream::connect((ip, net.rc_port)).await?;
        self.rc = Some(RcReceiver::start(Arc::new(rc)));

        info!("emitter-{} connected to {ip}", self.id);
        self.channel = Some(channel);
        Ok(())
    }

    /// Serve aggregator commands until shutdown, cancel or a dead
    /// channel.
    pub async fn command_loop(&mut self, cancel: &CancellationToken) {
        loop {
            let Some(channel) = self.channel.as_mut() else {
                break;
            };
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = channel.recv(COMMAND_POLL) => line,
            };
            let Some(line) = line else {
                if !channel.is_running() {
                    warn!("messaging channel died");
                    break;
                }
                continue;
            };

            match ControlCommand::parse(&line) {
                Ok(ControlCommand::Stream { on: true }) => {
                    if let Err(e) = self.streamer.start() {
                        warn!("cannot start streaming: {e}");
                    }
                }
                Ok(ControlCommand::Stream { on: false }) => self.streamer.stop().await,
                Ok(ControlCommand::Shutdown) => {
                    info!("shutdown requested by aggregator");
                    break;
                }
                Ok(other) => warn!("unsupported command for an emitter: {other:?}"),
                Err(e) => warn!("{e}"),
            }
        }
    }

    /// Stop every flow, report offline, release the sockets.
    pub async fn shutdown(&mut self) {
        if let Some(rc) = self.rc.take() {
            rc.stop().await;
        }
        self.streamer.teardown().await;
        if let Some(mut channel) = self.channel.take() {
            let _ = channel.send(OFFLINE_STATUS).await;
            // Teardown flushes the offline status before closing.
            channel.teardown().await;
        }
        info!("emitter-{} offline", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NoiseSource;
    use emcast_core::{FrameShape, Interface, InterfaceFactory, ShutdownOutcome};
    use tokio::net::TcpListener;

    async fn aggregator_side() -> (TcpListener, TcpListener, TcpListener, EmitterConfig) {
        let messaging = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let data = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rc = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let mut config = EmitterConfig::default();
        config.identity.id = "t1".into();
        config.network.aggregator_ip = "127.0.0.1".into();
        config.network.message_port = messaging.local_addr().unwrap().port();
        config.network.stream_port = data.local_addr().unwrap().port();
        config.network.rc_port = rc.local_addr().unwrap().port();
        (messaging, data, rc, config)
    }

    #[tokio::test]
    async fn full_session_streams_and_confirms_shutdown() {
        let (messaging, data, rc, config) = aggregator_side().await;

        let shape = FrameShape::parse("2x3x3").unwrap();
        let source = NoiseSource::new(shape.clone());
        let mut entity = EmitterEntity::new(config, Box::new(source));
        let cancel = CancellationToken::new();
        let entity_task = tokio::spawn(async move {
            entity.run(&cancel).await.unwrap();
        });

        let (stream, _) = messaging.accept().await.unwrap();
        let interface = InterfaceFactory::new()
            .negotiate(stream, &data, &rc)
            .await
            .unwrap()
            .expect("emitter should introduce itself");
        let mut bundle = match interface {
            Interface::Emitter(bundle) => bundle,
            Interface::Subscriber(_) => panic!("expected an emitter"),
        };
        assert_eq!(bundle.id(), "t1");
        assert_eq!(bundle.shape(), &shape);

        // Stream on, expect decodable frames.
        bundle.set_streaming(true).await.unwrap();
        let mut frames = bundle.frame_stream();
        let batch = frames.next_batch().await.unwrap();
        assert!(!batch.is_empty());
        assert_eq!(batch[0].len(), shape.volume());
        bundle.set_streaming(false).await.unwrap();

        // Shutdown confirms with the offline status.
        let outcome = bundle.remote_shutdown(Duration::from_secs(3)).await.unwrap();
        assert_eq!(outcome, ShutdownOutcome::Confirmed);
        bundle.teardown().await;
        entity_task.await.unwrap();
    }
}
