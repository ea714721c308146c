//! Introduction grammar and the three-socket handshake.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::MessageChannel;
use crate::entity::EntityKind;
use crate::error::EmcastError;
use crate::frame::FrameShape;
use crate::interface::bundle::{BundleCore, EmitterBundle, Interface, SubscriberBundle};
use crate::state::BundlePhase;

/// Separator between the identity and the greeting in an introduction.
pub const SEPARATOR: &str = ":HELLO;";

/// Acknowledgement payload sent back after a valid introduction.
pub const ACK: &str = "HELLO";

/// A parsed introduction payload, `{type}-{id}:HELLO;{shape?}`.
///
/// Emitters must announce their frame shape; anything a subscriber
/// puts after the greeting is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Introduction {
    Emitter { id: String, shape: FrameShape },
    Subscriber { id: String },
}

impl Introduction {
    pub fn parse(line: &str) -> Result<Self, EmcastError> {
        let bad = |why: &str| EmcastError::InvalidIntroduction(format!("{why}: {line:?}"));

        let (identity, rest) = line
            .split_once(SEPARATOR)
            .ok_or_else(|| bad("missing separator"))?;
        let (kind, id) = identity
            .split_once('-')
            .ok_or_else(|| bad("missing type-id dash"))?;
        if id.is_empty() {
            return Err(bad("empty id"));
        }

        match kind.parse::<EntityKind>()? {
            EntityKind::Emitter => {
                if rest.is_empty() {
                    return Err(bad("emitter without a frame shape"));
                }
                Ok(Self::Emitter {
                    id: id.to_string(),
                    shape: FrameShape::parse(rest)?,
                })
            }
            EntityKind::Subscriber => Ok(Self::Subscriber { id: id.to_string() }),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Emitter { id, .. } | Self::Subscriber { id } => id,
        }
    }
}

/// Builds validated interfaces out of freshly accepted sockets.
#[derive(Debug, Clone)]
pub struct InterfaceFactory {
    recv_retries: u32,
    recv_timeout: Duration,
    companion_timeout: Duration,
}

impl Default for InterfaceFactory {
    fn default() -> Self {
        Self {
            recv_retries: 10,
            recv_timeout: Duration::from_millis(500),
            companion_timeout: Duration::from_secs(3),
        }
    }
}

impl InterfaceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the full handshake for one accepted messaging socket.
    ///
    /// `Ok(None)` means the peer went quiet (no introduction, or no
    /// companion sockets in time) and was dropped without prejudice.
    /// Malformed introductions and companion sockets arriving from a
    /// different host are hard errors.
    pub async fn negotiate(
        &self,
        stream: TcpStream,
        data_listener: &TcpListener,
        rc_listener: &TcpListener,
    ) -> Result<Option<Interface>, EmcastError> {
        let peer = stream.peer_addr()?;
        let mut channel = MessageChannel::new(stream, Vec::new())?;
        channel.start();

        let mut line = None;
        for _ in 0..self.recv_retries {
            if let Some(got) = channel.recv(self.recv_timeout).await {
                line = Some(got);
                break;
            }
            if !channel.is_running() {
                break;
            }
        }
        let Some(line) = line else {
            debug!("{peer}: no introduction, dropping");
            channel.teardown().await;
            return Ok(None);
        };

        // Ack as soon as the separator checks out; grammar errors
        // past this point still abort the handshake.
        if !line.contains(SEPARATOR) {
            channel.teardown().await;
            return Err(EmcastError::InvalidIntroduction(format!(
                "missing separator: {line:?}"
            )));
        }
        channel.send(ACK).await?;
        let intro = match Introduction::parse(&line) {
            Ok(intro) => intro,
            Err(e) => {
                channel.teardown().await;
                return Err(e);
            }
        };

        let data = match self.companion(data_listener, peer.ip(), "data").await {
            Ok(Some(sock)) => sock,
            Ok(None) => {
                channel.teardown().await;
                return Ok(None);
            }
            Err(e) => {
                channel.teardown().await;
                return Err(e);
            }
        };
        let rc = match self.companion(rc_listener, peer.ip(), "rc").await {
            Ok(Some(sock)) => sock,
            Ok(None) => {
                channel.teardown().await;
                return Ok(None);
            }
            Err(e) => {
                channel.teardown().await;
                return Err(e);
            }
        };

        let mut phase = BundlePhase::default();
        phase.establish()?;
        let core = BundleCore::new(
            intro.id().to_string(),
            channel,
            Arc::new(data),
            Arc::new(rc),
            peer.ip(),
            phase,
        );

        let interface = match intro {
            Introduction::Emitter { id, shape } => {
                info!("emitter-{id} established from {peer} with shape {shape}");
                Interface::Emitter(EmitterBundle::new(core, shape))
            }
            Introduction::Subscriber { id } => {
                info!("subscriber-{id} established from {peer}");
                Interface::Subscriber(SubscriberBundle::new(core))
            }
        };
        Ok(Some(interface))
    }

    /// Accept one companion socket and check its origin host.
    async fn companion(
        &self,
        listener: &TcpListener,
        expected: IpAddr,
        channel: &'static str,
    ) -> Result<Option<TcpStream>, EmcastError> {
        let accepted = timeout(self.companion_timeout, listener.accept()).await;
        let (sock, peer) = match accepted {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!("no {channel} socket within {:?}", self.companion_timeout);
                return Ok(None);
            }
        };
        if peer.ip() != expected {
            return Err(EmcastError::AddressMismatch {
                expected,
                got: peer.ip(),
                channel,
            });
        }
        Ok(Some(sock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitter_introduction() {
        let intro = Introduction::parse("emitter-7:HELLO;480x640x3").unwrap();
        assert_eq!(
            intro,
            Introduction::Emitter {
                id: "7".into(),
                shape: FrameShape::parse("480x640x3").unwrap(),
            }
        );
        assert_eq!(intro.id(), "7");
    }

    #[test]
    fn subscriber_introduction() {
        let intro = Introduction::parse("subscriber-s1:HELLO;").unwrap();
        assert_eq!(intro, Introduction::Subscriber { id: "s1".into() });
    }

    #[test]
    fn subscriber_trailing_content_ignored() {
        let intro = Introduction::parse("subscriber-s1:HELLO;whatever").unwrap();
        assert_eq!(intro, Introduction::Subscriber { id: "s1".into() });
    }

    #[test]
    fn emitter_without_shape_rejected() {
        assert!(matches!(
            Introduction::parse("emitter-7:HELLO;"),
            Err(EmcastError::InvalidIntroduction(_))
        ));
    }

    #[test]
    fn malformed_introductions_rejected() {
        assert!(matches!(
            Introduction::parse("emitter-7"),
            Err(EmcastError::InvalidIntroduction(_))
        ));
        assert!(matches!(
            Introduction::parse("emitter7:HELLO;4x6"),
            Err(EmcastError::InvalidIntroduction(_))
        ));
        assert!(matches!(
            Introduction::parse("router-7:HELLO;4x6"),
            Err(EmcastError::UnknownEntity(_))
        ));
        assert!(matches!(
            Introduction::parse("emitter-:HELLO;4x6"),
            Err(EmcastError::InvalidIntroduction(_))
        ));
        assert!(matches!(
            Introduction::parse("emitter-7:HELLO;4x"),
            Err(EmcastError::InvalidFrameShape(_))
        ));
    }
}
