//! Passive-side discovery: answer probes with our tag and wait for a
//! `connect` request telling us who to dial back.

use std::net::IpAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::discovery::probe::{CONNECT_WORD, PROBE_WORD};
use crate::entity::EntityKind;
use crate::error::EmcastError;
use crate::net;

/// Answers discovery probes on behalf of an idle entity.
pub struct ProbeResponder {
    listener: TcpListener,
    tag: String,
}

impl ProbeResponder {
    /// Bind the probe listener and fix the tag this responder answers
    /// with. The tag embeds the bound address, `{type}-{id} @ {ip}`.
    pub async fn bind(
        ip: IpAddr,
        port: u16,
        kind: EntityKind,
        id: &str,
    ) -> Result<Self, EmcastError> {
        let listener = TcpListener::bind((ip, port)).await?;
        let local = listener.local_addr()?;
        Ok(Self {
            tag: format!("{kind}-{id} @ {}", local.ip()),
            listener,
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The bound port, for callers that bound port 0.
    pub fn port(&self) -> Result<u16, EmcastError> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Serve probes until a `connect` arrives or `cancel` fires.
    ///
    /// Returns the asker's address on `connect`, `None` on cancel.
    /// Unknown payloads are logged and the connection dropped.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<Option<IpAddr>, EmcastError> {
        info!("probe responder idling as {}", self.tag);
        loop {
            let (stream, peer) = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                accepted = self.listener.accept() => accepted?,
            };
            match self.answer(&stream).await {
                Ok(true) => {
                    info!("connect request from {}", peer.ip());
                    return Ok(Some(peer.ip()));
                }
                Ok(false) => {}
                Err(e) => debug!("probe exchange with {peer} failed: {e}"),
            }
        }
    }

    /// Handle one probe connection. `Ok(true)` means a connect request.
    /// Both recognized words are answered with the tag, so the asker
    /// gets a confirmation on `connect` too.
    async fn answer(&self, stream: &TcpStream) -> Result<bool, EmcastError> {
        let mut buf = [0u8; net::CHUNK_SIZE];
        let n = net::read_chunk(stream, &mut buf).await?;
        match &buf[..n] {
            w if w == PROBE_WORD => {
                net::write_all(stream, self.tag.as_bytes()).await?;
                Ok(false)
            }
            w if w == CONNECT_WORD => {
                net::write_all(stream, self.tag.as_bytes()).await?;
                Ok(true)
            }
            other => {
                debug!("ignoring probe payload {:?}", String::from_utf8_lossy(other));
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::probe::Prober;
    use std::time::Duration;

    #[tokio::test]
    async fn probe_then_connect_exchange() {
        let responder = ProbeResponder::bind(
            "127.0.0.1".parse().unwrap(),
            0,
            EntityKind::Emitter,
            "42",
        )
        .await
        .unwrap();
        let port = responder.port().unwrap();

        let cancel = CancellationToken::new();
        let server = tokio::spawn(async move { responder.run(&cancel).await });

        let prober = Prober::with_port(port);
        let report = prober.probe_one("127.0.0.1".parse().unwrap()).await;
        let tag = report.tag.expect("responder should identify itself");
        assert_eq!(tag.kind, EntityKind::Emitter);
        assert_eq!(tag.id, "42");

        // A connect request is confirmed with the same tag.
        let confirm = prober
            .initiate("127.0.0.1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(confirm.tag.map(|t| t.id).as_deref(), Some("42"));
        let asker = server.await.unwrap().unwrap();
        assert_eq!(asker, Some("127.0.0.1".parse().unwrap()));
    }

    #[tokio::test]
    async fn cancel_stops_the_responder() {
        let responder = ProbeResponder::bind(
            "127.0.0.1".parse().unwrap(),
            0,
            EntityKind::Subscriber,
            "s1",
        )
        .await
        .unwrap();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let server = tokio::spawn(async move { responder.run(&token).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        assert_eq!(server.await.unwrap().unwrap(), None);
    }
}
