//! Two-way message passing over a single TCP connection.
//!
//! A [`MessageChannel`] owns one stream socket and runs two
//! independent flows for its entire lifetime: the outbound flow drains
//! a FIFO queue and frames each payload with the sentinel, the inbound
//! flow decodes framed payloads and pushes them onto the inbox.
//! Construction builds state only; [`start`](MessageChannel::start)
//! spawns the flows.
//!
//! Teardown cancels both flows and awaits their exit before the socket
//! is released, so a close never races an in-flight read.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::SentinelCodec;
use crate::error::EmcastError;

/// Depth of the outbound and inbound queues.
const QUEUE_DEPTH: usize = 100;

/// How long to wait for the outbound flow to drain on teardown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout for an outgoing TCP connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// A framed, tagged, two-way message channel over one TCP socket.
pub struct MessageChannel {
    tag: Vec<u8>,
    peer: SocketAddr,
    stream: Option<TcpStream>,
    tx: Option<mpsc::Sender<Bytes>>,
    inbox: Option<mpsc::Receiver<String>>,
    cancel: CancellationToken,
    writer: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
}

impl MessageChannel {
    /// Wrap an already-connected or accepted socket.
    ///
    /// `tag` is a constant byte prefix prepended to every outgoing
    /// payload (e.g. `emitter-7:`); pass an empty tag for none.
    pub fn new(stream: TcpStream, tag: impl Into<Vec<u8>>) -> Result<Self, EmcastError> {
        let peer = stream.peer_addr()?;
        Ok(Self {
            tag: tag.into(),
            peer,
            stream: Some(stream),
            tx: None,
            inbox: None,
            cancel: CancellationToken::new(),
            writer: None,
            reader: None,
        })
    }

    /// Open a connection to a remote messaging port and wrap it.
    pub async fn connect(
        ip: IpAddr,
        port: u16,
        tag: impl Into<Vec<u8>>,
    ) -> Result<Self, EmcastError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((ip, port)))
            .await
            .map_err(|_| EmcastError::Timeout(CONNECT_TIMEOUT))??;
        Self::new(stream, tag)
    }

    /// Spawn the inbound and outbound flows. Calling twice is a no-op.
    pub fn start(&mut self) {
        let stream = match self.stream.take() {
            Some(s) => s,
            None => return,
        };
        let (mut sink, mut source) = Framed::new(stream, SentinelCodec).split();
        let (tx, mut outbound) = mpsc::channel::<Bytes>(QUEUE_DEPTH);
        let (inbound_tx, inbox) = mpsc::channel::<String>(QUEUE_DEPTH);

        let cancel = self.cancel.clone();
        self.writer = Some(tokio::spawn(async move {
            loop {
                // Biased so queued payloads drain before cancellation
                // is observed; teardown drops the sender first.
                tokio::select! {
                    biased;
                    msg = outbound.recv() => match msg {
                        Some(payload) => {
                            if let Err(e) = sink.send(payload).await {
                                warn!("messenger: outbound flow: {e}");
                                cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
            debug!("messenger: outbound flow exiting");
        }));

        let cancel = self.cancel.clone();
        self.reader = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = source.next() => match frame {
                        Some(Ok(payload)) => match String::from_utf8(payload.to_vec()) {
                            Ok(text) => {
                                if inbound_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!("messenger: dropping non-utf8 payload: {e}"),
                        },
                        Some(Err(e)) => {
                            // Transport error tears down this channel only.
                            warn!("messenger: inbound flow: {e}");
                            cancel.cancel();
                            break;
                        }
                        None => {
                            cancel.cancel();
                            break;
                        }
                    },
                }
            }
            debug!("messenger: inbound flow exiting");
        }));

        self.tx = Some(tx);
        self.inbox = Some(inbox);
    }

    /// Remote address of the underlying socket.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the flows have been started and not yet torn down.
    pub fn is_running(&self) -> bool {
        self.tx.is_some() && !self.cancel.is_cancelled()
    }

    /// Enqueue a payload for sending. Never blocks on the network;
    /// the outbound flow frames and writes it in FIFO order.
    pub async fn send(&self, payload: impl AsRef<[u8]>) -> Result<(), EmcastError> {
        let tx = self.tx.as_ref().ok_or(EmcastError::ChannelClosed)?;
        let payload = payload.as_ref();
        let mut framed = Vec::with_capacity(self.tag.len() + payload.len());
        framed.extend_from_slice(&self.tag);
        framed.extend_from_slice(payload);
        tx.send(Bytes::from(framed))
            .await
            .map_err(|_| EmcastError::ChannelClosed)
    }

    /// Pop one already-framed message, waiting up to `timeout` if the
    /// inbox is empty. Returns `None` on timeout or closed channel.
    pub async fn recv(&mut self, timeout: Duration) -> Option<String> {
        let inbox = self.inbox.as_mut()?;
        match inbox.try_recv() {
            Ok(msg) => Some(msg),
            Err(mpsc::error::TryRecvError::Empty) => {
                if timeout.is_zero() {
                    return None;
                }
                tokio::time::timeout(timeout, inbox.recv()).await.ok().flatten()
            }
            Err(mpsc::error::TryRecvError::Disconnected) => None,
        }
    }

    /// Pop up to `count` messages, waiting up to `timeout` for the
    /// first one only. Unfulfilled slots are `None`.
    pub async fn recv_many(&mut self, count: usize, timeout: Duration) -> Vec<Option<String>> {
        let mut out = Vec::with_capacity(count);
        for slot in 0..count {
            let wait = if slot == 0 { timeout } else { Duration::ZERO };
            out.push(self.recv(wait).await);
        }
        out
    }

    /// Hand the inbound queue to a dispatcher task. After this, `recv`
    /// on the channel itself returns `None`.
    pub fn take_inbox(&mut self) -> Option<mpsc::Receiver<String>> {
        self.inbox.take()
    }

    /// Stop both flows and release the socket. Queued outbound
    /// payloads are flushed first, bounded by a short deadline.
    /// Safe to call more than once.
    pub async fn teardown(&mut self) {
        // Dropping the sender lets the outbound flow drain and exit.
        self.tx = None;
        if let Some(writer) = self.writer.take() {
            if tokio::time::timeout(FLUSH_TIMEOUT, writer).await.is_err() {
                debug!("messenger: outbound flow did not flush in time");
            }
        }
        self.cancel.cancel();
        if let Some(reader) = self.reader.take() {
            let _ = reader.await;
        }
        self.stream = None;
        self.inbox = None;
    }
}

impl Drop for MessageChannel {
    /// A channel dropped without `teardown()` still stops its flows;
    /// the reader must not stay parked on a peer that never closes.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for MessageChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageChannel")
            .field("peer", &self.peer)
            .field("tag", &String::from_utf8_lossy(&self.tag))
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn channel_pair() -> (MessageChannel, MessageChannel) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let mut a = MessageChannel::new(client, Vec::new()).unwrap();
        let mut b = MessageChannel::new(server, Vec::new()).unwrap();
        a.start();
        b.start();
        (a, b)
    }

    #[tokio::test]
    async fn send_recv_roundtrip() {
        let (a, mut b) = channel_pair().await;
        a.send("ping").await.unwrap();
        let got = b.recv(Duration::from_secs(2)).await;
        assert_eq!(got.as_deref(), Some("ping"));
    }

    #[tokio::test]
    async fn fifo_order_preserved() {
        let (a, mut b) = channel_pair().await;
        for i in 0..10 {
            a.send(format!("msg-{i}")).await.unwrap();
        }
        for i in 0..10 {
            let got = b.recv(Duration::from_secs(2)).await;
            assert_eq!(got, Some(format!("msg-{i}")));
        }
    }

    #[tokio::test]
    async fn tag_prefixes_every_message() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let mut tagged = MessageChannel::new(client, b"emitter-7:".to_vec()).unwrap();
        let mut plain = MessageChannel::new(server, Vec::new()).unwrap();
        tagged.start();
        plain.start();

        tagged.send("offline").await.unwrap();
        let got = plain.recv(Duration::from_secs(2)).await;
        assert_eq!(got.as_deref(), Some("emitter-7:offline"));
        tagged.teardown().await;
    }

    #[tokio::test]
    async fn recv_many_pads_with_none() {
        let (a, mut b) = channel_pair().await;
        a.send("only").await.unwrap();
        let got = b.recv_many(3, Duration::from_secs(2)).await;
        assert_eq!(got[0].as_deref(), Some("only"));
        assert_eq!(got[1], None);
        assert_eq!(got[2], None);
    }

    #[tokio::test]
    async fn recv_times_out_quietly() {
        let (_a, mut b) = channel_pair().await;
        let got = b.recv(Duration::from_millis(50)).await;
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn teardown_is_idempotent() {
        let (mut a, _b) = channel_pair().await;
        a.teardown().await;
        a.teardown().await;
        assert!(!a.is_running());
        assert!(a.send("late").await.is_err());
    }

    #[tokio::test]
    async fn teardown_flushes_queued_payloads() {
        let (mut a, mut b) = channel_pair().await;
        a.send("parting-shot").await.unwrap();
        a.teardown().await;
        let got = b.recv(Duration::from_secs(2)).await;
        assert_eq!(got.as_deref(), Some("parting-shot"));
    }

    #[tokio::test]
    async fn drop_without_teardown_releases_the_socket() {
        let (a, mut b) = channel_pair().await;
        drop(a);
        // The dropped side's flows exit and close the stream, which
        // the peer observes as EOF and shuts itself down.
        let mut closed = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            if !b.is_running() {
                closed = true;
                break;
            }
        }
        assert!(closed, "peer never saw the dropped channel close");
    }

    #[tokio::test]
    async fn chunk_boundary_alignment_is_invisible() {
        // Payload much larger than any internal chunk size.
        let (a, mut b) = channel_pair().await;
        let big: String = "x".repeat(64 * 1024 + 17);
        a.send(&big).await.unwrap();
        let got = b.recv(Duration::from_secs(5)).await;
        assert_eq!(got.as_deref(), Some(big.as_str()));
    }
}
