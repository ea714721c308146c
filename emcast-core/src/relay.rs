//! Blind byte-copy bridge between two sockets.
//!
//! A relay runs one single-direction loop: read up to 1024 bytes from
//! the source, write them to the target unmodified. No message
//! boundaries are preserved — this sits below the sentinel framing
//! layer. Two relays per attachment (data + RC, opposite directions)
//! give full-duplex behavior without demultiplexing.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::net;

/// A running one-way forwarder between two shared sockets.
pub struct Relay {
    name: String,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl Relay {
    /// Spawn the copy loop from `src` to `dst`.
    pub fn start(name: impl Into<String>, src: Arc<TcpStream>, dst: Arc<TcpStream>) -> Self {
        let name = name.into();
        let cancel = CancellationToken::new();

        let tag = name.clone();
        let token = cancel.clone();
        let worker = tokio::spawn(async move {
            debug!("{tag}: forwarder online");
            let mut buf = [0u8; net::CHUNK_SIZE];
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    n = net::read_chunk(&src, &mut buf) => match n {
                        Ok(0) => break,
                        Ok(n) => {
                            if let Err(e) = net::write_all(&dst, &buf[..n]).await {
                                // Errors racing teardown are expected.
                                debug!("{tag}: write ended the relay: {e}");
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("{tag}: read ended the relay: {e}");
                            break;
                        }
                    },
                }
            }
            debug!("{tag}: forwarder exiting");
        });

        Self {
            name,
            cancel,
            worker: Some(worker),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cancel the copy loop and wait for it to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        // Detached stop; the loop observes the token on its next pass.
        self.cancel.cancel();
    }
}
