//! Remote-control receiver.
//!
//! RC bytes arrive raw on the RC socket as `;`-separated tokens,
//! relayed straight from an attached subscriber. This emitter has no
//! gimbal to drive, so the receiver just counts and logs them; a
//! hardware build would act on each token here.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use emcast_core::net;

/// Log cadence, in commands.
const LOG_EVERY: u64 = 10;

/// Consumes RC tokens from the aggregator.
pub struct RcReceiver {
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

impl RcReceiver {
    pub fn start(sock: Arc<TcpStream>) -> Self {
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let worker = tokio::spawn(async move {
            let mut buf = [0u8; net::CHUNK_SIZE];
            let mut seen: u64 = 0;
            loop {
                let n = tokio::select! {
                    _ = token.cancelled() => break,
                    n = net::read_chunk(&sock, &mut buf) => match n {
                        Ok(0) => break,
                        Ok(n) => n,
                        Err(e) => {
                            debug!("rc read ended: {e}");
                            break;
                        }
                    },
                };
                for command in buf[..n].split(|b| *b == b';') {
                    if command.is_empty() {
                        continue;
                    }
                    seen += 1;
                    if seen % LOG_EVERY == 0 {
                        info!(
                            "{seen} rc commands received (latest: {:?})",
                            String::from_utf8_lossy(command)
                        );
                    }
                }
            }
            debug!("rc receiver exiting after {seen} commands");
        });

        Self {
            cancel,
            worker: Some(worker),
        }
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for RcReceiver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn consumes_tokens_until_stopped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let writer = TcpStream::connect(addr).await.unwrap();
        let (sock, _) = listener.accept().await.unwrap();

        let receiver = RcReceiver::start(Arc::new(sock));
        net::write_all(&writer, b"<;>;A;V;").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        receiver.stop().await;
    }
}
