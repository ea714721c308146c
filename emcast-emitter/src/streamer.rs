//! The streaming worker: capture, compress, write, paced to the
//! protocol frame rate.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use emcast_core::error::EmcastError;
use emcast_core::ports::FPS;
use emcast_core::{FrameShape, encode_frames, net};

use crate::capture::CaptureSource;

/// Frames captured and compressed per write.
const BATCH: usize = 4;

/// Owns the capture source and the data socket; streams on demand.
///
/// `start` and `stop` may cycle any number of times over one socket;
/// each cycle gets a fresh worker.
pub struct Streamer {
    source: Arc<Mutex<Box<dyn CaptureSource>>>,
    shape: FrameShape,
    sock: Option<Arc<TcpStream>>,
    cancel: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

impl Streamer {
    pub fn new(source: Box<dyn CaptureSource>) -> Self {
        let shape = source.shape().clone();
        Self {
            source: Arc::new(Mutex::new(source)),
            shape,
            sock: None,
            cancel: None,
            worker: None,
        }
    }

    pub fn shape(&self) -> &FrameShape {
        &self.shape
    }

    /// Adopt a connected data socket.
    pub fn attach(&mut self, sock: Arc<TcpStream>) {
        self.sock = Some(sock);
    }

    pub fn is_streaming(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
    }

    /// Spawn the capture loop. A second start without a stop is a
    /// no-op; starting without a socket is an error.
    pub fn start(&mut self) -> Result<(), EmcastError> {
        if self.is_streaming() {
            return Ok(());
        }
        let sock = self.sock.clone().ok_or(EmcastError::ChannelClosed)?;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let source = self.source.clone();
        self.worker = Some(tokio::spawn(async move {
            info!("stream on");
            let mut pace =
                tokio::time::interval(Duration::from_secs_f64(BATCH as f64 / FPS as f64));
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = pace.tick() => {}
                }

                let frames: Vec<Vec<u8>> = match source.lock() {
                    Ok(mut source) => (0..BATCH).map(|_| source.read()).collect(),
                    Err(_) => {
                        warn!("capture source poisoned, stopping");
                        break;
                    }
                };
                let payload = match encode_frames(&frames) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!("frame encoding failed: {e}");
                        break;
                    }
                };
                if let Err(e) = net::write_all(&sock, &payload).await {
                    debug!("stream write ended: {e}");
                    break;
                }
            }
            info!("stream off");
        }));
        self.cancel = Some(cancel);
        Ok(())
    }

    /// Stop the capture loop, keeping the socket for a later start.
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    /// Stop and release the socket.
    pub async fn teardown(&mut self) {
        self.stop().await;
        self.sock = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::NoiseSource;
    use emcast_core::FrameStream;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn streams_decodable_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let shape = FrameShape::parse("4x6x3").unwrap();
        let mut streamer = Streamer::new(Box::new(NoiseSource::new(shape.clone())));

        let sock = TcpStream::connect(addr).await.unwrap();
        let (reader, _) = listener.accept().await.unwrap();
        streamer.attach(Arc::new(sock));
        streamer.start().unwrap();

        let mut stream = FrameStream::new(Arc::new(reader), shape.clone());
        let mut seen = 0;
        while seen < BATCH {
            let frames = stream.next_batch().await.unwrap();
            for frame in &frames {
                assert_eq!(frame.len(), shape.volume());
            }
            seen += frames.len();
        }
        streamer.teardown().await;
    }

    #[tokio::test]
    async fn start_without_socket_fails() {
        let mut streamer = Streamer::new(Box::new(NoiseSource::default()));
        assert!(streamer.start().is_err());
        assert!(!streamer.is_streaming());
    }

    #[tokio::test]
    async fn stop_start_cycles() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sock = TcpStream::connect(addr).await.unwrap();
        let (_reader, _) = listener.accept().await.unwrap();

        let mut streamer =
            Streamer::new(Box::new(NoiseSource::new(FrameShape::parse("2x2").unwrap())));
        streamer.attach(Arc::new(sock));

        streamer.start().unwrap();
        assert!(streamer.is_streaming());
        streamer.stop().await;
        assert!(!streamer.is_streaming());
        streamer.start().unwrap();
        assert!(streamer.is_streaming());
        streamer.teardown().await;
    }
}
