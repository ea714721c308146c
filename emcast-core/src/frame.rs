//! Frame shape negotiation and stream payload coding.
//!
//! ## Wire format (data socket)
//!
//! ```text
//! zstd(frame 0) ROGER zstd(frame 1) ROGER ... zstd(frame N) ROGER
//! ```
//!
//! Each raw pixel buffer is compressed individually and terminated by
//! the sentinel, so the receiver can recover frame boundaries from a
//! byte stream with no length prefixes. A decompressed frame must
//! match the negotiated shape's volume exactly.

use std::fmt;
use std::sync::Arc;

use tokio::net::TcpStream;

use crate::codec::{SENTINEL, find_sentinel};
use crate::error::EmcastError;
use crate::net;

/// Shape of a raw pixel buffer: `(height, width, [channels])`.
///
/// Immutable once negotiated during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameShape {
    pub height: u32,
    pub width: u32,
    pub channels: Option<u32>,
}

impl FrameShape {
    /// Parse a `{H}x{W}` or `{H}x{W}x{C}` string of positive decimals.
    pub fn parse(s: &str) -> Result<Self, EmcastError> {
        let invalid = || EmcastError::InvalidFrameShape(s.to_string());
        let mut dims = Vec::with_capacity(3);
        for part in s.split('x') {
            let v: u32 = part.parse().map_err(|_| invalid())?;
            if v == 0 {
                return Err(invalid());
            }
            dims.push(v);
        }
        match dims.as_slice() {
            [h, w] => Ok(Self {
                height: *h,
                width: *w,
                channels: None,
            }),
            [h, w, c] => Ok(Self {
                height: *h,
                width: *w,
                channels: Some(*c),
            }),
            _ => Err(invalid()),
        }
    }

    /// Number of bytes in one raw frame of this shape.
    pub fn volume(&self) -> usize {
        self.height as usize * self.width as usize * self.channels.unwrap_or(1) as usize
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channels {
            Some(c) => write!(f, "{}x{}x{}", self.height, self.width, c),
            None => write!(f, "{}x{}", self.height, self.width),
        }
    }
}

// ── Stream payload coding ────────────────────────────────────────

/// Compress a batch of raw frames into one sentinel-joined payload.
pub fn encode_frames(frames: &[Vec<u8>]) -> Result<Vec<u8>, EmcastError> {
    let mut out = Vec::new();
    for frame in frames {
        let packed = zstd::bulk::compress(frame, zstd::DEFAULT_COMPRESSION_LEVEL)
            .map_err(|e| EmcastError::Encoding(e.to_string()))?;
        out.extend_from_slice(&packed);
        out.extend_from_slice(SENTINEL);
    }
    Ok(out)
}

/// Decompress one frame and validate it against the negotiated shape.
pub fn decode_frame(packed: &[u8], shape: &FrameShape) -> Result<Vec<u8>, EmcastError> {
    let raw = zstd::bulk::decompress(packed, shape.volume())
        .map_err(|e| EmcastError::Encoding(e.to_string()))?;
    if raw.len() != shape.volume() {
        return Err(EmcastError::Encoding(format!(
            "frame is {} bytes, shape {} wants {}",
            raw.len(),
            shape,
            shape.volume()
        )));
    }
    Ok(raw)
}

// ── FrameStream ──────────────────────────────────────────────────

/// Reader side of an emitter's data socket.
///
/// Accumulates raw bytes, splits on the sentinel and decompresses each
/// complete fragment. A single read may surface several frames at once.
pub struct FrameStream {
    sock: Arc<TcpStream>,
    shape: FrameShape,
    buf: Vec<u8>,
}

impl FrameStream {
    pub fn new(sock: Arc<TcpStream>, shape: FrameShape) -> Self {
        Self {
            sock,
            shape,
            buf: Vec::new(),
        }
    }

    pub fn shape(&self) -> &FrameShape {
        &self.shape
    }

    /// Wait for and decode the next batch of complete frames.
    ///
    /// Returns `ChannelClosed` once the peer closes the socket.
    pub async fn next_batch(&mut self) -> Result<Vec<Vec<u8>>, EmcastError> {
        loop {
            let frames = self.drain_complete()?;
            if !frames.is_empty() {
                return Ok(frames);
            }
            let mut chunk = [0u8; net::CHUNK_SIZE];
            let n = net::read_chunk(&self.sock, &mut chunk).await?;
            if n == 0 {
                return Err(EmcastError::ChannelClosed);
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    fn drain_complete(&mut self) -> Result<Vec<Vec<u8>>, EmcastError> {
        let mut frames = Vec::new();
        while let Some(pos) = find_sentinel(&self.buf) {
            let rest = self.buf.split_off(pos + SENTINEL.len());
            let mut fragment = std::mem::replace(&mut self.buf, rest);
            fragment.truncate(pos);
            if fragment.is_empty() {
                continue;
            }
            frames.push(decode_frame(&fragment, &self.shape)?);
        }
        Ok(frames)
    }
}
