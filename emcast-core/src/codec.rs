//! Sentinel-delimited framing for the messaging channel.
//!
//! Every payload on the wire is terminated by the literal ASCII
//! sentinel `ROGER`. Decoding scans the accumulation buffer for the
//! sentinel and yields the sentinel-free payload, so a sentinel split
//! across two reads is reassembled and no message is ever truncated.
//!
//! No escaping is performed: payload content that happens to contain
//! the sentinel bytes is split into multiple messages, exactly as on
//! the original wire.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::EmcastError;

/// The fixed delimiter terminating every framed payload.
pub const SENTINEL: &[u8] = b"ROGER";

/// Maximum bytes the decoder will accumulate without finding a
/// sentinel before declaring the stream corrupt.
pub const MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// Offset of the first sentinel occurrence in `buf`, if any.
pub fn find_sentinel(buf: &[u8]) -> Option<usize> {
    if buf.len() < SENTINEL.len() {
        return None;
    }
    buf.windows(SENTINEL.len()).position(|w| w == SENTINEL)
}

/// Codec framing arbitrary payloads with the `ROGER` sentinel.
#[derive(Debug, Default)]
pub struct SentinelCodec;

impl Decoder for SentinelCodec {
    type Item = Bytes;
    type Error = EmcastError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match find_sentinel(src) {
            Some(pos) => {
                let mut frame = src.split_to(pos + SENTINEL.len());
                frame.truncate(pos);
                Ok(Some(frame.freeze()))
            }
            None if src.len() > MAX_FRAME_SIZE => Err(EmcastError::FrameTooLarge {
                size: src.len(),
                max: MAX_FRAME_SIZE,
            }),
            None => Ok(None),
        }
    }
}

impl Encoder<Bytes> for SentinelCodec {
    type Error = EmcastError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + SENTINEL.len());
        dst.extend_from_slice(&item);
        dst.extend_from_slice(SENTINEL);
        Ok(())
    }
}
