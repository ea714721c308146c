//! Frame sources.
//!
//! A capture source produces raw pixel buffers of a fixed shape. The
//! only built-in source is white noise, which exercises the full
//! pipeline without any camera hardware.

use emcast_core::FrameShape;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Something that produces raw frames of a fixed shape.
pub trait CaptureSource: Send {
    fn shape(&self) -> &FrameShape;

    /// Produce the next raw frame, exactly `shape().volume()` bytes.
    fn read(&mut self) -> Vec<u8>;
}

/// A white-noise source: every frame is fresh random bytes.
pub struct NoiseSource {
    shape: FrameShape,
    rng: StdRng,
}

impl NoiseSource {
    pub fn new(shape: FrameShape) -> Self {
        Self {
            shape,
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for NoiseSource {
    fn default() -> Self {
        Self::new(FrameShape {
            height: 480,
            width: 640,
            channels: Some(3),
        })
    }
}

impl CaptureSource for NoiseSource {
    fn shape(&self) -> &FrameShape {
        &self.shape
    }

    fn read(&mut self) -> Vec<u8> {
        let mut frame = vec![0u8; self.shape.volume()];
        self.rng.fill_bytes(&mut frame);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_frames_match_the_shape() {
        let mut source = NoiseSource::new(FrameShape::parse("4x6x3").unwrap());
        let frame = source.read();
        assert_eq!(frame.len(), 4 * 6 * 3);
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut source = NoiseSource::default();
        let a = source.read();
        let b = source.read();
        assert_ne!(a, b);
    }
}
