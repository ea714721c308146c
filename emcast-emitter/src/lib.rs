//! # emcast-emitter
//!
//! A stream source: captures frames (white noise by default), waits to
//! be discovered or dials an aggregator directly, and streams on
//! command until told to shut down.

pub mod capture;
pub mod config;
pub mod entity;
pub mod rc;
pub mod streamer;

pub use capture::{CaptureSource, NoiseSource};
pub use config::EmitterConfig;
pub use entity::EmitterEntity;
pub use streamer::Streamer;
