//! Well-known ports and timing constants for the emcast protocol.

/// Framed control / introduction / status payloads.
pub const MESSAGE_PORT: u16 = 1234;

/// Raw relayed or emitter-produced frame bytes.
pub const STREAM_PORT: u16 = 1235;

/// Probe / connect / tag exchange.
pub const PROBE_PORT: u16 = 1233;

/// Raw relayed remote-control command bytes.
pub const RC_PORT: u16 = 1232;

/// Stream pacing, frames per second.
pub const FPS: u32 = 15;
