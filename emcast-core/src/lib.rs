//! # emcast-core
//!
//! Core protocol library for the emcast stream relay framework.
//!
//! This crate contains:
//! - **Codec**: `SentinelCodec` for sentinel-delimited framed TCP I/O
//! - **Channel**: `MessageChannel`, a queued two-way messaging flow
//! - **Frames**: `FrameShape` negotiation and compressed frame coding
//! - **Discovery**: IP-range probing (`Prober`) and the idle-side
//!   `ProbeResponder`
//! - **Interface**: the three-socket handshake (`InterfaceFactory`)
//!   and per-peer bundles (`EmitterBundle`, `SubscriberBundle`)
//! - **Registry**: mutex-friendly session table with watch workers
//!   and the shutdown sweep
//! - **Relay**: blind one-way byte forwarding between shared sockets
//! - **State**: `BundlePhase`, the validated session lifecycle
//! - **Error**: `EmcastError` — typed, `thiserror`-based hierarchy

pub mod channel;
pub mod codec;
pub mod command;
pub mod discovery;
pub mod entity;
pub mod error;
pub mod frame;
pub mod interface;
pub mod net;
pub mod ports;
pub mod registry;
pub mod relay;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::MessageChannel;
pub use codec::{MAX_FRAME_SIZE, SENTINEL, SentinelCodec};
pub use command::ControlCommand;
pub use discovery::{ProbeFilter, ProbeReport, ProbeResponder, Prober, ResponderTag};
pub use entity::EntityKind;
pub use error::EmcastError;
pub use frame::{FrameShape, FrameStream, decode_frame, encode_frames};
pub use interface::{
    EmitterBundle, Interface, InterfaceFactory, Introduction, RcMode, ShutdownOutcome,
    SubscriberBundle,
};
pub use registry::Registry;
pub use relay::Relay;
pub use state::BundlePhase;
