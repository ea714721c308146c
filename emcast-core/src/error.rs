//! Domain-specific error types for the emcast protocol.
//!
//! All fallible operations return `Result<T, EmcastError>`.
//! Transport timeouts are recoverable and absorbed at component
//! boundaries; only identity-integrity violations propagate.

use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

use crate::entity::EntityKind;

/// The canonical error type for the emcast protocol.
#[derive(Debug, Error)]
pub enum EmcastError {
    // ── Handshake / protocol errors ──────────────────────────────
    /// The introduction payload was missing the separator or did not
    /// follow the `{type}-{id}:HELLO;{shape?}` grammar.
    #[error("invalid introduction: {0}")]
    InvalidIntroduction(String),

    /// A frame-shape string did not parse as `{H}x{W}` or `{H}x{W}x{C}`.
    #[error("invalid frame shape: {0}")]
    InvalidFrameShape(String),

    /// An entity-type token was neither `emitter` nor `subscriber`.
    #[error("unknown entity type: {0}")]
    UnknownEntity(String),

    /// A handshake exchange produced an unexpected reply.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// A companion socket arrived from a different address than the
    /// messaging connection. Fatal to the bundle being built.
    #[error("{channel} socket address mismatch: messaging is on {expected}, got {got}")]
    AddressMismatch {
        expected: IpAddr,
        got: IpAddr,
        channel: &'static str,
    },

    // ── Discovery errors ─────────────────────────────────────────
    /// An IP expression could not be expanded.
    #[error("invalid IP expression {expr:?}: {reason}")]
    InvalidIpExpression { expr: String, reason: &'static str },

    // ── Command errors ───────────────────────────────────────────
    /// The first token of a command line matched no known command.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A known command carried malformed or missing arguments.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    // ── Registry errors ──────────────────────────────────────────
    /// An id is already registered for this entity type.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: EntityKind, id: String },

    /// No live emitter registered under this id.
    #[error("no such emitter: {0}")]
    NoSuchEmitter(String),

    /// No live subscriber registered under this id.
    #[error("no such subscriber: {0}")]
    NoSuchSubscriber(String),

    /// The subscriber is already attached to an emitter.
    #[error("subscriber {subscriber} already attached to {emitter}")]
    AlreadyAttached { subscriber: String, emitter: String },

    /// An operation required an attachment that does not exist.
    #[error("subscriber {0} is not attached to any emitter")]
    NotAttached(String),

    /// A watch is already running for this emitter.
    #[error("already watching {0}")]
    AlreadyWatching(String),

    // ── Framing errors ───────────────────────────────────────────
    /// The inbound buffer grew past the codec limit with no sentinel.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Transport errors ─────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// A channel queue was closed or its flows are not running.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Serialization errors ─────────────────────────────────────
    /// Compression or decompression of a stream frame failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// UTF-8 conversion failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for EmcastError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        EmcastError::ChannelClosed
    }
}
