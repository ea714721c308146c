//! Lifecycle state machine for a channel bundle.
//!
//! ```text
//!  Negotiating ──► Idle ◄──► Streaming
//!       │           │            │
//!       ▼           ▼            ▼
//!   (discarded)  TearingDown ◄───┘
//!                   │
//!                   ▼
//!                 Closed
//! ```
//!
//! `Idle` and `Streaming` together make up the established phase.
//! Entering `TearingDown` is idempotent; every other transition is
//! validated and returns `Result` instead of panicking.

use std::fmt;

use crate::error::EmcastError;

/// The current lifecycle phase of a channel bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundlePhase {
    /// Accepted, companion sockets not yet validated.
    #[default]
    Negotiating,

    /// Fully validated, no stream flowing.
    Idle,

    /// Stream switched on by a control payload.
    Streaming,

    /// Teardown requested; flows stopping.
    TearingDown,

    /// Terminal state, sockets released.
    Closed,
}

impl fmt::Display for BundlePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Negotiating => "Negotiating",
            Self::Idle => "Idle",
            Self::Streaming => "Streaming",
            Self::TearingDown => "TearingDown",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

impl BundlePhase {
    /// Whether the bundle is validated and usable.
    pub fn is_established(&self) -> bool {
        matches!(self, Self::Idle | Self::Streaming)
    }

    /// Transition to `Idle` after companion-socket validation.
    ///
    /// Valid from: `Negotiating`.
    pub fn establish(&mut self) -> Result<(), EmcastError> {
        match self {
            Self::Negotiating => {
                *self = Self::Idle;
                Ok(())
            }
            other => Err(EmcastError::InvalidCommand(format!(
                "cannot establish from {other}"
            ))),
        }
    }

    /// Transition to `Streaming` on a `stream on` payload.
    ///
    /// Valid from: `Idle`.
    pub fn stream_on(&mut self) -> Result<(), EmcastError> {
        match self {
            Self::Idle => {
                *self = Self::Streaming;
                Ok(())
            }
            other => Err(EmcastError::InvalidCommand(format!(
                "cannot start streaming from {other}"
            ))),
        }
    }

    /// Transition back to `Idle` on a `stream off` payload.
    ///
    /// Valid from: `Streaming`.
    pub fn stream_off(&mut self) -> Result<(), EmcastError> {
        match self {
            Self::Streaming => {
                *self = Self::Idle;
                Ok(())
            }
            other => Err(EmcastError::InvalidCommand(format!(
                "cannot stop streaming from {other}"
            ))),
        }
    }

    /// Enter `TearingDown`. Re-entering is a no-op, never an error.
    pub fn begin_teardown(&mut self) {
        if !matches!(self, Self::Closed) {
            *self = Self::TearingDown;
        }
    }

    /// Transition to `Closed`.
    ///
    /// Valid from: `TearingDown`.
    pub fn close(&mut self) -> Result<(), EmcastError> {
        match self {
            Self::TearingDown => {
                *self = Self::Closed;
                Ok(())
            }
            other => Err(EmcastError::InvalidCommand(format!(
                "cannot close from {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = BundlePhase::default();
        assert_eq!(phase, BundlePhase::Negotiating);

        phase.establish().unwrap();
        assert!(phase.is_established());

        phase.stream_on().unwrap();
        assert_eq!(phase, BundlePhase::Streaming);

        phase.stream_off().unwrap();
        assert_eq!(phase, BundlePhase::Idle);

        phase.begin_teardown();
        assert_eq!(phase, BundlePhase::TearingDown);

        phase.close().unwrap();
        assert_eq!(phase, BundlePhase::Closed);
    }

    #[test]
    fn teardown_is_idempotent() {
        let mut phase = BundlePhase::Streaming;
        phase.begin_teardown();
        phase.begin_teardown();
        assert_eq!(phase, BundlePhase::TearingDown);
    }

    #[test]
    fn teardown_from_any_live_phase() {
        for start in [
            BundlePhase::Negotiating,
            BundlePhase::Idle,
            BundlePhase::Streaming,
        ] {
            let mut phase = start;
            phase.begin_teardown();
            assert_eq!(phase, BundlePhase::TearingDown);
        }
    }

    #[test]
    fn closed_stays_closed() {
        let mut phase = BundlePhase::Closed;
        phase.begin_teardown();
        assert_eq!(phase, BundlePhase::Closed);
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mut phase = BundlePhase::Negotiating;
        assert!(phase.stream_on().is_err());
        assert!(phase.close().is_err());

        let mut phase = BundlePhase::Idle;
        assert!(phase.establish().is_err());
        assert!(phase.stream_off().is_err());
    }
}
