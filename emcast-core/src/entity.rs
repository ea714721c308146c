//! Entity identity: the `(type, id)` pair naming a remote peer.

use std::fmt;
use std::str::FromStr;

use crate::error::EmcastError;

/// The role a network entity plays in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Produces a video/data stream.
    Emitter,
    /// Consumes a stream relayed through the aggregator.
    Subscriber,
}

impl EntityKind {
    /// The wire token used in introductions and discovery tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emitter => "emitter",
            Self::Subscriber => "subscriber",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = EmcastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emitter" => Ok(Self::Emitter),
            "subscriber" => Ok(Self::Subscriber),
            other => Err(EmcastError::UnknownEntity(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_tokens() {
        assert_eq!("emitter".parse::<EntityKind>().unwrap(), EntityKind::Emitter);
        assert_eq!(
            "subscriber".parse::<EntityKind>().unwrap(),
            EntityKind::Subscriber
        );
        assert_eq!(EntityKind::Emitter.to_string(), "emitter");
    }

    #[test]
    fn unknown_token_rejected() {
        assert!(matches!(
            "router".parse::<EntityKind>(),
            Err(EmcastError::UnknownEntity(_))
        ));
    }
}
