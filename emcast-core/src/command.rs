//! Control command grammar for the messaging channel.
//!
//! Commands are whitespace-separated token lines: the first token is
//! the command name, the rest are arguments. The set of commands is a
//! closed enum; unknown names are a typed error, not a silent skip.

use crate::error::EmcastError;

/// A parsed control command received over a messaging channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `stream on` / `stream off` — switch an emitter's stream.
    Stream { on: bool },
    /// `shutdown` — tear the connection down.
    Shutdown,
    /// `emitters` — list live emitter ids (subscriber channels).
    Emitters,
    /// `attach <id>` — splice this subscriber to an emitter's stream.
    Attach(String),
    /// `detach` — undo a previous attach.
    Detach,
}

impl ControlCommand {
    /// Parse one command line. Command names are case-insensitive.
    pub fn parse(line: &str) -> Result<Self, EmcastError> {
        let mut tokens = line.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| EmcastError::InvalidCommand("empty command line".into()))?;

        match name.to_ascii_lowercase().as_str() {
            "stream" => match tokens.next() {
                Some("on") => Ok(Self::Stream { on: true }),
                Some("off") => Ok(Self::Stream { on: false }),
                other => Err(EmcastError::InvalidCommand(format!(
                    "stream wants on|off, got {:?}",
                    other.unwrap_or("")
                ))),
            },
            "shutdown" => Ok(Self::Shutdown),
            "emitters" => Ok(Self::Emitters),
            "attach" | "connect" => match tokens.next() {
                Some(id) => Ok(Self::Attach(id.to_string())),
                None => Err(EmcastError::InvalidCommand(
                    "attach wants an emitter id".into(),
                )),
            },
            "detach" | "disconnect" => Ok(Self::Detach),
            _ => Err(EmcastError::UnknownCommand(line.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_switches() {
        assert_eq!(
            ControlCommand::parse("stream on").unwrap(),
            ControlCommand::Stream { on: true }
        );
        assert_eq!(
            ControlCommand::parse("stream off").unwrap(),
            ControlCommand::Stream { on: false }
        );
        assert!(ControlCommand::parse("stream sideways").is_err());
        assert!(ControlCommand::parse("stream").is_err());
    }

    #[test]
    fn attach_needs_an_id() {
        assert_eq!(
            ControlCommand::parse("attach 7").unwrap(),
            ControlCommand::Attach("7".into())
        );
        assert_eq!(
            ControlCommand::parse("connect 7").unwrap(),
            ControlCommand::Attach("7".into())
        );
        assert!(matches!(
            ControlCommand::parse("attach"),
            Err(EmcastError::InvalidCommand(_))
        ));
    }

    #[test]
    fn bare_commands() {
        assert_eq!(
            ControlCommand::parse("shutdown").unwrap(),
            ControlCommand::Shutdown
        );
        assert_eq!(
            ControlCommand::parse("emitters").unwrap(),
            ControlCommand::Emitters
        );
        assert_eq!(
            ControlCommand::parse("detach").unwrap(),
            ControlCommand::Detach
        );
    }

    #[test]
    fn case_insensitive_names() {
        assert_eq!(
            ControlCommand::parse("SHUTDOWN").unwrap(),
            ControlCommand::Shutdown
        );
    }

    #[test]
    fn unknown_command_is_typed() {
        assert!(matches!(
            ControlCommand::parse("frobnicate now"),
            Err(EmcastError::UnknownCommand(_))
        ));
        assert!(ControlCommand::parse("   ").is_err());
    }
}
