//! Interactive operator console on stdin.

use emcast_core::EntityKind;
use emcast_core::error::EmcastError;

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// List live emitters and subscribers.
    Status,
    /// List live emitter ids.
    Emitters,
    /// Sweep an IP expression for idle entities.
    Probe(String),
    /// Tabulated probe of an IP expression, offline addresses included.
    Sweep(String),
    /// Ask an idle entity at this address to connect to us.
    Connect(String),
    /// Switch an emitter's stream on and count its frames.
    Watch(String),
    /// Stop watching an emitter.
    Unwatch(String),
    /// Send a raw text payload to one entity's channel.
    Message {
        kind: EntityKind,
        id: String,
        text: String,
    },
    /// Shut one emitter down and drop it.
    Kill(String),
    /// Shut everything down and exit.
    Shutdown,
    /// Print the command listing.
    Help,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, EmcastError> {
        let mut tokens = line.split_whitespace();
        let name = tokens
            .next()
            .ok_or_else(|| EmcastError::InvalidCommand("empty line".into()))?;

        let one_arg = |tokens: &mut std::str::SplitWhitespace<'_>, what: &str| {
            tokens
                .next()
                .map(str::to_string)
                .ok_or_else(|| EmcastError::InvalidCommand(format!("{name} wants {what}")))
        };

        match name.to_ascii_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "emitters" => Ok(Self::Emitters),
            "probe" => Ok(Self::Probe(one_arg(&mut tokens, "an IP expression")?)),
            "sweep" => Ok(Self::Sweep(one_arg(&mut tokens, "an IP expression")?)),
            "connect" => Ok(Self::Connect(one_arg(&mut tokens, "an IP address")?)),
            "watch" => Ok(Self::Watch(one_arg(&mut tokens, "an emitter id")?)),
            "unwatch" => Ok(Self::Unwatch(one_arg(&mut tokens, "an emitter id")?)),
            "message" | "msg" => {
                let kind: EntityKind = one_arg(&mut tokens, "an entity type")?.parse()?;
                let id = one_arg(&mut tokens, "an id")?;
                let text: String = tokens.collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    return Err(EmcastError::InvalidCommand(
                        "message wants a payload".into(),
                    ));
                }
                Ok(Self::Message { kind, id, text })
            }
            "kill" => Ok(Self::Kill(one_arg(&mut tokens, "an emitter id")?)),
            "shutdown" | "quit" | "exit" => Ok(Self::Shutdown),
            "help" | "?" => Ok(Self::Help),
            _ => Err(EmcastError::UnknownCommand(line.to_string())),
        }
    }
}

pub const HELP_TEXT: &str = "\
commands:
  status                     live sessions and attachments
  emitters                   live emitter ids
  probe <ip-expr>            sweep addresses for idle entities
                             (e.g. 192.168.1.* or 192.168.1.10-20)
  sweep <ip-expr>            probe table, offline addresses included
  connect <ip>               ask an idle entity to join
  watch <emitter-id>         stream on, count frames
  unwatch <emitter-id>       stream off
  message <type> <id> <txt>  raw payload to one channel
  kill <emitter-id>          shut one emitter down
  shutdown                   sweep everything and exit
  help                       this listing";
