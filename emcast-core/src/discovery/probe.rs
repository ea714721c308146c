//! Active-side probing: sweep candidate addresses for listening
//! entities and ask one of them to initiate a session.
//!
//! The probe channel is unframed. The prober opens a short-lived TCP
//! connection to the well-known probe port and sends the literal
//! `probing`; a responder answers with its tag, `{type}-{id} @ {ip}`.
//! Sending `connect` instead tells the responder to stop idling and
//! dial the prober back on the main channels; the responder confirms
//! with the same tag.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::discovery::iprange;
use crate::entity::EntityKind;
use crate::error::EmcastError;
use crate::net;
use crate::ports::PROBE_PORT;

/// Wire literal asking a responder to identify itself.
pub const PROBE_WORD: &[u8] = b"probing";
/// Wire literal asking a responder to initiate a session.
pub const CONNECT_WORD: &[u8] = b"connect";

/// Which entity types a sweep keeps as online.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFilter {
    /// Accept any entity type.
    Any,
    /// Accept only one entity type.
    Only(EntityKind),
}

impl ProbeFilter {
    fn admits(self, kind: EntityKind) -> bool {
        match self {
            Self::Any => true,
            Self::Only(want) => want == kind,
        }
    }
}

/// The identity a responder reports, `{type}-{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderTag {
    pub kind: EntityKind,
    pub id: String,
}

impl std::fmt::Display for ResponderTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)
    }
}

/// Outcome of probing one address. `tag` is absent when nothing
/// answered there, so a sweep report covers every probed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub ip: IpAddr,
    pub tag: Option<ResponderTag>,
}

impl ProbeReport {
    pub fn is_online(&self) -> bool {
        self.tag.is_some()
    }
}

impl std::fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{tag} @ {}", self.ip),
            None => write!(f, "{}: offline", self.ip),
        }
    }
}

/// Sweeps address expressions for idle entities.
///
/// The port and timeouts are configurable so tests can run against
/// ephemeral-port responders; production uses the defaults.
#[derive(Debug, Clone)]
pub struct Prober {
    port: u16,
    connect_timeout: Duration,
    recv_timeout: Duration,
    recv_attempts: u32,
}

impl Default for Prober {
    fn default() -> Self {
        Self {
            port: PROBE_PORT,
            connect_timeout: Duration::from_millis(500),
            recv_timeout: Duration::from_secs(1),
            recv_attempts: 5,
        }
    }
}

impl Prober {
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe a non-default port. Used by tests and custom deployments.
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// Expand `expr` and probe every address in it sequentially.
    ///
    /// Yields one record per expanded address; unreachable and silent
    /// addresses come back tagless, as do answers from entity types
    /// `want` excludes. Only expression syntax errors propagate.
    pub async fn sweep(
        &self,
        expr: &str,
        want: ProbeFilter,
    ) -> Result<Vec<ProbeReport>, EmcastError> {
        let mut found = Vec::new();
        for ip in iprange::expand(expr)? {
            let mut report = self.probe_one(IpAddr::V4(ip)).await;
            if let Some(tag) = &report.tag {
                if !want.admits(tag.kind) {
                    report.tag = None;
                }
            }
            found.push(report);
        }
        Ok(found)
    }

    /// Probe a single address. A tagless report means nobody answered
    /// in time.
    pub async fn probe_one(&self, ip: IpAddr) -> ProbeReport {
        ProbeReport {
            ip,
            tag: self.exchange(ip, PROBE_WORD).await,
        }
    }

    /// Ask the responder at `ip` to dial us back on the main channels.
    ///
    /// Runs the same tag exchange as a probe; a tagless report means
    /// the responder could not be reached or did not confirm.
    pub async fn initiate(&self, ip: IpAddr) -> Result<ProbeReport, EmcastError> {
        Ok(ProbeReport {
            ip,
            tag: self.exchange(ip, CONNECT_WORD).await,
        })
    }

    /// Send one wire literal and read the responder's tag back.
    async fn exchange(&self, ip: IpAddr, word: &[u8]) -> Option<ResponderTag> {
        let addr = SocketAddr::new(ip, self.port);
        let stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            _ => return None,
        };

        if let Err(e) = net::write_all(&stream, word).await {
            debug!("probe write to {addr} failed: {e}");
            return None;
        }

        let mut buf = [0u8; net::CHUNK_SIZE];
        for _ in 0..self.recv_attempts {
            match timeout(self.recv_timeout, net::read_chunk(&stream, &mut buf)).await {
                Ok(Ok(0)) => return None,
                Ok(Ok(n)) => {
                    let reply = String::from_utf8_lossy(&buf[..n]);
                    match parse_tag(reply.trim()) {
                        Ok((tag, claimed)) => {
                            if claimed != ip {
                                // Trust the socket over the self-reported address.
                                warn!("tag from {ip} claims {claimed}, keeping probed address");
                            }
                            return Some(tag);
                        }
                        Err(e) => {
                            debug!("unparseable tag from {addr}: {e}");
                            return None;
                        }
                    }
                }
                Ok(Err(e)) => {
                    debug!("probe read from {addr} failed: {e}");
                    return None;
                }
                Err(_) => continue,
            }
        }
        None
    }
}

/// Parse a responder tag of the form `{type}-{id} @ {ip}` into the
/// identity and the address the responder claims for itself.
pub fn parse_tag(tag: &str) -> Result<(ResponderTag, IpAddr), EmcastError> {
    let bad = || EmcastError::Handshake(format!("malformed probe tag: {tag:?}"));

    let (identity, ip) = tag.split_once(" @ ").ok_or_else(bad)?;
    let (kind, id) = identity.split_once('-').ok_or_else(bad)?;
    if id.is_empty() {
        return Err(bad());
    }
    Ok((
        ResponderTag {
            kind: kind.parse()?,
            id: id.to_string(),
        },
        ip.parse().map_err(|_| bad())?,
    ))
}
