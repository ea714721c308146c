//! Broadcast-free discovery: IP-range expansion, unicast probing and
//! the target-side responder.

pub mod iprange;
pub mod probe;
pub mod responder;

pub use iprange::expand;
pub use probe::{ProbeFilter, ProbeReport, Prober, ResponderTag};
pub use responder::ProbeResponder;
