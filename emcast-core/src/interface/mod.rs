//! Session establishment and per-peer channel bundles.
//!
//! The factory turns a raw accepted messaging socket into a validated
//! [`Interface`]: it reads the introduction, acknowledges it, collects
//! the data and RC companion sockets and checks they come from the
//! same host. The bundle types then carry the session for its
//! lifetime.

pub mod bundle;
pub mod factory;

pub use bundle::{
    EmitterBundle, Interface, OFFLINE_STATUS, RcMode, ShutdownOutcome, SubscriberBundle,
};
pub use factory::{ACK, Introduction, InterfaceFactory, SEPARATOR};
