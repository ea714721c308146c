//! # emcast-subscriber
//!
//! A viewing endpoint that connects straight to an emitter: it probes
//! for one, asks it to dial back, then consumes its stream and can
//! push remote-control bytes the other way.

pub mod config;
pub mod direct;

pub use config::SubscriberConfig;
pub use direct::DirectConnection;
