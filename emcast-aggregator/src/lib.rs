//! # emcast-aggregator
//!
//! The hub of an emcast deployment: accepts emitter and subscriber
//! sessions, relays streams between them and exposes an operator
//! console on stdin.

pub mod aggregator;
pub mod config;
pub mod console;
pub mod listener;

pub use aggregator::Aggregator;
pub use config::AggregatorConfig;
pub use console::ConsoleCommand;
