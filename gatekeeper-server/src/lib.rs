//! The GateKeeper control-plane server: wire-level connection state machine,
//! abuse mitigation, and the accept loop that ties them to a [`Driver`].
//!
//! [`Driver`]: gatekeeper_driver::Driver

#![deny(unsafe_code)]

pub mod abuse_guard;
pub mod config;
pub mod connection;
pub mod core;
pub mod error;

pub use abuse_guard::AbuseGuard;
pub use config::ServerConfig;
pub use connection::{ConnState, Connection};
pub use core::ServerCore;
pub use error::GateError;
