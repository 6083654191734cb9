//! Client side of the GateKeeper control channel: connect, key exchange,
//! login, then one RPC call at a time.

#![deny(unsafe_code)]

pub mod client;
pub mod error;

pub use client::ClientCore;
pub use error::ClientError;
