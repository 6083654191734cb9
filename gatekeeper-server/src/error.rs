//! The server's internal error taxonomy (spec §7). None of these are
//! surfaced as typed errors on the wire — each kind maps to a concrete wire
//! reaction (close, boolean reply, or silent continuation) in `connection.rs`.

use std::fmt;
use std::io;

/// One of the six error kinds the connection handler can hit.
#[derive(Debug)]
pub enum GateError {
    /// Framing or parse violation, overflow, illegal port, missing field.
    MalformedInput(String),
    /// Bad login digest.
    AuthFailure,
    /// Login watchdog or client reply timeout.
    TimeoutFailure,
    /// Driver returned false or failed.
    DriverFailure(String),
    /// Socket I/O error.
    TransportFailure(io::Error),
    /// Unexpected failure inside a connection handler.
    InternalFault(String),
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedInput(s) => write!(f, "malformed input: {s}"),
            Self::AuthFailure => write!(f, "authentication failure"),
            Self::TimeoutFailure => write!(f, "timeout"),
            Self::DriverFailure(s) => write!(f, "driver failure: {s}"),
            Self::TransportFailure(e) => write!(f, "transport failure: {e}"),
            Self::InternalFault(s) => write!(f, "internal fault: {s}"),
        }
    }
}

impl std::error::Error for GateError {}

impl From<io::Error> for GateError {
    fn from(e: io::Error) -> Self {
        Self::TransportFailure(e)
    }
}
