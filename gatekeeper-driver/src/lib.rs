//! The abstract firewall driver contract the control-plane core depends on,
//! plus two implementations: an in-memory mock for tests and a `pf(4)`-shelling
//! driver for real BSD-like hosts.

#![deny(unsafe_code)]

mod mock;
mod pf;

pub use mock::MockDriver;
pub use pf::PfDriver;

use std::collections::HashSet;
use std::fmt;

/// Failure returned by a driver call that the core could not satisfy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// A port below the minimum valid value (10) was requested.
    InvalidPort(u16),
    /// An address that does not parse as a bare IP literal was requested.
    InvalidAddress(String),
    /// The underlying backend (subprocess, socket, ...) failed.
    Backend(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPort(p) => write!(f, "invalid port: {p}"),
            Self::InvalidAddress(a) => write!(f, "invalid address: {a}"),
            Self::Backend(msg) => write!(f, "driver backend failed: {msg}"),
        }
    }
}

impl std::error::Error for DriverError {}

/// Minimum port number any driver call will accept (spec §3 invariant 6 / §6).
pub const MIN_PORT: u16 = 10;

/// `true` if `port` may be manipulated given the allow-list policy.
///
/// `allow_all_ports = true` bypasses `allowed_ports` entirely; otherwise the
/// port must be a member of `allowed_ports`.
pub fn port_allowed(port: u16, allowed_ports: &HashSet<u16>, allow_all_ports: bool) -> bool {
    allow_all_ports || allowed_ports.contains(&port)
}

fn check_port(port: u16) -> Result<(), DriverError> {
    if port < MIN_PORT {
        return Err(DriverError::InvalidPort(port));
    }
    Ok(())
}

/// `true` if `addr` parses as a bare IP literal.
///
/// Rejects anything a driver backend might treat specially — in particular
/// `PfDriver` splices `addr` straight into a line of its ruleset text, so a
/// value containing a newline would let a caller inject arbitrary additional
/// rules.
fn check_addr(addr: &str) -> Result<(), DriverError> {
    addr.parse::<std::net::IpAddr>()
        .map(|_| ())
        .map_err(|_| DriverError::InvalidAddress(addr.to_string()))
}

/// The abstract rule-engine contract consumed by the control-plane core.
///
/// Implementations own whatever backing state (in-memory set, subprocess,
/// remote API) is needed to answer these calls; the core never reaches past
/// this trait into a concrete backend.
pub trait Driver: Send + Sync {
    /// Confirm the backend is reachable/usable before the server starts accepting.
    async fn resolve(&self) -> bool;

    /// The set of TCP ports currently blocked.
    async fn list_blocked_tcp_ports(
        &self,
        sudo: bool,
        allowed_ports: Option<&HashSet<u16>>,
    ) -> HashSet<u16>;

    /// The set of `(address, port)` accept exceptions currently in force.
    async fn list_accepted_addresses_on_tcp_ports(
        &self,
        sudo: bool,
        allowed_ports: Option<&HashSet<u16>>,
    ) -> HashSet<(String, u16)>;

    /// Add a drop rule for `port`. `Ok(false)` if the allow-list policy
    /// rejected the call without side effects; `Err` for a malformed port.
    async fn block_tcp_port(
        &self,
        port: u16,
        sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError>;

    /// Remove a drop rule for `port`.
    async fn unblock_tcp_port(
        &self,
        port: u16,
        sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError>;

    /// Add an accept exception for `(addr, port)`.
    async fn accept_address_on_tcp_port(
        &self,
        addr: &str,
        port: u16,
        sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError>;

    /// Remove an accept exception. `port = None` removes `addr` across all ports.
    async fn unaccept_address_on_tcp_port(
        &self,
        addr: &str,
        port: Option<u16>,
        sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError>;
}
