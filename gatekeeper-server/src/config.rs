//! Server configuration: built by the library, filled from flags/env by the
//! `gatekeeperd` binary's `clap`-derived CLI.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

const MIN_LOGIN_ERROR_LIMIT: u32 = 3;
const MIN_BLOCKING_TIME: Duration = Duration::from_secs(60);
const DEFAULT_BLOCKING_TIME: Duration = Duration::from_secs(600);

/// Everything `ServerCore` needs to bind, authenticate, and authorize.
pub struct ServerConfig {
    pub address: IpAddr,
    pub listen_port: u16,
    pub access_key: Vec<u8>,
    pub secure: bool,
    pub allowed_ports: HashSet<u16>,
    pub allow_all_ports: bool,
    pub sudo: bool,
    pub login_error_limit: u32,
    pub blocking_time: Duration,
    pub version: String,
}

impl ServerConfig {
    /// A config listening on all IPv4 interfaces in secure mode, with the
    /// default abuse-mitigation thresholds.
    pub fn new(access_key: Vec<u8>, listen_port: u16) -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port,
            access_key,
            secure: true,
            allowed_ports: HashSet::new(),
            allow_all_ports: false,
            sudo: false,
            login_error_limit: MIN_LOGIN_ERROR_LIMIT,
            blocking_time: DEFAULT_BLOCKING_TIME,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Values below 3 normalize up to 3 (spec §8 boundary test).
    pub fn with_login_error_limit(mut self, limit: u32) -> Self {
        self.login_error_limit = limit.max(MIN_LOGIN_ERROR_LIMIT);
        self
    }

    /// Values below one minute fall back to the 10-minute default, matching
    /// `AbuseGuard`'s own normalization.
    pub fn with_blocking_time(mut self, blocking_time: Duration) -> Self {
        self.blocking_time = if blocking_time < MIN_BLOCKING_TIME {
            DEFAULT_BLOCKING_TIME
        } else {
            blocking_time
        };
        self
    }

    pub fn with_allowed_ports(mut self, ports: HashSet<u16>) -> Self {
        self.allowed_ports = ports;
        self
    }

    pub fn with_allow_all_ports(mut self, allow_all: bool) -> Self {
        self.allow_all_ports = allow_all;
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = address;
        self
    }

    pub fn with_sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_error_limit_normalizes_up_to_three() {
        let cfg = ServerConfig::new(vec![0; 32], 2243).with_login_error_limit(2);
        assert_eq!(cfg.login_error_limit, 3);
    }

    #[test]
    fn undersized_blocking_time_falls_back_to_ten_minutes() {
        let cfg = ServerConfig::new(vec![0; 32], 2243).with_blocking_time(Duration::from_secs(30));
        assert_eq!(cfg.blocking_time, Duration::from_secs(600));
    }
}
