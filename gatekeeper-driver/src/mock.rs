//! In-memory driver backed by two `HashSet`s, for tests and local dry-runs.

use std::collections::HashSet;

use tokio::sync::Mutex;

use crate::{check_addr, check_port, port_allowed, Driver, DriverError};

/// An in-memory stand-in for a real packet-filter backend.
///
/// Mirrors the shape of the workspace's other test doubles: no process I/O,
/// deterministic, safe to construct and tear down per test.
#[derive(Default)]
pub struct MockDriver {
    blocked: Mutex<HashSet<u16>>,
    accepted: Mutex<HashSet<(String, u16)>>,
}

impl MockDriver {
    /// A fresh driver with no rules in force.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Driver for MockDriver {
    async fn resolve(&self) -> bool {
        true
    }

    async fn list_blocked_tcp_ports(
        &self,
        _sudo: bool,
        allowed_ports: Option<&HashSet<u16>>,
    ) -> HashSet<u16> {
        let blocked = self.blocked.lock().await;
        match allowed_ports {
            None => blocked.clone(),
            Some(allowed) => blocked.intersection(allowed).copied().collect(),
        }
    }

    async fn list_accepted_addresses_on_tcp_ports(
        &self,
        _sudo: bool,
        allowed_ports: Option<&HashSet<u16>>,
    ) -> HashSet<(String, u16)> {
        let accepted = self.accepted.lock().await;
        match allowed_ports {
            None => accepted.clone(),
            Some(allowed) => accepted
                .iter()
                .filter(|(_, port)| allowed.contains(port))
                .cloned()
                .collect(),
        }
    }

    async fn block_tcp_port(
        &self,
        port: u16,
        _sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError> {
        check_port(port)?;
        if !port_allowed(port, allowed_ports, allow_all_ports) {
            return Ok(false);
        }
        self.blocked.lock().await.insert(port);
        Ok(true)
    }

    async fn unblock_tcp_port(
        &self,
        port: u16,
        _sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError> {
        check_port(port)?;
        if !port_allowed(port, allowed_ports, allow_all_ports) {
            return Ok(false);
        }
        self.blocked.lock().await.remove(&port);
        Ok(true)
    }

    async fn accept_address_on_tcp_port(
        &self,
        addr: &str,
        port: u16,
        _sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError> {
        check_addr(addr)?;
        check_port(port)?;
        if !port_allowed(port, allowed_ports, allow_all_ports) {
            return Ok(false);
        }
        self.accepted
            .lock()
            .await
            .insert((addr.to_string(), port));
        Ok(true)
    }

    async fn unaccept_address_on_tcp_port(
        &self,
        addr: &str,
        port: Option<u16>,
        _sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError> {
        if let Some(p) = port {
            check_port(p)?;
            if !port_allowed(p, allowed_ports, allow_all_ports) {
                return Ok(false);
            }
        }
        let mut accepted = self.accepted.lock().await;
        match port {
            Some(p) => {
                accepted.remove(&(addr.to_string(), p));
            }
            None => {
                accepted.retain(|(a, _)| a != addr);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn block_then_list_reflects_the_rule() {
        let driver = MockDriver::new();
        let allowed: HashSet<u16> = [2223, 2224].into_iter().collect();
        assert_eq!(
            driver.block_tcp_port(2223, false, &allowed, false).await,
            Ok(true)
        );
        let blocked = driver.list_blocked_tcp_ports(false, None).await;
        assert!(blocked.contains(&2223));
    }

    #[tokio::test]
    async fn block_outside_allow_list_is_rejected_without_side_effects() {
        let driver = MockDriver::new();
        let allowed: HashSet<u16> = [2223, 2224].into_iter().collect();
        assert_eq!(
            driver.block_tcp_port(222, false, &allowed, false).await,
            Ok(false)
        );
        assert!(driver.list_blocked_tcp_ports(false, None).await.is_empty());
    }

    #[tokio::test]
    async fn block_below_min_port_is_invalid() {
        let driver = MockDriver::new();
        let allowed: HashSet<u16> = [2223].into_iter().collect();
        assert_eq!(
            driver.block_tcp_port(9, false, &allowed, false).await,
            Err(DriverError::InvalidPort(9))
        );
    }

    #[tokio::test]
    async fn accept_rejects_a_non_ip_address() {
        let driver = MockDriver::new();
        let allowed: HashSet<u16> = [2223].into_iter().collect();
        assert_eq!(
            driver.accept_address_on_tcp_port("not-an-ip", 2223, false, &allowed, false).await,
            Err(DriverError::InvalidAddress("not-an-ip".to_string()))
        );
    }

    #[tokio::test]
    async fn unaccept_without_port_removes_address_everywhere() {
        let driver = MockDriver::new();
        let allowed: HashSet<u16> = [2223, 2224].into_iter().collect();
        driver
            .accept_address_on_tcp_port("10.0.0.1", 2223, false, &allowed, false)
            .await
            .unwrap();
        driver
            .accept_address_on_tcp_port("10.0.0.1", 2224, false, &allowed, false)
            .await
            .unwrap();
        driver
            .unaccept_address_on_tcp_port("10.0.0.1", None, false, &allowed, false)
            .await
            .unwrap();
        assert!(driver
            .list_accepted_addresses_on_tcp_ports(false, None)
            .await
            .is_empty());
    }
}
