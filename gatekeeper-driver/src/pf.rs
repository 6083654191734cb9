//! Driver that shells out to `pfctl` (BSD packet filter) to enforce rules.
//!
//! Keeps an in-memory mirror of the rule set and re-renders the anchor's
//! ruleset on every mutation, piping it to `pfctl -a <anchor> -f -` rather
//! than hand-editing individual rules — simpler to keep correct than
//! incremental `pfctl` table edits, at the cost of a full reload per call.

use std::collections::HashSet;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::{check_addr, check_port, port_allowed, Driver, DriverError};

/// Shells to `pfctl`, targeting a private anchor so the host's own ruleset
/// is left untouched outside what this driver manages.
pub struct PfDriver {
    anchor: String,
    sudo_cmd: String,
    blocked: Mutex<HashSet<u16>>,
    accepted: Mutex<HashSet<(String, u16)>>,
}

impl PfDriver {
    /// `anchor` is the pf anchor name this driver owns exclusively.
    pub fn new(anchor: impl Into<String>) -> Self {
        Self {
            anchor: anchor.into(),
            sudo_cmd: "sudo".to_string(),
            blocked: Mutex::new(HashSet::new()),
            accepted: Mutex::new(HashSet::new()),
        }
    }

    fn render_ruleset(blocked: &HashSet<u16>, accepted: &HashSet<(String, u16)>) -> String {
        let mut rules = String::new();
        for (addr, port) in accepted {
            rules.push_str(&format!("pass in proto tcp from {addr} to any port {port}\n"));
        }
        let mut ports: Vec<&u16> = blocked.iter().collect();
        ports.sort();
        for port in ports {
            rules.push_str(&format!("block in proto tcp to any port {port}\n"));
        }
        rules
    }

    async fn run(&self, sudo: bool, args: &[&str], stdin_data: Option<&str>) -> Result<(), DriverError> {
        let mut command = if sudo {
            let mut c = Command::new(&self.sudo_cmd);
            c.arg("pfctl");
            c
        } else {
            Command::new("pfctl")
        };
        command.args(args);
        if stdin_data.is_some() {
            command.stdin(Stdio::piped());
        }
        command.stdout(Stdio::null()).stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| DriverError::Backend(format!("spawn pfctl failed: {e}")))?;

        if let Some(data) = stdin_data {
            let mut stdin = child.stdin.take().expect("stdin was piped");
            stdin
                .write_all(data.as_bytes())
                .await
                .map_err(|e| DriverError::Backend(format!("write to pfctl failed: {e}")))?;
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| DriverError::Backend(format!("pfctl did not exit: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::warn!("[gatekeeper] pfctl failed: {stderr}");
            return Err(DriverError::Backend(stderr.trim().to_string()));
        }
        Ok(())
    }

    async fn sync(&self, sudo: bool) -> Result<(), DriverError> {
        let blocked = self.blocked.lock().await;
        let accepted = self.accepted.lock().await;
        let rules = Self::render_ruleset(&blocked, &accepted);
        self.run(sudo, &["-a", &self.anchor, "-f", "-"], Some(&rules))
            .await
    }
}

impl Driver for PfDriver {
    async fn resolve(&self) -> bool {
        self.run(false, &["-s", "info"], None).await.is_ok()
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
        sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError> {
        check_port(port)?;
        if !port_allowed(port, allowed_ports, allow_all_ports) {
            return Ok(false);
        }
        self.blocked.lock().await.insert(port);
        self.sync(sudo).await?;
        Ok(true)
    }

    async fn unblock_tcp_port(
        &self,
        port: u16,
        sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError> {
        check_port(port)?;
        if !port_allowed(port, allowed_ports, allow_all_ports) {
            return Ok(false);
        }
        self.blocked.lock().await.remove(&port);
        self.sync(sudo).await?;
        Ok(true)
    }

    async fn accept_address_on_tcp_port(
        &self,
        addr: &str,
        port: u16,
        sudo: bool,
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
        self.sync(sudo).await?;
        Ok(true)
    }

    async fn unaccept_address_on_tcp_port(
        &self,
        addr: &str,
        port: Option<u16>,
        sudo: bool,
        allowed_ports: &HashSet<u16>,
        allow_all_ports: bool,
    ) -> Result<bool, DriverError> {
        if let Some(p) = port {
            check_port(p)?;
            if !port_allowed(p, allowed_ports, allow_all_ports) {
                return Ok(false);
            }
        }
        {
            let mut accepted = self.accepted.lock().await;
            match port {
                Some(p) => {
                    accepted.remove(&(addr.to_string(), p));
                }
                None => {
                    accepted.retain(|(a, _)| a != addr);
                }
            }
        }
        self.sync(sudo).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ruleset_renders_accept_before_block() {
        let mut blocked = HashSet::new();
        blocked.insert(2223u16);
        let mut accepted = HashSet::new();
        accepted.insert(("10.0.0.1".to_string(), 2223u16));

        let rendered = PfDriver::render_ruleset(&blocked, &accepted);
        let accept_pos = rendered.find("pass in").unwrap();
        let block_pos = rendered.find("block in").unwrap();
        assert!(accept_pos < block_pos);
    }

    #[tokio::test]
    async fn accept_rejects_an_address_carrying_a_newline() {
        let driver = PfDriver::new("gatekeeper-test");
        let allowed: HashSet<u16> = [2223].into_iter().collect();
        let injected = "10.0.0.1\npass in proto tcp from any to any port 22";
        assert_eq!(
            driver.accept_address_on_tcp_port(injected, 2223, false, &allowed, false).await,
            Err(DriverError::InvalidAddress(injected.to_string()))
        );
    }

    #[tokio::test]
    async fn accept_rejects_a_non_ip_hostname() {
        let driver = PfDriver::new("gatekeeper-test");
        let allowed: HashSet<u16> = [2223].into_iter().collect();
        assert!(driver
            .accept_address_on_tcp_port("example.com", 2223, false, &allowed, false)
            .await
            .is_err());
    }
}
