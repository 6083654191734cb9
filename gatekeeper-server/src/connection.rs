//! Per-connection state machine (spec §4.4): `Connected → KeyExchanged →
//! LoggedIn → Closed`, command dispatch, and the key-exchange handler.
//!
//! The key-exchange envelope is decoded as raw Latin-1-reinterpreted
//! ciphertext bytes in both directions (request and reply), matching the
//! explicit description of the server-side handler; the regular per-message
//! secure envelope used for everything after login is base64, matching the
//! general WireCodec secure-envelope rule. See `DESIGN.md` for why the two
//! envelope kinds differ.

use gatekeeper_crypto::{
    double_wrap_session_key, fit_to_32, hash_access_key, latin1_decode, latin1_encode,
    random_aes_key, CryptoError, SessionCipher,
};
use gatekeeper_proto::{encode_record, encode_secure_envelope, Command, Record, SECURE_CMD};

use base64::{prelude::BASE64_STANDARD, Engine};
use subtle::ConstantTimeEq;
use tokio::time::{sleep, Duration};

use gatekeeper_driver::Driver;

use crate::abuse_guard::AbuseGuard;
use crate::config::ServerConfig;
use crate::error::GateError;

const LOGIN_PAD: Duration = Duration::from_millis(300);

/// The four connection states of spec §4.4, tagged rather than boolean flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connected,
    KeyExchanged,
    LoggedIn,
    Closed,
}

/// What processing a batch of bytes produced: zero or more lines to write,
/// and whether the socket should now be closed.
pub struct Outcome {
    pub reply: Option<Vec<u8>>,
    pub close: bool,
}

impl Outcome {
    fn reply_only(bytes: Vec<u8>) -> Self {
        Self { reply: Some(bytes), close: false }
    }

    fn close_silently() -> Self {
        Self { reply: None, close: true }
    }
}

fn utc_midnight_ms() -> i64 {
    let now = chrono::Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .timestamp_millis()
}

fn split_plain_record(s: &str) -> Record {
    match s.find(' ') {
        Some(idx) => Record {
            cmd: s[..idx].to_string(),
            args: s[idx + 1..].trim().to_string(),
        },
        None => Record { cmd: s.trim().to_string(), args: String::new() },
    }
}

fn fmt_blocked(ports: &[u16]) -> String {
    let list = ports.iter().map(u16::to_string).collect::<Vec<_>>().join(", ");
    format!("blocked: {list}")
}

fn fmt_accepts(pairs: &[(String, u16)]) -> String {
    let list = pairs
        .iter()
        .map(|(addr, port)| format!("{addr}:{port}"))
        .collect::<Vec<_>>()
        .join("; ");
    format!("accepts: {list}")
}

/// One accepted TCP connection and the state it carries across reads.
pub struct Connection {
    pub remote_addr: String,
    state: ConnState,
    login_attempts: u32,
    secure: bool,
    cipher: Option<SessionCipher>,
}

impl Connection {
    /// Build a fresh connection record for a peer at `remote_addr` (bare IP,
    /// no port — substituted for `.` in `accept`/`unaccept`).
    pub fn new(remote_addr: String, cfg: &ServerConfig) -> Result<Self, CryptoError> {
        let cipher = if cfg.secure {
            Some(SessionCipher::new(&cfg.access_key, cfg.listen_port as u32, utc_midnight_ms())?)
        } else {
            None
        };
        Ok(Self {
            remote_addr,
            state: ConnState::Connected,
            login_attempts: 0,
            secure: cfg.secure,
            cipher,
        })
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    /// Handle one already-framed `Record` read off the wire.
    pub async fn handle_record<D: Driver>(
        &mut self,
        record: Record,
        driver: &D,
        guard: &AbuseGuard,
        cfg: &ServerConfig,
    ) -> Outcome {
        if self.secure {
            self.handle_secure_record(record, driver, guard, cfg).await
        } else {
            self.dispatch(record, driver, guard, cfg, false).await
        }
    }

    async fn handle_secure_record<D: Driver>(
        &mut self,
        record: Record,
        driver: &D,
        guard: &AbuseGuard,
        cfg: &ServerConfig,
    ) -> Outcome {
        if !record.is_secure_envelope() {
            let err = GateError::MalformedInput("expected a secure envelope".to_string());
            log::debug!("[gatekeeper] {}: {err}", self.remote_addr);
            guard.record_socket_error(&self.remote_addr).await;
            self.state = ConnState::Closed;
            return Outcome::close_silently();
        }

        if self.state == ConnState::Connected {
            return self.handle_key_exchange(&record.args);
        }

        let plaintext = {
            let cipher = self.cipher.as_mut().expect("secure connection always carries a cipher");
            match cipher.chained.decrypt_message(&record.args) {
                Ok(p) => p,
                Err(e) => {
                    let err = GateError::MalformedInput(e.to_string());
                    log::debug!("[gatekeeper] {}: {err}", self.remote_addr);
                    guard.record_socket_error(&self.remote_addr).await;
                    self.state = ConnState::Closed;
                    return Outcome::close_silently();
                }
            }
        };

        let inner = split_plain_record(&plaintext);
        self.dispatch(inner, driver, guard, cfg, true).await
    }

    /// The server side of §4.4's key-exchange handshake.
    fn handle_key_exchange(&mut self, args: &str) -> Outcome {
        let exchange_ct = match latin1_encode(args) {
            Ok(b) => b,
            Err(_) => return Outcome::close_silently(),
        };

        let exchange_key = {
            let static_cipher = &self
                .cipher
                .as_ref()
                .expect("secure connection always carries a cipher")
                .static_cipher;
            match static_cipher.unwrap(&exchange_ct) {
                Ok(k) => k,
                Err(_) => return Outcome::close_silently(),
            }
        };

        let session_key = fit_to_32(&random_aes_key(Some(16)));

        let wrapped = {
            let static_cipher = &self
                .cipher
                .as_ref()
                .expect("secure connection always carries a cipher")
                .static_cipher;
            double_wrap_session_key(static_cipher, &exchange_key, &session_key)
        };
        let wrapped_latin1 = latin1_decode(&wrapped);

        let cipher = self.cipher.as_mut().expect("secure connection always carries a cipher");
        cipher.chained.set_session_key(session_key);
        self.state = ConnState::KeyExchanged;

        Outcome::reply_only(encode_record(&format!("{SECURE_CMD} {wrapped_latin1}")))
    }

    async fn dispatch<D: Driver>(
        &mut self,
        record: Record,
        driver: &D,
        guard: &AbuseGuard,
        cfg: &ServerConfig,
        secure: bool,
    ) -> Outcome {
        let cmd = match Command::parse(&record) {
            Ok(c) => c,
            Err(e) => {
                let err = GateError::MalformedInput(e.to_string());
                log::debug!("[gatekeeper] {}: {err}", self.remote_addr);
                guard.record_socket_error(&self.remote_addr).await;
                self.state = ConnState::Closed;
                return Outcome::close_silently();
            }
        };

        match cmd {
            Command::Login { digest_b64 } => {
                self.handle_login(&digest_b64, guard, cfg, secure).await
            }
            other => {
                if self.state != ConnState::LoggedIn {
                    let err = GateError::MalformedInput("operational command before login".to_string());
                    log::debug!("[gatekeeper] {}: {err}", self.remote_addr);
                    guard.record_socket_error(&self.remote_addr).await;
                    self.state = ConnState::Closed;
                    Outcome::close_silently()
                } else {
                    self.handle_operational(other, driver, cfg, secure).await
                }
            }
        }
    }

    async fn handle_login(
        &mut self,
        digest_b64: &str,
        guard: &AbuseGuard,
        cfg: &ServerConfig,
        secure: bool,
    ) -> Outcome {
        let valid_state = if secure {
            self.state == ConnState::KeyExchanged
        } else {
            self.state == ConnState::Connected
        };
        if !valid_state {
            let err = GateError::MalformedInput("login attempted in the wrong state".to_string());
            log::debug!("[gatekeeper] {}: {err}", self.remote_addr);
            guard.record_socket_error(&self.remote_addr).await;
            self.state = ConnState::Closed;
            return Outcome::close_silently();
        }

        sleep(LOGIN_PAD).await;
        self.login_attempts += 1;

        let candidate = BASE64_STANDARD.decode(digest_b64).unwrap_or_default();
        let session_key = self.cipher.as_ref().and_then(|c| c.chained.session_key());
        let expected = hash_access_key(&cfg.access_key, session_key.as_ref());

        let matches = candidate.len() == expected.len() && bool::from(candidate.ct_eq(&expected));

        let text = if matches {
            self.state = ConnState::LoggedIn;
            format!("login: true [{}]", cfg.version)
        } else {
            log::debug!("[gatekeeper] {}: {}", self.remote_addr, GateError::AuthFailure);
            "login: false".to_string()
        };

        let mut close = false;
        if !matches && self.login_attempts >= cfg.login_error_limit {
            guard.record_login_error(&self.remote_addr).await;
            self.state = ConnState::Closed;
            close = true;
        }

        match self.wrap_reply(&text, secure) {
            Ok(bytes) => Outcome { reply: Some(bytes), close },
            Err(_) => Outcome::close_silently(),
        }
    }

    async fn handle_operational<D: Driver>(
        &mut self,
        cmd: Command,
        driver: &D,
        cfg: &ServerConfig,
        secure: bool,
    ) -> Outcome {
        let allowed = &cfg.allowed_ports;
        let allow_all = cfg.allow_all_ports;
        let restrict = if allow_all { None } else { Some(allowed) };

        let text = match cmd {
            Command::ListPorts => {
                let mut ports: Vec<u16> =
                    driver.list_blocked_tcp_ports(cfg.sudo, restrict).await.into_iter().collect();
                ports.sort_unstable();
                fmt_blocked(&ports)
            }
            Command::ListAccepts => {
                let mut pairs: Vec<(String, u16)> = driver
                    .list_accepted_addresses_on_tcp_ports(cfg.sudo, restrict)
                    .await
                    .into_iter()
                    .collect();
                pairs.sort();
                fmt_accepts(&pairs)
            }
            Command::Block { port } => {
                match driver.block_tcp_port(port, cfg.sudo, allowed, allow_all).await {
                    Ok(v) => format!("block: {v}"),
                    Err(e) => {
                        let err = GateError::DriverFailure(e.to_string());
                        log::warn!("[gatekeeper] block_tcp_port({port}) failed: {err}");
                        "block: false".to_string()
                    }
                }
            }
            Command::Unblock { port } => {
                match driver.unblock_tcp_port(port, cfg.sudo, allowed, allow_all).await {
                    Ok(v) => format!("unblock: {v}"),
                    Err(e) => {
                        let err = GateError::DriverFailure(e.to_string());
                        log::warn!("[gatekeeper] unblock_tcp_port({port}) failed: {err}");
                        "unblock: false".to_string()
                    }
                }
            }
            Command::Accept { addr, port } => {
                let addr = if addr == "." { self.remote_addr.clone() } else { addr };
                match driver.accept_address_on_tcp_port(&addr, port, cfg.sudo, allowed, allow_all).await {
                    Ok(v) => format!("accepted: {v} ({addr} -> {port})"),
                    Err(e) => {
                        let err = GateError::DriverFailure(e.to_string());
                        log::warn!("[gatekeeper] accept_address_on_tcp_port({addr}, {port}) failed: {err}");
                        format!("accepted: false ({addr} -> {port})")
                    }
                }
            }
            Command::Unaccept { addr, port } => {
                let addr = if addr == "." { self.remote_addr.clone() } else { addr };
                let v = match driver
                    .unaccept_address_on_tcp_port(&addr, port, cfg.sudo, allowed, allow_all)
                    .await
                {
                    Ok(v) => v,
                    Err(e) => {
                        let err = GateError::DriverFailure(e.to_string());
                        log::warn!("[gatekeeper] unaccept_address_on_tcp_port({addr}, {port:?}) failed: {err}");
                        false
                    }
                };
                let port_display = port.map(|p| p.to_string()).unwrap_or_else(|| "null".to_string());
                format!("unaccepted: {v} ({addr} -> {port_display})")
            }
            Command::Disconnect => {
                self.state = ConnState::Closed;
                "disconnect: true".to_string()
            }
            Command::Login { .. } => unreachable!("login is dispatched separately"),
        };

        let close = self.state == ConnState::Closed;
        match self.wrap_reply(&text, secure) {
            Ok(bytes) => Outcome { reply: Some(bytes), close },
            Err(_) => Outcome { reply: None, close: true },
        }
    }

    fn wrap_reply(&mut self, text: &str, secure: bool) -> Result<Vec<u8>, CryptoError> {
        if secure {
            let ct_b64 = self
                .cipher
                .as_mut()
                .expect("secure connection always carries a cipher")
                .chained
                .encrypt_message(text)?;
            Ok(encode_secure_envelope(&ct_b64))
        } else {
            Ok(encode_record(text))
        }
    }
}
