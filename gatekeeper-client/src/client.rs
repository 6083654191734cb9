//! The client side of the control channel (spec §4.7): connect, key
//! exchange, login, then one RPC at a time.
//!
//! Mirrors the shape of an MTProto `Connection` guarded by a single
//! `tokio::sync::Mutex` — every call takes the lock, writes a request, and
//! awaits exactly one reply before releasing it, so two callers can never
//! interleave requests on the same socket.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{timeout, Duration};

use base64::{prelude::BASE64_STANDARD, Engine};

use gatekeeper_crypto::{
    double_unwrap_session_key, fit_to_32, hash_access_key, latin1_decode, latin1_encode,
    random_aes_key, SessionCipher, StaticCipher,
};
use gatekeeper_proto::{encode_record, encode_secure_envelope, AccumulationBuffer, ParseOutcome, Record, SECURE_CMD};

use crate::error::ClientError;

const REPLY_TIMEOUT: Duration = Duration::from_secs(30);
const READ_BUF_LEN: usize = 4096;

fn utc_midnight_ms() -> i64 {
    let now = chrono::Utc::now();
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .timestamp_millis()
}

/// Pull every decimal run out of a `"blocked: 2223, 2224"`-shaped reply.
fn extract_ports(text: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    let mut current = String::new();
    for c in text.chars().chain(std::iter::once(' ')) {
        if c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            if let Ok(p) = current.parse() {
                ports.push(p);
            }
            current.clear();
        }
    }
    ports
}

/// Parse a `"accepts: 10.0.0.1:2223; 10.0.0.2:2224"`-shaped reply into pairs.
/// Tolerates the label being absent (bare `"<pairs>"`, per the grammar table).
fn extract_accepted_pairs(text: &str) -> Vec<(String, u16)> {
    let body = text.strip_prefix("accepts:").unwrap_or(text).trim();
    body.split(';')
        .filter_map(|chunk| {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                return None;
            }
            let (addr, port) = chunk.rsplit_once(':')?;
            let port: u16 = port.trim().parse().ok()?;
            Some((addr.trim().to_string(), port))
        })
        .collect()
}

struct Session {
    stream: TcpStream,
    buffer: AccumulationBuffer,
    cipher: Option<SessionCipher>,
    secure: bool,
}

impl Session {
    async fn write_line(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    async fn read_one_record(&mut self) -> Result<Record, ClientError> {
        let mut read_buf = [0u8; READ_BUF_LEN];
        loop {
            match self.buffer.try_parse() {
                ParseOutcome::Record(r) => return Ok(r),
                ParseOutcome::ProtocolError | ParseOutcome::Overflow => {
                    return Err(ClientError::Protocol("malformed reply framing".to_string()))
                }
                ParseOutcome::Wait => {}
            }
            let n = self.stream.read(&mut read_buf).await?;
            if n == 0 {
                return Err(ClientError::Transport(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "server closed the connection",
                )));
            }
            self.buffer.push(&read_buf[..n]);
        }
    }

    /// Send `text` as one request and return the server's decoded reply text.
    async fn roundtrip(&mut self, text: &str) -> Result<String, ClientError> {
        let line = if self.secure {
            let ct_b64 = self
                .cipher
                .as_mut()
                .expect("secure session always carries a cipher")
                .chained
                .encrypt_message(text)?;
            encode_secure_envelope(&ct_b64)
        } else {
            encode_record(text)
        };
        self.write_line(&line).await?;

        let record = self.read_one_record().await?;
        if self.secure {
            if !record.is_secure_envelope() {
                return Err(ClientError::Protocol("expected a secure envelope reply".to_string()));
            }
            let cipher = self.cipher.as_mut().expect("secure session always carries a cipher");
            Ok(cipher.chained.decrypt_message(&record.args)?)
        } else {
            Ok(format!("{} {}", record.cmd, record.args))
        }
    }

    /// The client side of §4.2's key-exchange handshake. Both directions use
    /// the raw Latin-1 envelope (see `gatekeeper-server::connection` for why).
    async fn key_exchange(&mut self, access_key: &[u8]) -> Result<(), ClientError> {
        let static_cipher = StaticCipher::new(access_key)?;
        let exchange_key = fit_to_32(&random_aes_key(Some(16)));

        let wrapped = static_cipher.wrap(&exchange_key);
        let wrapped_latin1 = latin1_decode(&wrapped);
        let request = encode_record(&format!("{SECURE_CMD} {wrapped_latin1}"));
        self.write_line(&request).await?;

        let record = self.read_one_record().await?;
        if !record.is_secure_envelope() {
            return Err(ClientError::Protocol("expected the key-exchange reply envelope".to_string()));
        }
        let reply_bytes = latin1_encode(&record.args)?;
        let session_key = double_unwrap_session_key(&static_cipher, &exchange_key, &reply_bytes)?;

        let cipher = self.cipher.as_mut().expect("secure session always carries a cipher");
        cipher.chained.set_session_key(session_key);
        Ok(())
    }
}

/// A logged-in (or login-in-progress) connection to a gatekeeper server.
pub struct ClientCore {
    session: Mutex<Session>,
    access_key: Vec<u8>,
}

impl ClientCore {
    /// Connect, perform key exchange if `secure`, but do not log in yet.
    pub async fn connect(addr: SocketAddr, access_key: Vec<u8>, secure: bool) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        let seed1 = addr.port() as u32;
        let seed2 = utc_midnight_ms();

        let cipher = if secure { Some(SessionCipher::new(&access_key, seed1, seed2)?) } else { None };

        let mut session = Session { stream, buffer: AccumulationBuffer::new(), cipher, secure };
        if secure {
            session.key_exchange(&access_key).await?;
            log::debug!("[gatekeeper-client] key exchange with {addr} complete");
        }

        Ok(Self { session: Mutex::new(session), access_key })
    }

    async fn call(&self, text: &str) -> Result<String, ClientError> {
        let mut session = self.session.lock().await;
        timeout(REPLY_TIMEOUT, session.roundtrip(text)).await.map_err(|_| ClientError::Timeout)?
    }

    /// Prove knowledge of the access key. Must be called before any
    /// operational command.
    pub async fn login(&self) -> Result<(), ClientError> {
        let session_key = {
            let session = self.session.lock().await;
            session.cipher.as_ref().and_then(|c| c.chained.session_key())
        };
        let digest = hash_access_key(&self.access_key, session_key.as_ref());
        let digest_b64 = BASE64_STANDARD.encode(digest);

        let reply = self.call(&format!("login {digest_b64}")).await?;
        if reply.starts_with("login: true") {
            Ok(())
        } else {
            log::warn!("[gatekeeper-client] login rejected");
            Err(ClientError::AuthRejected)
        }
    }

    /// `list ports` — every TCP port currently blocked.
    pub async fn list_blocked_tcp_ports(&self) -> Result<Vec<u16>, ClientError> {
        let reply = self.call("list ports").await?;
        Ok(extract_ports(&reply))
    }

    /// `list accepts` — every `(address, port)` pair exempted from a block.
    pub async fn list_accepted_addresses_on_tcp_ports(&self) -> Result<Vec<(String, u16)>, ClientError> {
        let reply = self.call("list accepts").await?;
        Ok(extract_accepted_pairs(&reply))
    }

    /// `block <port>`.
    pub async fn block_tcp_port(&self, port: u16) -> Result<bool, ClientError> {
        let reply = self.call(&format!("block {port}")).await?;
        Ok(reply.contains("true"))
    }

    /// `unblock <port>`.
    pub async fn unblock_tcp_port(&self, port: u16) -> Result<bool, ClientError> {
        let reply = self.call(&format!("unblock {port}")).await?;
        Ok(reply.contains("true"))
    }

    /// `accept <addr> <port>`. Pass `"."` for `addr` to mean "my own address".
    pub async fn accept_address_on_tcp_port(&self, addr: &str, port: u16) -> Result<bool, ClientError> {
        let reply = self.call(&format!("accept {addr} {port}")).await?;
        Ok(reply.contains("true"))
    }

    /// `unaccept <addr> [<port>]`.
    pub async fn unaccept_address_on_tcp_port(&self, addr: &str, port: Option<u16>) -> Result<bool, ClientError> {
        let text = match port {
            Some(p) => format!("unaccept {addr} {p}"),
            None => format!("unaccept {addr}"),
        };
        let reply = self.call(&text).await?;
        Ok(reply.contains("true"))
    }

    /// `disconnect` — ask the server to close the connection.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let _ = self.call("disconnect x").await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_decimal_runs_from_blocked_reply() {
        assert_eq!(extract_ports("blocked: 2223, 2224, 8080"), vec![2223, 2224, 8080]);
        assert_eq!(extract_ports("blocked: "), Vec::<u16>::new());
    }

    #[test]
    fn extracts_addr_port_pairs_from_accepts_reply() {
        let pairs = extract_accepted_pairs("accepts: 10.0.0.1:2223; 10.0.0.2:2224");
        assert_eq!(pairs, vec![("10.0.0.1".to_string(), 2223), ("10.0.0.2".to_string(), 2224)]);
    }

    #[test]
    fn extracts_pairs_without_a_label() {
        let pairs = extract_accepted_pairs("10.0.0.1:2223");
        assert_eq!(pairs, vec![("10.0.0.1".to_string(), 2223)]);
    }

    #[test]
    fn empty_accepts_list_yields_no_pairs() {
        assert_eq!(extract_accepted_pairs("accepts: "), Vec::<(String, u16)>::new());
    }
}
