//! The accept loop (spec §4.6): binds the listener, resolves the driver, and
//! spawns one supervised task per connection. A panic inside a handler is
//! logged and never brings down the listener.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep_until, Duration, Instant};

use gatekeeper_driver::Driver;
use gatekeeper_proto::{AccumulationBuffer, ParseOutcome};

use crate::abuse_guard::AbuseGuard;
use crate::config::ServerConfig;
use crate::connection::{ConnState, Connection};
use crate::error::GateError;

const NON_LOGIN_WATCHDOG: Duration = Duration::from_secs(30);
const READ_BUF_LEN: usize = 4096;

/// Owns the listener plus the cross-connection shared state (driver handle,
/// `AbuseGuard`).
pub struct ServerCore<D: Driver + 'static> {
    cfg: Arc<ServerConfig>,
    driver: Arc<D>,
    guard: Arc<AbuseGuard>,
}

impl<D: Driver + 'static> ServerCore<D> {
    pub fn new(cfg: ServerConfig, driver: D) -> Self {
        let guard = AbuseGuard::new(cfg.blocking_time);
        Self { cfg: Arc::new(cfg), driver: Arc::new(driver), guard: Arc::new(guard) }
    }

    /// Bind and serve until the listener itself errors.
    pub async fn run(&self) -> Result<(), GateError> {
        if !self.driver.resolve().await {
            return Err(GateError::InternalFault("driver failed to resolve".to_string()));
        }

        let addr = SocketAddr::new(self.cfg.address, self.cfg.listen_port);
        let listener = TcpListener::bind(addr).await?;
        log::info!("[gatekeeper] listening on {addr}");

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    log::error!("[gatekeeper] accept failed: {}", GateError::from(e));
                    continue;
                }
            };

            let cfg = self.cfg.clone();
            let driver = self.driver.clone();
            let guard = self.guard.clone();

            tokio::spawn(async move {
                let handle = tokio::spawn(handle_connection(socket, peer, cfg, driver, guard));
                if let Err(join_err) = handle.await {
                    log::error!("[gatekeeper] connection task panicked: {join_err}");
                }
            });
        }
    }
}

async fn handle_connection<D: Driver>(
    mut socket: TcpStream,
    peer: SocketAddr,
    cfg: Arc<ServerConfig>,
    driver: Arc<D>,
    guard: Arc<AbuseGuard>,
) {
    let remote_addr = peer.ip().to_string();

    if guard.is_blocked(&remote_addr).await {
        log::warn!("[gatekeeper] rejecting blocked remote {remote_addr}");
        return;
    }

    let mut connection = match Connection::new(remote_addr.clone(), &cfg) {
        Ok(c) => c,
        Err(e) => {
            let err = GateError::InternalFault(e.to_string());
            log::error!("[gatekeeper] failed to initialize session cipher for {remote_addr}: {err}");
            return;
        }
    };

    let mut buffer = AccumulationBuffer::new();
    let mut read_buf = [0u8; READ_BUF_LEN];
    let login_deadline = Instant::now() + NON_LOGIN_WATCHDOG;

    loop {
        let read_result = if connection.state() == ConnState::LoggedIn {
            socket.read(&mut read_buf).await
        } else {
            tokio::select! {
                res = socket.read(&mut read_buf) => res,
                _ = sleep_until(login_deadline) => {
                    log::info!("[gatekeeper] {remote_addr}: {}", GateError::TimeoutFailure);
                    guard.record_socket_error(&remote_addr).await;
                    return;
                }
            }
        };

        let n = match read_result {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                log::warn!("[gatekeeper] read error from {remote_addr}: {}", GateError::from(e));
                guard.record_socket_error(&remote_addr).await;
                return;
            }
        };

        buffer.push(&read_buf[..n]);

        loop {
            match buffer.try_parse() {
                ParseOutcome::Wait => break,
                ParseOutcome::Overflow | ParseOutcome::ProtocolError => {
                    let err = GateError::MalformedInput("framing overflow or parse error".to_string());
                    log::debug!("[gatekeeper] {remote_addr}: {err}");
                    guard.record_socket_error(&remote_addr).await;
                    return;
                }
                ParseOutcome::Record(record) => {
                    let outcome =
                        connection.handle_record(record, driver.as_ref(), &guard, &cfg).await;
                    if let Some(bytes) = outcome.reply {
                        if let Err(e) = socket.write_all(&bytes).await {
                            log::warn!("[gatekeeper] write error to {remote_addr}: {}", GateError::from(e));
                            return;
                        }
                    }
                    if outcome.close {
                        return;
                    }
                }
            }
        }
    }
}
