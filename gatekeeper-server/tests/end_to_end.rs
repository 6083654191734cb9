//! End-to-end scenarios (spec §8) driven against a real `TcpListener` and
//! `MockDriver`, using `gatekeeper-client` as the peer.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use gatekeeper_client::ClientCore;
use gatekeeper_driver::MockDriver;
use gatekeeper_server::{ServerConfig, ServerCore};

const ACCESS_KEY: &[u8] = b"integration-test-access-key-0123456789";

async fn spawn_server(port: u16, allowed: &[u16], secure: bool) {
    let cfg = ServerConfig::new(ACCESS_KEY.to_vec(), port)
        .with_address(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_secure(secure)
        .with_allowed_ports(allowed.iter().copied().collect::<HashSet<u16>>())
        .with_login_error_limit(3)
        .with_blocking_time(Duration::from_secs(600));

    let core = ServerCore::new(cfg, MockDriver::new());
    tokio::spawn(async move {
        let _ = core.run().await;
    });
    // give the listener a moment to bind before the first connect attempt
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn addr(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

#[tokio::test]
async fn secure_login_block_unblock_round_trip() {
    let port = 23101;
    spawn_server(port, &[2223, 2224], true).await;

    let client = ClientCore::connect(addr(port), ACCESS_KEY.to_vec(), true).await.unwrap();
    client.login().await.unwrap();

    assert!(client.block_tcp_port(2223).await.unwrap());
    let blocked = client.list_blocked_tcp_ports().await.unwrap();
    assert_eq!(blocked, vec![2223]);

    assert!(client.unblock_tcp_port(2223).await.unwrap());
    let blocked = client.list_blocked_tcp_ports().await.unwrap();
    assert!(blocked.is_empty());
}

#[tokio::test]
async fn insecure_login_list_ports_and_accepts() {
    let port = 23102;
    spawn_server(port, &[2223, 2224], false).await;

    let client = ClientCore::connect(addr(port), ACCESS_KEY.to_vec(), false).await.unwrap();
    client.login().await.unwrap();

    assert!(client.accept_address_on_tcp_port("10.0.0.5", 2224).await.unwrap());
    let accepts = client.list_accepted_addresses_on_tcp_ports().await.unwrap();
    assert_eq!(accepts, vec![("10.0.0.5".to_string(), 2224)]);

    assert!(client.unaccept_address_on_tcp_port("10.0.0.5", None).await.unwrap());
    assert!(client.list_accepted_addresses_on_tcp_ports().await.unwrap().is_empty());
}

#[tokio::test]
async fn ports_outside_the_allow_list_are_rejected_without_side_effects() {
    let port = 23103;
    spawn_server(port, &[2223], true).await;

    let client = ClientCore::connect(addr(port), ACCESS_KEY.to_vec(), true).await.unwrap();
    client.login().await.unwrap();

    // 9999 is a valid port number but not in the allow-list.
    assert!(!client.block_tcp_port(9999).await.unwrap());
    assert!(client.list_blocked_tcp_ports().await.unwrap().is_empty());
}

#[tokio::test]
async fn disconnect_closes_the_connection() {
    let port = 23104;
    spawn_server(port, &[2223], false).await;

    let client = ClientCore::connect(addr(port), ACCESS_KEY.to_vec(), false).await.unwrap();
    client.login().await.unwrap();
    client.disconnect().await.unwrap();

    // Any further call on the same connection must fail: the server has closed it.
    let err = client.block_tcp_port(2223).await;
    assert!(err.is_err());
}

#[tokio::test]
async fn oversized_garbage_line_closes_the_connection_without_a_reply() {
    let port = 23105;
    spawn_server(port, &[2223], false).await;

    let mut stream = TcpStream::connect(addr(port)).await.unwrap();
    stream.write_all(&vec![b'a'; 2000]).await.unwrap();

    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "server must close without replying to an over-long unframed line");
}

#[tokio::test]
async fn repeated_login_failures_blocklist_the_remote_address() {
    let port = 23106;
    spawn_server(port, &[2223], false).await;

    // Three wrong-digest login attempts over one connection trips the limit
    // and closes it; a brand-new connection from the same address is then
    // rejected outright (no bytes at all, not even a key-exchange reply).
    {
        let mut stream = TcpStream::connect(addr(port)).await.unwrap();
        for _ in 0..3 {
            stream.write_all(b"login AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA==\n").await.unwrap();
        }
        let mut buf = [0u8; 512];
        // drain whatever replies/close arrives; we only care about the next connection
        let _ = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf)).await;
    }

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut stream = TcpStream::connect(addr(port)).await.unwrap();
    let mut buf = [0u8; 16];
    let result = tokio::time::timeout(Duration::from_millis(500), stream.read(&mut buf)).await;
    match result {
        Ok(Ok(n)) => assert_eq!(n, 0, "blocklisted remote must get an immediate close, not a reply"),
        Ok(Err(_)) => {}
        Err(_) => panic!("blocklisted remote should be closed promptly, not left hanging"),
    }
}
