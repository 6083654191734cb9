//! gatekeeperd — runs the GateKeeper control-plane server against a driver.
//!
//! ```text
//! gatekeeperd --access-key "$GATEKEEPER_ACCESS_KEY" --port 2243 --allow-port 2223 --allow-port 2224
//! ```

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

use gatekeeper_driver::{MockDriver, PfDriver};
use gatekeeper_server::{GateError, ServerConfig, ServerCore};

#[derive(Parser)]
#[clap(name = "gatekeeperd", about = "Remotely-controllable TCP firewall gatekeeper", version)]
struct Args {
    /// Address to listen on
    #[clap(long, default_value = "0.0.0.0")]
    address: IpAddr,

    /// TCP port to listen on for control connections
    #[clap(short, long, default_value_t = 2243)]
    port: u16,

    /// Shared access key (≥ 32 octets); falls back to GATEKEEPER_ACCESS_KEY
    #[clap(long, env = "GATEKEEPER_ACCESS_KEY")]
    access_key: String,

    /// Disable the encrypted session channel (plaintext login only)
    #[clap(long)]
    insecure: bool,

    /// Port the core is permitted to block/accept on; may be repeated
    #[clap(long = "allow-port")]
    allowed_ports: Vec<u16>,

    /// Allow every port, ignoring --allow-port
    #[clap(long)]
    allow_all_ports: bool,

    /// Run driver commands through sudo
    #[clap(long)]
    sudo: bool,

    /// Consecutive failed logins before a remote address is blocklisted
    #[clap(long, default_value_t = 3)]
    login_error_limit: u32,

    /// Blocklist duration in seconds once triggered
    #[clap(long, default_value_t = 600)]
    blocking_time_secs: u64,

    /// Use a mock in-memory driver instead of pfctl (for local testing)
    #[clap(long)]
    mock_driver: bool,

    /// pf(4) anchor name for the real driver
    #[clap(long, default_value = "gatekeeper")]
    pf_anchor: String,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        log::error!("[gatekeeper] {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), GateError> {
    let args = Args::parse();

    if args.access_key.len() < 32 {
        eprintln!("--access-key must be at least 32 octets");
        std::process::exit(1);
    }

    let cfg = ServerConfig::new(args.access_key.into_bytes(), args.port)
        .with_address(args.address)
        .with_secure(!args.insecure)
        .with_allowed_ports(args.allowed_ports.into_iter().collect::<HashSet<u16>>())
        .with_allow_all_ports(args.allow_all_ports)
        .with_sudo(args.sudo)
        .with_login_error_limit(args.login_error_limit)
        .with_blocking_time(Duration::from_secs(args.blocking_time_secs));

    if args.mock_driver {
        ServerCore::new(cfg, MockDriver::new()).run().await
    } else {
        ServerCore::new(cfg, PfDriver::new(args.pf_anchor)).run().await
    }
}
