//! gatekeeper-cli — a one-shot demo client.
//!
//! ```text
//! gatekeeper-cli --host 127.0.0.1 --port 2243 --access-key "$GATEKEEPER_ACCESS_KEY" block 2223
//! ```

use std::net::{IpAddr, SocketAddr};

use clap::{Parser, Subcommand};

use gatekeeper_client::{ClientCore, ClientError};

#[derive(Parser)]
#[clap(name = "gatekeeper-cli", about = "Talk to a gatekeeper server over the control channel", version)]
struct Args {
    /// Server address
    #[clap(long, default_value = "127.0.0.1")]
    host: IpAddr,

    /// Server control port
    #[clap(short, long, default_value_t = 2243)]
    port: u16,

    /// Shared access key; falls back to GATEKEEPER_ACCESS_KEY
    #[clap(long, env = "GATEKEEPER_ACCESS_KEY")]
    access_key: String,

    /// Skip key exchange and speak the plaintext login variant
    #[clap(long)]
    insecure: bool,

    #[clap(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// `list ports`
    ListPorts,
    /// `list accepts`
    ListAccepts,
    /// `block <port>`
    Block { port: u16 },
    /// `unblock <port>`
    Unblock { port: u16 },
    /// `accept <addr> <port>`
    Accept { addr: String, port: u16 },
    /// `unaccept <addr> [<port>]`
    Unaccept { addr: String, port: Option<u16> },
    /// `disconnect`
    Disconnect,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        eprintln!("gatekeeper-cli: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ClientError> {
    let args = Args::parse();
    let addr = SocketAddr::new(args.host, args.port);

    let client = ClientCore::connect(addr, args.access_key.into_bytes(), !args.insecure).await?;
    client.login().await?;

    match args.command {
        Cmd::ListPorts => {
            let ports = client.list_blocked_tcp_ports().await?;
            println!("blocked: {ports:?}");
        }
        Cmd::ListAccepts => {
            let pairs = client.list_accepted_addresses_on_tcp_ports().await?;
            println!("accepts: {pairs:?}");
        }
        Cmd::Block { port } => println!("block: {}", client.block_tcp_port(port).await?),
        Cmd::Unblock { port } => println!("unblock: {}", client.unblock_tcp_port(port).await?),
        Cmd::Accept { addr, port } => {
            println!("accept: {}", client.accept_address_on_tcp_port(&addr, port).await?)
        }
        Cmd::Unaccept { addr, port } => {
            println!("unaccept: {}", client.unaccept_address_on_tcp_port(&addr, port).await?)
        }
        Cmd::Disconnect => {
            client.disconnect().await?;
            println!("disconnect: true");
        }
    }

    Ok(())
}
