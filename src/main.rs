use std::env;
use std::net::{Ipv4Addr, SocketAddr};

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use relaycast::server::Server;
use relaycast::shutdown;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(arg) = env::args().nth(1) else {
        eprintln!("usage: relaycast <listen-port>");
        return Ok(());
    };
    let port: u16 = match arg.parse() {
        Ok(port) if port > 0 => port,
        _ => {
            eprintln!("invalid listen port: {arg}");
            return Ok(());
        }
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let mut server = Server::bind(addr)?;
    shutdown::watch_signals(server.shutdown_handle())?;

    info!(port, "listening");
    server.run()
}
