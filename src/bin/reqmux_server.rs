use std::{
    error::Error,
    net::SocketAddr,
    sync::mpsc,
    thread,
    time::{SystemTime, UNIX_EPOCH},
};

use clap::Parser;
use log::info;
use reqmux::protocol::{ConnectionConfig, HandlerError, Server, handler_fn};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Listen for new connections at address
    address: SocketAddr,
    /// Outstanding queries allowed per connection
    #[arg(long, default_value_t = 10240)]
    pool_capacity: usize,
    /// Threads answering requests per connection
    #[arg(long, default_value_t = 16)]
    workers: usize,
}

/// `time` answers with the current UNIX time, anything else is echoed back.
fn answer(body: &[u8]) -> Result<Vec<u8>, HandlerError> {
    match body {
        b"time" => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
            Ok(format!("{}.{:03}", now.as_secs(), now.subsec_millis()).into_bytes())
        }
        other => Ok(other.to_vec()),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ConnectionConfig::default()
        .with_pool_capacity(cli.pool_capacity)
        .with_dispatch_workers(cli.workers);
    let server = Server::bind(cli.address, config, handler_fn(answer))?;
    let handle = server.handle();

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    thread::spawn(move || server.listen());

    stop_rx.recv()?;
    info!("shutting down, closing {} connections", handle.live());
    handle.close_all();
    Ok(())
}
