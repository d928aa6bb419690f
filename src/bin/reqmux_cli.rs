use std::{error::Error, io, net::SocketAddr, time::Duration};

use clap::Parser;
use reqmux::{
    Command, prompt,
    protocol::{Connection, ConnectionConfig, HandlerError, TcpTransport, handler_fn},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of a reqmux server
    address: SocketAddr,
    /// Query timeout in milliseconds; 0 uses the default of 5s
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let timeout = Duration::from_millis(cli.timeout_ms);

    // Requests from the server are printed and acknowledged.
    let connection = Connection::builder(TcpTransport::connect(cli.address)?)
        .config(ConnectionConfig::default())
        .handler(handler_fn(|body: &[u8]| -> Result<Vec<u8>, HandlerError> {
            println!("\n<< {}", String::from_utf8_lossy(body));
            Ok(Vec::new())
        }))
        .spawn()?;
    println!(
        "connected {} -> {}",
        connection.local_addr()?,
        connection.remote_addr()?
    );

    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Send(body) => {
                if let Err(e) = connection.send(body.as_bytes()) {
                    eprintln!("send error: {e}");
                }
            }
            Command::Query(body) => match connection.query(body.as_bytes(), timeout) {
                Ok(rsp) => println!("{}", String::from_utf8_lossy(&rsp)),
                Err(e) => eprintln!("query error: {e}"),
            },
        }

        if connection.is_closed() {
            eprintln!("connection closed by server");
            break;
        }
    }

    connection.close();
    Ok(())
}
