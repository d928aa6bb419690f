use std::{
    io,
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{Arc, Mutex, PoisonError},
};

use log::{debug, info, warn};

use super::{Connection, ConnectionConfig, RequestHandler, TcpTransport};

/// Accepts TCP peers and serves each one over its own [`Connection`].
pub struct Server {
    listener: TcpListener,
    config: ConnectionConfig,
    handler: Arc<dyn RequestHandler>,
    connections: Arc<Mutex<Vec<Connection>>>,
}

/// Reaches into a running [`Server`] from another thread.
#[derive(Clone)]
pub struct ServerHandle {
    connections: Arc<Mutex<Vec<Connection>>>,
}

impl Server {
    pub fn bind(
        address: SocketAddr,
        config: ConnectionConfig,
        handler: impl RequestHandler,
    ) -> io::Result<Self> {
        Ok(Self {
            listener: TcpListener::bind(address)?,
            config,
            handler: Arc::new(handler),
            connections: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            connections: Arc::clone(&self.connections),
        }
    }

    pub fn listen(self) -> io::Result<()> {
        info!("listening at {}", self.listener.local_addr()?);

        for stream in self.listener.incoming() {
            match stream {
                Ok(stream) => {
                    if let Err(e) = self.serve(stream) {
                        warn!("failed to start connection: {e}");
                    }
                }
                Err(e) => warn!("broken connection: {e:?}"),
            }
        }
        Ok(())
    }

    fn serve(&self, stream: TcpStream) -> io::Result<()> {
        let peer = stream.peer_addr()?;
        let connection = Connection::builder(TcpTransport::new(stream))
            .config(self.config.clone())
            .shared_handler(Arc::clone(&self.handler))
            .spawn()?;
        info!("connected from {peer}");

        let closed = {
            let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
            let (closed, live): (Vec<_>, Vec<_>) =
                connections.drain(..).partition(Connection::is_closed);
            *connections = live;
            connections.push(connection);
            closed
        };
        reap(closed);
        Ok(())
    }
}

/// Drops connections outside the server lock: dropping joins their loops.
fn reap(closed: Vec<Connection>) {
    for connection in closed {
        debug!("reaping connection to {:?}", connection.remote_addr().ok());
        drop(connection);
    }
}

impl ServerHandle {
    /// Connections accepted and not yet gone down.
    pub fn live(&self) -> usize {
        let connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
        connections.iter().filter(|c| !c.is_closed()).count()
    }

    /// Closes every tracked connection.
    pub fn close_all(&self) {
        let drained: Vec<Connection> = {
            let mut connections = self.connections.lock().unwrap_or_else(PoisonError::into_inner);
            connections.drain(..).collect()
        };
        for connection in drained {
            info!("closing connection to {:?}", connection.remote_addr().ok());
            connection.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        thread,
        time::{Duration, Instant},
    };

    use crate::protocol::{NoopHandler, handler_fn};

    use super::*;

    #[test]
    fn accepting_does_not_wait_for_closed_connections_to_drain() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);
        let server = Server::bind(
            "127.0.0.1:0".parse().unwrap(),
            ConnectionConfig::default(),
            handler_fn(move |_: &[u8]| {
                let _ = entered_tx.send(());
                let _ = release_rx.lock().unwrap().recv();
                Ok(Vec::new())
            }),
        )
        .unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.handle();
        thread::spawn(move || server.listen());

        // Leave a handler stuck on the first connection, then hang up on it.
        let first = Connection::new(TcpTransport::connect(address).unwrap(), NoopHandler).unwrap();
        first.send(b"stall").unwrap();
        entered_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        drop(first);

        let deadline = Instant::now() + Duration::from_secs(1);
        while handle.live() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.live(), 0);

        // Accepting the next peer reaps the first connection, whose handler is still stuck.
        let _second =
            Connection::new(TcpTransport::connect(address).unwrap(), NoopHandler).unwrap();
        let (live_tx, live_rx) = mpsc::channel();
        {
            let handle = handle.clone();
            thread::spawn(move || {
                let deadline = Instant::now() + Duration::from_secs(1);
                while handle.live() < 1 && Instant::now() < deadline {
                    thread::sleep(Duration::from_millis(5));
                }
                live_tx.send(handle.live()).unwrap();
            });
        }
        let live = live_rx.recv_timeout(Duration::from_secs(2));

        release_tx.send(()).unwrap();
        assert_eq!(live, Ok(1));
        handle.close_all();
    }

    #[test]
    fn serves_many_clients() {
        let address: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Server::bind(
            address,
            ConnectionConfig::default(),
            handler_fn(|body: &[u8]| Ok([&b"re: "[..], body].concat())),
        )
        .unwrap();
        let address = server.local_addr().unwrap();
        let handle = server.handle();
        thread::spawn(move || server.listen());

        let clients: Vec<Connection> = (0..3)
            .map(|_| Connection::new(TcpTransport::connect(address).unwrap(), NoopHandler).unwrap())
            .collect();

        for (i, client) in clients.iter().enumerate() {
            let body = format!("client {i}");
            let rsp = client.query(body.as_bytes(), Duration::from_secs(1)).unwrap();
            assert_eq!(rsp, format!("re: client {i}").into_bytes());
        }
        let deadline = Instant::now() + Duration::from_secs(1);
        while handle.live() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(handle.live(), 3);

        handle.close_all();
        assert_eq!(handle.live(), 0);

        let deadline = Instant::now() + Duration::from_secs(1);
        while clients.iter().any(|c| !c.is_closed()) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(clients.iter().all(Connection::is_closed));
    }
}
