//! In-process transport pair, handy for tests and for wiring two connections together.
use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::{Mutex, PoisonError},
};

use crossbeam_channel::{Receiver, Sender};

use super::{Transport, signal::ExitSignal};

/// One end of a [`duplex`] pair.
#[derive(Debug)]
pub struct MemoryTransport {
    local: SocketAddr,
    remote: SocketAddr,
    outgoing: Mutex<Option<Sender<Vec<u8>>>>,
    incoming: Receiver<Vec<u8>>,
    closed: ExitSignal,
}

/// Creates two transports connected back to back.
pub fn duplex() -> (MemoryTransport, MemoryTransport) {
    let a_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 1));
    let b_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 2));
    let (a_tx, b_rx) = crossbeam_channel::unbounded();
    let (b_tx, a_rx) = crossbeam_channel::unbounded();

    (
        MemoryTransport::new(a_addr, b_addr, a_tx, a_rx),
        MemoryTransport::new(b_addr, a_addr, b_tx, b_rx),
    )
}

impl MemoryTransport {
    fn new(
        local: SocketAddr,
        remote: SocketAddr,
        outgoing: Sender<Vec<u8>>,
        incoming: Receiver<Vec<u8>>,
    ) -> Self {
        Self {
            local,
            remote,
            outgoing: Mutex::new(Some(outgoing)),
            incoming,
            closed: ExitSignal::new(),
        }
    }
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.local)
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.remote)
    }

    fn read(&self) -> io::Result<Vec<u8>> {
        if self.closed.is_raised() {
            return Err(io::ErrorKind::NotConnected.into());
        }

        crossbeam_channel::select! {
            recv(self.incoming) -> chunk => chunk.map_err(|_| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by peer")
            }),
            recv(self.closed.listener()) -> _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        let outgoing = self.outgoing.lock().unwrap_or_else(PoisonError::into_inner);
        match outgoing.as_ref() {
            Some(sender) => sender
                .send(data.to_vec())
                .map_err(|_| io::ErrorKind::BrokenPipe.into()),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn close(&self) {
        self.closed.raise();
        self.outgoing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
