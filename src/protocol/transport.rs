use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    sync::{Mutex, PoisonError},
};

/// Largest chunk a single [`Transport::read`] hands out.
pub const MAX_READ_BUFFER: usize = 1024 * 1024;

/// Bidirectional byte stream a [`Connection`](super::Connection) runs over.
///
/// Errors are passed through untouched; nothing here retries.
pub trait Transport: Send + Sync + 'static {
    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn remote_addr(&self) -> io::Result<SocketAddr>;

    /// Blocks until some bytes are available and returns a copy of them.
    fn read(&self) -> io::Result<Vec<u8>>;

    /// Blocks until all of `data` is written.
    fn write(&self, data: &[u8]) -> io::Result<()>;

    /// Shuts the stream down; a blocked `read` returns with an error.
    fn close(&self);
}

pub struct TcpTransport {
    stream: TcpStream,
    buffer: Mutex<Box<[u8]>>,
    write_lock: Mutex<()>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buffer: Mutex::new(vec![0; MAX_READ_BUFFER].into_boxed_slice()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn connect(address: SocketAddr) -> io::Result<Self> {
        Ok(Self::new(TcpStream::connect(address)?))
    }
}

impl Transport for TcpTransport {
    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn read(&self) -> io::Result<Vec<u8>> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let n = (&self.stream).read(&mut buffer)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            ));
        }
        Ok(buffer[..n].to_vec())
    }

    fn write(&self, data: &[u8]) -> io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        (&self.stream).write_all(data)
    }

    fn close(&self) {
        // NotConnected only means the peer got there first.
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use std::{net::TcpListener, thread};

    use super::*;

    fn pair() -> (TcpTransport, TcpTransport) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let client = thread::spawn(move || TcpTransport::connect(address).unwrap());
        let (server, _) = listener.accept().unwrap();
        (TcpTransport::new(server), client.join().unwrap())
    }

    #[test]
    fn write_then_read() {
        let (server, client) = pair();
        assert_eq!(server.local_addr().unwrap(), client.remote_addr().unwrap());

        client.write(b"hello").unwrap();
        let mut received = Vec::new();
        while received.len() < 5 {
            received.extend(server.read().unwrap());
        }
        assert_eq!(received, b"hello");
    }

    #[test]
    fn peer_close_is_eof() {
        let (server, client) = pair();
        client.close();

        let err = server.read().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn close_unblocks_read() {
        let (server, _client) = pair();
        let server = std::sync::Arc::new(server);
        let reader = {
            let server = std::sync::Arc::clone(&server);
            thread::spawn(move || server.read())
        };

        thread::sleep(std::time::Duration::from_millis(20));
        server.close();
        assert!(reader.join().unwrap().is_err());
    }
}
