//! Symmetric request/response multiplexing over one byte stream.
//!
//! Either side of a [`Connection`] can send requests and must answer the requests of its peer.
//! Responses are matched to their requests by a 32-bit identity chosen by the requester, so
//! any number of requests can be in flight at once over a single transport.
//!
//! # Overview
//!
//! Outbound, a caller's body is wrapped in a request [`Frame`], given a fresh identity and put
//! on a bounded send queue drained by the connection's send loop. Inbound, the receive loop
//! reassembles frames from transport chunks and hands each one to a bounded pool of dispatch
//! workers: requests go to the application's [`RequestHandler`] and the result is sent back as
//! a response, responses are matched against the outstanding queries and delivered to the
//! waiting caller.
//!
//! A query holds one waiter from a fixed pool for its whole lifetime, so the pool size is the
//! upper bound on concurrently outstanding queries.
//!
//! # Key Components
//!
//! - [`Connection`]: `query`, `send` and `close` over a [`Transport`].
//! - [`Frame`]: one message on the wire.
//! - [`Transport`]: the byte stream underneath, [`TcpTransport`] or [`MemoryTransport`].
//! - [`Server`]: accepts TCP peers and runs a [`Connection`] per peer.
//!
//! # Binary Format
//!
//! ```text
//! offset 0..3        kind tag: "REQ" or "RSP"
//! offset 3..7        identity, 32-bit big-endian
//! offset 7..11       body length N, 32-bit big-endian
//! offset 11..11+N    body
//! offset 11+N..+3    terminator: 0x0D 0x0D 0x0A
//! ```
//!
//! All integers are big-endian. See [`Framing`] for how frame boundaries are found.
//!
//! # Failure
//!
//! An undecodable frame is logged and dropped. A read or write error takes the whole
//! connection down: every blocked caller returns [`ConnectionError::Exited`] and the
//! [`ErrorObserver`] hears about it once.
mod buffer;
mod config;
mod connection;
mod frame;
mod handler;
mod memory;
mod registry;
mod server;
mod signal;
mod thread;
mod transport;
mod waiter;

pub use buffer::FrameBuffer;
pub use config::{
    ConnectionConfig, DEFAULT_MAX_BODY_SIZE, DEFAULT_POOL_FLOOR, DEFAULT_TIMEOUT, Framing,
};
pub use connection::{Connection, ConnectionBuilder, ConnectionError};
pub use frame::{Frame, FrameError, FrameKind, HEADER_SIZE, TERMINATOR};
pub use handler::{
    ErrorObserver, FnHandler, HandlerError, LogObserver, NoopHandler, OrphanHandler,
    RequestHandler, handler_fn,
};
pub use memory::{MemoryTransport, duplex};
pub use server::{Server, ServerHandle};
pub use transport::{MAX_READ_BUFFER, TcpTransport, Transport};
