//! The multiplexed connection: queries out, requests in, both over one transport.
use std::{
    fmt, io,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, trace, warn};
use thiserror::Error;

use super::{
    ConnectionConfig, ErrorObserver, LogObserver, NoopHandler, OrphanHandler, RequestHandler,
    Transport,
    buffer::FrameBuffer,
    frame::{Frame, FrameError, FrameKind},
    registry::{Delivery, Registry},
    signal::ExitSignal,
    thread::ThreadPool,
    waiter::WaiterPool,
};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection exited")]
    Exited,

    #[error("query timed out")]
    Timeout,

    #[error("no applicant found for response {0}")]
    AppNotFound(u32),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Both ends may query and both ends answer; see [`Connection::query`].
///
/// Dropping the connection closes it.
pub struct Connection {
    shared: Arc<Shared>,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    transport: Box<dyn Transport>,
    config: ConnectionConfig,
    handler: Arc<dyn RequestHandler>,
    orphans: Option<Box<dyn OrphanHandler>>,
    observer: Box<dyn ErrorObserver>,
    waiters: WaiterPool,
    registry: Registry,
    outbound: Sender<Vec<u8>>,
    identity: AtomicU32,
    exit: ExitSignal,
    transport_closed: AtomicBool,
    /// Threads of the dispatch pool, which must never wait for the receive loop.
    dispatchers: Vec<ThreadId>,
}

/// Assembles a [`Connection`] and starts its loops.
pub struct ConnectionBuilder {
    transport: Box<dyn Transport>,
    config: ConnectionConfig,
    handler: Arc<dyn RequestHandler>,
    orphans: Option<Box<dyn OrphanHandler>>,
    observer: Box<dyn ErrorObserver>,
}

impl ConnectionBuilder {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn handler(self, handler: impl RequestHandler) -> Self {
        self.shared_handler(Arc::new(handler))
    }

    /// Same as [`handler`](Self::handler), for a handler shared between connections.
    pub fn shared_handler(mut self, handler: Arc<dyn RequestHandler>) -> Self {
        self.handler = handler;
        self
    }

    /// Without one, orphan responses are logged and dropped.
    pub fn orphan_handler(mut self, orphans: impl OrphanHandler) -> Self {
        self.orphans = Some(Box::new(orphans));
        self
    }

    pub fn error_observer(mut self, observer: impl ErrorObserver) -> Self {
        self.observer = Box::new(observer);
        self
    }

    pub fn spawn(self) -> io::Result<Connection> {
        let (outbound, queue) = crossbeam_channel::bounded(self.config.queue_capacity());
        let exit = ExitSignal::new();
        let dispatch = ThreadPool::new(
            "reqmux-dispatch",
            self.config.dispatch_workers,
            self.config.dispatch_backlog,
            exit.clone(),
        )?;

        let shared = Arc::new(Shared {
            dispatchers: dispatch.thread_ids(),
            waiters: WaiterPool::new(self.config.waiter_capacity()),
            transport: self.transport,
            config: self.config,
            handler: self.handler,
            orphans: self.orphans,
            observer: self.observer,
            registry: Registry::new(),
            outbound,
            identity: AtomicU32::new(0),
            exit,
            transport_closed: AtomicBool::new(false),
        });

        let sender = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("reqmux-send".into())
                .spawn(move || shared.send_loop(queue))
        };
        let sender = match sender {
            Ok(handle) => handle,
            Err(e) => {
                shared.exit.raise();
                return Err(e);
            }
        };

        let receiver = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("reqmux-recv".into())
                .spawn(move || shared.recv_loop(dispatch))
        };
        let receiver = match receiver {
            Ok(handle) => handle,
            Err(e) => {
                shared.exit.raise();
                let _ = sender.join();
                return Err(e);
            }
        };

        Ok(Connection {
            shared,
            loops: Mutex::new(vec![sender, receiver]),
        })
    }
}

impl Connection {
    pub fn builder(transport: impl Transport) -> ConnectionBuilder {
        ConnectionBuilder {
            transport: Box::new(transport),
            config: ConnectionConfig::default(),
            handler: Arc::new(NoopHandler),
            orphans: None,
            observer: Box::new(LogObserver),
        }
    }

    /// Starts a connection with the default configuration.
    pub fn new(transport: impl Transport, handler: impl RequestHandler) -> io::Result<Self> {
        Self::builder(transport).handler(handler).spawn()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.shared.transport.local_addr()
    }

    pub fn remote_addr(&self) -> io::Result<SocketAddr> {
        self.shared.transport.remote_addr()
    }

    /// Sends `body` as a request and waits for the peer's response.
    ///
    /// A zero `timeout` means the configured default. Blocks while every waiter is in use.
    /// Fails with [`ConnectionError::Timeout`] when the deadline passes first and with
    /// [`ConnectionError::Exited`] when the connection goes down first.
    pub fn query(&self, body: &[u8], timeout: Duration) -> Result<Vec<u8>, ConnectionError> {
        let shared = &self.shared;
        let mut waiter = shared.waiters.acquire(&shared.exit)?;

        let identity = shared.next_identity();
        waiter.rearm(shared.config.effective_timeout(timeout));
        shared.registry.register(identity, waiter.pending());
        let _registration = Registration {
            registry: &shared.registry,
            identity,
        };

        let frame = Frame::request(identity, body.to_vec()).encode()?;
        shared.enqueue(frame)?;

        let timer = waiter.timer();
        let outcome = crossbeam_channel::select! {
            recv(waiter.inbox()) -> body => return body.map_err(|_| ConnectionError::Exited),
            recv(timer) -> _ => ConnectionError::Timeout,
            recv(shared.exit.listener()) -> _ => ConnectionError::Exited,
        };

        // Whatever was handed over before we unregister arrived in time.
        shared.registry.pop(identity);
        match waiter.take() {
            Some(body) => Ok(body),
            None => {
                trace!("query {identity} gave up: {outcome}");
                Err(outcome)
            }
        }
    }

    /// Sends `body` as a request without waiting for, or expecting, a response.
    pub fn send(&self, body: &[u8]) -> Result<(), ConnectionError> {
        let identity = self.shared.next_identity();
        let frame = Frame::request(identity, body.to_vec()).encode()?;
        self.shared.enqueue(frame)
    }

    /// Stops the connection and waits for its loops. Safe to call any number of times.
    ///
    /// Called from a [`RequestHandler`] running on this connection, it stops the loops without
    /// waiting for them: they cannot finish before the handler returns.
    pub fn close(&self) {
        self.shared.exit.raise();
        self.shared.close_transport();

        if self.shared.dispatchers.contains(&thread::current().id()) {
            debug!("connection {} closed from its own handler", self.shared.peer());
            return;
        }

        let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in loops.drain(..) {
            if handle.join().is_err() {
                error!("connection loop panicked");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.exit.is_raised()
    }

    /// Queries currently waiting for their response.
    pub fn outstanding(&self) -> usize {
        self.shared.registry.len()
    }

    /// Waiters not in use by a query.
    pub fn available(&self) -> usize {
        self.shared.waiters.available()
    }

    /// Most queries that can be outstanding at once.
    pub fn capacity(&self) -> usize {
        self.shared.waiters.capacity()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.local_addr().ok())
            .field("remote", &self.remote_addr().ok())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Unregisters a query's identity on every way out of [`Connection::query`].
struct Registration<'a> {
    registry: &'a Registry,
    identity: u32,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.registry.pop(self.identity);
    }
}

impl Shared {
    fn next_identity(&self) -> u32 {
        self.identity.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    fn enqueue(&self, frame: Vec<u8>) -> Result<(), ConnectionError> {
        if self.exit.is_raised() {
            return Err(ConnectionError::Exited);
        }

        crossbeam_channel::select! {
            send(self.outbound, frame) -> res => res.map_err(|_| ConnectionError::Exited),
            recv(self.exit.listener()) -> _ => Err(ConnectionError::Exited),
        }
    }

    fn close_transport(&self) {
        if !self.transport_closed.swap(true, Ordering::SeqCst) {
            self.transport.close();
        }
    }

    fn peer(&self) -> String {
        self.transport
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "<unknown>".into())
    }

    /// A loop hit a transport error: only the first failure takes the connection down.
    fn fail(&self, direction: &str, err: io::Error) {
        if self.exit.raise() {
            info!("connection {} {direction} error: {err}", self.peer());
            self.close_transport();
            self.observer.on_error(&ConnectionError::Io(err));
        } else {
            debug!("connection {} {direction} stopped: {err}", self.peer());
        }
    }

    fn send_loop(&self, queue: Receiver<Vec<u8>>) {
        loop {
            crossbeam_channel::select! {
                recv(queue) -> frame => {
                    let Ok(frame) = frame else { break };
                    if let Err(e) = self.transport.write(&frame) {
                        self.fail("send", e);
                        break;
                    }
                }
                recv(self.exit.listener()) -> _ => break,
            }
        }
        debug!("send loop for {} finished", self.peer());
    }

    fn recv_loop(self: &Arc<Self>, dispatch: ThreadPool) {
        let mut buffer =
            FrameBuffer::new(self.config.framing).with_max_body_size(self.config.max_body_size);

        while !self.exit.is_raised() {
            let chunk = match self.transport.read() {
                Ok(chunk) => chunk,
                Err(e) => {
                    self.fail("recv", e);
                    break;
                }
            };
            buffer.push(&chunk);

            while let Some(next) = buffer.next_frame() {
                let data = match next {
                    Ok(data) => data,
                    Err(e) => {
                        warn!("dropping unreadable bytes: {e}");
                        continue;
                    }
                };

                let shared = Arc::clone(self);
                if dispatch.execute(move || shared.dispatch(&data)).is_err() {
                    break;
                }
            }
        }
        debug!("recv loop for {} finished", self.peer());
    }

    fn dispatch(&self, data: &[u8]) {
        let frame = match Frame::decode(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping undecodable frame: {e}");
                return;
            }
        };
        trace!("received {frame:?}");

        match frame.kind {
            FrameKind::Request => self.answer(frame),
            FrameKind::Response => self.settle(frame),
        }
    }

    fn answer(&self, request: Frame) {
        let body = match self.handler.process_request(&request.body) {
            Ok(body) => body,
            Err(e) => {
                warn!("request {} failed: {e}", request.identity);
                Vec::new()
            }
        };

        let result = Frame::response(request.identity, body)
            .encode()
            .map_err(ConnectionError::from)
            .and_then(|frame| self.enqueue(frame));
        if let Err(e) = result {
            debug!("response {} not sent: {e}", request.identity);
        }
    }

    fn settle(&self, response: Frame) {
        let identity = response.identity;
        match self.registry.deliver(identity, response.body, &self.exit) {
            Delivery::Delivered => trace!("response {identity} delivered"),
            Delivery::Expired => debug!("response {identity} arrived after its deadline"),
            Delivery::Exited => debug!("response {identity} dropped, connection exiting"),
            Delivery::Orphan(body) => match self.orphans.as_ref() {
                Some(orphans) => {
                    if let Err(e) = orphans.process_orphan_response(identity, body) {
                        debug!("orphan response {identity}: {e}");
                    }
                }
                None => debug!(
                    "discarding response: {}",
                    ConnectionError::AppNotFound(identity)
                ),
            },
        }
    }
}
