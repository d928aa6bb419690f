use std::time::Duration;

/// Timeout applied to a query that does not ask for one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Smallest waiter pool a connection is built with unless told otherwise.
pub const DEFAULT_POOL_FLOOR: usize = 1024;

/// Largest body a received frame may carry unless told otherwise.
pub const DEFAULT_MAX_BODY_SIZE: usize = 16 * 1024 * 1024;

/// How the receive loop finds frame boundaries in the byte stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Framing {
    /// Split on the terminator. A body that contains the terminator is cut in two.
    #[default]
    Delimited,
    /// Trust the header's body length and check the terminator as a trailer.
    LengthPrefixed,
}

/// Tunables of a [`Connection`](super::Connection).
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub pool_capacity: usize,
    pub pool_floor: usize,
    pub default_timeout: Duration,
    /// Outbound queue size; `None` follows the waiter pool capacity.
    pub send_queue_capacity: Option<usize>,
    pub dispatch_workers: usize,
    pub dispatch_backlog: usize,
    pub framing: Framing,
    /// Frames claiming a longer body are dropped as unreadable.
    pub max_body_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_FLOOR,
            pool_floor: DEFAULT_POOL_FLOOR,
            default_timeout: DEFAULT_TIMEOUT,
            send_queue_capacity: None,
            dispatch_workers: 16,
            dispatch_backlog: 1024,
            framing: Framing::Delimited,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

impl ConnectionConfig {
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    pub fn with_pool_floor(mut self, floor: usize) -> Self {
        self.pool_floor = floor;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_send_queue_capacity(mut self, capacity: usize) -> Self {
        self.send_queue_capacity = Some(capacity);
        self
    }

    pub fn with_dispatch_workers(mut self, workers: usize) -> Self {
        self.dispatch_workers = workers;
        self
    }

    pub fn with_dispatch_backlog(mut self, backlog: usize) -> Self {
        self.dispatch_backlog = backlog;
        self
    }

    pub fn with_framing(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// Number of waiters, and so of concurrently outstanding queries.
    pub fn waiter_capacity(&self) -> usize {
        self.pool_capacity.max(self.pool_floor).max(1)
    }

    pub fn queue_capacity(&self) -> usize {
        self.send_queue_capacity
            .unwrap_or_else(|| self.waiter_capacity())
            .max(1)
    }

    /// The timeout a query actually waits for.
    pub fn effective_timeout(&self, requested: Duration) -> Duration {
        if requested.is_zero() {
            if self.default_timeout.is_zero() {
                DEFAULT_TIMEOUT
            } else {
                self.default_timeout
            }
        } else {
            requested
        }
    }
}
