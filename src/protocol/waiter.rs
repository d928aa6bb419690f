//! Reusable response slots and the pool that bounds outstanding queries.
use std::{
    ops::{Deref, DerefMut},
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use super::{ConnectionError, signal::ExitSignal};

/// Single-slot mailbox plus the deadline of the query currently using it.
#[derive(Debug)]
pub(crate) struct Waiter {
    sender: Sender<Vec<u8>>,
    inbox: Receiver<Vec<u8>>,
    deadline: Instant,
}

/// What the registry keeps for a query in flight: where to put the body, and until when.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub(crate) sender: Sender<Vec<u8>>,
    pub(crate) deadline: Instant,
}

impl Waiter {
    fn new() -> Self {
        let (sender, inbox) = crossbeam_channel::bounded(1);
        Self {
            sender,
            inbox,
            deadline: Instant::now(),
        }
    }

    /// Prepares the waiter for a new query: drops any stale body, sets a fresh deadline.
    pub(crate) fn rearm(&mut self, timeout: Duration) {
        while self.inbox.try_recv().is_ok() {}
        self.deadline = Instant::now() + timeout;
    }

    /// Expires the deadline so nothing can be delivered until the next rearm.
    fn disarm(&mut self) {
        self.deadline = Instant::now();
    }

    pub(crate) fn pending(&self) -> Pending {
        Pending {
            sender: self.sender.clone(),
            deadline: self.deadline,
        }
    }

    pub(crate) fn inbox(&self) -> &Receiver<Vec<u8>> {
        &self.inbox
    }

    /// A timer channel that fires once at the deadline.
    pub(crate) fn timer(&self) -> Receiver<Instant> {
        crossbeam_channel::at(self.deadline)
    }

    /// Body delivered so far, if any.
    pub(crate) fn take(&self) -> Option<Vec<u8>> {
        match self.inbox.try_recv() {
            Ok(body) => Some(body),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }
}

/// Fixed set of waiters handed out one per outstanding query.
#[derive(Debug)]
pub(crate) struct WaiterPool {
    free: Receiver<Waiter>,
    returns: Sender<Waiter>,
    capacity: usize,
}

impl WaiterPool {
    pub(crate) fn new(capacity: usize) -> Self {
        let (returns, free) = crossbeam_channel::bounded(capacity);
        for _ in 0..capacity {
            // Cannot fail: the channel holds exactly `capacity` waiters.
            let _ = returns.send(Waiter::new());
        }
        Self {
            free,
            returns,
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn available(&self) -> usize {
        self.free.len()
    }

    /// Blocks until a waiter is free or the connection starts exiting.
    pub(crate) fn acquire(&self, exit: &ExitSignal) -> Result<WaiterGuard<'_>, ConnectionError> {
        if exit.is_raised() {
            return Err(ConnectionError::Exited);
        }

        crossbeam_channel::select! {
            recv(self.free) -> waiter => match waiter {
                Ok(waiter) => Ok(WaiterGuard { waiter: Some(waiter), pool: self }),
                Err(_) => Err(ConnectionError::Exited),
            },
            recv(exit.listener()) -> _ => Err(ConnectionError::Exited),
        }
    }

    fn release(&self, mut waiter: Waiter) {
        waiter.disarm();
        // Never blocks: at most `capacity` waiters exist.
        let _ = self.returns.send(waiter);
    }
}

/// Borrowed waiter; goes back to the pool when dropped, on every path.
#[derive(Debug)]
pub(crate) struct WaiterGuard<'a> {
    waiter: Option<Waiter>,
    pool: &'a WaiterPool,
}

impl Deref for WaiterGuard<'_> {
    type Target = Waiter;

    fn deref(&self) -> &Waiter {
        self.waiter.as_ref().expect("waiter is present until drop")
    }
}

impl DerefMut for WaiterGuard<'_> {
    fn deref_mut(&mut self) -> &mut Waiter {
        self.waiter.as_mut().expect("waiter is present until drop")
    }
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.pool.release(waiter);
        }
    }
}
