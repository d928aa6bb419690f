use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use log::warn;

use super::{signal::ExitSignal, waiter::Pending};

/// Outcome of handing a response body to whoever asked for it.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// Nobody is waiting for this identity; the body is handed back.
    Orphan(Vec<u8>),
    /// The waiter's deadline had already passed.
    Expired,
    /// The connection is exiting.
    Exited,
}

/// In-flight request identities and the waiters standing behind them.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    applicants: Mutex<HashMap<u32, Pending>>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, identity: u32, pending: Pending) {
        let mut applicants = self.lock();
        if applicants.insert(identity, pending).is_some() {
            warn!("identity {identity} registered while still outstanding");
        }
    }

    pub(crate) fn pop(&self, identity: u32) -> Option<Pending> {
        self.lock().remove(&identity)
    }

    /// Removes `identity` and hands `body` to its waiter in one critical section.
    ///
    /// The body only lands if, at that moment, the deadline has not been reached and the
    /// connection is not exiting. A requester that wakes up on either of those events
    /// unregisters first and then looks in its inbox, so both sides agree on who won.
    pub(crate) fn deliver(&self, identity: u32, body: Vec<u8>, exit: &ExitSignal) -> Delivery {
        let mut applicants = self.lock();
        let Some(pending) = applicants.remove(&identity) else {
            return Delivery::Orphan(body);
        };

        if exit.is_raised() {
            return Delivery::Exited;
        }
        if Instant::now() >= pending.deadline {
            return Delivery::Expired;
        }
        match pending.sender.try_send(body) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Expired,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u32, Pending>> {
        self.applicants
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossbeam_channel::Receiver;

    use super::*;

    fn pending(timeout: Duration) -> (Pending, Receiver<Vec<u8>>) {
        let (sender, inbox) = crossbeam_channel::bounded(1);
        let pending = Pending {
            sender,
            deadline: Instant::now() + timeout,
        };
        (pending, inbox)
    }

    #[test]
    fn pop_is_idempotent() {
        let registry = Registry::new();
        let (p, _inbox) = pending(Duration::from_secs(1));

        registry.register(1, p);
        assert_eq!(registry.len(), 1);
        assert!(registry.pop(1).is_some());
        assert!(registry.pop(1).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn deliver_to_registered_waiter() {
        let registry = Registry::new();
        let exit = ExitSignal::new();
        let (p, inbox) = pending(Duration::from_secs(1));
        registry.register(3, p);

        assert_eq!(
            registry.deliver(3, b"body".to_vec(), &exit),
            Delivery::Delivered
        );
        assert_eq!(inbox.try_recv().unwrap(), b"body");
        assert_eq!(
            registry.deliver(3, b"again".to_vec(), &exit),
            Delivery::Orphan(b"again".to_vec())
        );
    }

    #[test]
    fn deliver_after_deadline_is_dropped() {
        let registry = Registry::new();
        let exit = ExitSignal::new();
        let (p, inbox) = pending(Duration::ZERO);
        registry.register(4, p);

        assert_eq!(registry.deliver(4, b"late".to_vec(), &exit), Delivery::Expired);
        assert!(inbox.try_recv().is_err());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn deliver_while_exiting_is_dropped() {
        let registry = Registry::new();
        let exit = ExitSignal::new();
        let (p, inbox) = pending(Duration::from_secs(1));
        registry.register(5, p);
        exit.raise();

        assert_eq!(registry.deliver(5, b"x".to_vec(), &exit), Delivery::Exited);
        assert!(inbox.try_recv().is_err());
    }
}
