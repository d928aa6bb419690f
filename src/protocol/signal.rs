use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{Receiver, Sender};

/// One-shot shutdown notification shared by every part of a connection.
///
/// Raising drops the only sender, so every `recv` on [`ExitSignal::listener`] returns at once,
/// including the ones already parked inside a `select!`.
#[derive(Debug, Clone)]
pub(crate) struct ExitSignal {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    trigger: Mutex<Option<Sender<()>>>,
    listener: Receiver<()>,
}

impl ExitSignal {
    pub(crate) fn new() -> Self {
        let (trigger, listener) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(Inner {
                trigger: Mutex::new(Some(trigger)),
                listener,
            }),
        }
    }

    /// Returns `true` only for the call that actually raised the signal.
    pub(crate) fn raise(&self) -> bool {
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        trigger.take().is_some()
    }

    pub(crate) fn is_raised(&self) -> bool {
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    pub(crate) fn listener(&self) -> &Receiver<()> {
        &self.inner.listener
    }
}
