//! Hooks through which the embedding application takes part in a connection.
use std::error::Error;

use log::error;

use super::ConnectionError;

/// Error returned by application hooks.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Answers requests initiated by the peer.
pub trait RequestHandler: Send + Sync + 'static {
    /// Produces the body of the response. The peer is answered even on `Err`, with an empty body.
    fn process_request(&self, body: &[u8]) -> Result<Vec<u8>, HandlerError>;
}

/// Receives responses that arrive with no outstanding request behind them.
pub trait OrphanHandler: Send + Sync + 'static {
    fn process_orphan_response(&self, identity: u32, body: Vec<u8>) -> Result<(), HandlerError>;
}

/// Told once why a connection went down.
pub trait ErrorObserver: Send + Sync + 'static {
    fn on_error(&self, err: &ConnectionError);
}

/// Answers every request with an empty body.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl RequestHandler for NoopHandler {
    fn process_request(&self, _body: &[u8]) -> Result<Vec<u8>, HandlerError> {
        Ok(Vec::new())
    }
}

/// Logs the error and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ErrorObserver for LogObserver {
    fn on_error(&self, err: &ConnectionError) {
        error!("connection failed: {err}");
    }
}

/// A [`RequestHandler`] backed by a closure, see [`handler_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnHandler<F> {
    f: F,
}

/// Wraps a closure into a [`RequestHandler`].
///
/// ```
/// use reqmux::protocol::{RequestHandler, handler_fn};
///
/// let echo = handler_fn(|body: &[u8]| Ok(body.to_vec()));
/// assert_eq!(echo.process_request(b"ping").unwrap(), b"ping");
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
{
    FnHandler { f }
}

impl<F> RequestHandler for FnHandler<F>
where
    F: Fn(&[u8]) -> Result<Vec<u8>, HandlerError> + Send + Sync + 'static,
{
    fn process_request(&self, body: &[u8]) -> Result<Vec<u8>, HandlerError> {
        (self.f)(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_answers_empty() {
        assert!(NoopHandler.process_request(b"anything").unwrap().is_empty());
    }

    #[test]
    fn closure_handler() {
        let handler = handler_fn(|body: &[u8]| {
            if body.is_empty() {
                Err("empty request".into())
            } else {
                Ok(body.iter().rev().copied().collect())
            }
        });

        assert_eq!(handler.process_request(b"abc").unwrap(), b"cba");
        assert_eq!(
            handler.process_request(b"").unwrap_err().to_string(),
            "empty request"
        );
    }
}
