use std::{
    io,
    panic::{self, AssertUnwindSafe},
    thread::{self, ThreadId},
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};

use super::{ConnectionError, signal::ExitSignal};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed set of worker threads fed through a bounded job queue.
///
/// `execute` blocks while the queue is full, unless the connection is exiting.
#[derive(Debug)]
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
    exit: ExitSignal,
}

impl ThreadPool {
    pub(crate) fn new(
        name: &str,
        size: usize,
        backlog: usize,
        exit: ExitSignal,
    ) -> io::Result<Self> {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);
        let (sender, receiver) = crossbeam_channel::bounded(backlog);

        for i in 0..size {
            workers.push(Worker::new(name, i, receiver.clone())?);
        }

        Ok(Self {
            workers,
            sender: Some(sender),
            exit,
        })
    }

    pub(crate) fn thread_ids(&self) -> Vec<ThreadId> {
        self.workers.iter().map(|w| w.thread.thread().id()).collect()
    }

    pub fn execute<F>(&self, f: F) -> Result<(), ConnectionError>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return Err(ConnectionError::Exited);
        };
        let job: Job = Box::new(f);

        crossbeam_channel::select! {
            send(sender, job) -> res => res.map_err(|_| ConnectionError::Exited),
            recv(self.exit.listener()) -> _ => Err(ConnectionError::Exited),
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());

        for worker in self.workers.drain(..) {
            debug!("shutting down worker {}", worker.id);

            if worker.thread.join().is_err() {
                error!("worker {} panicked", worker.id);
            }
        }
    }
}

#[derive(Debug)]
struct Worker {
    id: usize,
    thread: thread::JoinHandle<()>,
}

impl Worker {
    fn new(name: &str, id: usize, receiver: Receiver<Job>) -> io::Result<Self> {
        let thread = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || {
                for job in receiver.iter() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("worker {id} recovered from a panicking job");
                    }
                }
                debug!("worker {id} disconnected!");
            })?;

        Ok(Self { id, thread })
    }
}
