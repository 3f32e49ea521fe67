//! Callback delivery context.
//!
//! All user-visible callbacks run through a `Dispatcher`. The default,
//! `DeliveryThread`, owns one OS thread and runs jobs in submission order,
//! which is what gives callbacks their cross-stage ordering (cache hit before
//! terminal, cancellation of a superseded request before its successor).

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::ThreadId;

use tokio::sync::mpsc;

use crate::error::RequestError;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes delivery jobs on the designated callback context.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, job: Job);
}

/// Serial delivery on a dedicated thread.
///
/// The thread exits once the last handle is dropped and the queue drains.
pub struct DeliveryThread {
    tx: mpsc::UnboundedSender<Job>,
    thread_id: ThreadId,
}

impl DeliveryThread {
    pub const DEFAULT_NAME: &'static str = "reqcycle-delivery";

    pub fn spawn() -> Result<Self, RequestError> {
        Self::named(Self::DEFAULT_NAME)
    }

    pub fn named(name: &str) -> Result<Self, RequestError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!(target: "reqcycle::dispatch", "callback panicked");
                    }
                }
                tracing::trace!(target: "reqcycle::dispatch", "delivery thread exiting");
            })
            .map_err(|e| {
                RequestError::Configuration(format!("failed to spawn delivery thread: {e}"))
            })?;
        Ok(Self {
            tx,
            thread_id: handle.thread().id(),
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the caller is running on this delivery thread.
    pub fn is_current(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }
}

impl Dispatcher for DeliveryThread {
    fn dispatch(&self, job: Job) {
        if self.tx.send(job).is_err() {
            tracing::warn!(target: "reqcycle::dispatch", "delivery thread gone, dropping callback");
        }
    }
}

/// Runs jobs immediately on whichever thread dispatches them.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineDispatcher;

impl Dispatcher for InlineDispatcher {
    fn dispatch(&self, job: Job) {
        job();
    }
}
