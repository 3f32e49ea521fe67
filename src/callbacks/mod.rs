//! Caller-facing callbacks.
//!
//! Closures (`Callbacks`) and a non-owning `ResponseDelegate` are held by a
//! `CallbackRegistry`. Every notification goes through `Delivery`, a tagged
//! value the registry fans out to whichever receivers are still registered.
//! `clear()` drops all held closures synchronously; a delivery that runs after
//! a clear finds nothing and does nothing.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::RequestError;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressKind {
    Upload,
    Download,
}

/// Transfer progress in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub completed: u64,
    pub total: Option<u64>,
}

impl Progress {
    pub const fn new(completed: u64, total: Option<u64>) -> Self {
        Self { completed, total }
    }

    /// Fraction in `0.0..=1.0`, when the total is known and non-zero.
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some((self.completed as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }
}

pub type ResponseCallback = Arc<dyn Fn(&Response) + Send + Sync>;
pub type FailureCallback = Arc<dyn Fn(&RequestError) + Send + Sync>;
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

/// Delegate notified alongside the closures. Held weakly by the registry.
#[allow(unused_variables)]
pub trait ResponseDelegate: Send + Sync {
    fn on_cache_hit(&self, response: &Response) {}
    fn on_progress(&self, kind: ProgressKind, progress: Progress) {}
    fn on_success(&self, response: &Response) {}
    fn on_failure(&self, error: &RequestError) {}
}

/// Closure set supplied by the caller.
#[derive(Clone, Default)]
pub struct Callbacks {
    pub cache_hit: Option<ResponseCallback>,
    pub success: Option<ResponseCallback>,
    pub failure: Option<FailureCallback>,
    pub upload_progress: Option<ProgressCallback>,
    pub download_progress: Option<ProgressCallback>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_cache_hit<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.cache_hit = Some(Arc::new(f));
        self
    }

    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response) + Send + Sync + 'static,
    {
        self.success = Some(Arc::new(f));
        self
    }

    pub fn on_failure<F>(mut self, f: F) -> Self
    where
        F: Fn(&RequestError) + Send + Sync + 'static,
    {
        self.failure = Some(Arc::new(f));
        self
    }

    pub fn on_upload_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.upload_progress = Some(Arc::new(f));
        self
    }

    pub fn on_download_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(Progress) + Send + Sync + 'static,
    {
        self.download_progress = Some(Arc::new(f));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.cache_hit.is_none()
            && self.success.is_none()
            && self.failure.is_none()
            && self.upload_progress.is_none()
            && self.download_progress.is_none()
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("cache_hit", &self.cache_hit.is_some())
            .field("success", &self.success.is_some())
            .field("failure", &self.failure.is_some())
            .field("upload_progress", &self.upload_progress.is_some())
            .field("download_progress", &self.download_progress.is_some())
            .finish()
    }
}

/// One notification to fan out.
#[derive(Debug, Clone)]
pub enum Delivery {
    CacheHit(Response),
    Progress(ProgressKind, Progress),
    Success(Response),
    Failure(RequestError),
}

impl Delivery {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure(_))
    }
}

#[derive(Default)]
struct Slots {
    callbacks: Callbacks,
    delegate: Option<Weak<dyn ResponseDelegate>>,
}

/// Holder for a request's callbacks and delegate.
#[derive(Default)]
pub struct CallbackRegistry {
    slots: Mutex<Slots>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) {
        self.slots().callbacks = callbacks;
    }

    /// Register a delegate without taking ownership of it.
    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: ResponseDelegate + 'static,
    {
        let delegate: Arc<dyn ResponseDelegate> = delegate.clone();
        self.slots().delegate = Some(Arc::downgrade(&delegate));
    }

    /// Release every closure and the delegate reference. Idempotent.
    pub fn clear(&self) {
        let released = {
            let mut slots = self.slots();
            slots.delegate = None;
            std::mem::take(&mut slots.callbacks)
        };
        // closures drop here, outside the lock, in case one of them owns
        // something whose destructor touches this registry
        drop(released);
    }

    pub fn is_empty(&self) -> bool {
        let slots = self.slots();
        slots.callbacks.is_empty()
            && slots
                .delegate
                .as_ref()
                .is_none_or(|d| d.strong_count() == 0)
    }

    /// Fan `delivery` out to the registered receivers. Returns whether any
    /// receiver was present.
    pub fn deliver(&self, delivery: &Delivery) -> bool {
        let (callbacks, delegate) = {
            let slots = self.slots();
            (
                slots.callbacks.clone(),
                slots.delegate.as_ref().and_then(Weak::upgrade),
            )
        };
        if callbacks.is_empty() && delegate.is_none() {
            return false;
        }

        match delivery {
            Delivery::CacheHit(response) => {
                if let Some(cb) = &callbacks.cache_hit {
                    cb(response);
                }
                if let Some(d) = &delegate {
                    d.on_cache_hit(response);
                }
            }
            Delivery::Progress(kind, progress) => {
                let cb = match kind {
                    ProgressKind::Upload => &callbacks.upload_progress,
                    ProgressKind::Download => &callbacks.download_progress,
                };
                if let Some(cb) = cb {
                    cb(*progress);
                }
                if let Some(d) = &delegate {
                    d.on_progress(*kind, *progress);
                }
            }
            Delivery::Success(response) => {
                if let Some(cb) = &callbacks.success {
                    cb(response);
                }
                if let Some(d) = &delegate {
                    d.on_success(response);
                }
            }
            Delivery::Failure(error) => {
                if let Some(cb) = &callbacks.failure {
                    cb(error);
                }
                if let Some(d) = &delegate {
                    d.on_failure(error);
                }
            }
        }
        true
    }
}
