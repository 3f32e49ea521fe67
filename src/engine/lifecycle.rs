//! The per-start task.
//!
//! One `Run` drives one accepted start call through its cycles:
//!
//! 1. cache stage (sequential lookup, or a lookup task racing the network)
//! 2. transport, raced against the execution's cancellation token
//! 3. redirection verdict (`Stop` settles, `Restart` loops back to admission)
//! 4. response preprocessing on the blocking pool
//! 5. leave `Running`, then cache write, then terminal delivery
//!
//! Between stages a checkpoint re-checks that the execution is still running
//! and, under `NoHold`, that the caller still holds the request. A panic
//! anywhere in the task (transport, interceptor, upload builder) fails the
//! execution with `RequestError::Internal`.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;

use super::state::Execution;
use super::EngineInner;
use crate::cache::{CacheEntry, CacheHandler, CacheOptions, CacheReadMode};
use crate::callbacks::{Delivery, Progress, ProgressKind};
use crate::config::CacheLookupMode;
use crate::error::{CancelReason, RequestError};
use crate::preprocess::Preprocessor;
use crate::redirection::{Redirection, RedirectionInterceptor};
use crate::request::{PreparedRequest, RequestShared};
use crate::response::{Response, ResponseSource};
use crate::transport::{ProgressSink, TransportRequest};

/// How the task refers to the request it runs for.
pub(crate) enum Holder {
    /// `ReleasePolicy::Hold`
    Strong(Arc<RequestShared>),
    /// `ReleasePolicy::NoHold`
    Weak(Weak<RequestShared>),
}

impl Holder {
    fn upgrade(&self) -> Option<Arc<RequestShared>> {
        match self {
            Self::Strong(request) => Some(Arc::clone(request)),
            Self::Weak(request) => request.upgrade(),
        }
    }
}

enum CycleEnd {
    Settled,
    Restart,
}

pub(crate) struct Run {
    pub(crate) engine: Arc<EngineInner>,
    pub(crate) exec: Arc<Execution>,
    pub(crate) holder: Holder,
    pub(crate) prepared: Arc<PreparedRequest>,
    pub(crate) cache_options: CacheOptions,
    pub(crate) preprocessor: Option<Arc<dyn Preprocessor>>,
    pub(crate) interceptor: Option<Arc<dyn RedirectionInterceptor>>,
}

impl Run {
    pub(crate) async fn drive(self) {
        let exec = Arc::clone(&self.exec);
        let prepared = Arc::clone(&self.prepared);
        let preprocessor = self.preprocessor.clone();
        if let Err(panic) = AssertUnwindSafe(self.cycles()).catch_unwind().await {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                target: "reqcycle::engine",
                execution = %exec.id,
                identifier = %prepared.identifier,
                panic = %message,
                "request task panicked"
            );
            exec.finish(
                Err(RequestError::Internal(format!("request task panicked: {message}"))),
                preprocessor,
                prepared,
            );
        }
    }

    async fn cycles(self) {
        let cap = self.engine.config.restart_cap;
        let mut restarts = 0u32;

        loop {
            match self.cycle().await {
                CycleEnd::Settled => break,
                CycleEnd::Restart => {
                    restarts += 1;
                    if restarts > cap {
                        tracing::warn!(
                            target: "reqcycle::redirection",
                            execution = %self.exec.id,
                            identifier = %self.prepared.identifier,
                            cap,
                            "restart cap exceeded"
                        );
                        self.finish(Err(RequestError::RedirectionLoop { restarts: cap, cap }));
                        break;
                    }
                    tracing::debug!(
                        target: "reqcycle::redirection",
                        execution = %self.exec.id,
                        restart = restarts,
                        "restarting cycle"
                    );
                    match self.engine.registry.admit(&self.exec) {
                        Ok(superseded) => {
                            for previous in superseded {
                                previous.cancel(CancelReason::Superseded);
                            }
                        }
                        Err(error) => {
                            self.finish(Err(error));
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn cycle(&self) -> CycleEnd {
        let progress = self.progress_sink();
        if !self.checkpoint() {
            return CycleEnd::Settled;
        }

        let mut lookup: Option<JoinHandle<()>> = None;
        if let Some(cache) = self.readable_cache() {
            let read_mode = self.cache_options.read_mode;
            if read_mode == CacheReadMode::CacheOnly
                || self.engine.config.cache_lookup == CacheLookupMode::Sequential
            {
                if let Some(entry) = lookup_fresh(
                    cache.as_ref(),
                    &self.prepared.cache_key,
                    self.cache_options.max_age,
                )
                .await
                {
                    let cached = preprocess_cached(
                        &self.exec,
                        self.preprocessor.clone(),
                        Arc::clone(&self.prepared),
                        entry.response,
                    )
                    .await;
                    if read_mode == CacheReadMode::CacheOnly {
                        tracing::debug!(
                            target: "reqcycle::cache",
                            execution = %self.exec.id,
                            key = %self.prepared.cache_key,
                            "served from cache, skipping network"
                        );
                        self.finish(cached);
                        return CycleEnd::Settled;
                    }
                    if let Ok(response) = cached {
                        self.exec.deliver(Delivery::CacheHit(response));
                    }
                }
            } else {
                let exec = Arc::clone(&self.exec);
                let key = self.prepared.cache_key.clone();
                let max_age = self.cache_options.max_age;
                let preprocessor = self.preprocessor.clone();
                let prepared = Arc::clone(&self.prepared);
                lookup = Some(tokio::spawn(async move {
                    let Some(entry) = lookup_fresh(cache.as_ref(), &key, max_age).await else {
                        return;
                    };
                    if let Ok(response) =
                        preprocess_cached(&exec, preprocessor, prepared, entry.response).await
                    {
                        exec.deliver(Delivery::CacheHit(response));
                    }
                }));
            }
        }

        if !self.checkpoint() {
            abort(lookup);
            return CycleEnd::Settled;
        }

        let request = TransportRequest::from_prepared(
            &self.prepared,
            self.engine.config.request_serializer,
            self.engine.config.response_serializer,
        );
        tracing::debug!(
            target: "reqcycle::engine",
            execution = %self.exec.id,
            identifier = %self.prepared.identifier,
            "dispatching"
        );
        let outcome = tokio::select! {
            biased;
            _ = self.exec.token().cancelled() => None,
            outcome = self.engine.transport.send(request, progress) => Some(outcome),
        };
        let Some(outcome) = outcome else {
            tracing::debug!(
                target: "reqcycle::engine",
                execution = %self.exec.id,
                "transport dropped on cancellation"
            );
            abort(lookup);
            return CycleEnd::Settled;
        };

        if !self.checkpoint() {
            abort(lookup);
            return CycleEnd::Settled;
        }

        let verdict = self
            .interceptor
            .as_ref()
            .map_or(Redirection::Continue, |i| i.redirect(&self.prepared, &outcome));
        match verdict {
            Redirection::Continue => {}
            Redirection::Stop => {
                abort(lookup);
                self.exec.stop();
                return CycleEnd::Settled;
            }
            Redirection::Restart => {
                abort(lookup);
                return CycleEnd::Restart;
            }
        }

        // a raced cache hit must be queued before the terminal delivery
        if let Some(handle) = lookup {
            let _ = handle.await;
        }

        let outcome = self.preprocess(outcome).await;
        if !self.checkpoint() {
            return CycleEnd::Settled;
        }

        // conclude before writing: a cancel during the write is too late, and
        // the cache always matches the delivered outcome
        let Some(concluded) = self.exec.conclude(outcome.is_ok()) else {
            return CycleEnd::Settled;
        };
        if let Ok(response) = &outcome {
            self.store(response).await;
        }
        concluded.deliver(outcome, self.preprocessor.clone(), Arc::clone(&self.prepared));
        CycleEnd::Settled
    }

    /// `false` once the execution left `Running`. Cancels with `Released`
    /// when a weakly held request is gone.
    fn checkpoint(&self) -> bool {
        if self.holder.upgrade().is_none() {
            self.exec.cancel(CancelReason::Released);
            return false;
        }
        self.exec.is_running()
    }

    fn readable_cache(&self) -> Option<Arc<dyn CacheHandler>> {
        if !self.cache_options.reads() {
            return None;
        }
        self.engine.cache.clone()
    }

    async fn preprocess(
        &self,
        outcome: Result<Response, RequestError>,
    ) -> Result<Response, RequestError> {
        let Some(hook) = self.preprocessor.clone() else {
            return outcome;
        };
        let prepared = Arc::clone(&self.prepared);
        let joined = tokio::task::spawn_blocking(move || match outcome {
            Ok(mut response) => hook
                .preprocess_success(&prepared, &mut response)
                .map(|()| response),
            Err(mut error) => {
                hook.preprocess_failure(&prepared, &mut error);
                Err(error)
            }
        })
        .await;
        joined.unwrap_or_else(|e| {
            tracing::error!(
                target: "reqcycle::engine",
                execution = %self.exec.id,
                error = %e,
                "response preprocessing aborted"
            );
            Err(RequestError::Internal(format!("response preprocessing failed: {e}")))
        })
    }

    /// Write an accepted network response back. A successful response the
    /// options refuse evicts whatever the key held, so a later hit cannot
    /// serve an older payload.
    async fn store(&self, response: &Response) {
        let Some(cache) = &self.engine.cache else {
            return;
        };
        if response.source == ResponseSource::Cache || !self.cache_options.write {
            return;
        }
        let key = &self.prepared.cache_key;
        let (written, action) = if self.cache_options.accepts(response) {
            (cache.store(key, response), "store")
        } else if response.is_success() {
            (cache.remove(key), "evict")
        } else {
            return;
        };
        // the execution already concluded; a panic here would lose the
        // terminal delivery
        match AssertUnwindSafe(written).catch_unwind().await {
            Ok(Ok(())) => tracing::trace!(target: "reqcycle::cache", key = %key, action, "cache updated"),
            Ok(Err(e)) => tracing::warn!(
                target: "reqcycle::cache",
                key = %key,
                action,
                error = %e,
                "cache update failed"
            ),
            Err(panic) => tracing::warn!(
                target: "reqcycle::cache",
                key = %key,
                action,
                panic = %panic_message(panic.as_ref()),
                "cache update panicked"
            ),
        }
    }

    fn finish(&self, outcome: Result<Response, RequestError>) {
        self.exec
            .finish(outcome, self.preprocessor.clone(), Arc::clone(&self.prepared));
    }

    /// Progress sink for one cycle. Reports that would move a kind backwards
    /// are dropped; a restart begins a new transfer and starts from zero.
    fn progress_sink(&self) -> ProgressSink {
        let exec = Arc::clone(&self.exec);
        let last: Mutex<HashMap<ProgressKind, u64>> = Mutex::new(HashMap::new());
        Arc::new(move |kind: ProgressKind, progress: Progress| {
            {
                let mut last = last.lock().unwrap_or_else(|e| e.into_inner());
                let seen = last.entry(kind).or_insert(0);
                if progress.completed < *seen {
                    return;
                }
                *seen = progress.completed;
            }
            exec.deliver(Delivery::Progress(kind, progress));
        })
    }
}

async fn lookup_fresh(
    cache: &dyn CacheHandler,
    key: &str,
    max_age: Option<Duration>,
) -> Option<CacheEntry> {
    match cache.lookup(key).await {
        Ok(Some(mut entry)) if entry.is_fresh(max_age) => {
            entry.response.source = ResponseSource::Cache;
            Some(entry)
        }
        Ok(Some(_)) => {
            tracing::trace!(target: "reqcycle::cache", key, "stale entry ignored");
            None
        }
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(target: "reqcycle::cache", key, error = %e, "cache lookup failed");
            None
        }
    }
}

/// Cache-sourced responses skip the worker pool and run `preprocess_success`
/// on the delivery context instead.
async fn preprocess_cached(
    exec: &Execution,
    preprocessor: Option<Arc<dyn Preprocessor>>,
    prepared: Arc<PreparedRequest>,
    response: Response,
) -> Result<Response, RequestError> {
    let Some(hook) = preprocessor else {
        return Ok(response);
    };
    let key = prepared.cache_key.clone();
    let outcome = exec
        .on_dispatcher(move || {
            let mut response = response;
            hook.preprocess_success(&prepared, &mut response)
                .map(|()| response)
        })
        .await
        .unwrap_or_else(|| {
            Err(RequestError::Internal("delivery context is gone".into()))
        });
    if let Err(e) = &outcome {
        tracing::debug!(
            target: "reqcycle::cache",
            key = %key,
            error = %e,
            "cached response rejected by preprocessing"
        );
    }
    outcome
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

fn abort(lookup: Option<JoinHandle<()>>) {
    if let Some(handle) = lookup {
        handle.abort();
    }
}
