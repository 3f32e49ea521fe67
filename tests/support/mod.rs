//! Shared helpers for the integration tests.
//!
//! - `ScriptedTransport`: in-memory transport with a call counter, queued
//!   outcomes, scripted progress and an optional semaphore gate
//! - `EventLog`: records callbacks from any number of requests, in delivery
//!   order, with the thread they ran on
//! - `SlowCache`: `MemoryCache` whose lookups take a while

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use reqcycle::cache::{CacheEntry, CacheHandler, MemoryCache};
use reqcycle::callbacks::{Callbacks, Progress, ProgressKind};
use reqcycle::config::EngineConfig;
use reqcycle::engine::ExecutionEngine;
use reqcycle::error::{CancelReason, ErrorKind, RequestError};
use reqcycle::response::Response;
use reqcycle::transport::{ProgressSink, Transport, TransportRequest};
use tokio::sync::{Semaphore, mpsc};

pub const PAYLOAD: &str = r#"{"items":[1,2,3]}"#;

pub struct ScriptedTransport {
    calls: AtomicUsize,
    outcomes: Mutex<VecDeque<Result<Response, RequestError>>>,
    fallback: Response,
    gate: Option<Arc<Semaphore>>,
    progress: Vec<(ProgressKind, Progress)>,
    seen: Mutex<Vec<TransportRequest>>,
}

impl ScriptedTransport {
    /// Answers every call with `200 PAYLOAD` unless outcomes are queued.
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            outcomes: Mutex::new(VecDeque::new()),
            fallback: Response::ok(PAYLOAD),
            gate: None,
            progress: Vec::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn with_body(mut self, body: &'static str) -> Self {
        self.fallback = Response::ok(body);
        self
    }

    /// Queue outcomes returned before falling back to the default body.
    pub fn with_outcomes(self, outcomes: impl IntoIterator<Item = Result<Response, RequestError>>) -> Self {
        self.outcomes.lock().unwrap().extend(outcomes);
        self
    }

    /// Each call waits for (and consumes) one permit after counting itself.
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_progress(mut self, reports: impl IntoIterator<Item = (ProgressKind, Progress)>) -> Self {
        self.progress.extend(reports);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<TransportRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        wait_until(|| self.calls() >= n).await;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: TransportRequest,
        progress: ProgressSink,
    ) -> Result<Response, RequestError> {
        self.seen.lock().unwrap().push(request);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        for (kind, report) in &self.progress {
            progress(*kind, *report);
        }

        let queued = self.outcomes.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CacheHit(String),
    Success(String),
    Failure(ErrorKind),
    Cancelled(CancelReason),
    Upload(u64),
    Download(u64),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Failure(_) | Self::Cancelled(_))
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub tag: &'static str,
    pub event: Event,
    pub thread: Option<String>,
}

pub struct EventLog {
    tx: mpsc::UnboundedSender<Recorded>,
    rx: mpsc::UnboundedReceiver<Recorded>,
}

impl EventLog {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Callbacks that record into this log under `tag`.
    pub fn callbacks(&self, tag: &'static str) -> Callbacks {
        let record = {
            let tx = self.tx.clone();
            move |event: Event| {
                let thread = std::thread::current().name().map(str::to_string);
                let _ = tx.send(Recorded { tag, event, thread });
            }
        };
        let (r1, r2, r3, r4, r5) = (
            record.clone(),
            record.clone(),
            record.clone(),
            record.clone(),
            record,
        );
        Callbacks::new()
            .on_cache_hit(move |response| r1(Event::CacheHit(body(response))))
            .on_success(move |response| r2(Event::Success(body(response))))
            .on_failure(move |error| {
                r3(match error {
                    RequestError::Cancelled { reason } => Event::Cancelled(*reason),
                    other => Event::Failure(other.kind()),
                })
            })
            .on_upload_progress(move |p| r4(Event::Upload(p.completed)))
            .on_download_progress(move |p| r5(Event::Download(p.completed)))
    }

    pub async fn next(&mut self) -> Recorded {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("timed out waiting for a callback")
            .expect("event log closed")
    }

    /// Events for `tag` up to and including its terminal event. Events from
    /// other tags seen meanwhile are dropped.
    pub async fn until_terminal(&mut self, tag: &'static str) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let recorded = self.next().await;
            if recorded.tag != tag {
                continue;
            }
            let terminal = recorded.event.is_terminal();
            events.push(recorded.event);
            if terminal {
                return events;
            }
        }
    }

    /// Terminal event for `tag`, skipping anything delivered before it.
    pub async fn terminal(&mut self, tag: &'static str) -> Event {
        let mut events = self.until_terminal(tag).await;
        events.pop().expect("terminal event")
    }

    /// Nothing is delivered for `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(recorded)) = tokio::time::timeout(window, self.rx.recv()).await {
            panic!("unexpected callback: {recorded:?}");
        }
    }
}

pub fn body(response: &Response) -> String {
    String::from_utf8_lossy(&response.body).into_owned()
}

pub fn engine(transport: &Arc<ScriptedTransport>, config: EngineConfig) -> ExecutionEngine {
    ExecutionEngine::builder()
        .config(config)
        .transport(transport.clone())
        .build()
        .unwrap()
}

pub fn engine_with_cache(
    transport: &Arc<ScriptedTransport>,
    cache: Arc<dyn CacheHandler>,
    config: EngineConfig,
) -> ExecutionEngine {
    ExecutionEngine::builder()
        .config(config)
        .transport(transport.clone())
        .cache(cache)
        .build()
        .unwrap()
}

/// Poll `condition` every few milliseconds, failing after five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub struct SlowCache {
    pub inner: MemoryCache,
    pub delay: Duration,
}

#[async_trait]
impl CacheHandler for SlowCache {
    async fn lookup(&self, key: &str) -> Result<Option<CacheEntry>, RequestError> {
        tokio::time::sleep(self.delay).await;
        self.inner.lookup(key).await
    }

    async fn store(&self, key: &str, response: &Response) -> Result<(), RequestError> {
        self.inner.store(key, response).await
    }

    async fn remove(&self, key: &str) -> Result<(), RequestError> {
        self.inner.remove(key).await
    }
}
