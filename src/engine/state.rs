//! Per-execution state machine.
//!
//! `Idle -> Running -> {Completed, Failed, Cancelled, RedirectedStopped}`.
//! The only legal transition leaves `Running`, and it is taken under the
//! execution's lock, so exactly one of cancel / finish / stop wins. The
//! winner releases registry tracking and performs the delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::policy::DuplicatePolicy;
use super::registry::InFlightRegistry;
use crate::callbacks::Delivery;
use crate::dispatch::Dispatcher;
use crate::error::{CancelReason, RequestError};
use crate::preprocess::Preprocessor;
use crate::request::{PreparedRequest, RequestShared};
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExecutionState {
    /// Never started.
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
    /// The redirection interceptor stopped the cycle. No terminal callback
    /// fired and the request can be started again.
    RedirectedStopped,
}

impl ExecutionState {
    /// Completed, Failed or Cancelled.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::RedirectedStopped => "redirected_stopped",
        }
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted start call.
pub(crate) struct Execution {
    pub(crate) id: Uuid,
    pub(crate) identifier: String,
    pub(crate) policy: DuplicatePolicy,
    token: CancellationToken,
    state: Mutex<ExecutionState>,
    /// Set on the delivery context once the terminal job (or the stop
    /// marker) has run; later non-terminal jobs are dropped.
    settled: AtomicBool,
    request: Weak<RequestShared>,
    dispatcher: Arc<dyn Dispatcher>,
    registry: Arc<InFlightRegistry>,
    clear_on_terminal: bool,
}

impl Execution {
    pub(crate) fn new(
        identifier: String,
        policy: DuplicatePolicy,
        request: Weak<RequestShared>,
        dispatcher: Arc<dyn Dispatcher>,
        registry: Arc<InFlightRegistry>,
        clear_on_terminal: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            identifier,
            policy,
            token: CancellationToken::new(),
            state: Mutex::new(ExecutionState::Running),
            settled: AtomicBool::new(false),
            request,
            dispatcher,
            registry,
            clear_on_terminal,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn state(&self) -> ExecutionState {
        *self.lock()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == ExecutionState::Running
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    fn transition(&self, to: ExecutionState) -> bool {
        let mut state = self.lock();
        if *state != ExecutionState::Running {
            return false;
        }
        *state = to;
        true
    }

    /// Leave `Running` as `to`: stop tracking and detach from the request.
    /// Returns the request if it is still alive.
    fn settle(self: &Arc<Self>, to: ExecutionState) -> Option<Option<Arc<RequestShared>>> {
        if !self.transition(to) {
            return None;
        }
        self.registry.release(self);
        let request = self.request.upgrade();
        if let Some(request) = &request {
            request.detach(self);
        }
        tracing::debug!(
            target: "reqcycle::engine",
            execution = %self.id,
            identifier = %self.identifier,
            state = %to,
            "execution settled"
        );
        Some(request)
    }

    /// Cancel from any thread. Returns `false` if the execution had already
    /// left `Running`.
    pub(crate) fn cancel(self: &Arc<Self>, reason: CancelReason) -> bool {
        let Some(request) = self.settle(ExecutionState::Cancelled) else {
            return false;
        };
        self.token.cancel();

        // a released request has nobody left to tell
        let Some(request) = request.filter(|_| reason != CancelReason::Released) else {
            return true;
        };
        let exec = Arc::clone(self);
        self.dispatcher.dispatch(Box::new(move || {
            exec.settled.store(true, Ordering::Release);
            request
                .callbacks
                .deliver(&Delivery::Failure(RequestError::cancelled(reason)));
            exec.clear_if_idle(&request);
        }));
        true
    }

    /// Complete or fail with `outcome`. `finalizer` runs on the delivery
    /// context right before the callbacks.
    pub(crate) fn finish(
        self: &Arc<Self>,
        outcome: Result<Response, RequestError>,
        finalizer: Option<Arc<dyn Preprocessor>>,
        prepared: Arc<PreparedRequest>,
    ) -> bool {
        match self.conclude(outcome.is_ok()) {
            Some(concluded) => {
                concluded.deliver(outcome, finalizer, prepared);
                true
            }
            None => false,
        }
    }

    /// Leave `Running` as Completed or Failed without delivering yet. `None`
    /// if cancel or stop won the transition. Anything done between this and
    /// `Concluded::deliver` can no longer be cancelled.
    pub(crate) fn conclude(self: &Arc<Self>, success: bool) -> Option<Concluded> {
        let to = if success {
            ExecutionState::Completed
        } else {
            ExecutionState::Failed
        };
        let request = self.settle(to)?;
        Some(Concluded {
            exec: Arc::clone(self),
            request,
        })
    }

    /// Redirection `Stop`: settle without a terminal callback. Callbacks stay
    /// registered.
    pub(crate) fn stop(self: &Arc<Self>) -> bool {
        let Some(request) = self.settle(ExecutionState::RedirectedStopped) else {
            return false;
        };
        if request.is_some() {
            let exec = Arc::clone(self);
            self.dispatcher.dispatch(Box::new(move || {
                exec.settled.store(true, Ordering::Release);
            }));
        }
        true
    }

    /// Queue a non-terminal delivery (cache hit, progress).
    pub(crate) fn deliver(self: &Arc<Self>, delivery: Delivery) {
        if !self.is_running() {
            return;
        }
        let Some(request) = self.request.upgrade() else {
            return;
        };
        let exec = Arc::clone(self);
        self.dispatcher.dispatch(Box::new(move || {
            if exec.settled.load(Ordering::Acquire) {
                return;
            }
            request.callbacks.deliver(&delivery);
        }));
    }

    /// Run `job` on the delivery context and wait for its result. `None` if
    /// the delivery context is gone.
    pub(crate) async fn on_dispatcher<T, F>(&self, job: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.dispatcher.dispatch(Box::new(move || {
            let _ = tx.send(job());
        }));
        rx.await.ok()
    }

    fn clear_if_idle(&self, request: &RequestShared) {
        if self.clear_on_terminal && !request.is_executing() {
            request.callbacks.clear();
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution")
            .field("id", &self.id)
            .field("identifier", &self.identifier)
            .field("state", &self.state())
            .finish()
    }
}

/// An execution that has left `Running` for Completed or Failed and still
/// owes its terminal delivery.
pub(crate) struct Concluded {
    exec: Arc<Execution>,
    request: Option<Arc<RequestShared>>,
}

impl Concluded {
    pub(crate) fn deliver(
        self,
        outcome: Result<Response, RequestError>,
        finalizer: Option<Arc<dyn Preprocessor>>,
        prepared: Arc<PreparedRequest>,
    ) {
        let Self { exec, request } = self;
        let Some(request) = request else {
            return;
        };
        let dispatcher = Arc::clone(&exec.dispatcher);
        dispatcher.dispatch(Box::new(move || {
            exec.settled.store(true, Ordering::Release);
            let delivery = match outcome {
                Ok(response) => {
                    if let Some(hook) = &finalizer {
                        hook.finalize_success(&prepared, &response);
                    }
                    Delivery::Success(response)
                }
                Err(error) => {
                    if let Some(hook) = &finalizer {
                        hook.finalize_failure(&prepared, &error);
                    }
                    Delivery::Failure(error)
                }
            };
            request.callbacks.deliver(&delivery);
            exec.clear_if_idle(&request);
        }));
    }
}
