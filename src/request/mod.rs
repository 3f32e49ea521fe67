//! Requests.
//!
//! `Request` is the caller's handle: descriptor, cache options, per-request
//! hooks and policy overrides, plus the callback registry. Clones share state.
//! The engine snapshots everything it needs at `start` (`PreparedRequest`),
//! and descriptor edits are refused while an execution is running.

mod descriptor;
mod method;
mod prepared;
mod upload;

pub use descriptor::{
    HeaderParameters, Parameters, RequestDescriptor, request_identifier, resolve_url,
};
pub use method::HttpMethod;
pub use prepared::PreparedRequest;
pub use upload::{FormPart, MultipartForm, PartContent, UploadBody};

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::cache::CacheOptions;
use crate::callbacks::{CallbackRegistry, Callbacks, ResponseDelegate};
use crate::engine::{
    DuplicatePolicy, ExecutionState, InFlightRegistry, ReleasePolicy, state::Execution,
};
use crate::error::{CancelReason, RequestError};
use crate::preprocess::Preprocessor;
use crate::redirection::RedirectionInterceptor;

/// Everything the engine reads from a request at `start`.
#[derive(Clone, Default)]
pub(crate) struct RequestSettings {
    pub(crate) descriptor: RequestDescriptor,
    pub(crate) cache: CacheOptions,
    /// Overrides the engine default when set.
    pub(crate) release: Option<ReleasePolicy>,
    /// Overrides the engine default when set.
    pub(crate) duplicate: Option<DuplicatePolicy>,
    pub(crate) preprocessor: Option<Arc<dyn Preprocessor>>,
    pub(crate) interceptor: Option<Arc<dyn RedirectionInterceptor>>,
}

#[derive(Default)]
struct Tracking {
    running: Vec<Arc<Execution>>,
    latest: Option<Arc<Execution>>,
    /// Identifier frozen by the latest start; reset by descriptor edits.
    identifier: Option<String>,
}

pub(crate) struct RequestShared {
    settings: Mutex<RequestSettings>,
    pub(crate) callbacks: CallbackRegistry,
    tracking: Mutex<Tracking>,
}

impl RequestShared {
    fn settings(&self) -> MutexGuard<'_, RequestSettings> {
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tracking(&self) -> MutexGuard<'_, Tracking> {
        self.tracking.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn is_executing(&self) -> bool {
        !self.tracking().running.is_empty()
    }

    /// Admit `exec` into `registry` and attach it to this request as one
    /// step. The tracking lock is held across both, so a concurrent
    /// `LastWins` start that cancels `exec` right after admission detaches
    /// it only once it has been attached.
    pub(crate) fn admit(
        &self,
        registry: &InFlightRegistry,
        exec: &Arc<Execution>,
    ) -> Result<Vec<Arc<Execution>>, RequestError> {
        let mut tracking = self.tracking();
        let superseded = registry.admit(exec)?;
        tracking.running.push(Arc::clone(exec));
        tracking.latest = Some(Arc::clone(exec));
        tracking.identifier = Some(exec.identifier.clone());
        Ok(superseded)
    }

    pub(crate) fn detach(&self, exec: &Arc<Execution>) {
        self.tracking().running.retain(|e| !Arc::ptr_eq(e, exec));
    }
}

impl Drop for RequestShared {
    fn drop(&mut self) {
        // only reachable while running under NoHold: the engine's task holds
        // a weak reference and the caller just dropped the last handle
        let tracking = self.tracking.get_mut().unwrap_or_else(|e| e.into_inner());
        for exec in std::mem::take(&mut tracking.running) {
            exec.cancel(CancelReason::Released);
        }
    }
}

/// A startable request.
///
/// ```rust,ignore
/// let request = Request::new(
///     RequestDescriptor::get("/detail/list").with_parameter("id", 42),
/// )
/// .with_cache(CacheOptions::read_write());
///
/// engine.start_with(&request, Callbacks::new()
///     .on_cache_hit(|cached| render(cached))
///     .on_success(|fresh| render(fresh))
///     .on_failure(|err| report(err)))?;
/// ```
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestShared>,
}

impl Request {
    pub fn new(descriptor: RequestDescriptor) -> Self {
        Self {
            inner: Arc::new(RequestShared {
                settings: Mutex::new(RequestSettings {
                    descriptor,
                    ..Default::default()
                }),
                callbacks: CallbackRegistry::new(),
                tracking: Mutex::new(Tracking::default()),
            }),
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(RequestDescriptor::get(uri))
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(RequestDescriptor::post(uri))
    }

    pub fn with_cache(self, options: CacheOptions) -> Self {
        self.inner.settings().cache = options;
        self
    }

    pub fn with_release_policy(self, policy: ReleasePolicy) -> Self {
        self.inner.settings().release = Some(policy);
        self
    }

    pub fn with_duplicate_policy(self, policy: DuplicatePolicy) -> Self {
        self.inner.settings().duplicate = Some(policy);
        self
    }

    /// Replaces the engine's default preprocessor for this request.
    pub fn with_preprocessor(self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.inner.settings().preprocessor = Some(preprocessor);
        self
    }

    /// Replaces the engine's default interceptor for this request.
    pub fn with_interceptor(self, interceptor: Arc<dyn RedirectionInterceptor>) -> Self {
        self.inner.settings().interceptor = Some(interceptor);
        self
    }

    pub fn with_callbacks(self, callbacks: Callbacks) -> Self {
        self.set_callbacks(callbacks);
        self
    }

    pub fn descriptor(&self) -> RequestDescriptor {
        self.inner.settings().descriptor.clone()
    }

    pub fn cache_options(&self) -> CacheOptions {
        self.inner.settings().cache.clone()
    }

    /// Edit the descriptor. Refused while an execution is running, since the
    /// identifier of a running execution must not change underneath it.
    pub fn update_descriptor<F>(&self, edit: F) -> Result<(), RequestError>
    where
        F: FnOnce(&mut RequestDescriptor),
    {
        let mut tracking = self.inner.tracking();
        if !tracking.running.is_empty() {
            return Err(RequestError::InvalidRequest(
                "request descriptor cannot change while the request is executing".into(),
            ));
        }
        edit(&mut self.inner.settings().descriptor);
        tracking.identifier = None;
        Ok(())
    }

    pub fn set_cache_options(&self, options: CacheOptions) {
        self.inner.settings().cache = options;
    }

    pub fn set_callbacks(&self, callbacks: Callbacks) {
        self.inner.callbacks.set_callbacks(callbacks);
    }

    /// Register a delegate. Only a weak reference is kept.
    pub fn set_delegate<D>(&self, delegate: &Arc<D>)
    where
        D: ResponseDelegate + 'static,
    {
        self.inner.callbacks.set_delegate(delegate);
    }

    /// Drop every registered callback and the delegate reference.
    pub fn clear_callbacks(&self) {
        self.inner.callbacks.clear();
    }

    /// Cancel every running execution of this request. Safe from any thread
    /// and in any state; each cancelled execution reports a `Cancelled`
    /// failure.
    pub fn cancel(&self) {
        let running = self.inner.tracking().running.clone();
        for exec in running {
            exec.cancel(CancelReason::Explicit);
        }
    }

    pub fn is_executing(&self) -> bool {
        self.inner.is_executing()
    }

    /// Identifier of the latest start, or the descriptor's own identifier if
    /// the request has not started since it was last edited.
    pub fn identifier(&self) -> String {
        if let Some(identifier) = self.inner.tracking().identifier.clone() {
            return identifier;
        }
        self.inner.settings().descriptor.identifier()
    }

    /// State of the most recent execution.
    pub fn state(&self) -> ExecutionState {
        self.inner
            .tracking()
            .latest
            .as_ref()
            .map_or(ExecutionState::Idle, |exec| exec.state())
    }

    pub(crate) fn settings(&self) -> RequestSettings {
        self.inner.settings().clone()
    }

    pub(crate) fn shared(&self) -> &Arc<RequestShared> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<RequestShared> {
        Arc::downgrade(&self.inner)
    }
}

impl From<RequestDescriptor> for Request {
    fn from(descriptor: RequestDescriptor) -> Self {
        Self::new(descriptor)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("descriptor", &self.descriptor())
            .field("state", &self.state())
            .finish()
    }
}
