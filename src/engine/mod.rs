//! Execution engine.
//!
//! `ExecutionEngine::start` snapshots a `Request` into a `PreparedRequest`,
//! applies the duplicate policy against the in-flight registry, and spawns
//! one task per accepted start on the engine's runtime. It returns without
//! waiting for any stage.
//!
//! Callback ordering per start call: cache hit (if any), then progress, then
//! exactly one terminal delivery (success, failure or cancellation), unless
//! the redirection interceptor stops the cycle. All of it runs on the
//! engine's `Dispatcher`.

mod lifecycle;
pub mod policy;
pub(crate) mod registry;
pub(crate) mod state;

pub use policy::{DuplicatePolicy, ReleasePolicy};
pub use registry::InFlightRegistry;
pub use state::ExecutionState;

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::cache::{CacheHandler, CacheOptions};
use crate::callbacks::Callbacks;
use crate::config::EngineConfig;
use crate::dispatch::{DeliveryThread, Dispatcher};
use crate::error::{CancelReason, RequestError};
use crate::preprocess::Preprocessor;
use crate::redirection::RedirectionInterceptor;
use crate::request::{
    PreparedRequest, Request, RequestDescriptor, request_identifier, resolve_url,
};
use crate::transport::Transport;
use lifecycle::{Holder, Run};
use state::Execution;

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: Option<Arc<dyn CacheHandler>>,
    pub(crate) registry: Arc<InFlightRegistry>,
    pub(crate) dispatcher: Arc<dyn Dispatcher>,
    pub(crate) preprocessor: Option<Arc<dyn Preprocessor>>,
    pub(crate) interceptor: Option<Arc<dyn RedirectionInterceptor>>,
    pub(crate) runtime: Handle,
}

/// Drives requests through cache, network, redirection and delivery.
/// Cheap to clone.
#[derive(Clone)]
pub struct ExecutionEngine {
    inner: Arc<EngineInner>,
}

impl ExecutionEngine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<InFlightRegistry> {
        &self.inner.registry
    }

    pub fn cache(&self) -> Option<&Arc<dyn CacheHandler>> {
        self.inner.cache.as_ref()
    }

    /// Resolve `request` against the config and run the request-side
    /// preprocessing hooks, without starting anything.
    pub fn prepare(&self, request: &Request) -> PreparedRequest {
        let settings = request.settings();
        let preprocessor = settings
            .preprocessor
            .as_ref()
            .or(self.inner.preprocessor.as_ref());
        self.prepare_with(&settings.descriptor, &settings.cache, preprocessor)
    }

    fn prepare_with(
        &self,
        descriptor: &RequestDescriptor,
        cache: &CacheOptions,
        preprocessor: Option<&Arc<dyn Preprocessor>>,
    ) -> PreparedRequest {
        let config = &self.inner.config;

        let mut headers = config.default_headers.clone();
        if let Some(own) = &descriptor.header_parameters {
            headers.extend(own.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        let mut parameters = descriptor.parameters.clone().unwrap_or_default();
        let base_uri = descriptor.base_uri.as_deref().or(config.base_uri.as_deref());
        let mut url = resolve_url(base_uri, &descriptor.uri);

        if let Some(hook) = preprocessor {
            headers = hook.preprocess_headers(headers);
            parameters = hook.preprocess_parameters(parameters);
            url = hook.preprocess_url(url);
        }

        let identifier = request_identifier(descriptor.method, &url, &parameters);
        let cache_key = cache.cache_key(&identifier);
        PreparedRequest {
            method: descriptor.method,
            url,
            headers,
            parameters,
            timeout: descriptor.timeout.unwrap_or(config.timeout),
            upload: descriptor.upload.clone(),
            download_path: descriptor.download_path.clone(),
            identifier,
            cache_key,
        }
    }

    /// Start `request` with its currently registered callbacks.
    ///
    /// Returns `DuplicateSuppressed` when a `FirstWins` request finds an
    /// execution with the same identifier running; no callback fires for the
    /// rejected start.
    pub fn start(&self, request: &Request) -> Result<(), RequestError> {
        let settings = request.settings();
        let config = &self.inner.config;
        let preprocessor = settings
            .preprocessor
            .clone()
            .or_else(|| self.inner.preprocessor.clone());
        let interceptor = settings
            .interceptor
            .clone()
            .or_else(|| self.inner.interceptor.clone());
        let prepared = Arc::new(self.prepare_with(
            &settings.descriptor,
            &settings.cache,
            preprocessor.as_ref(),
        ));

        let exec = Arc::new(Execution::new(
            prepared.identifier.clone(),
            settings.duplicate.unwrap_or(config.duplicate_policy),
            request.downgrade(),
            Arc::clone(&self.inner.dispatcher),
            Arc::clone(&self.inner.registry),
            config.clear_callbacks_on_terminal,
        ));

        // attached before predecessors are cancelled, so their terminal
        // delivery sees this request as still executing
        let superseded = request
            .shared()
            .admit(&self.inner.registry, &exec)
            .inspect_err(|_| {
                tracing::debug!(
                    target: "reqcycle::engine",
                    identifier = %prepared.identifier,
                    "duplicate start suppressed"
                );
            })?;
        for previous in superseded {
            previous.cancel(CancelReason::Superseded);
        }

        let holder = match settings.release.unwrap_or(config.release_policy) {
            ReleasePolicy::Hold => Holder::Strong(Arc::clone(request.shared())),
            ReleasePolicy::NoHold => Holder::Weak(request.downgrade()),
        };

        tracing::debug!(
            target: "reqcycle::engine",
            execution = %exec.id,
            identifier = %prepared.identifier,
            "start accepted"
        );
        let run = Run {
            engine: Arc::clone(&self.inner),
            exec,
            holder,
            prepared,
            cache_options: settings.cache,
            preprocessor,
            interceptor,
        };
        self.inner.runtime.spawn(run.drive());
        Ok(())
    }

    /// Replace the request's callbacks, then start it.
    pub fn start_with(&self, request: &Request, callbacks: Callbacks) -> Result<(), RequestError> {
        request.set_callbacks(callbacks);
        self.start(request)
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache.is_some())
            .field("in_flight", &self.inner.registry.len())
            .finish()
    }
}

/// Builder for `ExecutionEngine`. A transport is required; everything else
/// has a default.
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    transport: Option<Arc<dyn Transport>>,
    cache: Option<Arc<dyn CacheHandler>>,
    registry: Option<Arc<InFlightRegistry>>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
    preprocessor: Option<Arc<dyn Preprocessor>>,
    interceptor: Option<Arc<dyn RedirectionInterceptor>>,
    runtime: Option<Handle>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheHandler>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share duplicate tracking with other engines.
    pub fn registry(mut self, registry: Arc<InFlightRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to a fresh `DeliveryThread`.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Default preprocessor for requests that do not set their own.
    pub fn preprocessor(mut self, preprocessor: Arc<dyn Preprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Default interceptor for requests that do not set their own.
    pub fn interceptor(mut self, interceptor: Arc<dyn RedirectionInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<ExecutionEngine, RequestError> {
        let transport = self
            .transport
            .ok_or_else(|| RequestError::Configuration("a transport is required".into()))?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| {
                RequestError::Configuration(format!("no tokio runtime available: {e}"))
            })?,
        };
        let dispatcher: Arc<dyn Dispatcher> = match self.dispatcher {
            Some(dispatcher) => dispatcher,
            None => Arc::new(DeliveryThread::spawn()?),
        };

        tracing::debug!(
            target: "reqcycle::engine",
            restart_cap = self.config.restart_cap,
            cache = self.cache.is_some(),
            "engine built"
        );
        Ok(ExecutionEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                transport,
                cache: self.cache,
                registry: self.registry.unwrap_or_default(),
                dispatcher,
                preprocessor: self.preprocessor,
                interceptor: self.interceptor,
                runtime,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::CommonParameters;
    use crate::transport::ReqwestTransport;
    use std::time::Duration;

    fn engine(config: EngineConfig) -> ExecutionEngine {
        ExecutionEngine::builder()
            .config(config)
            .transport(Arc::new(ReqwestTransport::new().unwrap()))
            .dispatcher(Arc::new(crate::dispatch::InlineDispatcher))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn prepare_applies_config_defaults() {
        let engine = engine(
            EngineConfig::new()
                .with_base_uri("https://api.example.com/v1/")
                .with_default_header("x-app", "demo")
                .with_timeout(Duration::from_secs(5)),
        );
        let request = Request::new(
            RequestDescriptor::get("/detail/list")
                .with_parameter("id", 42)
                .with_header("x-app", "override"),
        )
        .with_cache(CacheOptions::read_write().with_extra_key("u1"));

        let prepared = engine.prepare(&request);
        assert_eq!(prepared.url, "https://api.example.com/v1/detail/list");
        assert_eq!(prepared.headers["x-app"], "override");
        assert_eq!(prepared.timeout, Duration::from_secs(5));
        assert_eq!(
            prepared.identifier,
            r#"GET https://api.example.com/v1/detail/list {"id":42}"#
        );
        assert_eq!(prepared.cache_key, format!("{} #u1", prepared.identifier));
    }

    #[tokio::test]
    async fn request_preprocessing_feeds_the_identifier() {
        let engine = ExecutionEngine::builder()
            .transport(Arc::new(ReqwestTransport::new().unwrap()))
            .preprocessor(Arc::new(CommonParameters::new().with("platform", "linux")))
            .build()
            .unwrap();
        let prepared = engine.prepare(&Request::get("https://host/a"));
        assert_eq!(prepared.identifier, r#"GET https://host/a {"platform":"linux"}"#);
    }

    struct Pending;

    #[async_trait::async_trait]
    impl Transport for Pending {
        async fn send(
            &self,
            _request: crate::transport::TransportRequest,
            _progress: crate::transport::ProgressSink,
        ) -> Result<crate::response::Response, RequestError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn suppressed_duplicates_are_rejected_and_logged() {
        let engine = ExecutionEngine::builder()
            .config(EngineConfig::new().with_duplicate_policy(DuplicatePolicy::FirstWins))
            .transport(Arc::new(Pending))
            .dispatcher(Arc::new(crate::dispatch::InlineDispatcher))
            .build()
            .unwrap();

        let first = Request::get("https://host/a");
        engine.start(&first).unwrap();
        let err = engine.start(&Request::get("https://host/a")).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::DuplicateSuppressed);
        assert!(logs_contain("duplicate start suppressed"));

        first.cancel();
        assert!(engine.registry().is_empty());
        assert_eq!(first.state(), ExecutionState::Cancelled);
    }

    #[test]
    fn builder_requires_a_transport() {
        let err = ExecutionEngine::builder().build().unwrap_err();
        assert!(matches!(err, RequestError::Configuration(_)));
    }
}
