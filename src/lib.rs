//! reqcycle
//!
//! Request lifecycle orchestration over an HTTP transport: cache lookup,
//! network dispatch, redirection interception, background preprocessing and
//! ordered callback delivery, with duplicate-request and release policies.
#![deny(unsafe_code)]

pub mod cache;
pub mod callbacks;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod observability;
pub mod preprocess;
pub mod redirection;
pub mod request;
pub mod response;
pub mod transport;

pub use error::RequestError;

pub mod prelude {
    pub use crate::cache::{CacheHandler, CacheOptions, CacheReadMode, MemoryCache};
    pub use crate::callbacks::{Callbacks, Progress, ProgressKind, ResponseDelegate};
    pub use crate::config::{
        CacheLookupMode, EngineConfig, PresetRegistry, RequestSerializer, ResponseSerializer,
    };
    pub use crate::dispatch::{DeliveryThread, Dispatcher, InlineDispatcher};
    pub use crate::engine::{
        DuplicatePolicy, ExecutionEngine, ExecutionState, InFlightRegistry, ReleasePolicy,
    };
    pub use crate::error::{CancelReason, ErrorKind, RequestError};
    pub use crate::preprocess::Preprocessor;
    pub use crate::redirection::{Redirection, RedirectionInterceptor};
    pub use crate::request::{HttpMethod, MultipartForm, Request, RequestDescriptor, UploadBody};
    pub use crate::response::{Response, ResponseSource};
    pub use crate::transport::{ReqwestTransport, Transport};
}
