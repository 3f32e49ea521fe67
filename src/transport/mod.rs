//! HTTP transport seam.
//!
//! The engine hands a fully prepared `TransportRequest` to a `Transport` and
//! races the returned future against the execution's cancellation token.
//! Dropping the future is the cancellation signal: implementations must
//! abort their I/O when dropped (reqwest does).

mod http_client;

pub use http_client::ReqwestTransport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::callbacks::{Progress, ProgressKind};
use crate::config::{RequestSerializer, ResponseSerializer};
use crate::error::RequestError;
use crate::request::{HeaderParameters, HttpMethod, MultipartForm, Parameters, PreparedRequest};
use crate::response::Response;

/// Progress reporter handed to the transport for one dispatch.
pub type ProgressSink = Arc<dyn Fn(ProgressKind, Progress) + Send + Sync>;

/// Transport-level request data.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderParameters,
    pub parameters: Parameters,
    /// Built from the request's upload body at dispatch time.
    pub upload: Option<MultipartForm>,
    pub timeout: Duration,
    pub download_path: Option<PathBuf>,
    pub request_serializer: RequestSerializer,
    pub response_serializer: ResponseSerializer,
}

impl TransportRequest {
    pub fn from_prepared(
        prepared: &PreparedRequest,
        request_serializer: RequestSerializer,
        response_serializer: ResponseSerializer,
    ) -> Self {
        Self {
            method: prepared.method,
            url: prepared.url.clone(),
            headers: prepared.headers.clone(),
            parameters: prepared.parameters.clone(),
            upload: prepared.upload.as_ref().map(|u| u.build()),
            timeout: prepared.timeout,
            download_path: prepared.download_path.clone(),
            request_serializer,
            response_serializer,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one round trip. Non-success statuses should come back as
    /// `RequestError::Http`.
    async fn send(
        &self,
        request: TransportRequest,
        progress: ProgressSink,
    ) -> Result<Response, RequestError>;
}

/// Progress sink that discards every report.
pub fn discard_progress() -> ProgressSink {
    Arc::new(|_, _| {})
}
