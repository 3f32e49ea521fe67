//! Response redirection.
//!
//! After the transport returns, and before any preprocessing, the engine asks
//! the request's `RedirectionInterceptor` what to do with the outcome. The
//! verdict is returned synchronously; the engine's state machine acts on it.
//!
//! `Stop` leaves the request's callbacks registered. A caller that neither
//! restarts nor calls `clear_callbacks()` afterwards keeps those closures
//! alive for as long as it keeps the request.

use crate::error::RequestError;
use crate::request::PreparedRequest;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redirection {
    /// Preprocess and deliver as usual.
    Continue,
    /// Halt this cycle: no terminal callback, callbacks stay registered.
    Stop,
    /// Re-enter the lifecycle from the duplicate check, bounded by the
    /// engine's restart cap.
    Restart,
}

/// Inspects a transport outcome and decides how the cycle proceeds.
///
/// Called on a worker thread.
pub trait RedirectionInterceptor: Send + Sync {
    fn redirect(
        &self,
        request: &PreparedRequest,
        outcome: &Result<Response, RequestError>,
    ) -> Redirection;
}

impl<F> RedirectionInterceptor for F
where
    F: Fn(&PreparedRequest, &Result<Response, RequestError>) -> Redirection + Send + Sync,
{
    fn redirect(
        &self,
        request: &PreparedRequest,
        outcome: &Result<Response, RequestError>,
    ) -> Redirection {
        self(request, outcome)
    }
}

/// Stops the cycle when the server answers with one of the given statuses,
/// e.g. 401 to hand control to a re-authentication flow.
#[derive(Debug, Clone)]
pub struct StopOnStatus {
    statuses: Vec<u16>,
}

impl StopOnStatus {
    pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }
}

impl RedirectionInterceptor for StopOnStatus {
    fn redirect(
        &self,
        request: &PreparedRequest,
        outcome: &Result<Response, RequestError>,
    ) -> Redirection {
        let status = match outcome {
            Ok(response) => Some(response.status),
            Err(error) => error.status_code(),
        };
        match status {
            Some(status) if self.statuses.contains(&status) => {
                tracing::debug!(
                    target: "reqcycle::redirection",
                    identifier = %request.identifier,
                    status,
                    "stopping cycle"
                );
                Redirection::Stop
            }
            _ => Redirection::Continue,
        }
    }
}
