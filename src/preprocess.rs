//! Request and response preprocessing hooks.
//!
//! Request hooks run on the caller's thread inside `start`, before the
//! identifier is frozen. Response hooks come in two flavours: the
//! `preprocess_*` pair runs on the blocking worker pool, the `finalize_*`
//! pair runs on the delivery thread immediately before the callbacks.
//! Responses served from the cache run `preprocess_success` on the delivery
//! thread instead of the worker pool; an `Err` there fails a `CacheOnly` hit
//! and drops an `AlsoNetwork` cache-hit delivery.

use crate::error::RequestError;
use crate::request::{HeaderParameters, Parameters, PreparedRequest};
use crate::response::Response;

#[allow(unused_variables)]
pub trait Preprocessor: Send + Sync {
    fn preprocess_headers(&self, headers: HeaderParameters) -> HeaderParameters {
        headers
    }

    fn preprocess_parameters(&self, parameters: Parameters) -> Parameters {
        parameters
    }

    /// Receives the URL joined from base URI and path.
    fn preprocess_url(&self, url: String) -> String {
        url
    }

    /// Worker thread, or the delivery thread for cache-sourced responses.
    /// Returning `Err` turns the cycle into a failure.
    fn preprocess_success(
        &self,
        request: &PreparedRequest,
        response: &mut Response,
    ) -> Result<(), RequestError> {
        Ok(())
    }

    /// Worker thread.
    fn preprocess_failure(&self, request: &PreparedRequest, error: &mut RequestError) {}

    /// Delivery thread.
    fn finalize_success(&self, request: &PreparedRequest, response: &Response) {}

    /// Delivery thread.
    fn finalize_failure(&self, request: &PreparedRequest, error: &RequestError) {}
}

/// Adds fixed parameters to every request (e.g. app version, platform).
#[derive(Debug, Clone, Default)]
pub struct CommonParameters {
    parameters: Parameters,
}

impl CommonParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

impl Preprocessor for CommonParameters {
    fn preprocess_parameters(&self, mut parameters: Parameters) -> Parameters {
        for (k, v) in &self.parameters {
            parameters.entry(k.clone()).or_insert_with(|| v.clone());
        }
        parameters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_parameters_do_not_override_request_values() {
        let hook = CommonParameters::new().with("platform", "linux").with("v", 1);
        let mut params = Parameters::new();
        params.insert("v".into(), 2.into());

        let out = hook.preprocess_parameters(params);
        assert_eq!(out["platform"], "linux");
        assert_eq!(out["v"], 2);
    }
}
