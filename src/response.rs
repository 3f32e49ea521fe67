//! Response value delivered to callbacks and stored in the cache.

use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;

use crate::error::RequestError;

/// Where a delivered response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
    /// Set when the body was streamed to a download target instead of memory.
    pub download_path: Option<PathBuf>,
    pub received_at: DateTime<Utc>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
            source: ResponseSource::Network,
            download_path: None,
            received_at: Utc::now(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, RequestError> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            RequestError::InvalidRequest(format!("Invalid header name '{name}': {e}"))
        })?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| RequestError::InvalidRequest(format!("Invalid header value: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn is_from_cache(&self) -> bool {
        self.source == ResponseSource::Cache
    }

    /// Copy of this response marked as served from the cache.
    pub fn as_cached(&self) -> Self {
        Self {
            source: ResponseSource::Cache,
            ..self.clone()
        }
    }

    pub fn text(&self) -> Result<&str, RequestError> {
        std::str::from_utf8(&self.body).map_err(|e| RequestError::Serialization(e.to_string()))
    }

    pub fn parse_json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
