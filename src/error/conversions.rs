//! Type Conversions for RequestError
//!
//! From implementations for the error types the transport and cache layers
//! run into.

use super::types::RequestError;

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout(std::time::Duration::ZERO);
        }
        if let Some(status) = err.status() {
            return Self::http(status.as_u16(), err.to_string());
        }
        if err.is_decode() || err.is_body() {
            return Self::Serialization(err.to_string());
        }
        Self::Connection(err.to_string())
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for RequestError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
