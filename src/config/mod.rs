//! Engine configuration.
//!
//! Shared defaults (base URI, headers, timeout, serializers, policies) live in
//! one `EngineConfig` handed to the engine builder. Groups of APIs with
//! different conventions get named presets (`PresetRegistry`) rather than
//! separate engine types.

mod presets;

pub use presets::PresetRegistry;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{DuplicatePolicy, ReleasePolicy};

/// How request parameters are encoded in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestSerializer {
    #[default]
    Json,
    /// `application/x-www-form-urlencoded`
    Form,
}

/// How response bodies are validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSerializer {
    /// Non-empty bodies must parse as JSON.
    #[default]
    Json,
    /// Bodies are passed through untouched.
    Raw,
}

/// Ordering between cache lookup and network dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLookupMode {
    /// Finish the lookup (and any cache-hit delivery) before dispatching.
    #[default]
    Sequential,
    /// Dispatch while the lookup is still running. The terminal delivery
    /// still waits for the lookup, so a cache hit is never delivered after it.
    Race,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Used when a descriptor has no base URI of its own.
    pub base_uri: Option<String>,
    /// Merged under each request's header parameters.
    pub default_headers: BTreeMap<String, String>,
    /// Used when a descriptor has no timeout of its own.
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
    pub request_serializer: RequestSerializer,
    pub response_serializer: ResponseSerializer,
    /// Maximum `Restart` verdicts honoured per start call.
    pub restart_cap: u32,
    pub cache_lookup: CacheLookupMode,
    pub release_policy: ReleasePolicy,
    pub duplicate_policy: DuplicatePolicy,
    /// Drop a request's callbacks once its terminal callback has run and no
    /// other execution of it is still running.
    pub clear_callbacks_on_terminal: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_uri: None,
            default_headers: BTreeMap::new(),
            timeout: Duration::from_secs(60),
            request_serializer: RequestSerializer::Json,
            response_serializer: ResponseSerializer::Json,
            restart_cap: 1,
            cache_lookup: CacheLookupMode::Sequential,
            release_policy: ReleasePolicy::Hold,
            duplicate_policy: DuplicatePolicy::AllAllowed,
            clear_callbacks_on_terminal: true,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn with_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn with_request_serializer(mut self, serializer: RequestSerializer) -> Self {
        self.request_serializer = serializer;
        self
    }

    pub const fn with_response_serializer(mut self, serializer: ResponseSerializer) -> Self {
        self.response_serializer = serializer;
        self
    }

    pub const fn with_restart_cap(mut self, cap: u32) -> Self {
        self.restart_cap = cap;
        self
    }

    pub const fn with_cache_lookup(mut self, mode: CacheLookupMode) -> Self {
        self.cache_lookup = mode;
        self
    }

    pub const fn with_release_policy(mut self, policy: ReleasePolicy) -> Self {
        self.release_policy = policy;
        self
    }

    pub const fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub const fn with_clear_callbacks_on_terminal(mut self, clear: bool) -> Self {
        self.clear_callbacks_on_terminal = clear;
        self
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
