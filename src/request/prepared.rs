use std::path::PathBuf;
use std::time::Duration;

use super::descriptor::{HeaderParameters, Parameters};
use super::method::HttpMethod;
use super::upload::UploadBody;

/// Frozen, fully resolved snapshot of a request taken at `start`.
///
/// Config defaults and request preprocessing have been applied. The engine
/// never reads the caller's descriptor again for this execution, so later
/// edits cannot change what is in flight.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HeaderParameters,
    pub parameters: Parameters,
    pub timeout: Duration,
    pub upload: Option<UploadBody>,
    pub download_path: Option<PathBuf>,
    /// Duplicate-detection key.
    pub identifier: String,
    /// Identifier plus the request's extra cache key, if any.
    pub cache_key: String,
}
