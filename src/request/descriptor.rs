//! Request descriptor and identifier derivation.
//!
//! A `RequestDescriptor` is plain data. The identifier built from it is the
//! key for both the response cache and duplicate-request detection, so it
//! must not depend on the order parameters were inserted in.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

use super::method::HttpMethod;
use super::upload::UploadBody;

/// Request parameters (query string or body, depending on method).
pub type Parameters = BTreeMap<String, Value>;

/// Request header parameters.
pub type HeaderParameters = BTreeMap<String, String>;

/// Declarative description of one logical request.
#[derive(Debug, Clone, Default)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    /// Path relative to `base_uri` (e.g. `/detail/list`), or an absolute URL.
    pub uri: String,
    /// Server address and common path prefix. Falls back to the engine config.
    pub base_uri: Option<String>,
    pub parameters: Option<Parameters>,
    pub header_parameters: Option<HeaderParameters>,
    /// Falls back to the engine config when unset.
    pub timeout: Option<Duration>,
    pub upload: Option<UploadBody>,
    pub download_path: Option<PathBuf>,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, uri)
    }

    pub fn with_base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters
            .get_or_insert_with(Parameters::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_parameters<K, V>(mut self, parameters: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let map = self.parameters.get_or_insert_with(Parameters::new);
        for (k, v) in parameters {
            map.insert(k.into(), v.into());
        }
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.header_parameters
            .get_or_insert_with(HeaderParameters::new)
            .insert(name.into(), value.into());
        self
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_upload(mut self, upload: UploadBody) -> Self {
        self.upload = Some(upload);
        self
    }

    pub fn with_download_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_path = Some(path.into());
        self
    }

    /// Full URL built from `base_uri` and `uri`.
    pub fn resolved_url(&self) -> String {
        resolve_url(self.base_uri.as_deref(), &self.uri)
    }

    /// Identifier computed from this descriptor's own fields.
    ///
    /// The engine recomputes it after request preprocessing and config
    /// defaults are applied; see `Request::identifier`.
    pub fn identifier(&self) -> String {
        let empty = Parameters::new();
        request_identifier(
            self.method,
            &self.resolved_url(),
            self.parameters.as_ref().unwrap_or(&empty),
        )
    }
}

/// Join a base URI and a relative path. Absolute `uri` values win.
pub fn resolve_url(base_uri: Option<&str>, uri: &str) -> String {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return uri.to_string();
    }
    match base_uri.map(|b| b.trim_end_matches('/')) {
        Some(base) if !base.is_empty() => {
            let path = uri.trim_start_matches('/');
            if path.is_empty() {
                base.to_string()
            } else {
                format!("{base}/{path}")
            }
        }
        _ => uri.to_string(),
    }
}

/// Build the identifier for `method` + `url` + `parameters`.
///
/// Format: `METHOD url {params}`. Spaces in the URL are written as `%20`, so
/// the first space after the URL always starts the parameters. Parameters are
/// written as canonical JSON: object keys sorted at every nesting level, so
/// two semantically equal parameter sets always produce the same string. The
/// result stays human readable, which makes it usable in logs as-is.
pub fn request_identifier(method: HttpMethod, url: &str, parameters: &Parameters) -> String {
    let mut out = String::with_capacity(url.len() + 32);
    out.push_str(method.as_str());
    out.push(' ');
    for ch in url.chars() {
        if ch == ' ' {
            out.push_str("%20");
        } else {
            out.push(ch);
        }
    }
    if !parameters.is_empty() {
        out.push(' ');
        out.push('{');
        for (i, (key, value)) in parameters.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_json_string(&mut out, key);
            out.push(':');
            write_canonical(&mut out, value);
        }
        out.push('}');
    }
    out
}

fn write_canonical(out: &mut String, value: &Value) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_json_string(out, key);
                out.push(':');
                write_canonical(out, &map[key]);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        Value::String(s) => write_json_string(out, s),
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

fn write_json_string(out: &mut String, s: &str) {
    // serde_json escaping keeps keys containing quotes or separators unambiguous
    match serde_json::to_string(s) {
        Ok(quoted) => out.push_str(&quoted),
        Err(_) => {
            let _ = write!(out, "{s:?}");
        }
    }
}
