use std::collections::HashMap;

use super::EngineConfig;
use crate::error::RequestError;

/// Named `EngineConfig` presets, one per API family.
///
/// ```rust,ignore
/// let presets = PresetRegistry::from_json(r#"{
///     "catalog": { "base_uri": "https://catalog.example.com", "timeout": 5000 },
///     "upload":  { "base_uri": "https://files.example.com", "request_serializer": "form" }
/// }"#)?;
/// let engine = ExecutionEngine::builder()
///     .config(presets.require("catalog")?)
///     .transport(transport)
///     .build()?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct PresetRegistry {
    presets: HashMap<String, EngineConfig>,
}

impl PresetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object mapping preset names to (partial) configs.
    pub fn from_json(json: &str) -> Result<Self, RequestError> {
        let presets: HashMap<String, EngineConfig> = serde_json::from_str(json)
            .map_err(|e| RequestError::Configuration(format!("invalid preset document: {e}")))?;
        Ok(Self { presets })
    }

    pub fn register(&mut self, name: impl Into<String>, config: EngineConfig) -> &mut Self {
        self.presets.insert(name.into(), config);
        self
    }

    pub fn get(&self, name: &str) -> Option<&EngineConfig> {
        self.presets.get(name)
    }

    pub fn require(&self, name: &str) -> Result<EngineConfig, RequestError> {
        self.presets
            .get(name)
            .cloned()
            .ok_or_else(|| RequestError::Configuration(format!("unknown preset '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }
}
