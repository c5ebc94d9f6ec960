//! # Model Registry
//!
//! Maps the model names clients send (the `model` form field) to loaded
//! engines. Built once at startup, before the server binds, and read-only
//! afterwards: there is no way to add or remove a model while serving.
//!
//! ## Key Rust Concepts:
//! - **Trait objects**: entries are `Arc<dyn SpeechEngine>`, so the registry
//!   does not care whether it holds Whisper models or test fakes
//! - **BTreeMap**: keeps names sorted, which makes the model listing stable

use crate::config::ModelConfig;
use crate::transcription::engine::SpeechEngine;
use crate::transcription::whisper::WhisperEngine;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name → engine lookup shared by every request.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    engines: BTreeMap<String, Arc<dyn SpeechEngine>>,
}

impl ModelRegistry {
    /// Load every configured model.
    ///
    /// Fails on the first model that cannot be loaded: a server that is
    /// missing an advertised model should not start.
    pub async fn load(models: &BTreeMap<String, ModelConfig>) -> Result<Self> {
        let mut engines: BTreeMap<String, Arc<dyn SpeechEngine>> = BTreeMap::new();
        for (name, model_config) in models {
            let engine = WhisperEngine::load(name, model_config)
                .await
                .with_context(|| format!("loading model '{}'", name))?;
            engines.insert(name.clone(), Arc::new(engine));
        }

        tracing::info!(
            models = ?engines.keys().collect::<Vec<_>>(),
            "Model registry ready"
        );
        Ok(Self { engines })
    }

    /// Engine registered under exactly `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn SpeechEngine>> {
        self.engines.get(name).cloned()
    }

    /// Registered model names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

impl FromIterator<(String, Arc<dyn SpeechEngine>)> for ModelRegistry {
    fn from_iter<I: IntoIterator<Item = (String, Arc<dyn SpeechEngine>)>>(iter: I) -> Self {
        Self {
            engines: iter.into_iter().collect(),
        }
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::{DecodeOptions, Transcription, TranscriptionInfo};
    use std::path::Path;

    struct SilentEngine;

    impl SpeechEngine for SilentEngine {
        fn transcribe(&self, _audio: &Path, _options: &DecodeOptions) -> Result<Transcription> {
            Ok(Transcription {
                segments: Vec::new(),
                info: TranscriptionInfo {
                    language: "en".to_string(),
                    language_probability: 1.0,
                    duration: 0.0,
                },
            })
        }
    }

    fn registry(names: &[&str]) -> ModelRegistry {
        names
            .iter()
            .map(|name| (name.to_string(), Arc::new(SilentEngine) as Arc<dyn SpeechEngine>))
            .collect()
    }

    #[test]
    fn test_lookup_is_exact() {
        let registry = registry(&["base"]);
        assert!(registry.get("base").is_some());
        assert!(registry.get("Base").is_none());
        assert!(registry.get("large").is_none());
    }

    #[test]
    fn test_names_are_sorted() {
        let registry = registry(&["small", "base", "medium"]);
        assert_eq!(registry.names(), vec!["base", "medium", "small"]);
        assert_eq!(registry.len(), 3);
        assert!(!registry.is_empty());
    }

    #[test]
    fn test_empty_registry() {
        let registry = ModelRegistry::default();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }
}
