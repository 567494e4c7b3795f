use std::path::PathBuf;

use crate::error::{PredictError, Result};
use crate::llm::loader::LoaderStrategy;

/// Reference that stands for the configured base model.
pub const DEFAULT_SENTINEL: &str = "default";

const KNOWN_CHECKPOINTS: &[&str] = &[
    "google/flan-t5-small",
    "google/flan-t5-base",
    "google/flan-t5-large",
    "google/flan-t5-xl",
    "google/flan-t5-xxl",
    "google/t5-v1_1-small",
    "google/t5-v1_1-base",
    "google/t5-v1_1-large",
    "google/t5-v1_1-xl",
    "google/t5-v1_1-xxl",
    "t5-small",
    "t5-base",
    "t5-large",
    "t5-3b",
    "t5-11b",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Hub id used for `config.json` and tokenizer lookup.
    pub model_id: String,
    /// Snapshot file, only set for [`LoaderStrategy::Streamed`].
    pub snapshot: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ModelResolver {
    base_model: String,
}

impl ModelResolver {
    pub fn new(base_model: impl Into<String>) -> Self {
        Self {
            base_model: base_model.into(),
        }
    }

    pub fn base_model(&self) -> &str {
        &self.base_model
    }

    pub fn resolve(&self, reference: &str, strategy: LoaderStrategy) -> Result<ResolvedModel> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PredictError::Configuration(
                "weights reference is empty".to_string(),
            ));
        }

        match strategy {
            LoaderStrategy::Streamed => {
                if reference.ends_with('/') || reference == DEFAULT_SENTINEL {
                    return Err(PredictError::Configuration(format!(
                        "streamed loading needs a snapshot file, got `{reference}`"
                    )));
                }
                Ok(ResolvedModel {
                    model_id: self.base_model.clone(),
                    snapshot: Some(PathBuf::from(reference)),
                })
            }
            LoaderStrategy::Pretrained | LoaderStrategy::Quantized => {
                let model_id = self.checkpoint_id(reference).ok_or_else(|| {
                    PredictError::Configuration(format!(
                        "unrecognized weights reference `{reference}`"
                    ))
                })?;
                Ok(ResolvedModel {
                    model_id,
                    snapshot: None,
                })
            }
        }
    }

    fn checkpoint_id(&self, reference: &str) -> Option<String> {
        if reference == DEFAULT_SENTINEL || reference == self.base_model {
            return Some(self.base_model.clone());
        }

        KNOWN_CHECKPOINTS
            .iter()
            .find(|id| **id == reference || id.rsplit('/').next() == Some(reference))
            .map(|id| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ModelResolver {
        ModelResolver::new("google/flan-t5-xl")
    }

    #[test]
    fn empty_reference_is_a_configuration_error() {
        for strategy in [
            LoaderStrategy::Pretrained,
            LoaderStrategy::Streamed,
            LoaderStrategy::Quantized,
        ] {
            let err = resolver().resolve("  ", strategy).unwrap_err();
            assert!(matches!(err, PredictError::Configuration(_)));
        }
    }

    #[test]
    fn sentinel_and_base_model_resolve_to_base() {
        let r = resolver();
        let resolved = r.resolve("default", LoaderStrategy::Quantized).unwrap();
        assert_eq!(resolved.model_id, "google/flan-t5-xl");
        assert_eq!(resolved.snapshot, None);

        let resolved = r.resolve("google/flan-t5-xl", LoaderStrategy::Pretrained).unwrap();
        assert_eq!(resolved.model_id, "google/flan-t5-xl");
    }

    #[test]
    fn bare_names_expand_to_hub_ids() {
        let resolved = resolver()
            .resolve("flan-t5-base", LoaderStrategy::Pretrained)
            .unwrap();
        assert_eq!(resolved.model_id, "google/flan-t5-base");

        let resolved = resolver().resolve("t5-small", LoaderStrategy::Pretrained).unwrap();
        assert_eq!(resolved.model_id, "t5-small");
    }

    #[test]
    fn unknown_checkpoint_is_rejected() {
        let err = resolver()
            .resolve("gpt2", LoaderStrategy::Pretrained)
            .unwrap_err();
        assert!(matches!(err, PredictError::Configuration(ref m) if m.contains("gpt2")));
    }

    #[test]
    fn snapshot_resolves_to_base_model() {
        let resolved = resolver()
            .resolve("tuned_weights.safetensors", LoaderStrategy::Streamed)
            .unwrap();
        assert_eq!(resolved.model_id, "google/flan-t5-xl");
        assert_eq!(
            resolved.snapshot,
            Some(PathBuf::from("tuned_weights.safetensors"))
        );
    }

    #[test]
    fn streamed_rejects_directories_and_sentinel() {
        assert!(resolver().resolve("weights/", LoaderStrategy::Streamed).is_err());
        assert!(resolver().resolve("default", LoaderStrategy::Streamed).is_err());
    }
}
