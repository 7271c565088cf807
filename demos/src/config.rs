//! Configuration for the demos.

use std::path::Path;

use anyhow::{Context, Result};
use burn::config::Config;
use sed_burn::SemanticDiscriminatorConfig;
use serde::{Deserialize, Serialize};

/// Configuration of the `train_step` demo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainStepConfig {
    /// Discriminator configuration.
    pub model: SemanticDiscriminatorConfig,
    /// Number of optimizer steps.
    pub steps: usize,
    /// Images per step, for the real and the fake batch each.
    pub batch_size: usize,
    /// Learning rate of Adam.
    pub learning_rate: f64,
    /// First moment decay of Adam.
    pub beta_1: f32,
    /// Seed of the backend random generator.
    pub seed: u64,
}

impl Default for TrainStepConfig {
    fn default() -> Self {
        Self {
            model: SemanticDiscriminatorConfig::new()
                .with_base_width(16)
                .with_semantic_dim(128)
                .with_image_size(64)
                .with_semantic_size(4),
            steps: 3,
            batch_size: 2,
            learning_rate: 1e-4,
            beta_1: 0.5,
            seed: 42,
        }
    }
}

impl TrainStepConfig {
    /// Reads a JSON configuration.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

/// Loads a discriminator configuration, falling back to the defaults without a path.
///
/// # Errors
///
/// Fails when the file cannot be read or parsed.
pub fn load_model_config(path: Option<&Path>) -> Result<SemanticDiscriminatorConfig> {
    match path {
        Some(path) => SemanticDiscriminatorConfig::load(path)
            .with_context(|| format!("Failed to load model config: {}", path.display())),
        None => Ok(SemanticDiscriminatorConfig::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_train_config_has_a_valid_plan() {
        let config = TrainStepConfig::default();
        let plan = config.model.plan().unwrap();
        assert_eq!(plan.output_size, 6);
    }

    #[test]
    fn train_config_roundtrips_through_json() {
        let config = TrainStepConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: TrainStepConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.steps, config.steps);
        assert_eq!(parsed.model.semantic_dim, 128);
    }

    #[test]
    fn missing_model_config_uses_defaults() {
        let config = load_model_config(None).unwrap();
        assert_eq!(config.semantic_dim, 1024);
    }
}
