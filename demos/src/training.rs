//! Adversarial training loop shared by the demos.
//!
//! The discriminator is trained with the hinge loss on synthetic real and fake
//! batches. Semantic features come from a fixed, precomputed map shared by every
//! image, standing in for a frozen pretrained extractor.

use std::sync::Arc;

use anyhow::Result;
use burn::{
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{activation::relu, backend::AutodiffBackend, Distribution, ElementConversion},
};
use sed_burn::{FixedSemantics, SemanticCritic, SemanticDiscriminator};

use crate::{
    common::{SelectedAutodiffBackend, SelectedCheckpointedBackend, SelectedDevice},
    config::TrainStepConfig,
};

/// Outcome of [`train`].
#[derive(Debug, Clone)]
pub struct TrainReport {
    /// Autodiff strategy the steps ran with, `"none"` or `"balanced"`.
    pub strategy: &'static str,
    /// Discriminator loss of every step, before its optimizer update.
    pub losses: Vec<f32>,
}

/// Hinge loss of the discriminator: `mean(relu(1 - real)) + mean(relu(1 + fake))`.
pub fn hinge_loss<B: Backend>(real: Tensor<B, 4>, fake: Tensor<B, 4>) -> Tensor<B, 1> {
    relu(real.neg().add_scalar(1.0)).mean() + relu(fake.add_scalar(1.0)).mean()
}

/// Trains on the selected backend, recomputing activations during the backward
/// pass when the model configuration asks for checkpointing.
///
/// # Errors
///
/// Fails when the model configuration is invalid or a forward pass is rejected.
pub fn train(config: &TrainStepConfig, device: &SelectedDevice) -> Result<TrainReport> {
    config.model.validate()?;

    let report = if config.model.checkpoint {
        TrainReport {
            strategy: "balanced",
            losses: run_steps::<SelectedCheckpointedBackend>(config, device)?,
        }
    } else {
        TrainReport {
            strategy: "none",
            losses: run_steps::<SelectedAutodiffBackend>(config, device)?,
        }
    };
    Ok(report)
}

/// Runs `config.steps` Adam steps on any autodiff backend and returns the losses.
///
/// # Errors
///
/// Fails when the model configuration is invalid or a forward pass is rejected.
pub fn run_steps<B: AutodiffBackend>(
    config: &TrainStepConfig,
    device: &B::Device,
) -> Result<Vec<f32>> {
    B::seed(config.seed);
    let model = &config.model;

    let features = Tensor::<B, 4>::random(
        [1, model.semantic_dim, model.semantic_size, model.semantic_size],
        Distribution::Normal(0.0, 1.0),
        device,
    );
    let extractor = Arc::new(FixedSemantics::new(features)?);
    let mut critic = SemanticCritic::new(model.init::<B>(device)?, extractor)?;
    let mut optim = AdamConfig::new()
        .with_beta_1(config.beta_1)
        .init::<B, SemanticDiscriminator<B>>();

    let shape = [
        config.batch_size,
        model.input_channels,
        model.image_size,
        model.image_size,
    ];

    let mut losses = Vec::with_capacity(config.steps);
    for step in 0..config.steps {
        let real = Tensor::<B, 4>::random(shape, Distribution::Normal(0.5, 0.2), device);
        let fake = Tensor::<B, 4>::random(shape, Distribution::Uniform(-1.0, 1.0), device);

        let loss = hinge_loss(critic.forward(real)?, critic.forward(fake)?);
        let loss_value = loss.clone().into_scalar().elem::<f32>();

        let grads = GradientsParams::from_grads(loss.backward(), critic.discriminator());
        critic = critic.map_discriminator(|discriminator| {
            optim
                .step(config.learning_rate, discriminator, grads)
                .refresh_spectral_norm()
        });

        tracing::debug!(step, loss = loss_value, "discriminator step");
        losses.push(loss_value);
    }

    Ok(losses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::create_device;

    fn short_run(checkpoint: bool) -> TrainReport {
        let mut config = TrainStepConfig::default();
        config.steps = 2;
        config.batch_size = 1;
        config.model = config.model.with_checkpoint(checkpoint);
        train(&config, &create_device()).unwrap()
    }

    #[test]
    fn hinge_loss_is_zero_for_confident_scores() {
        let device = Default::default();
        let real = Tensor::<SelectedAutodiffBackend, 4>::ones([1, 1, 2, 2], &device) * 2.0;
        let fake = Tensor::<SelectedAutodiffBackend, 4>::ones([1, 1, 2, 2], &device) * -2.0;
        let loss: f32 = hinge_loss(real, fake).into_scalar().elem();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn checkpoint_flag_selects_the_recomputing_backend() {
        let plain = short_run(false);
        let checkpointed = short_run(true);

        assert_eq!(plain.strategy, "none");
        assert_eq!(checkpointed.strategy, "balanced");
        assert_eq!(plain.losses.len(), 2);
        assert_eq!(checkpointed.losses.len(), 2);

        // Recomputation changes memory use, not the optimization trajectory.
        for (a, b) in plain.losses.iter().zip(&checkpointed.losses) {
            assert!((a - b).abs() < 1e-4, "{a} vs {b}");
        }
    }

    #[test]
    fn checkpoint_with_dropout_is_rejected_before_training() {
        let mut config = TrainStepConfig::default();
        config.model = config.model.with_checkpoint(true).with_dropout(0.1);
        assert!(train(&config, &create_device()).is_err());
    }
}
