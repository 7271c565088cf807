//! # Semantic-Aware PatchGAN Discriminator
//!
//! A PatchGAN backbone whose intermediate feature maps are enriched with semantic
//! features. Each injection stage downsamples the backbone with a strided
//! convolution, lets the semantic map attend over the result, concatenates the
//! upsampled semantic branch to the backbone and fuses both with a 3x3 convolution.
//! A final 4x4 convolution produces one real/fake score per patch.
//!
//! Every shape is decided by [`SemanticDiscriminatorConfig::plan`] before any layer
//! is built, so a misconfigured discriminator fails in `init` rather than in the
//! middle of a forward pass.

use burn::{module::Ignored, nn::conv::Conv2d, prelude::*};

use super::modules::{
    utils::{activate, conv2d, ConvSettings, StageConv},
    SpatialTransformer, SpatialTransformerConfig,
};
use crate::{
    config::{
        core::{DOWN_KERNEL, FUSE_KERNEL, PADDING},
        Activation, DiscriminatorPlan, SemanticDiscriminatorConfig,
    },
    error::{SedError, SedResult},
};

impl SemanticDiscriminatorConfig {
    /// Initializes a `SemanticDiscriminator`.
    ///
    /// # Errors
    ///
    /// Returns any error of [`Self::plan`].
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SedResult<SemanticDiscriminator<B>> {
        let plan = self.plan()?;
        let initializer = self.init.initializer();
        let settings = ConvSettings {
            norm: self.norm.clone(),
            bias: self.use_bias,
            initializer: initializer.clone(),
            power_iterations: self.power_iterations,
        };

        let conv_first = conv2d(
            [self.input_channels, self.base_width],
            DOWN_KERNEL,
            self.strides[0],
            PADDING,
            true,
            &initializer,
            device,
        );

        let mut stages = Vec::with_capacity(plan.stages.len());
        for stage in &plan.stages {
            tracing::debug!(
                stage = stage.index,
                width = stage.width,
                resolution = stage.resolution,
                upscale = stage.upscale,
                injected = stage.injected_channels,
                "building injection stage"
            );

            let attention = SpatialTransformerConfig::new(
                self.semantic_dim,
                self.heads,
                self.head_dim,
                stage.width,
            )
            .with_up_factor(stage.upscale)
            .with_out_kernel(stage.attention_kernel)
            .with_depth(self.depth)
            .with_dropout(self.dropout)
            .with_norm_groups(self.norm_groups)
            .with_gated_ff(self.gated_ff)
            .with_residual(self.residual)
            .with_initializer(initializer.clone())
            .init(device)?;

            stages.push(InjectionStage {
                down: settings.build(
                    [stage.in_channels, stage.width],
                    DOWN_KERNEL,
                    stage.stride,
                    PADDING,
                    device,
                ),
                attention,
                fuse: settings.build(
                    [stage.fused_channels, stage.width],
                    FUSE_KERNEL,
                    1,
                    PADDING,
                    device,
                ),
            });
        }

        let last_width = plan
            .stages
            .last()
            .map_or(self.base_width, |stage| stage.width);
        let conv_last = conv2d(
            [last_width, 1],
            DOWN_KERNEL,
            1,
            PADDING,
            true,
            &initializer,
            device,
        );

        tracing::info!(
            stages = plan.stages.len(),
            output_size = plan.output_size,
            "semantic discriminator initialized"
        );

        Ok(SemanticDiscriminator {
            conv_first,
            stages,
            conv_last,
            activation: Ignored(self.activation.clone()),
            plan: Ignored(plan),
            input_channels: self.input_channels,
            image_size: self.image_size,
            semantic_dim: self.semantic_dim,
            semantic_size: self.semantic_size,
        })
    }
}

/// One downsampling stage with its semantic injection.
#[derive(Module, Debug)]
pub struct InjectionStage<B: Backend> {
    down: StageConv<B>,
    attention: SpatialTransformer<B>,
    fuse: StageConv<B>,
}

impl<B: Backend> InjectionStage<B> {
    fn forward(
        &self,
        x: Tensor<B, 4>,
        semantic: Tensor<B, 4>,
        activation: &Activation,
    ) -> Tensor<B, 4> {
        let x = self.down.forward(x);
        let injected = self.attention.forward(semantic, x.clone());
        activate(activation, self.fuse.forward(Tensor::cat(vec![x, injected], 1)))
    }

    fn refresh(self) -> Self {
        Self {
            down: self.down.refresh(),
            attention: self.attention,
            fuse: self.fuse.refresh(),
        }
    }
}

/// Semantic-aware PatchGAN discriminator.
#[derive(Module, Debug)]
pub struct SemanticDiscriminator<B: Backend> {
    conv_first: Conv2d<B>,
    stages: Vec<InjectionStage<B>>,
    conv_last: Conv2d<B>,
    activation: Ignored<Activation>,
    plan: Ignored<DiscriminatorPlan>,
    input_channels: usize,
    image_size: usize,
    semantic_dim: usize,
    semantic_size: usize,
}

impl<B: Backend> SemanticDiscriminator<B> {
    /// Scores every patch of `image`, conditioned on its semantic features.
    ///
    /// # Shapes
    /// - image: `[batch, input_channels, image_size, image_size]`
    /// - semantic: `[batch, semantic_dim, semantic_size, semantic_size]`
    /// - output: `[batch, 1, output_size, output_size]`
    ///
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` when either input deviates from the configured
    /// geometry or the batch sizes differ. No tensor work happens in that case.
    pub fn forward(&self, image: Tensor<B, 4>, semantic: Tensor<B, 4>) -> SedResult<Tensor<B, 4>> {
        let [batch, ..] = image.dims();
        check_shape(
            "image",
            image.dims(),
            [batch, self.input_channels, self.image_size, self.image_size],
        )?;
        check_shape(
            "semantic",
            semantic.dims(),
            [batch, self.semantic_dim, self.semantic_size, self.semantic_size],
        )?;

        let x = activate(&self.activation, self.conv_first.forward(image));
        let x = self.stages.iter().fold(x, |x, stage| {
            stage.forward(x, semantic.clone(), &self.activation)
        });

        Ok(self.conv_last.forward(x))
    }

    /// The shape plan the discriminator was built from.
    pub fn plan(&self) -> &DiscriminatorPlan {
        &self.plan
    }

    /// Stores the current power-iteration state of every spectrally normalized
    /// convolution. Call after each optimizer step.
    pub fn refresh_spectral_norm(self) -> Self {
        Self {
            stages: self.stages.into_iter().map(InjectionStage::refresh).collect(),
            ..self
        }
    }

    pub(crate) fn semantic_geometry(&self) -> (usize, usize) {
        (self.semantic_dim, self.semantic_size)
    }
}

fn check_shape(name: &str, actual: [usize; 4], expected: [usize; 4]) -> SedResult<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(SedError::InvalidTensorShape {
            name: name.to_string(),
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        })
    }
}
