//! Core configuration structures for the semantic-aware discriminator.
//!
//! Besides the plain parameters, this module owns the static shape arithmetic of the
//! discriminator: given an image size, a stride schedule and the geometry of the
//! semantic feature map, [`SemanticDiscriminatorConfig::plan`] works out every stage's
//! resolution, upscale factor and channel budget, and rejects configurations whose
//! shapes cannot line up.

use burn::{nn::Initializer, prelude::*};

use super::enums::{Activation, BackboneNorm, InitType};
use crate::error::{SedError, SedResult};

/// Kernel size of every strided backbone convolution and of the final projection.
pub const DOWN_KERNEL: usize = 4;
/// Kernel size of the convolution fusing backbone and semantic channels.
pub const FUSE_KERNEL: usize = 3;
/// Zero padding used by every spatial convolution.
pub const PADDING: usize = 1;

/// Weight initialization settings.
#[derive(Config, Debug)]
pub struct WeightInitConfig {
    /// The initialization scheme.
    #[config(default = "InitType::Normal")]
    pub kind: InitType,
    /// Standard deviation for `Normal`, gain for `Xavier`.
    #[config(default = "0.02")]
    pub gain: f64,
}

impl WeightInitConfig {
    /// The Burn initializer for convolution and linear weights.
    pub fn initializer(&self) -> Initializer {
        match self.kind {
            InitType::Normal => Initializer::Normal {
                mean: 0.0,
                std: self.gain,
            },
            InitType::Xavier => Initializer::XavierNormal { gain: self.gain },
            InitType::Kaiming => Initializer::KaimingNormal {
                gain: std::f64::consts::SQRT_2,
                fan_out_only: false,
            },
        }
    }
}

/// Configuration of the semantic-aware PatchGAN discriminator.
#[derive(Config, Debug)]
pub struct SemanticDiscriminatorConfig {
    /// Number of channels of the input image.
    #[config(default = "3")]
    pub input_channels: usize,
    /// Width of the stem convolution. Every later stage doubles it.
    #[config(default = "64")]
    pub base_width: usize,
    /// Height and width of the (square) input image.
    #[config(default = "256")]
    pub image_size: usize,
    /// Channel count of the semantic feature map.
    #[config(default = "1024")]
    pub semantic_dim: usize,
    /// Height and width of the (square) semantic feature map.
    #[config(default = "16")]
    pub semantic_size: usize,
    /// Attention heads per injection block.
    #[config(default = "1")]
    pub heads: usize,
    /// Width of every attention head.
    #[config(default = "64")]
    pub head_dim: usize,
    /// Stride of the stem convolution followed by the stride of every injection stage.
    #[config(default = "vec![2, 2, 2, 1]")]
    pub strides: Vec<usize>,
    /// Transformer blocks per injection block.
    #[config(default = "1")]
    pub depth: usize,
    /// Dropout inside the attention and feed-forward sublayers.
    #[config(default = "0.0")]
    pub dropout: f64,
    /// Use a GEGLU feed-forward instead of Linear + GELU.
    #[config(default = "true")]
    pub gated_ff: bool,
    /// Add skip connections around the transformer sublayers.
    #[config(default = "false")]
    pub residual: bool,
    /// Use biases in the backbone convolutions of the injection stages.
    #[config(default = "true")]
    pub use_bias: bool,
    /// Normalization of the backbone convolutions of the injection stages.
    #[config(default = "BackboneNorm::Spectral")]
    pub norm: BackboneNorm,
    /// Backbone non-linearity.
    #[config(default = "Activation::LeakyRelu(0.2)")]
    pub activation: Activation,
    /// Weight initialization.
    #[config(default = "WeightInitConfig::new()")]
    pub init: WeightInitConfig,
    /// Group count of the group normalization applied to the semantic map.
    #[config(default = "32")]
    pub norm_groups: usize,
    /// Kernel of the convolution closing every injection block but the last one.
    #[config(default = "3")]
    pub attention_kernel: usize,
    /// Kernel of the convolution closing the last injection block.
    #[config(default = "4")]
    pub last_attention_kernel: usize,
    /// Power iterations per forward pass of the spectrally normalized convolutions.
    #[config(default = "1")]
    pub power_iterations: usize,
    /// Train on Burn's checkpointing autodiff backend,
    /// `Autodiff<B, BalancedCheckpointing>`, which recomputes activations during the
    /// backward pass instead of storing them. The model itself is backend generic, so
    /// the flag is read by whoever picks the training backend. Requires a dropout of 0.
    #[config(default = "false")]
    pub checkpoint: bool,
}

/// Shapes of one attention-injection stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    /// Position of the stage, starting at 0.
    pub index: usize,
    /// Channels entering the strided convolution.
    pub in_channels: usize,
    /// Channels of the backbone feature map after the strided convolution.
    pub width: usize,
    /// Stride of the strided convolution.
    pub stride: usize,
    /// Spatial size of the backbone feature map at this stage.
    pub resolution: usize,
    /// Channel-to-space factor applied to the semantic branch.
    pub upscale: usize,
    /// Channels contributed by the semantic branch, `semantic_dim / upscale²`.
    pub injected_channels: usize,
    /// Input channels of the fusion convolution, `width + injected_channels`.
    pub fused_channels: usize,
    /// Kernel of the convolution closing the injection block.
    pub attention_kernel: usize,
    /// Whether this is the deepest stage.
    pub is_last: bool,
}

/// Static shape plan of a discriminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscriminatorPlan {
    /// Spatial size after the stem convolution.
    pub stem_resolution: usize,
    /// Injection stages, shallowest first.
    pub stages: Vec<StagePlan>,
    /// Spatial size of the patch score map.
    pub output_size: usize,
}

impl DiscriminatorPlan {
    /// Shape of the patch score map for a batch of `batch` images.
    pub const fn output_shape(&self, batch: usize) -> [usize; 4] {
        [batch, 1, self.output_size, self.output_size]
    }
}

/// Output size of a convolution, or `None` when the input is smaller than the kernel.
pub fn conv_output(size: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    (size + 2 * padding)
        .checked_sub(kernel)
        .map(|span| span / stride + 1)
}

impl SemanticDiscriminatorConfig {
    /// Validate the configuration and return appropriate errors for invalid settings.
    ///
    /// This only checks parameters in isolation; [`Self::plan`] additionally checks
    /// that the stage shapes line up.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` for zero sizes, an empty injection schedule,
    /// a semantic width not divisible by the normalization groups, a dropout
    /// outside `[0, 1)`, or checkpointing combined with dropout.
    pub fn validate(&self) -> SedResult<()> {
        let positive = [
            ("input_channels", self.input_channels),
            ("base_width", self.base_width),
            ("image_size", self.image_size),
            ("semantic_dim", self.semantic_dim),
            ("semantic_size", self.semantic_size),
            ("heads", self.heads),
            ("head_dim", self.head_dim),
            ("depth", self.depth),
            ("norm_groups", self.norm_groups),
            ("attention_kernel", self.attention_kernel),
            ("last_attention_kernel", self.last_attention_kernel),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(SedError::InvalidConfiguration {
                reason: format!("{name} must be greater than 0"),
            });
        }

        if self.strides.len() < 2 {
            return Err(SedError::InvalidConfiguration {
                reason: "strides needs a stem stride and at least one injection stage".to_string(),
            });
        }
        if self.strides.contains(&0) {
            return Err(SedError::InvalidConfiguration {
                reason: "strides must be greater than 0".to_string(),
            });
        }

        if self.semantic_dim % self.norm_groups != 0 {
            return Err(SedError::InvalidConfiguration {
                reason: format!(
                    "semantic_dim ({}) must be divisible by norm_groups ({})",
                    self.semantic_dim, self.norm_groups
                ),
            });
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(SedError::InvalidConfiguration {
                reason: format!("dropout must lie in [0, 1), got {}", self.dropout),
            });
        }

        if self.checkpoint && self.dropout > 0.0 {
            return Err(SedError::InvalidConfiguration {
                reason: format!(
                    "checkpointing requires a dropout of 0, got {}",
                    self.dropout
                ),
            });
        }

        Ok(())
    }

    /// Inner width of every attention block, `heads * head_dim`.
    pub const fn inner_dim(&self) -> usize {
        self.heads * self.head_dim
    }

    /// Computes the shape plan of the discriminator.
    ///
    /// For every injection stage the upscale factor is
    /// `ceil(resolution / semantic_size)`, the semantic branch contributes
    /// `semantic_dim / upscale²` channels, and the upsampled semantic map, after the
    /// stage's closing convolution, must be exactly as large as the backbone map.
    ///
    /// # Errors
    ///
    /// Returns `InputTooSmall` when a convolution would receive fewer pixels than its
    /// kernel covers, `ChannelMismatch` when `semantic_dim` is not divisible by
    /// `upscale²`, `SpatialMismatch` when the semantic branch cannot match the
    /// backbone resolution, and any error of [`Self::validate`].
    pub fn plan(&self) -> SedResult<DiscriminatorPlan> {
        self.validate()?;

        let stem_resolution = conv_output(self.image_size, DOWN_KERNEL, self.strides[0], PADDING)
            .ok_or_else(|| too_small(self.image_size, "stem convolution", DOWN_KERNEL))?;

        let last = self.strides.len() - 2;
        let mut size = stem_resolution;
        let mut stages = Vec::with_capacity(self.strides.len() - 1);

        for (index, &stride) in self.strides[1..].iter().enumerate() {
            let in_channels = self.base_width << index;
            let width = self.base_width << (index + 1);

            let resolution = conv_output(size, DOWN_KERNEL, stride, PADDING).ok_or_else(|| {
                too_small(size, &format!("stage {index} convolution"), DOWN_KERNEL)
            })?;

            let upscale = resolution.div_ceil(self.semantic_size);
            let blocks = upscale * upscale;
            if self.semantic_dim % blocks != 0 {
                return Err(SedError::ChannelMismatch {
                    stage: index,
                    reason: format!(
                        "semantic_dim ({}) is not divisible by upscale² ({blocks})",
                        self.semantic_dim
                    ),
                });
            }
            let injected_channels = self.semantic_dim / blocks;

            let is_last = index == last;
            let attention_kernel = if is_last {
                self.last_attention_kernel
            } else {
                self.attention_kernel
            };

            let upsampled = self.semantic_size * upscale;
            let semantic = conv_output(upsampled, attention_kernel, 1, PADDING).ok_or_else(|| {
                too_small(
                    upsampled,
                    &format!("stage {index} attention output convolution"),
                    attention_kernel,
                )
            })?;
            if semantic != resolution {
                return Err(SedError::SpatialMismatch {
                    stage: index,
                    semantic,
                    backbone: resolution,
                });
            }

            stages.push(StagePlan {
                index,
                in_channels,
                width,
                stride,
                resolution,
                upscale,
                injected_channels,
                fused_channels: width + injected_channels,
                attention_kernel,
                is_last,
            });
            size = resolution;
        }

        let output_size = conv_output(size, DOWN_KERNEL, 1, PADDING)
            .ok_or_else(|| too_small(size, "final projection", DOWN_KERNEL))?;

        Ok(DiscriminatorPlan {
            stem_resolution,
            stages,
            output_size,
        })
    }
}

fn too_small(size: usize, layer: &str, kernel: usize) -> SedError {
    SedError::InputTooSmall {
        size,
        layer: layer.to_string(),
        kernel,
        padding: PADDING,
    }
}
