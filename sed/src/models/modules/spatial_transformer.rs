//! # Semantic Injection Block
//!
//! A transformer over the tokens of the semantic feature map, conditioned on the
//! backbone feature map of one discriminator stage. The result is projected back to
//! the semantic width, its channels are redistributed into `up_factor x up_factor`
//! spatial blocks and a trailing convolution brings it to the backbone resolution.
//!
//! The output projection starts at zero, so at construction the block contributes an
//! all-zero feature map.

use burn::{
    nn::{conv::Conv2d, GroupNorm, GroupNormConfig, Initializer},
    prelude::*,
};
use burn_extra_ops::TensorExtraOps;

use super::{
    transformer::{BasicTransformerBlock, BasicTransformerBlockConfig},
    utils::conv2d,
};
use crate::error::{SedError, SedResult};

#[derive(Config, Debug)]
pub struct SpatialTransformerConfig {
    /// Channels of the semantic feature map.
    in_channels: usize,
    heads: usize,
    head_dim: usize,
    /// Channels of the backbone feature map used as context.
    context_dim: usize,
    /// Channel-to-space factor applied after the output projection.
    #[config(default = "2")]
    up_factor: usize,
    /// Kernel of the trailing convolution.
    #[config(default = "3")]
    out_kernel: usize,
    #[config(default = "1")]
    depth: usize,
    #[config(default = "0.0")]
    dropout: f64,
    #[config(default = "32")]
    norm_groups: usize,
    #[config(default = "true")]
    gated_ff: bool,
    #[config(default = "false")]
    residual: bool,
    #[config(default = "Initializer::Normal{mean:0.0,std:0.02}")]
    initializer: Initializer,
}

impl SpatialTransformerConfig {
    /// Channels left after the channel-to-space rearrangement.
    pub const fn up_channels(&self) -> usize {
        self.in_channels / (self.up_factor * self.up_factor)
    }

    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when the semantic width cannot be split into
    /// the normalization groups or into `up_factor²` spatial blocks, or when the
    /// attention has no width.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SedResult<SpatialTransformer<B>> {
        if self.heads == 0 || self.head_dim == 0 {
            return Err(SedError::InvalidConfiguration {
                reason: "attention needs at least one head of non-zero width".to_string(),
            });
        }
        if self.norm_groups == 0 || self.in_channels % self.norm_groups != 0 {
            return Err(SedError::InvalidConfiguration {
                reason: format!(
                    "{} channels cannot be split into {} normalization groups",
                    self.in_channels, self.norm_groups
                ),
            });
        }
        let blocks = self.up_factor * self.up_factor;
        if blocks == 0 || self.in_channels % blocks != 0 {
            return Err(SedError::InvalidConfiguration {
                reason: format!(
                    "{} channels cannot be spread over {}x{} blocks",
                    self.in_channels, self.up_factor, self.up_factor
                ),
            });
        }

        let inner_dim = self.heads * self.head_dim;
        let up_channels = self.up_channels();
        let transformer_blocks = (0..self.depth)
            .map(|_| {
                BasicTransformerBlockConfig::new(inner_dim, self.heads, self.head_dim)
                    .with_context_dim(Some(inner_dim))
                    .with_dropout(self.dropout)
                    .with_gated_ff(self.gated_ff)
                    .with_residual(self.residual)
                    .with_initializer(self.initializer.clone())
                    .init(device)
            })
            .collect::<SedResult<Vec<_>>>()?;

        Ok(SpatialTransformer {
            norm: GroupNormConfig::new(self.norm_groups, self.in_channels)
                .with_epsilon(1e-6)
                .init(device),
            proj_in: conv2d(
                [self.in_channels, inner_dim],
                1,
                1,
                0,
                true,
                &self.initializer,
                device,
            ),
            proj_context: conv2d(
                [self.context_dim, inner_dim],
                1,
                1,
                0,
                true,
                &self.initializer,
                device,
            ),
            transformer_blocks,
            proj_out: conv2d(
                [inner_dim, self.in_channels],
                1,
                1,
                0,
                true,
                &Initializer::Zeros,
                device,
            ),
            conv_out: conv2d(
                [up_channels, up_channels],
                self.out_kernel,
                1,
                1,
                true,
                &self.initializer,
                device,
            ),
            up_factor: self.up_factor,
        })
    }
}

#[derive(Module, Debug)]
pub struct SpatialTransformer<B: Backend> {
    norm: GroupNorm<B>,
    proj_in: Conv2d<B>,
    proj_context: Conv2d<B>,
    transformer_blocks: Vec<BasicTransformerBlock<B>>,
    proj_out: Conv2d<B>,
    conv_out: Conv2d<B>,
    up_factor: usize,
}

impl<B: Backend> SpatialTransformer<B> {
    /// # Shapes
    /// - semantic: `[batch, in_channels, s, s]`
    /// - context: `[batch, context_dim, r, r]`
    /// - output: `[batch, in_channels / up_factor², s', s']` with
    ///   `s' = s * up_factor + 3 - out_kernel`
    pub fn forward(&self, semantic: Tensor<B, 4>, context: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _, height, width] = semantic.dims();

        let x = self.proj_in.forward(self.norm.forward(semantic));
        let inner_dim = x.dims()[1];
        let context = tokens(self.proj_context.forward(context));

        let x = self
            .transformer_blocks
            .iter()
            .fold(tokens(x), |x, block| block.forward(x, context.clone()));

        let x = x
            .swap_dims(1, 2)
            .reshape([batch, inner_dim, height, width]);
        let x = self.proj_out.forward(x);

        self.conv_out.forward(x.depth_to_space(self.up_factor))
    }
}

/// `[b, c, h, w] -> [b, h * w, c]`
fn tokens<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, channels, height, width] = x.dims();
    x.reshape([batch, channels, height * width]).swap_dims(1, 2)
}
