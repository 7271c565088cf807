//! Pre-normalized transformer block: self-attention, cross-attention, feed-forward.

use burn::{
    nn::{Initializer, LayerNorm, LayerNormConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};
use burn_extra_ops::{checkpoint, Checkpointed, Segment};

use super::{
    attention::{CrossAttention, CrossAttentionConfig},
    feed_forward::{FeedForward, FeedForwardConfig},
};
use crate::error::{SedError, SedResult};

#[derive(Config, Debug)]
pub struct BasicTransformerBlockConfig {
    /// Token width.
    dim: usize,
    heads: usize,
    head_dim: usize,
    /// Width of the context tokens. Defaults to `dim`.
    #[config(default = "None")]
    context_dim: Option<usize>,
    #[config(default = "0.0")]
    dropout: f64,
    #[config(default = "true")]
    gated_ff: bool,
    /// Add each sublayer's input to its output.
    #[config(default = "false")]
    residual: bool,
    /// Recompute the block during the backward pass, see [`BasicTransformerBlock::forward_checkpointed`].
    #[config(default = "false")]
    checkpoint: bool,
    #[config(default = "Initializer::Normal{mean:0.0,std:0.02}")]
    initializer: Initializer,
}

impl BasicTransformerBlockConfig {
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` when checkpointing is combined with dropout.
    /// The untracked pass runs without dropout and the replay with it, so the two
    /// would compute different functions.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> SedResult<BasicTransformerBlock<B>> {
        if self.checkpoint && self.dropout > 0.0 {
            return Err(SedError::InvalidConfiguration {
                reason: format!(
                    "checkpointing requires a dropout of 0, got {}",
                    self.dropout
                ),
            });
        }

        let attention = |context_dim| {
            CrossAttentionConfig::new(self.dim)
                .with_context_dim(context_dim)
                .with_heads(self.heads)
                .with_head_dim(self.head_dim)
                .with_dropout(self.dropout)
                .with_initializer(self.initializer.clone())
                .init(device)
        };

        Ok(BasicTransformerBlock {
            attn1: attention(None),
            attn2: attention(self.context_dim),
            ff: FeedForwardConfig::new(self.dim)
                .with_gated(self.gated_ff)
                .with_dropout(self.dropout)
                .with_initializer(self.initializer.clone())
                .init(device),
            norm1: LayerNormConfig::new(self.dim).init(device),
            norm2: LayerNormConfig::new(self.dim).init(device),
            norm3: LayerNormConfig::new(self.dim).init(device),
            residual: self.residual,
            checkpoint: self.checkpoint,
        })
    }
}

#[derive(Module, Debug)]
pub struct BasicTransformerBlock<B: Backend> {
    attn1: CrossAttention<B>,
    attn2: CrossAttention<B>,
    ff: FeedForward<B>,
    norm1: LayerNorm<B>,
    norm2: LayerNorm<B>,
    norm3: LayerNorm<B>,
    residual: bool,
    checkpoint: bool,
}

impl<B: Backend> BasicTransformerBlock<B> {
    /// # Shapes
    /// - x: `[batch, tokens, dim]`
    /// - context: `[batch, context_tokens, context_dim]`
    pub fn forward(&self, x: Tensor<B, 3>, context: Tensor<B, 3>) -> Tensor<B, 3> {
        self.run(x, vec![context])
    }

    /// Whether the block asks to be recomputed during the backward pass.
    pub const fn is_checkpointed(&self) -> bool {
        self.checkpoint
    }

    fn sublayer(&self, input: Tensor<B, 3>, output: Tensor<B, 3>) -> Tensor<B, 3> {
        if self.residual {
            output + input
        } else {
            output
        }
    }
}

impl<B: AutodiffBackend> BasicTransformerBlock<B> {
    /// Runs the block through [`checkpoint`] with the block's own flag.
    ///
    /// When the flag is set the output is untracked and the returned replay token
    /// must be used to obtain gradients.
    pub fn forward_checkpointed(
        &self,
        x: Tensor<B, 3>,
        context: Tensor<B, 3>,
    ) -> Checkpointed<B, 3> {
        checkpoint(self, x, vec![context], self.checkpoint)
    }
}

impl<B: Backend> Segment<B, 3> for BasicTransformerBlock<B> {
    fn run(&self, x: Tensor<B, 3>, aux: Vec<Tensor<B, 3>>) -> Tensor<B, 3> {
        let context = aux.into_iter().next();

        let x = self.sublayer(x.clone(), self.attn1.forward(self.norm1.forward(x), None, None));
        let x = self.sublayer(
            x.clone(),
            self.attn2.forward(self.norm2.forward(x), context, None),
        );
        self.sublayer(x.clone(), self.ff.forward(self.norm3.forward(x)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{Autodiff, NdArray},
        tensor::Distribution,
    };

    type TestBackend = NdArray<f32>;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    fn max_abs_diff<const D: usize>(a: Tensor<TestBackend, D>, b: Tensor<TestBackend, D>) -> f32 {
        (a - b).abs().max().into_scalar()
    }

    #[test]
    fn block_keeps_token_shape() {
        let device = Default::default();
        let block = BasicTransformerBlockConfig::new(32, 2, 16)
            .with_context_dim(Some(24))
            .init::<TestBackend>(&device)
            .unwrap();
        let x = Tensor::random([2, 9, 32], Distribution::Normal(0.0, 1.0), &device);
        let context = Tensor::random([2, 4, 24], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(block.forward(x, context).dims(), [2, 9, 32]);
    }

    #[test]
    fn residual_adds_sublayer_inputs() {
        let device = Default::default();
        let config = BasicTransformerBlockConfig::new(8, 1, 8);
        let plain = config.init::<TestBackend>(&device).unwrap();
        let residual = BasicTransformerBlock {
            residual: true,
            ..plain.clone()
        };
        let x = Tensor::<TestBackend, 3>::random([1, 3, 8], Distribution::Normal(0.0, 1.0), &device);
        let context =
            Tensor::<TestBackend, 3>::random([1, 3, 8], Distribution::Normal(0.0, 1.0), &device);

        let h = x.clone() + plain.attn1.forward(plain.norm1.forward(x.clone()), None, None);
        let h = h.clone()
            + plain
                .attn2
                .forward(plain.norm2.forward(h), Some(context.clone()), None);
        let expected = h.clone() + plain.ff.forward(plain.norm3.forward(h));

        assert!(max_abs_diff(residual.forward(x, context), expected) < 1e-5);
    }

    #[test]
    fn checkpointed_block_matches_tracked_gradients() {
        let device = Default::default();
        let block = BasicTransformerBlockConfig::new(16, 2, 8)
            .with_checkpoint(true)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        assert!(block.is_checkpointed());

        let x = Tensor::<TestAutodiffBackend, 3>::random(
            [1, 6, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let context = Tensor::<TestAutodiffBackend, 3>::random(
            [1, 4, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let x_plain = x.clone().require_grad();
        let context_plain = context.clone().require_grad();
        let plain = block.forward(x_plain.clone(), context_plain.clone());
        let grads = plain.clone().sum().backward();

        let result = block.forward_checkpointed(x, context);
        assert_eq!(max_abs_diff(plain.inner(), result.output.clone().inner()), 0.0);

        let grad_output = result.output.inner().ones_like();
        let replayed = result.replay.unwrap().backward(&block, grad_output);

        assert!(max_abs_diff(replayed.input.clone().unwrap(), x_plain.grad(&grads).unwrap()) < 1e-5);
        assert!(
            max_abs_diff(
                replayed.aux[0].clone().unwrap(),
                context_plain.grad(&grads).unwrap()
            ) < 1e-5
        );
        let gamma = block.norm1.gamma.val();
        assert!(max_abs_diff(replayed.grad(&gamma).unwrap(), gamma.grad(&grads).unwrap()) < 1e-5);
    }

    #[test]
    fn checkpointing_rejects_dropout() {
        let device = Default::default();
        let result = BasicTransformerBlockConfig::new(16, 2, 8)
            .with_dropout(0.5)
            .with_checkpoint(true)
            .init::<TestAutodiffBackend>(&device);

        match result {
            Err(SedError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("dropout of 0"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }

        // Either feature alone is fine.
        assert!(BasicTransformerBlockConfig::new(16, 2, 8)
            .with_dropout(0.5)
            .init::<TestAutodiffBackend>(&device)
            .is_ok());
    }

    #[test]
    fn checkpointed_forward_is_identical_without_dropout() {
        let device = Default::default();
        let block = BasicTransformerBlockConfig::new(16, 2, 8)
            .with_checkpoint(true)
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        let x = Tensor::<TestAutodiffBackend, 3>::random(
            [2, 5, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );
        let context = Tensor::<TestAutodiffBackend, 3>::random(
            [2, 3, 16],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        let tracked = block.forward(x.clone(), context.clone()).inner();
        let checkpointed = block.forward_checkpointed(x, context).output.inner();

        assert_eq!(max_abs_diff(tracked, checkpointed), 0.0);
    }
}
