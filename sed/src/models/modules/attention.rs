//! Multi-head scaled dot-product attention over token sequences.

use burn::{
    nn::{Dropout, DropoutConfig, Initializer, Linear},
    prelude::*,
    tensor::activation::softmax,
};

use super::utils::linear;

/// Configuration for the `CrossAttention` module.
#[derive(Config, Debug)]
pub struct CrossAttentionConfig {
    /// Width of the query tokens, also the output width.
    query_dim: usize,
    /// Width of the context tokens. Defaults to `query_dim`.
    #[config(default = "None")]
    context_dim: Option<usize>,
    #[config(default = "8")]
    heads: usize,
    #[config(default = "64")]
    head_dim: usize,
    #[config(default = "0.0")]
    dropout: f64,
    #[config(default = "Initializer::Normal{mean:0.0,std:0.02}")]
    initializer: Initializer,
}

impl CrossAttentionConfig {
    /// Initializes a new `CrossAttention` module.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> CrossAttention<B> {
        let inner_dim = self.heads * self.head_dim;
        let context_dim = self.context_dim.unwrap_or(self.query_dim);

        CrossAttention {
            to_q: linear(self.query_dim, inner_dim, false, &self.initializer, device),
            to_k: linear(context_dim, inner_dim, false, &self.initializer, device),
            to_v: linear(context_dim, inner_dim, false, &self.initializer, device),
            to_out: linear(inner_dim, self.query_dim, true, &self.initializer, device),
            dropout: DropoutConfig::new(self.dropout).init(),
            heads: self.heads,
            head_dim: self.head_dim,
        }
    }
}

/// Attention where queries come from one sequence and keys and values from another.
///
/// Without a context it is plain self-attention.
#[derive(Module, Debug)]
pub struct CrossAttention<B: Backend> {
    to_q: Linear<B>,
    to_k: Linear<B>,
    to_v: Linear<B>,
    to_out: Linear<B>,
    dropout: Dropout,
    heads: usize,
    head_dim: usize,
}

impl<B: Backend> CrossAttention<B> {
    /// # Shapes
    /// - x: `[batch, queries, query_dim]`
    /// - context: `[batch, keys, context_dim]`
    /// - mask: `[batch, keys]`, `true` marks keys that may be attended to
    /// - output: `[batch, queries, query_dim]`
    pub fn forward(
        &self,
        x: Tensor<B, 3>,
        context: Option<Tensor<B, 3>>,
        mask: Option<Tensor<B, 2, Bool>>,
    ) -> Tensor<B, 3> {
        let [batch, queries, _] = x.dims();
        let context = context.unwrap_or_else(|| x.clone());

        let q = self.split_heads(self.to_q.forward(x));
        let k = self.split_heads(self.to_k.forward(context.clone()));
        let v = self.split_heads(self.to_v.forward(context));
        let keys = k.dims()[2];

        let scale = (self.head_dim as f64).powf(-0.5);
        let mut sim = q.matmul(k.swap_dims(2, 3)).mul_scalar(scale);

        if let Some(mask) = mask {
            let blocked = mask
                .bool_not()
                .reshape([batch, 1, 1, keys])
                .expand([batch, self.heads, queries, keys]);
            sim = sim.mask_fill(blocked, f32::MIN);
        }

        let attn = softmax(sim, 3);
        let out = attn
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, queries, self.heads * self.head_dim]);

        self.dropout.forward(self.to_out.forward(out))
    }

    /// `[b, n, heads * head_dim] -> [b, heads, n, head_dim]`
    fn split_heads(&self, x: Tensor<B, 3>) -> Tensor<B, 4> {
        let [batch, tokens, _] = x.dims();
        x.reshape([batch, tokens, self.heads, self.head_dim])
            .swap_dims(1, 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray<f32>;

    #[test]
    fn output_follows_query_shape() {
        let device = Default::default();
        let attn = CrossAttentionConfig::new(32)
            .with_context_dim(Some(16))
            .with_heads(2)
            .with_head_dim(8)
            .init::<TestBackend>(&device);
        let x = Tensor::random([2, 10, 32], Distribution::Normal(0.0, 1.0), &device);
        let context = Tensor::random([2, 7, 16], Distribution::Normal(0.0, 1.0), &device);

        assert_eq!(attn.forward(x, Some(context), None).dims(), [2, 10, 32]);
    }

    #[test]
    fn masked_keys_do_not_contribute() {
        let device = Default::default();
        let attn = CrossAttentionConfig::new(8)
            .with_heads(2)
            .with_head_dim(4)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 3>::random([1, 3, 8], Distribution::Normal(0.0, 1.0), &device);
        let context =
            Tensor::<TestBackend, 3>::random([1, 4, 8], Distribution::Normal(0.0, 1.0), &device);
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::from([[true, true, false, false]]),
            &device,
        );

        let masked = attn.forward(x.clone(), Some(context.clone()), Some(mask));
        // Perturbing the blocked keys must not change anything.
        let disturbed = Tensor::cat(
            vec![
                context.clone().narrow(1, 0, 2),
                context.narrow(1, 2, 2).mul_scalar(100.0),
            ],
            1,
        );
        let mask = Tensor::<TestBackend, 2, Bool>::from_data(
            TensorData::from([[true, true, false, false]]),
            &device,
        );
        let reference = attn.forward(x, Some(disturbed), Some(mask));

        let diff = (masked - reference).abs().max().into_scalar();
        assert!(diff < 1e-6);
    }

    #[test]
    fn missing_context_means_self_attention() {
        let device = Default::default();
        let attn = CrossAttentionConfig::new(8)
            .with_heads(1)
            .with_head_dim(8)
            .init::<TestBackend>(&device);
        let x = Tensor::<TestBackend, 3>::random([1, 5, 8], Distribution::Normal(0.0, 1.0), &device);

        let implicit = attn.forward(x.clone(), None, None);
        let explicit = attn.forward(x.clone(), Some(x), None);

        assert_eq!((implicit - explicit).abs().max().into_scalar(), 0.0);
    }
}
