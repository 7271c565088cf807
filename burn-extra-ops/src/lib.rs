//! Additional operations for the Burn deep learning framework
//!
//! This crate provides operations that are commonly used in deep learning but are not
//! yet available in the core Burn framework.

use burn::prelude::*;

mod checkpoint;
mod depth_to_space;
mod spectral_norm;

// Convenient re-exports
pub use checkpoint::{checkpoint, Checkpointed, ReplayToken, Segment, SegmentGrads};
pub use depth_to_space::depth_to_space;
pub use spectral_norm::{SpectralNormConv2d, SpectralNormConv2dConfig};

/// Additional operations for Burn tensors
pub trait TensorExtraOps<B: Backend> {
    /// Rearrange `factor²` channel groups into `factor x factor` spatial blocks
    fn depth_to_space(self, factor: usize) -> Self;
}

impl<B: Backend> TensorExtraOps<B> for Tensor<B, 4> {
    fn depth_to_space(self, factor: usize) -> Self {
        depth_to_space::depth_to_space(self, factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{
        backend::{ndarray::NdArray, Autodiff},
        tensor::Tensor,
    };

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn test_tensor_extra_ops() {
        let device = Default::default();
        let tensor = Tensor::<TestBackend, 4>::random(
            [2, 16, 4, 5],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            &device,
        );

        let result = tensor.depth_to_space(2);
        assert_eq!(result.dims(), [2, 4, 8, 10]);
    }
}
