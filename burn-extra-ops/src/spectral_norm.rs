//! # Spectral Normalization
//!
//! A 2D convolution whose kernel is divided by an estimate of its largest singular
//! value before every forward pass. The estimate comes from power iteration on the
//! kernel flattened to `[out_channels, in_channels * kh * kw]`, started from a stored
//! left singular vector. The iteration runs on detached tensors, so gradients only
//! flow through the kernel itself.

use burn::{
    module::{Param, ParamId},
    nn::{conv::Conv2dConfig, Initializer},
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions, Distribution, ElementConversion},
};

/// Configuration for the `SpectralNormConv2d` module.
#[derive(Config, Debug)]
pub struct SpectralNormConv2dConfig {
    /// `[in_channels, out_channels]`.
    pub channels: [usize; 2],
    /// Kernel size `[height, width]`.
    pub kernel_size: [usize; 2],
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],
    /// Symmetric zero padding `[height, width]`.
    #[config(default = "[0, 0]")]
    pub padding: [usize; 2],
    #[config(default = "true")]
    pub bias: bool,
    /// Power iterations performed per forward pass and per `refresh`.
    #[config(default = "1")]
    pub power_iterations: usize,
    #[config(default = "1e-12")]
    pub eps: f64,
    #[config(default = "Initializer::Normal{mean:0.0,std:0.02}")]
    pub initializer: Initializer,
}

impl SpectralNormConv2dConfig {
    /// Initializes a new `SpectralNormConv2d` module.
    pub fn init<B: Backend>(&self, device: &B::Device) -> SpectralNormConv2d<B> {
        let conv = Conv2dConfig::new(self.channels, self.kernel_size)
            .with_stride(self.stride)
            .with_bias(self.bias)
            .with_initializer(self.initializer.clone())
            .init(device);

        let u = Tensor::<B, 1>::random(
            [self.channels[1]],
            Distribution::Normal(0.0, 1.0),
            device,
        );

        SpectralNormConv2d {
            weight: conv.weight,
            bias: conv.bias,
            u: Param::initialized(ParamId::new(), normalize(u, self.eps)),
            stride: self.stride,
            padding: self.padding,
            power_iterations: self.power_iterations,
            eps: self.eps,
        }
    }
}

/// Spectrally normalized 2D convolution.
#[derive(Module, Debug)]
pub struct SpectralNormConv2d<B: Backend> {
    /// Unnormalized kernel of shape `[out_channels, in_channels, kh, kw]`.
    pub weight: Param<Tensor<B, 4>>,
    pub bias: Option<Param<Tensor<B, 1>>>,
    /// Left singular vector estimate of shape `[out_channels]`. Never requires gradients.
    u: Param<Tensor<B, 1>>,
    stride: [usize; 2],
    padding: [usize; 2],
    power_iterations: usize,
    eps: f64,
}

impl<B: Backend> SpectralNormConv2d<B> {
    /// Applies the convolution with the normalized kernel.
    ///
    /// # Shapes
    /// - input: `[batch, in_channels, height, width]`
    /// - output: `[batch, out_channels, height_out, width_out]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = self.weight.val();
        let [out_channels, in_channels, kh, kw] = weight.dims();
        let matrix = weight.clone().reshape([out_channels, in_channels * kh * kw]);

        let (u, v) = self.power_iteration(matrix.clone().detach());
        // sigma = u^T W v, differentiable with respect to W only.
        let sigma = u
            .unsqueeze_dim::<2>(0)
            .matmul(matrix.matmul(v.unsqueeze_dim::<2>(1)))
            .reshape([1, 1, 1, 1]);

        conv2d(
            x,
            weight / sigma,
            self.bias.as_ref().map(|bias| bias.val()),
            ConvOptions::new(self.stride, self.padding, [1, 1], 1),
        )
    }

    /// Current estimate of the largest singular value of the kernel.
    pub fn sigma(&self) -> f32 {
        let weight = self.weight.val().detach();
        let [out_channels, in_channels, kh, kw] = weight.dims();
        let matrix = weight.reshape([out_channels, in_channels * kh * kw]);
        let (u, v) = self.power_iteration(matrix.clone());

        u.unsqueeze_dim::<2>(0)
            .matmul(matrix.matmul(v.unsqueeze_dim::<2>(1)))
            .into_scalar()
            .elem::<f32>()
    }

    /// Runs the configured power iterations once more and stores the improved
    /// singular vector, so later passes start from it.
    pub fn refresh(mut self) -> Self {
        let weight = self.weight.val().detach();
        let [out_channels, in_channels, kh, kw] = weight.dims();
        let (u, _) =
            self.power_iteration(weight.reshape([out_channels, in_channels * kh * kw]));
        self.u = Param::initialized(self.u.id, u);
        self
    }

    fn power_iteration(&self, matrix: Tensor<B, 2>) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let [out_channels, cols] = matrix.dims();
        let transposed = matrix.clone().transpose();
        let mut u = self.u.val().detach();
        let mut v = normalize(
            transposed.clone().matmul(u.clone().unsqueeze_dim::<2>(1)).reshape([cols]),
            self.eps,
        );
        for _ in 0..self.power_iterations {
            u = normalize(
                matrix.clone().matmul(v.unsqueeze_dim::<2>(1)).reshape([out_channels]),
                self.eps,
            );
            v = normalize(
                transposed.clone().matmul(u.clone().unsqueeze_dim::<2>(1)).reshape([cols]),
                self.eps,
            );
        }
        (u, v)
    }
}

fn normalize<B: Backend>(x: Tensor<B, 1>, eps: f64) -> Tensor<B, 1> {
    let norm = x.clone().powf_scalar(2.0).sum().sqrt().clamp_min(eps);
    x / norm
}
