use burn::{
    module::Param,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        Initializer, Linear, LinearConfig, PaddingConfig2d,
    },
    prelude::*,
    tensor::activation::{gelu, leaky_relu, relu},
};
use burn_extra_ops::{SpectralNormConv2d, SpectralNormConv2dConfig};

use crate::config::{Activation, BackboneNorm};

/// A backbone convolution, plain or spectrally normalized.
#[derive(Module, Debug)]
pub enum StageConv<B: Backend> {
    Plain(Conv2d<B>),
    Spectral(SpectralNormConv2d<B>),
}

impl<B: Backend> StageConv<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            Self::Plain(conv) => conv.forward(x),
            Self::Spectral(conv) => conv.forward(x),
        }
    }

    /// Persists the power-iteration state of a spectrally normalized convolution.
    pub fn refresh(self) -> Self {
        match self {
            Self::Plain(conv) => Self::Plain(conv),
            Self::Spectral(conv) => Self::Spectral(conv.refresh()),
        }
    }
}

/// Settings shared by every backbone convolution of a discriminator.
#[derive(Debug, Clone)]
pub struct ConvSettings {
    pub norm: BackboneNorm,
    pub bias: bool,
    pub initializer: Initializer,
    pub power_iterations: usize,
}

impl ConvSettings {
    /// Builds a square convolution with symmetric padding.
    pub fn build<B: Backend>(
        &self,
        channels: [usize; 2],
        kernel: usize,
        stride: usize,
        padding: usize,
        device: &Device<B>,
    ) -> StageConv<B> {
        match self.norm {
            BackboneNorm::None => StageConv::Plain(conv2d(
                channels,
                kernel,
                stride,
                padding,
                self.bias,
                &self.initializer,
                device,
            )),
            BackboneNorm::Spectral => {
                let mut conv = SpectralNormConv2dConfig::new(channels, [kernel, kernel])
                    .with_stride([stride, stride])
                    .with_padding([padding, padding])
                    .with_bias(self.bias)
                    .with_power_iterations(self.power_iterations)
                    .with_initializer(self.initializer.clone())
                    .init(device);
                conv.bias = conv.bias.map(zeroed);
                StageConv::Spectral(conv)
            }
        }
    }
}

/// A square convolution with symmetric zero padding and a zero bias.
pub fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    bias: bool,
    initializer: &Initializer,
    device: &Device<B>,
) -> Conv2d<B> {
    let mut conv = Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(bias)
        .with_initializer(initializer.clone())
        .init(device);
    conv.bias = conv.bias.map(zeroed);
    conv
}

/// A linear layer with a zero bias.
pub fn linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    bias: bool,
    initializer: &Initializer,
    device: &Device<B>,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_bias(bias)
        .with_initializer(initializer.clone())
        .init(device);
    linear.bias = linear.bias.map(zeroed);
    linear
}

/// Replaces the value of a parameter with zeros, keeping its id.
pub fn zeroed<B: Backend, const D: usize>(param: Param<Tensor<B, D>>) -> Param<Tensor<B, D>> {
    let value = param.val().zeros_like().require_grad();
    Param::initialized(param.id, value)
}

/// Applies the configured non-linearity.
pub fn activate<B: Backend, const D: usize>(
    activation: &Activation,
    x: Tensor<B, D>,
) -> Tensor<B, D> {
    match activation {
        Activation::Relu => relu(x),
        Activation::Gelu => gelu(x),
        Activation::LeakyRelu(slope) => leaky_relu(x, *slope),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn biases_start_at_zero() {
        let device = Default::default();
        let init = Initializer::Normal {
            mean: 0.0,
            std: 0.02,
        };
        let conv = conv2d::<TestBackend>([3, 8], 3, 1, 1, true, &init, &device);
        let fc = linear::<TestBackend>(4, 6, true, &init, &device);

        let conv_bias = conv.bias.unwrap().val().abs().sum().into_scalar();
        let fc_bias = fc.bias.unwrap().val().abs().sum().into_scalar();
        assert_eq!(conv_bias, 0.0);
        assert_eq!(fc_bias, 0.0);
        assert!(conv.weight.val().abs().sum().into_scalar() > 0.0);
    }

    #[test]
    fn leaky_relu_keeps_scaled_negatives() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 1>::from_floats([-1.0, 2.0], &device);

        let y = activate(&Activation::LeakyRelu(0.2), x.clone());
        assert_eq!(y.into_data().to_vec::<f32>().unwrap(), vec![-0.2, 2.0]);

        let y = activate(&Activation::Relu, x);
        assert_eq!(y.into_data().to_vec::<f32>().unwrap(), vec![0.0, 2.0]);
    }

    #[test]
    fn settings_pick_the_convolution_kind() {
        let device = Default::default();
        let mut settings = ConvSettings {
            norm: BackboneNorm::Spectral,
            bias: true,
            initializer: Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            },
            power_iterations: 1,
        };
        let conv = settings.build::<TestBackend>([4, 8], 4, 2, 1, &device);
        assert!(matches!(conv, StageConv::Spectral(_)));
        let x = Tensor::<TestBackend, 4>::ones([1, 4, 16, 16], &device);
        assert_eq!(conv.forward(x).dims(), [1, 8, 8, 8]);

        settings.norm = BackboneNorm::None;
        let conv = settings.build::<TestBackend>([4, 8], 4, 2, 1, &device);
        assert!(matches!(conv, StageConv::Plain(_)));
    }
}
