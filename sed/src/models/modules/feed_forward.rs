use burn::{
    nn::{Dropout, DropoutConfig, Initializer, Linear},
    prelude::*,
    tensor::activation::gelu,
};

use super::utils::linear;

/// Gated GELU projection: one linear layer producing a value half and a gate half.
#[derive(Module, Debug)]
pub struct Geglu<B: Backend> {
    proj: Linear<B>,
    d_output: usize,
}

impl<B: Backend> Geglu<B> {
    pub fn new(
        d_input: usize,
        d_output: usize,
        initializer: &Initializer,
        device: &Device<B>,
    ) -> Self {
        Self {
            proj: linear(d_input, d_output * 2, true, initializer, device),
            d_output,
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let projected = self.proj.forward(x);
        let value = projected.clone().narrow(D - 1, 0, self.d_output);
        let gate = projected.narrow(D - 1, self.d_output, self.d_output);
        value * gelu(gate)
    }
}

#[derive(Module, Debug)]
pub enum ProjectIn<B: Backend> {
    Geglu(Geglu<B>),
    Gelu(Linear<B>),
}

impl<B: Backend> ProjectIn<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Self::Geglu(geglu) => geglu.forward(x),
            Self::Gelu(linear) => gelu(linear.forward(x)),
        }
    }
}

#[derive(Config, Debug)]
pub struct FeedForwardConfig {
    dim: usize,
    /// Output width. Defaults to `dim`.
    #[config(default = "None")]
    dim_out: Option<usize>,
    #[config(default = "4")]
    mult: usize,
    #[config(default = "true")]
    gated: bool,
    #[config(default = "0.0")]
    dropout: f64,
    #[config(default = "Initializer::Normal{mean:0.0,std:0.02}")]
    initializer: Initializer,
}

impl FeedForwardConfig {
    pub fn init<B: Backend>(&self, device: &Device<B>) -> FeedForward<B> {
        let inner_dim = self.dim * self.mult;
        let project_in = if self.gated {
            ProjectIn::Geglu(Geglu::new(self.dim, inner_dim, &self.initializer, device))
        } else {
            ProjectIn::Gelu(linear(self.dim, inner_dim, true, &self.initializer, device))
        };

        FeedForward {
            project_in,
            dropout: DropoutConfig::new(self.dropout).init(),
            project_out: linear(
                inner_dim,
                self.dim_out.unwrap_or(self.dim),
                true,
                &self.initializer,
                device,
            ),
        }
    }
}

#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    project_in: ProjectIn<B>,
    dropout: Dropout,
    project_out: Linear<B>,
}

impl<B: Backend> FeedForward<B> {
    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let x = self.project_in.forward(x);
        let x = self.dropout.forward(x);
        self.project_out.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, module::Param};

    type TestBackend = NdArray<f32>;

    #[test]
    fn geglu_multiplies_value_by_gelu_of_gate() {
        let device = Default::default();
        let mut geglu = Geglu::<TestBackend>::new(
            1,
            1,
            &Initializer::Normal {
                mean: 0.0,
                std: 0.02,
            },
            &device,
        );
        // value = 2x, gate = x
        geglu.proj.weight = Param::from_tensor(Tensor::from_floats([[2.0, 1.0]], &device));
        let x = Tensor::<TestBackend, 2>::from_floats([[1.5]], &device);

        let y = geglu.forward(x.clone());
        let expected = x.clone().mul_scalar(2.0) * gelu(x);

        assert!((y - expected).abs().max().into_scalar() < 1e-6);
    }

    #[test]
    fn keeps_token_width() {
        let device = Default::default();
        for gated in [true, false] {
            let ff = FeedForwardConfig::new(16)
                .with_gated(gated)
                .init::<TestBackend>(&device);
            let x = Tensor::<TestBackend, 3>::ones([2, 5, 16], &device);
            assert_eq!(ff.forward(x).dims(), [2, 5, 16]);
        }
    }
}
