//! Enumeration types used in discriminator configurations.
//!
//! Each variant is resolved to a concrete layer once, when the model is built.

use burn::prelude::*;

/// Normalization applied to the backbone convolutions of every injection stage.
#[derive(Config, Debug, PartialEq)]
pub enum BackboneNorm {
    /// Plain convolutions.
    None,
    /// Spectrally normalized convolutions.
    Spectral,
}

/// Non-linearity applied after the stem and after every fusion convolution.
#[derive(Config, Debug, PartialEq)]
pub enum Activation {
    Relu,
    Gelu,
    /// Leaky ReLU with the given negative slope.
    LeakyRelu(f64),
}

/// Weight initialization scheme for convolution and linear weights.
///
/// Orthogonal initialization is not offered: Burn's `Initializer` has no
/// orthogonal variant, so configurations naming it fail to load.
#[derive(Config, Debug, PartialEq)]
pub enum InitType {
    /// Normal distribution with mean 0 and the configured gain as standard deviation.
    Normal,
    /// Xavier (Glorot) normal scaled by the configured gain.
    Xavier,
    /// Kaiming (He) normal over the fan-in, ignoring the configured gain.
    Kaiming,
}
