//! Channel-to-space rearrangement.

use burn::prelude::*;

/// Moves groups of `factor * factor` channels into `factor x factor` spatial blocks.
///
/// Each output channel `c` is built from the input channels
/// `c * factor² .. (c + 1) * factor²`, ordered column offset first and row
/// offset second, so input channel `c * factor² + dx * factor + dy` lands at
/// `(y * factor + dy, x * factor + dx)`.
///
/// The channel count must be divisible by `factor²`.
///
/// # Shapes
/// - input: `[batch, channels * factor², height, width]`
/// - output: `[batch, channels, height * factor, width * factor]`
pub fn depth_to_space<B: Backend>(x: Tensor<B, 4>, factor: usize) -> Tensor<B, 4> {
    if factor == 1 {
        return x;
    }
    let [batch, channels, height, width] = x.dims();
    let out_channels = channels / (factor * factor);

    x.reshape([batch, out_channels, factor, factor, height, width])
        // [b, c, dx, dy, h, w] -> [b, c, h, dy, w, dx]
        .permute([0, 1, 4, 3, 5, 2])
        .reshape([batch, out_channels, height * factor, width * factor])
}
