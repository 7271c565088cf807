use thiserror::Error;

/// The error type for `sed-burn` operations.
///
/// Every variant describes a shape or configuration problem. They are raised while
/// building a model or at the top of a forward pass, never halfway through the
/// stage cascade.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SedError {
    /// Error for when configuration parameters are logically inconsistent.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when the image is too small to survive the stride schedule.
    #[error("Input of size {size} is too small for {layer} (kernel {kernel}, padding {padding})")]
    InputTooSmall {
        /// Spatial size reaching the layer.
        size: usize,
        /// The layer that cannot be applied.
        layer: String,
        /// Kernel size of that layer.
        kernel: usize,
        /// Padding of that layer.
        padding: usize,
    },

    /// Error for when channel counts do not line up at a stage boundary.
    #[error("Channel mismatch at stage {stage}: {reason}")]
    ChannelMismatch {
        /// Index of the injection stage.
        stage: usize,
        /// What does not divide or match.
        reason: String,
    },

    /// Error for when the upsampled semantic map does not cover the backbone feature map.
    #[error(
        "Spatial mismatch at stage {stage}: semantic branch yields {semantic}, backbone has {backbone}"
    )]
    SpatialMismatch {
        /// Index of the injection stage.
        stage: usize,
        /// Spatial size produced by the semantic branch.
        semantic: usize,
        /// Spatial size of the backbone feature map.
        backbone: usize,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("Invalid {name} tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// Which input was rejected.
        name: String,
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },

    /// Error for when a semantic extractor does not produce what the discriminator expects.
    #[error("Semantic extractor mismatch: expected {expected}, extractor yields {actual}")]
    ExtractorMismatch {
        /// Geometry required by the discriminator.
        expected: String,
        /// Geometry reported by the extractor.
        actual: String,
    },
}

/// A specialized `Result` type for `sed-burn` operations.
pub type SedResult<T> = Result<T, SedError>;
