//! # Semantic Conditioning
//!
//! The discriminator needs a semantic feature map for every image it scores. The
//! network producing it is frozen and loaded once, so it is modeled as a shared,
//! read-only handle that the critic holds alongside the discriminator.

use std::sync::Arc;

use burn::prelude::*;

use crate::{
    error::{SedError, SedResult},
    models::discriminator::SemanticDiscriminator,
};

/// A frozen network mapping images to semantic feature maps.
pub trait SemanticExtractor<B: Backend> {
    /// Channel count of the produced feature maps.
    fn channels(&self) -> usize;

    /// Height and width of the produced (square) feature maps.
    fn size(&self) -> usize;

    /// Maps `[batch, 3, h, w]` images to `[batch, channels, size, size]` features.
    ///
    /// # Errors
    ///
    /// Implementations report images they cannot process as `InvalidTensorShape`.
    fn extract(&self, image: Tensor<B, 4>) -> SedResult<Tensor<B, 4>>;
}

/// Precomputed semantic features, shared by every image of a batch.
#[derive(Debug, Clone)]
pub struct FixedSemantics<B: Backend> {
    features: Tensor<B, 4>,
}

impl<B: Backend> FixedSemantics<B> {
    /// # Errors
    ///
    /// Returns `InvalidTensorShape` unless `features` is `[1, c, s, s]`.
    pub fn new(features: Tensor<B, 4>) -> SedResult<Self> {
        let [batch, _, height, width] = features.dims();
        if batch != 1 || height != width {
            return Err(SedError::InvalidTensorShape {
                name: "fixed semantics".to_string(),
                expected: "[1, channels, size, size]".to_string(),
                actual: format!("{:?}", features.dims()),
            });
        }
        Ok(Self { features })
    }
}

impl<B: Backend> SemanticExtractor<B> for FixedSemantics<B> {
    fn channels(&self) -> usize {
        self.features.dims()[1]
    }

    fn size(&self) -> usize {
        self.features.dims()[2]
    }

    fn extract(&self, image: Tensor<B, 4>) -> SedResult<Tensor<B, 4>> {
        let [batch, ..] = image.dims();
        let [_, channels, size, _] = self.features.dims();
        Ok(self.features.clone().expand([batch, channels, size, size]))
    }
}

/// A discriminator bundled with the extractor that feeds it.
#[derive(Debug)]
pub struct SemanticCritic<B: Backend, E> {
    discriminator: SemanticDiscriminator<B>,
    extractor: Arc<E>,
}

impl<B: Backend, E: SemanticExtractor<B>> SemanticCritic<B, E> {
    /// # Errors
    ///
    /// Returns `ExtractorMismatch` when the extractor's output geometry differs
    /// from what the discriminator was built for.
    pub fn new(discriminator: SemanticDiscriminator<B>, extractor: Arc<E>) -> SedResult<Self> {
        let (dim, size) = discriminator.semantic_geometry();
        if extractor.channels() != dim || extractor.size() != size {
            return Err(SedError::ExtractorMismatch {
                expected: format!("{dim} channels at {size}x{size}"),
                actual: format!(
                    "{} channels at {}x{}",
                    extractor.channels(),
                    extractor.size(),
                    extractor.size()
                ),
            });
        }
        Ok(Self {
            discriminator,
            extractor,
        })
    }

    /// Scores the patches of `image`. No gradient flows into the extractor.
    ///
    /// # Errors
    ///
    /// Propagates extractor and discriminator shape errors.
    pub fn forward(&self, image: Tensor<B, 4>) -> SedResult<Tensor<B, 4>> {
        let semantic = self.extractor.extract(image.clone())?.detach();
        self.discriminator.forward(image, semantic)
    }

    pub const fn discriminator(&self) -> &SemanticDiscriminator<B> {
        &self.discriminator
    }

    pub fn extractor(&self) -> &Arc<E> {
        &self.extractor
    }

    /// Applies `update` to the discriminator, keeping the extractor handle.
    ///
    /// Used to swap in the module returned by an optimizer step.
    pub fn map_discriminator<F>(self, update: F) -> Self
    where
        F: FnOnce(SemanticDiscriminator<B>) -> SemanticDiscriminator<B>,
    {
        Self {
            discriminator: update(self.discriminator),
            extractor: self.extractor,
        }
    }

    pub fn into_parts(self) -> (SemanticDiscriminator<B>, Arc<E>) {
        (self.discriminator, self.extractor)
    }
}
