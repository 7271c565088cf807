//! # SeD-Burn
//!
//! A semantic-aware PatchGAN discriminator built with the Burn deep learning
//! framework. Intermediate backbone features are enriched with a frozen semantic
//! feature map through cross-attention, so the discriminator judges textures
//! against the image content they belong to.
//!
//! ## Modules
//!
//! - `config`: Configuration structures and the static shape plan of the
//!   discriminator.
//! - `error`: The custom error type used throughout the crate.
//! - `models`: The discriminator and its attention building blocks.
//! - `semantic`: The semantic-extractor seam and the critic bundling both.
//!
//! ## Key Components
//!
//! - `SemanticDiscriminator`: The discriminator module.
//! - `SemanticDiscriminatorConfig`: Drives construction and validates shapes.
//! - `SemanticCritic`: A discriminator together with its semantic extractor.
//! - `SedError`: The enum for all possible errors.

mod config;
mod error;
mod models;
mod semantic;

#[doc(inline)]
pub use config::{
    Activation, BackboneNorm, DiscriminatorPlan, InitType, SemanticDiscriminatorConfig,
    StagePlan, WeightInitConfig,
};
#[doc(inline)]
pub use error::{SedError, SedResult};
#[doc(inline)]
pub use models::discriminator::{
    InjectionStage, SemanticDiscriminator, SemanticDiscriminatorRecord,
};
#[doc(inline)]
pub use models::modules::{
    BasicTransformerBlock, BasicTransformerBlockConfig, CrossAttention, CrossAttentionConfig,
    FeedForward, FeedForwardConfig, SpatialTransformer, SpatialTransformerConfig,
};
#[doc(inline)]
pub use semantic::{FixedSemantics, SemanticCritic, SemanticExtractor};
