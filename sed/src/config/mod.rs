//! Configuration module for the semantic-aware discriminator.
//!
//! - `core`: the main configuration structures and the static stage plan
//! - `enums`: enumeration types used in configurations

pub mod core;
pub mod enums;

pub use self::core::{DiscriminatorPlan, SemanticDiscriminatorConfig, StagePlan, WeightInitConfig};
pub use enums::{Activation, BackboneNorm, InitType};
