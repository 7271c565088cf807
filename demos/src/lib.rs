//! SeD Demos
//!
//! Command-line entry points for the semantic-aware discriminator.
//!
//! ## Available Demos
//!
//! - `smoke`: Build the discriminator, run one forward pass and print the patch grid size
//! - `checkpoint`: Compare a transformer block with and without gradient checkpointing
//! - `train_step`: Run a few adversarial training steps on synthetic data, on the
//!   checkpointing autodiff backend when the model configuration enables `checkpoint`
//!
//! ## Usage
//!
//! ```bash
//! # Default 256x256 discriminator
//! cargo run --release --bin smoke
//!
//! # Custom configuration, written back for later runs
//! cargo run --release --bin smoke -- --config sed.json --batch 2
//!
//! # Gradient checkpointing check
//! cargo run --release --bin checkpoint
//!
//! # A few training steps with debug logs
//! RUST_LOG=debug cargo run --release --bin train_step -- --steps 5
//! ```

pub mod common;
pub mod config;
pub mod training;

// Re-export commonly used items
pub use common::{
    create_device, get_backend_name, init_tracing, SelectedAutodiffBackend, SelectedBackend,
    SelectedCheckpointedBackend, SelectedDevice,
};
pub use config::{load_model_config, TrainStepConfig};
pub use training::{train, TrainReport};
