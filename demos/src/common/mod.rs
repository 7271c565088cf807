//! Common utilities for the demos.

pub mod backend;
pub mod logging;

pub use backend::{
    create_device, get_backend_name, SelectedAutodiffBackend, SelectedBackend,
    SelectedCheckpointedBackend, SelectedDevice,
};
pub use logging::init_tracing;
