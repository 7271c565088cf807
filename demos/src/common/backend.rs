//! Compile-time backend selection for the demos.
//!
//! Exactly one inference backend is chosen from the `cuda`, `wgpu` and `ndarray`
//! features, in that order of preference. Training wraps it in Burn's autodiff
//! decorator, either storing every activation ([`SelectedAutodiffBackend`]) or
//! recomputing them during the backward pass ([`SelectedCheckpointedBackend`]).

use burn::backend::{autodiff::checkpoint::strategy::BalancedCheckpointing, Autodiff};
use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        /// Selected backend type
        pub type SelectedBackend = Cuda;
        /// Selected device type
        pub type SelectedDevice = CudaDevice;

        /// Creates the appropriate device for the selected backend
        pub fn create_device() -> SelectedDevice {
            CudaDevice::default()
        }

        /// Gets the backend name for logging purposes
        pub const fn get_backend_name() -> &'static str {
            "CUDA (NVIDIA GPU)"
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        /// Selected backend type
        pub type SelectedBackend = Wgpu;
        /// Selected device type
        pub type SelectedDevice = WgpuDevice;

        /// Creates the appropriate device for the selected backend
        pub fn create_device() -> SelectedDevice {
            WgpuDevice::default()
        }

        /// Gets the backend name for logging purposes
        pub const fn get_backend_name() -> &'static str {
            "WGPU (GPU)"
        }
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        /// Selected backend type
        pub type SelectedBackend = NdArray;
        /// Selected device type
        pub type SelectedDevice = NdArrayDevice;

        /// Creates the appropriate device for the selected backend
        pub fn create_device() -> SelectedDevice {
            NdArrayDevice::default()
        }

        /// Gets the backend name for logging purposes
        pub const fn get_backend_name() -> &'static str {
            "NdArray (CPU)"
        }
    }
}

/// The selected backend with gradient tracking, used for training.
pub type SelectedAutodiffBackend = Autodiff<SelectedBackend>;

/// The selected backend with gradient tracking that recomputes memory-bound
/// activations during the backward pass instead of keeping them alive.
pub type SelectedCheckpointedBackend = Autodiff<SelectedBackend, BalancedCheckpointing>;
