//! Compile-time backend selection.
//!
//! One backend is chosen by feature flag; the device index follows the
//! convention that a negative index means CPU. Asking for a device the
//! compiled backend cannot provide is an error unless the caller opts
//! into CPU fallback, in which case the substitution is logged.

use cfg_if::cfg_if;
use fcn_burn::{FcnError, FcnResult};

cfg_if! {
    if #[cfg(feature = "cuda")] {
        use burn::backend::cuda::{Cuda, CudaDevice};

        pub type SelectedBackend = Cuda;
        pub type SelectedDevice = CudaDevice;

        pub const BACKEND_NAME: &str = "CUDA";

        /// Resolves a device index for the CUDA backend.
        ///
        /// # Errors
        ///
        /// [`FcnError::DeviceUnavailable`] for negative (CPU) indices; this
        /// backend has no CPU device, so the fallback flag cannot help.
        pub fn create_device(index: i32, _allow_cpu_fallback: bool) -> FcnResult<SelectedDevice> {
            if index < 0 {
                return Err(FcnError::DeviceUnavailable { index });
            }
            Ok(CudaDevice::new(index as usize))
        }
    } else if #[cfg(feature = "wgpu")] {
        use burn::backend::wgpu::{Wgpu, WgpuDevice};

        pub type SelectedBackend = Wgpu;
        pub type SelectedDevice = WgpuDevice;

        pub const BACKEND_NAME: &str = "WGPU";

        /// Resolves a device index for the WGPU backend. Negative indices
        /// select the CPU adapter.
        ///
        /// # Errors
        ///
        /// Infallible here; the signature matches the other backends.
        pub fn create_device(index: i32, _allow_cpu_fallback: bool) -> FcnResult<SelectedDevice> {
            if index < 0 {
                return Ok(WgpuDevice::Cpu);
            }
            Ok(WgpuDevice::DiscreteGpu(index as usize))
        }
    } else {
        use burn::backend::ndarray::{NdArray, NdArrayDevice};

        pub type SelectedBackend = NdArray;
        pub type SelectedDevice = NdArrayDevice;

        pub const BACKEND_NAME: &str = "NdArray (CPU)";

        /// Resolves a device index for the CPU backend.
        ///
        /// # Errors
        ///
        /// [`FcnError::DeviceUnavailable`] for non-negative (GPU) indices
        /// unless `allow_cpu_fallback` is set, which substitutes the CPU
        /// device with a warning. Rebuild with the `wgpu` or `cuda` feature
        /// for real GPU devices.
        pub fn create_device(index: i32, allow_cpu_fallback: bool) -> FcnResult<SelectedDevice> {
            if index >= 0 {
                if !allow_cpu_fallback {
                    return Err(FcnError::DeviceUnavailable { index });
                }
                tracing::warn!(
                    index,
                    "accelerator device unavailable on this backend, falling back to CPU"
                );
            }
            Ok(NdArrayDevice::Cpu)
        }
    }
}

#[cfg(all(test, feature = "ndarray", not(any(feature = "wgpu", feature = "cuda"))))]
mod tests {
    use super::*;

    #[test]
    fn negative_index_is_the_cpu() {
        assert!(matches!(create_device(-1, false), Ok(NdArrayDevice::Cpu)));
    }

    #[test]
    fn accelerator_index_is_rejected_without_opt_in() {
        assert!(matches!(
            create_device(0, false),
            Err(FcnError::DeviceUnavailable { index: 0 })
        ));
    }

    #[test]
    fn fallback_substitutes_the_cpu_when_permitted() {
        assert!(matches!(create_device(2, true), Ok(NdArrayDevice::Cpu)));
    }
}
