//! Compute-device capability.
//!
//! The trainer never picks a device itself: it is handed a `ComputeDevice`,
//! checks availability once through `acquire`, and fails with
//! `SegError::Device` instead of falling back to a slower device.

use std::marker::PhantomData;

use burn::module::Module;
use burn::prelude::*;

use crate::error::{Result, SegError};

/// A device the run can place its model and batches on.
pub trait ComputeDevice<B: Backend> {
    /// Human-readable device name for logs and errors.
    fn name(&self) -> String;

    /// Whether the device can be used right now.
    fn is_available(&self) -> bool;

    /// The burn device handle.
    fn device(&self) -> B::Device;

    /// Move a module's parameters onto this device.
    fn to_device<M: Module<B>>(&self, module: M) -> M {
        module.to_device(&self.device())
    }
}

/// Check availability and return the device handle.
pub fn acquire<B: Backend, C: ComputeDevice<B>>(compute: &C) -> Result<B::Device> {
    if !compute.is_available() {
        return Err(SegError::Device(format!(
            "{} is not available",
            compute.name()
        )));
    }
    tracing::info!(device = %compute.name(), "Using compute device");
    Ok(compute.device())
}

/// The backend's default device, always available. Used for CPU backends
/// and in tests.
#[derive(Debug, Clone, Default)]
pub struct HostDevice<B: Backend> {
    _backend: PhantomData<B>,
}

impl<B: Backend> HostDevice<B> {
    pub fn new() -> Self {
        Self {
            _backend: PhantomData,
        }
    }
}

impl<B: Backend> ComputeDevice<B> for HostDevice<B> {
    fn name(&self) -> String {
        format!("host ({:?})", B::Device::default())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn device(&self) -> B::Device {
        B::Device::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    struct MissingAccelerator;

    impl ComputeDevice<TestBackend> for MissingAccelerator {
        fn name(&self) -> String {
            "gpu:0".to_string()
        }

        fn is_available(&self) -> bool {
            false
        }

        fn device(&self) -> <TestBackend as Backend>::Device {
            Default::default()
        }
    }

    #[test]
    fn test_host_device_is_available() {
        let host = HostDevice::<TestBackend>::new();
        assert!(acquire(&host).is_ok());
    }

    #[test]
    fn test_unavailable_device_is_an_error() {
        let err = acquire(&MissingAccelerator).unwrap_err();
        assert!(matches!(err, SegError::Device(_)), "got {err:?}");
        assert!(err.to_string().contains("gpu:0"));
    }
}
