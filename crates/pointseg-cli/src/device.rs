//! Compute-device selection for the CLI.

use clap::ValueEnum;

/// Which device a run asks for. There is no fallback between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DeviceKind {
    /// First wgpu adapter (requires the `wgpu` feature).
    Gpu,
    /// NdArray on the host CPU.
    Cpu,
}

#[cfg(feature = "wgpu")]
pub mod gpu {
    use burn::backend::wgpu::WgpuDevice;
    use burn::prelude::*;
    use pointseg::ComputeDevice;

    /// The default wgpu adapter.
    #[derive(Debug, Clone, Default)]
    pub struct GpuDevice {
        device: WgpuDevice,
    }

    impl GpuDevice {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl<B: Backend<Device = WgpuDevice>> ComputeDevice<B> for GpuDevice {
        fn name(&self) -> String {
            format!("wgpu ({:?})", self.device)
        }

        fn is_available(&self) -> bool {
            // burn panics during adapter selection when no adapter exists.
            let device = self.device.clone();
            std::panic::catch_unwind(move || {
                let _ = Tensor::<B, 1>::zeros([1], &device).into_data();
            })
            .is_ok()
        }

        fn device(&self) -> B::Device {
            self.device.clone()
        }
    }
}
