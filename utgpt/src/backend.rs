//! libtorch session setup.

use tch::{Cuda, Device};

/// Options for setting up the libtorch backend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BackendOptions {
    /// The device that models are constructed on.
    pub device: Device,

    /// Number of threads for parallelism between operations.
    pub interop_threads: Option<usize>,

    /// Number of threads for parallelism within operations.
    pub intraop_threads: Option<usize>,
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions {
            device: Device::Cpu,
            interop_threads: None,
            intraop_threads: None,
        }
    }
}

/// Set up the libtorch backend.
///
/// Thread counts are only changed when they are set in `options`. On
/// CUDA devices, cuDNN autotuning is enabled, so that the fastest
/// convolution algorithms are selected for the input shapes.
pub fn maybe_setup_backend(options: &BackendOptions) {
    if let Some(intraop_threads) = options.intraop_threads {
        log::debug!("Using {} intra-op threads", intraop_threads);
        tch::set_num_threads(intraop_threads as i32);
    }

    if let Some(interop_threads) = options.interop_threads {
        log::debug!("Using {} inter-op threads", interop_threads);
        tch::set_num_interop_threads(interop_threads as i32);
    }

    if let Device::Cuda(gpu) = options.device {
        log::info!("Enabling cuDNN autotuning for GPU {}", gpu);
        Cuda::cudnn_set_benchmark(true);
    }
}

#[cfg(test)]
mod tests {
    use tch::Device;

    use super::{maybe_setup_backend, BackendOptions};

    #[test]
    fn default_backend_uses_cpu() {
        let options = BackendOptions::default();
        assert_eq!(options.device, Device::Cpu);

        // Leaves libtorch's defaults untouched.
        maybe_setup_backend(&options);
    }
}
