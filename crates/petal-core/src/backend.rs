//! Device selection for the Burn backends.
//!
//! The concrete backend type is chosen by the tools at compile time (NdArray
//! by default, CUDA behind the `cuda` feature). This module only decides
//! which of the two a run should use.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::DeviceConfig;

/// Device type for backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Device {
    /// CPU backend
    Cpu,
    /// GPU backend
    Gpu(usize),
}

impl Default for Device {
    fn default() -> Self {
        Device::Cpu
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Device::Cpu => write!(f, "CPU"),
            Device::Gpu(id) => write!(f, "GPU:{}", id),
        }
    }
}

/// Resolve the device a run should use.
///
/// `accelerator_built` tells whether the calling binary was compiled with an
/// accelerator backend. Requesting one without it falls back to the CPU.
pub fn resolve_device(config: &DeviceConfig, accelerator_built: bool) -> Device {
    let device = match (config.use_accelerator, accelerator_built) {
        (false, _) => Device::Cpu,
        (true, true) => Device::Gpu(config.device_id),
        (true, false) => {
            warn!("Accelerator requested but this build has no accelerator backend, falling back to CPU");
            Device::Cpu
        }
    };

    info!("Using device: {}", device);
    device
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(Device::Cpu.to_string(), "CPU");
        assert_eq!(Device::Gpu(0).to_string(), "GPU:0");
        assert_eq!(Device::Gpu(1).to_string(), "GPU:1");
    }

    #[test]
    fn test_resolve_cpu_by_default() {
        let config = DeviceConfig::default();
        assert_eq!(resolve_device(&config, true), Device::Cpu);
    }

    #[test]
    fn test_resolve_accelerator() {
        let config = DeviceConfig {
            use_accelerator: true,
            device_id: 1,
        };
        assert_eq!(resolve_device(&config, true), Device::Gpu(1));
    }

    #[test]
    fn test_accelerator_fallback() {
        let config = DeviceConfig {
            use_accelerator: true,
            device_id: 0,
        };
        assert_eq!(resolve_device(&config, false), Device::Cpu);
    }
}
