//! # Compute Device Selection
//!
//! Both models are loaded on one device, chosen from `models.device`.
//! GPU backends only exist when candle is built with the matching feature
//! (`cuda`, `metal`); without it the constructor fails and the CPU is used.

use candle_core::Device;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// First available of CUDA, Metal, CPU
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" | "automatic" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            "metal" => Ok(DevicePreference::Metal),
            _ => Err(format!(
                "Unknown device preference: {} (expected auto, cpu, cuda or metal)",
                s
            )),
        }
    }
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevicePreference::Auto => "auto",
            DevicePreference::Cpu => "cpu",
            DevicePreference::Cuda => "cuda",
            DevicePreference::Metal => "metal",
        };
        f.write_str(name)
    }
}

impl DevicePreference {
    /// Open the preferred device. An unavailable GPU falls back to the CPU with a
    /// warning rather than failing startup.
    pub fn select(self) -> Device {
        let device = match self {
            DevicePreference::Cpu => Some(Device::Cpu),
            DevicePreference::Cuda => try_open("CUDA", || Device::new_cuda(0)),
            DevicePreference::Metal => try_open("Metal", || Device::new_metal(0)),
            DevicePreference::Auto => try_open("CUDA", || Device::new_cuda(0))
                .or_else(|| try_open("Metal", || Device::new_metal(0))),
        };

        match device {
            Some(device) => {
                info!("Selected {} for inference (preference: {})", describe(&device), self);
                device
            }
            None => {
                if self != DevicePreference::Auto {
                    warn!("Requested device '{}' is not available, using CPU", self);
                } else {
                    info!("No GPU acceleration available, using CPU for inference");
                }
                Device::Cpu
            }
        }
    }
}

fn try_open(name: &str, open: impl FnOnce() -> candle_core::Result<Device>) -> Option<Device> {
    open()
        .map_err(|e| debug!("{} not available: {}", name, e))
        .ok()
}

/// Short device name for logs and `model_info`.
pub fn describe(device: &Device) -> &'static str {
    match device {
        Device::Cpu => "CPU",
        Device::Cuda(_) => "CUDA GPU",
        Device::Metal(_) => "Metal GPU",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("gpu".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda);
        assert_eq!("metal".parse::<DevicePreference>().unwrap(), DevicePreference::Metal);
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for pref in [
            DevicePreference::Auto,
            DevicePreference::Cpu,
            DevicePreference::Cuda,
            DevicePreference::Metal,
        ] {
            assert_eq!(pref.to_string().parse::<DevicePreference>().unwrap(), pref);
        }
    }

    #[test]
    fn test_cpu_preference_is_cpu() {
        let device = DevicePreference::Cpu.select();
        assert!(matches!(device, Device::Cpu));
        assert_eq!(describe(&device), "CPU");
    }
}
