//! Output Device Enumeration and Lookup

use cpal::traits::{DeviceTrait, HostTrait};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};

/// An output device as reported by the host audio API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDeviceInfo {
    /// Human-readable device name, also used as its ID
    pub name: String,

    /// Whether this is the system default device
    pub is_default: bool,

    /// Supported sample rates (may be empty if querying failed)
    pub sample_rates: Vec<u32>,

    /// Maximum supported channels
    pub max_channels: u16,
}

impl OutputDeviceInfo {
    /// Enumerate all output devices
    pub fn enumerate() -> EngineResult<Vec<OutputDeviceInfo>> {
        let host = cpal::default_host();
        let default_name = host.default_output_device().and_then(|d| d.name().ok());

        let devices: Vec<_> = host
            .output_devices()
            .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?
            .filter_map(|device| Self::from_cpal_device(&device, default_name.as_deref()).ok())
            .collect();

        if devices.is_empty() {
            return Err(EngineError::NoDevicesFound);
        }
        Ok(devices)
    }

    /// Get the default output device
    pub fn default_output() -> EngineResult<OutputDeviceInfo> {
        let device = cpal::default_host()
            .default_output_device()
            .ok_or(EngineError::NoDevicesFound)?;

        Self::from_cpal_device(&device, None).map(|mut d| {
            d.is_default = true;
            d
        })
    }

    fn from_cpal_device(device: &cpal::Device, default_name: Option<&str>) -> EngineResult<Self> {
        let name = device
            .name()
            .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;
        let is_default = default_name.map(|d| d == name).unwrap_or(false);

        let (sample_rates, max_channels) = match device.supported_output_configs() {
            Ok(configs) => extract_config_info(configs),
            Err(_) => (vec![], 2),
        };

        Ok(OutputDeviceInfo {
            name,
            is_default,
            sample_rates,
            max_channels,
        })
    }
}

/// Find an output device by name, or the default when `name` is None
pub fn find_output_device(name: Option<&str>) -> EngineResult<cpal::Device> {
    let host = cpal::default_host();

    let Some(wanted) = name else {
        return host.default_output_device().ok_or(EngineError::NoDevicesFound);
    };

    let devices = host
        .output_devices()
        .map_err(|e| EngineError::DeviceNotFound(e.to_string()))?;
    for device in devices {
        if device.name().map(|n| n == wanted).unwrap_or(false) {
            debug!("Using output device '{}'", wanted);
            return Ok(device);
        }
    }
    Err(EngineError::DeviceNotFound(wanted.to_string()))
}

/// Whether any usable output device exists
pub fn has_output_device(name: Option<&str>) -> bool {
    find_output_device(name).is_ok()
}

fn extract_config_info(
    configs: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
) -> (Vec<u32>, u16) {
    let mut sample_rates = Vec::new();
    let mut max_channels = 0u16;

    const COMMON_RATES: [u32; 6] = [22050, 32000, 44100, 48000, 88200, 96000];

    for config in configs {
        max_channels = max_channels.max(config.channels());

        let min = config.min_sample_rate().0;
        let max = config.max_sample_rate().0;

        for &rate in &COMMON_RATES {
            if rate >= min && rate <= max && !sample_rates.contains(&rate) {
                sample_rates.push(rate);
            }
        }
    }

    sample_rates.sort_unstable();
    (sample_rates, max_channels)
}
