//! Output device enumeration and capability queries

use cpal::traits::{DeviceTrait, HostTrait};

use crate::constants::STANDARD_SAMPLE_RATES;
use crate::error::{AudioError, Result};

/// Wrapper around a cpal output device
pub struct OutputDevice {
    inner: cpal::Device,
    pub name: String,
}

impl OutputDevice {
    pub fn from_cpal(device: cpal::Device) -> Self {
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        Self {
            inner: device,
            name,
        }
    }

    pub fn inner(&self) -> &cpal::Device {
        &self.inner
    }

    pub fn into_inner(self) -> cpal::Device {
        self.inner
    }

    /// Whether the device can open a stereo output stream at `rate` Hz
    pub fn supports_rate(&self, rate: u32) -> bool {
        let rate = cpal::SampleRate(rate);
        match self.inner.supported_output_configs() {
            Ok(configs) => configs
                .filter(|config| config.channels() == 2)
                .any(|config| rate >= config.min_sample_rate() && rate <= config.max_sample_rate()),
            Err(_) => false,
        }
    }

    /// Standard sample rates the device can play in stereo
    pub fn supported_rates(&self) -> Vec<u32> {
        STANDARD_SAMPLE_RATES
            .iter()
            .copied()
            .filter(|&rate| self.supports_rate(rate))
            .collect()
    }
}

/// Basic description of an output device
#[derive(Debug, Clone)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
}

/// List all available output devices
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let is_default = default_name.as_ref() == Some(&name);
                let wrapped = OutputDevice::from_cpal(device);
                devices.push(OutputDeviceInfo {
                    name,
                    is_default,
                    sample_rates: wrapped.supported_rates(),
                });
            }
        }
    }
    devices
}

/// Get an output device by name
pub fn get_output_device(name: &str) -> Result<OutputDevice> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceAcquisition(e.to_string()))?;

    for device in devices {
        if let Ok(device_name) = device.name() {
            if device_name == name {
                return Ok(OutputDevice::from_cpal(device));
            }
        }
    }

    Err(AudioError::DeviceAcquisition(format!(
        "Output device not found: {name}"
    )))
}

/// Get the system default output device
pub fn default_output_device() -> Result<OutputDevice> {
    cpal::default_host()
        .default_output_device()
        .map(OutputDevice::from_cpal)
        .ok_or_else(|| AudioError::DeviceAcquisition("No default output device".to_string()))
}
