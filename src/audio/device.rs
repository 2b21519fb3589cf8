use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SampleFormat, SupportedStreamConfig};
use log::{debug, warn};
use std::collections::HashMap;

use crate::error::DecoderError;

/// What an output device offers by default
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub name: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
    pub default_config: SupportedStreamConfig,
}

/// Output device enumeration and selection
pub struct DeviceManager {
    host: Host,
    devices: HashMap<String, Device>,
    current_device: Option<Device>,
    device_capabilities: HashMap<String, DeviceCapabilities>,
}

impl DeviceManager {
    pub fn new() -> Result<Self, DecoderError> {
        let mut manager = DeviceManager {
            host: cpal::default_host(),
            devices: HashMap::new(),
            current_device: None,
            device_capabilities: HashMap::new(),
        };

        manager.refresh_devices()?;
        Ok(manager)
    }

    /// Re-read the host's output devices. Devices without a usable default
    /// configuration are skipped.
    pub fn refresh_devices(&mut self) -> Result<(), DecoderError> {
        self.devices.clear();
        self.device_capabilities.clear();

        let devices = self
            .host
            .output_devices()
            .map_err(|e| DecoderError::Output(format!("Failed to enumerate devices: {}", e)))?;

        for device in devices {
            let name = match device.name() {
                Ok(name) => name,
                Err(e) => {
                    debug!("Skipping unnamed output device: {}", e);
                    continue;
                }
            };

            match device.default_output_config() {
                Ok(default_config) => {
                    let capabilities = DeviceCapabilities {
                        name: name.clone(),
                        sample_rate: default_config.sample_rate().0,
                        channels: default_config.channels(),
                        bit_depth: bit_depth_of(default_config.sample_format()),
                        default_config,
                    };
                    self.device_capabilities.insert(name.clone(), capabilities);
                    self.devices.insert(name, device);
                }
                Err(e) => debug!("Skipping output device {}: {}", name, e),
            }
        }

        Ok(())
    }

    pub fn list_devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn get_capabilities(&self, device_name: &str) -> Option<&DeviceCapabilities> {
        self.device_capabilities.get(device_name)
    }

    /// Select a device by name, falling back to the default device when it is missing
    pub fn select_device_with_fallback(&mut self, device_name: Option<&str>) -> Result<(), DecoderError> {
        if let Some(name) = device_name {
            if let Some(device) = self.devices.get(name).cloned() {
                self.current_device = Some(device);
                return Ok(());
            }
            warn!("Output device '{}' not found, using the default device", name);
        }
        self.select_default_device()
    }

    pub fn select_default_device(&mut self) -> Result<(), DecoderError> {
        let default_device = self
            .host
            .default_output_device()
            .ok_or_else(|| DecoderError::Output("No default output device available".to_string()))?;

        self.current_device = Some(default_device);
        Ok(())
    }

    pub fn current_device(&self) -> Option<&Device> {
        self.current_device.as_ref()
    }

    pub fn current_device_name(&self) -> Option<String> {
        self.current_device.as_ref().and_then(|device| device.name().ok())
    }

    /// Default stream configuration of the selected device
    pub fn current_config(&self) -> Result<SupportedStreamConfig, DecoderError> {
        let device = self
            .current_device
            .as_ref()
            .ok_or_else(|| DecoderError::Output("No output device selected".to_string()))?;
        device
            .default_output_config()
            .map_err(|e| DecoderError::Output(format!("Failed to get default config: {}", e)))
    }
}

/// Bits per sample of a cpal sample format
pub fn bit_depth_of(format: SampleFormat) -> u16 {
    match format {
        SampleFormat::I8 | SampleFormat::U8 => 8,
        SampleFormat::I16 | SampleFormat::U16 => 16,
        SampleFormat::I32 | SampleFormat::U32 | SampleFormat::F32 => 32,
        SampleFormat::I64 | SampleFormat::U64 | SampleFormat::F64 => 64,
        _ => 16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_depths() {
        assert_eq!(bit_depth_of(SampleFormat::I16), 16);
        assert_eq!(bit_depth_of(SampleFormat::U16), 16);
        assert_eq!(bit_depth_of(SampleFormat::F32), 32);
        assert_eq!(bit_depth_of(SampleFormat::U8), 8);
        assert_eq!(bit_depth_of(SampleFormat::F64), 64);
    }
}
