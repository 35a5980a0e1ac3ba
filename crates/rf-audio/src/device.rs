//! Output audio device and host enumeration (spec §4.7's "platform audio
//! backend" collaborator). The engine only ever renders to an output
//! device — there is no input path in a GM playback engine.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, Host, SupportedStreamConfigRange};

use crate::{AudioError, AudioResult};

/// Output device information surfaced to the host integration layer.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub output_channels: u16,
    pub sample_rates: Vec<u32>,
}

/// Get the audio host (platform-specific backend), preferring a
/// low-latency backend where one is available.
pub fn get_host() -> Host {
    #[cfg(target_os = "windows")]
    {
        if let Some(host) = cpal::available_hosts()
            .into_iter()
            .find(|h| *h == cpal::HostId::Asio)
        {
            if let Ok(host) = cpal::host_from_id(host) {
                return host;
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(host) = cpal::available_hosts()
            .into_iter()
            .find(|h| *h == cpal::HostId::Jack)
        {
            if let Ok(host) = cpal::host_from_id(host) {
                return host;
            }
        }
    }

    cpal::default_host()
}

/// List available output devices.
pub fn list_output_devices() -> AudioResult<Vec<DeviceInfo>> {
    let host = get_host();
    let default_device = host.default_output_device();
    let default_name = default_device.as_ref().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    for device in host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
    {
        if let Ok(name) = device.name() {
            let is_default = default_name.as_ref().map(|d| d == &name).unwrap_or(false);
            let (output_channels, sample_rates) = output_device_info(&device);
            devices.push(DeviceInfo {
                name,
                is_default,
                output_channels,
                sample_rates,
            });
        }
    }
    Ok(devices)
}

pub fn get_default_output_device() -> AudioResult<Device> {
    get_host().default_output_device().ok_or(AudioError::NoDevice)
}

pub fn get_output_device_by_name(name: &str) -> AudioResult<Device> {
    let host = get_host();
    for device in host
        .output_devices()
        .map_err(|e| AudioError::BackendError(e.to_string()))?
    {
        if device.name().as_deref() == Ok(name) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

fn output_device_info(device: &Device) -> (u16, Vec<u32>) {
    let configs: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map(|c| c.collect())
        .unwrap_or_default();

    let max_channels = configs.iter().map(|c| c.channels()).max().unwrap_or(0);
    let mut sample_rates: Vec<u32> = configs
        .iter()
        .flat_map(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            [22050, 44100, 48000, 88200, 96000, 176400, 192000]
                .into_iter()
                .filter(move |&rate| rate >= min && rate <= max)
        })
        .collect();
    sample_rates.sort_unstable();
    sample_rates.dedup();
    (max_channels, sample_rates)
}
