//! Hardware task abstraction and the concrete backends behind it.

use log::{info, warn};
use serde::Serialize;

use crate::config::ChannelPlan;
use crate::error::Result;
use crate::settings::{Backend, Settings};

#[cfg(feature = "nidaqmx")]
pub mod nidaqmx;
pub mod simulated;

pub use simulated::SimulatedDevice;

/// A device that can be configured for a channel plan and read one scan at a
/// time.
pub trait DaqDevice: Send {
    fn name(&self) -> &str;

    /// Replace the device tasks with ones matching `plan`. Called while
    /// stopped and between reads.
    fn configure(&mut self, plan: &ChannelPlan) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Blocking read of one value per input channel of the configured plan,
    /// in `ChannelPlan::inputs` order.
    fn read_scan(&mut self) -> Result<Vec<f64>>;

    fn write_output(&mut self, line: u8, high: bool) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// Summary of a connected device and its channel counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub product_type: String,
    pub ai_channels: usize,
    pub ao_channels: usize,
    pub di_ports: usize,
    pub do_ports: usize,
    pub di_lines: usize,
}

pub fn open_device(settings: &Settings) -> Result<Box<dyn DaqDevice>> {
    match settings.backend {
        Backend::Simulated => Ok(Box::new(SimulatedDevice::new(&settings.device))),
        Backend::Nidaqmx => open_nidaqmx(&settings.device),
        Backend::Auto => match open_nidaqmx(&settings.device) {
            Ok(device) => Ok(device),
            Err(err) => {
                warn!("NI-DAQmx unavailable ({err}); using simulated data");
                Ok(Box::new(SimulatedDevice::new(&settings.device)))
            }
        },
    }
}

pub fn list_devices(backend: Backend) -> Result<Vec<DeviceInfo>> {
    match backend {
        Backend::Simulated => Ok(vec![SimulatedDevice::info("Dev1")]),
        Backend::Nidaqmx => list_nidaqmx(),
        Backend::Auto => list_nidaqmx().or_else(|err| {
            info!("NI-DAQmx device listing unavailable ({err}); listing simulator");
            Ok(vec![SimulatedDevice::info("Dev1")])
        }),
    }
}

#[cfg(feature = "nidaqmx")]
fn open_nidaqmx(device: &str) -> Result<Box<dyn DaqDevice>> {
    Ok(Box::new(nidaqmx::NiDaqmxDevice::open(device)?))
}

#[cfg(not(feature = "nidaqmx"))]
fn open_nidaqmx(_device: &str) -> Result<Box<dyn DaqDevice>> {
    Err(crate::error::DaqError::BackendUnavailable(
        "built without the `nidaqmx` feature".into(),
    ))
}

#[cfg(feature = "nidaqmx")]
fn list_nidaqmx() -> Result<Vec<DeviceInfo>> {
    nidaqmx::list_devices()
}

#[cfg(not(feature = "nidaqmx"))]
fn list_nidaqmx() -> Result<Vec<DeviceInfo>> {
    Err(crate::error::DaqError::BackendUnavailable(
        "built without the `nidaqmx` feature".into(),
    ))
}
