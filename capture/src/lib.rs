pub mod acquisition;
pub mod device;
#[cfg(all(unix, feature = "realsense"))]
pub mod realsense;
pub mod simulated;

use realsense_viewer_common::config::{CaptureBackend, CaptureConfig};
use realsense_viewer_common::frame::PointFormat;
use std::fmt;
use tracing::debug;

pub use device::{CaptureDevice, FrameCallback};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no free device matches {0}")]
    DeviceNotFound(DeviceId),
    #[error("device is already streaming")]
    AlreadyRunning,
    #[error("capture backend {0:?} is not compiled in")]
    BackendUnavailable(CaptureBackend),
    #[error("capture backend error: {0}")]
    Backend(String),
    #[error("failed to spawn capture thread: {0}")]
    Spawn(std::io::Error),
}

/// How the operator selects a device on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceId {
    /// First available device.
    First,
    /// Device with this serial number.
    Serial(String),
    /// 1-based position in enumeration order, written `#<n>`.
    Index(usize),
}

impl DeviceId {
    /// Parse `""` (first device), `#<n>` (index) or a serial number.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return DeviceId::First;
        }
        match s.strip_prefix('#').map(str::parse::<usize>) {
            Some(Ok(index)) if index > 0 => DeviceId::Index(index),
            _ => DeviceId::Serial(s.to_string()),
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceId::First => f.write_str("first available device"),
            DeviceId::Serial(serial) => write!(f, "serial {serial}"),
            DeviceId::Index(index) => write!(f, "#{index}"),
        }
    }
}

/// Open a device from the configured backend.
pub fn open_device(
    config: &CaptureConfig,
    id: &DeviceId,
    format: PointFormat,
) -> Result<Box<dyn CaptureDevice>, CaptureError> {
    match config.backend {
        CaptureBackend::Simulated => Ok(Box::new(simulated::SimulatedDevice::open(
            config, id, format,
        )?)),
        #[cfg(all(unix, feature = "realsense"))]
        CaptureBackend::RealSense => Ok(Box::new(realsense::RealSenseDevice::open(
            config, id, format,
        )?)),
        #[cfg(not(all(unix, feature = "realsense")))]
        CaptureBackend::RealSense => Err(CaptureError::BackendUnavailable(CaptureBackend::RealSense)),
    }
}

/// Serial numbers of the connected devices, in index order.
///
/// Devices are tried as `#1`, `#2`, ... until opening one fails; the
/// failure only ends the enumeration.
pub fn list_devices(config: &CaptureConfig) -> Vec<String> {
    list_with(|id| open_device(config, id, PointFormat::Xyz))
}

fn list_with<F>(mut open: F) -> Vec<String>
where
    F: FnMut(&DeviceId) -> Result<Box<dyn CaptureDevice>, CaptureError>,
{
    let mut serials = Vec::new();
    loop {
        let id = DeviceId::Index(serials.len() + 1);
        match open(&id) {
            Ok(device) => serials.push(device.serial_number().to_string()),
            Err(e) => {
                debug!(error = %e, tried = %id, "device enumeration finished");
                break;
            }
        }
    }
    serials
}
