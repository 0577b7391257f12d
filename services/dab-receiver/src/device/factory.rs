//! Device selection: `auto`, `rtl_sdr`, `null` or `file:<path>`

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use super::file_device::FileDevice;
use super::input::InputDevice;
use super::null_device::NullDevice;
use super::rtl_sdr::{RtlSdrConfig, RtlSdrDevice};
use crate::error::DeviceError;

/// Requested input device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceKind {
    /// First RTL-SDR stick found
    Auto,
    RtlSdr,
    Null,
    File(PathBuf),
}

impl DeviceKind {
    pub fn parse(name: &str) -> Result<Self, DeviceError> {
        let name = name.trim();
        if let Some(path) = name.strip_prefix("file:") {
            return Ok(DeviceKind::File(PathBuf::from(path)));
        }
        match name.to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(DeviceKind::Auto),
            "rtl_sdr" | "rtlsdr" | "rtl-sdr" => Ok(DeviceKind::RtlSdr),
            "null" | "none" => Ok(DeviceKind::Null),
            _ => Err(DeviceError::UnknownDevice(name.to_string())),
        }
    }
}

/// The device actually in use
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    /// The requested device failed and the null device stands in
    pub fallback: bool,
}

/// Open the requested device. Open failures fall back to the null device;
/// only an unknown device name is an error.
pub fn open_device(
    name: &str,
    gain_db: f32,
    rtl_config: RtlSdrConfig,
) -> Result<(Arc<dyn InputDevice>, DeviceInfo), DeviceError> {
    let kind = DeviceKind::parse(name)?;

    let opened: Result<Arc<dyn InputDevice>, DeviceError> = match &kind {
        DeviceKind::Auto | DeviceKind::RtlSdr => RtlSdrDevice::open(RtlSdrConfig {
            gain_db,
            ..rtl_config
        })
        .map(|d| Arc::new(d) as Arc<dyn InputDevice>),
        DeviceKind::File(path) => FileDevice::open(path).map(|d| Arc::new(d) as Arc<dyn InputDevice>),
        DeviceKind::Null => Ok(Arc::new(NullDevice::new(true))),
    };

    let (device, fallback) = match opened {
        Ok(device) => (device, false),
        Err(e) => {
            error!("Failed to open device '{}': {}", name, e);
            error!("Falling back to the null device");
            (Arc::new(NullDevice::new(true)) as Arc<dyn InputDevice>, true)
        }
    };

    if gain_db < 0.0 {
        device.set_agc(true)?;
    } else {
        device.set_gain(gain_db)?;
    }

    let info = DeviceInfo {
        name: device.name(),
        fallback,
    };
    info!("Input device: {}{}", info.name, if fallback { " (fallback)" } else { "" });
    Ok((device, info))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_names() {
        assert_eq!(DeviceKind::parse("auto").unwrap(), DeviceKind::Auto);
        assert_eq!(DeviceKind::parse("RTL_SDR").unwrap(), DeviceKind::RtlSdr);
        assert_eq!(DeviceKind::parse("null").unwrap(), DeviceKind::Null);
        assert_eq!(
            DeviceKind::parse("file:/tmp/capture.iq").unwrap(),
            DeviceKind::File(PathBuf::from("/tmp/capture.iq"))
        );
        assert!(matches!(DeviceKind::parse("airspy"), Err(DeviceError::UnknownDevice(_))));
    }

    #[test]
    fn test_failed_open_falls_back_to_null() {
        let (device, info) = open_device("file:/nonexistent/capture.iq", -1.0, RtlSdrConfig::default()).unwrap();
        assert!(info.fallback);
        assert_eq!(device.name(), "Null device");

        let rtl = RtlSdrConfig {
            rtl_sdr_path: "/nonexistent/rtl_sdr".to_string(),
            ..RtlSdrConfig::default()
        };
        let (_, info) = open_device("rtl_sdr", 20.0, rtl).unwrap();
        assert!(info.fallback);
    }

    #[test]
    fn test_unknown_device_is_an_error() {
        assert!(open_device("hackrf", -1.0, RtlSdrConfig::default()).is_err());
    }
}
