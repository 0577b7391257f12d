//! Input devices delivering complex baseband samples

pub mod factory;
pub mod file_device;
pub mod input;
pub mod null_device;
pub mod rtl_sdr;

pub use factory::{open_device, DeviceInfo, DeviceKind};
pub use file_device::FileDevice;
pub use input::InputDevice;
pub use null_device::NullDevice;
pub use rtl_sdr::{RtlSdrConfig, RtlSdrDevice};
