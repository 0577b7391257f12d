//! DAB/DAB+ receiver
//!
//! Turns complex baseband from an RTL-SDR stick, a recording or the null
//! device into ensemble information, service labels, audio access units,
//! dynamic labels and MOT slideshow images.

pub mod channels;
pub mod config;
pub mod dab;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fec;
pub mod fic;
pub mod msc;
pub mod ofdm;
pub mod pad;
pub mod receiver;
pub mod stats;

#[cfg(test)]
mod test_signal;

pub use config::Config;
pub use error::{DeviceError, ReceiverError};
pub use events::{ProgrammeEvent, RadioEvent};
pub use receiver::{RadioController, ReceiverOptions, ScanResult};
