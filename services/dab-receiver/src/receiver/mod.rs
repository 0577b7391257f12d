//! Receiver orchestration: controller, pipeline thread and scan results

pub mod controller;
pub mod radio_receiver;
pub mod scan;

pub use controller::{ControllerState, RadioController};
pub use radio_receiver::{RadioReceiver, ReceiverOptions};
pub use scan::{ScanResult, ScannedService};
