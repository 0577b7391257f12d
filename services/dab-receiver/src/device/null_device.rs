//! Null device: delivers silence, used when no tuner is available

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread;
use std::time::Duration;

use rustfft::num_complex::Complex32;

use super::input::InputDevice;
use crate::dab::constants::SAMPLE_RATE;
use crate::error::DeviceError;

pub struct NullDevice {
    realtime: bool,
    frequency: AtomicU32,
    stopped: AtomicBool,
}

impl NullDevice {
    /// `realtime` paces delivery to the nominal sample rate
    pub fn new(realtime: bool) -> Self {
        Self {
            realtime,
            frequency: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
        }
    }
}

impl InputDevice for NullDevice {
    fn name(&self) -> String {
        "Null device".to_string()
    }

    fn get_samples(&self, buf: &mut [Complex32]) -> Result<usize, DeviceError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(0);
        }
        if self.realtime {
            thread::sleep(Duration::from_secs_f64(buf.len() as f64 / SAMPLE_RATE as f64));
        }
        buf.fill(Complex32::new(0.0, 0.0));
        Ok(buf.len())
    }

    fn set_frequency(&self, hz: u32) -> Result<(), DeviceError> {
        self.frequency.store(hz, Ordering::Relaxed);
        Ok(())
    }

    fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Relaxed)
    }

    fn set_gain(&self, _db: f32) -> Result<(), DeviceError> {
        Ok(())
    }

    fn set_agc(&self, _enabled: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn reset(&self) {}

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn restart(&self) -> Result<(), DeviceError> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }
}
