//! Sample source for the OFDM processor
//!
//! Pulls blocks from the input device, removes the current frequency offset
//! with a phase-continuous oscillator and tracks the mean signal magnitude.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use thiserror::Error;

use crate::dab::constants::SAMPLE_RATE;
use crate::device::InputDevice;
use crate::error::DeviceError;

/// Samples requested from the device per call
const BLOCK_SIZE: usize = 8192;

/// Weight of a new sample in the running level
const LEVEL_ALPHA: f32 = 1e-5;

/// Why the reader could not deliver more samples
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("reader stopped")]
    Stopped,

    #[error("end of stream")]
    EndOfStream,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

pub struct SampleReader {
    device: Arc<dyn InputDevice>,
    running: Arc<AtomicBool>,
    block: Vec<Complex32>,
    pos: usize,
    filled: usize,
    offset_hz: f64,
    phase: f64,
    level: f32,
    primed: bool,
    samples_read: u64,
}

impl SampleReader {
    pub fn new(device: Arc<dyn InputDevice>, running: Arc<AtomicBool>) -> Self {
        Self {
            device,
            running,
            block: vec![Complex32::new(0.0, 0.0); BLOCK_SIZE],
            pos: 0,
            filled: 0,
            offset_hz: 0.0,
            phase: 0.0,
            level: 0.0,
            primed: false,
            samples_read: 0,
        }
    }

    fn refill(&mut self) -> Result<(), ReadError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(ReadError::Stopped);
        }

        let n = self.device.get_samples(&mut self.block)?;
        if n == 0 {
            return Err(if self.running.load(Ordering::SeqCst) {
                ReadError::EndOfStream
            } else {
                ReadError::Stopped
            });
        }

        if !self.primed {
            self.level = self.block[..n].iter().map(|s| s.norm()).sum::<f32>() / n as f32;
            self.primed = true;
        }

        self.pos = 0;
        self.filled = n;
        Ok(())
    }

    /// Next frequency corrected sample
    pub fn next_sample(&mut self) -> Result<Complex32, ReadError> {
        if self.pos == self.filled {
            self.refill()?;
        }
        let raw = self.block[self.pos];
        self.pos += 1;
        self.samples_read += 1;

        let sample = raw * Complex32::from_polar(1.0, -self.phase as f32);
        self.phase = (self.phase + TAU * self.offset_hz / SAMPLE_RATE as f64) % TAU;
        self.level += LEVEL_ALPHA * (sample.norm() - self.level);

        Ok(sample)
    }

    /// Fill `out` completely
    pub fn read(&mut self, out: &mut [Complex32]) -> Result<(), ReadError> {
        for slot in out.iter_mut() {
            *slot = self.next_sample()?;
        }
        Ok(())
    }

    /// Read `n` samples and append them to `out`
    pub fn read_into(&mut self, out: &mut Vec<Complex32>, n: usize) -> Result<(), ReadError> {
        out.reserve(n);
        for _ in 0..n {
            out.push(self.next_sample()?);
        }
        Ok(())
    }

    /// Discard `n` samples
    pub fn skip(&mut self, n: usize) -> Result<(), ReadError> {
        for _ in 0..n {
            self.next_sample()?;
        }
        Ok(())
    }

    /// Frequency offset currently removed from the input
    pub fn offset_hz(&self) -> f64 {
        self.offset_hz
    }

    /// Change the removed offset; the oscillator phase stays continuous
    pub fn set_offset_hz(&mut self, hz: f64) {
        self.offset_hz = hz;
    }

    /// Running mean magnitude of the input
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::NullDevice;

    /// Device producing a constant complex tone
    struct ToneDevice {
        hz: f64,
        n: std::sync::Mutex<u64>,
    }

    impl InputDevice for ToneDevice {
        fn name(&self) -> String {
            "tone".to_string()
        }
        fn get_samples(&self, buf: &mut [Complex32]) -> Result<usize, DeviceError> {
            let mut n = self.n.lock().unwrap();
            for s in buf.iter_mut() {
                *s = Complex32::from_polar(1.0, (TAU * self.hz * *n as f64 / SAMPLE_RATE as f64) as f32);
                *n += 1;
            }
            Ok(buf.len())
        }
        fn set_frequency(&self, _hz: u32) -> Result<(), DeviceError> {
            Ok(())
        }
        fn frequency(&self) -> u32 {
            0
        }
        fn set_gain(&self, _db: f32) -> Result<(), DeviceError> {
            Ok(())
        }
        fn set_agc(&self, _enabled: bool) -> Result<(), DeviceError> {
            Ok(())
        }
        fn reset(&self) {}
        fn stop(&self) {}
        fn restart(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    #[test]
    fn test_offset_correction_removes_tone() {
        let device = Arc::new(ToneDevice { hz: 3000.0, n: std::sync::Mutex::new(0) });
        let mut reader = SampleReader::new(device, Arc::new(AtomicBool::new(true)));
        reader.set_offset_hz(3000.0);

        let mut out = vec![Complex32::new(0.0, 0.0); 20_000];
        reader.read(&mut out).unwrap();
        let first = out[0];
        for s in &out {
            assert!((s - first).norm() < 1e-2);
        }
        assert!((reader.level() - 1.0).abs() < 1e-3);
        assert_eq!(reader.samples_read(), 20_000);
    }

    #[test]
    fn test_stop_and_end_of_stream() {
        let running = Arc::new(AtomicBool::new(true));
        let device = Arc::new(NullDevice::new(false));
        let mut reader = SampleReader::new(device.clone(), running.clone());
        assert!(reader.next_sample().is_ok());

        device.stop();
        reader.skip(BLOCK_SIZE - 1).unwrap();
        assert!(matches!(reader.next_sample(), Err(ReadError::EndOfStream)));

        running.store(false, Ordering::SeqCst);
        assert!(matches!(reader.next_sample(), Err(ReadError::Stopped)));
    }
}
