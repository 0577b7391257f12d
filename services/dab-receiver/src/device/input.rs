//! Input device abstraction

use rustfft::num_complex::Complex32;

use crate::error::DeviceError;

/// A tuner or sample source delivering complex baseband at 2.048 MHz.
///
/// All methods take `&self` so the device can be stopped from the control
/// thread while the pipeline thread is blocked in `get_samples`.
pub trait InputDevice: Send + Sync {
    /// Human readable device description
    fn name(&self) -> String;

    /// Fill `buf` with up to `buf.len()` samples; 0 means end of stream
    fn get_samples(&self, buf: &mut [Complex32]) -> Result<usize, DeviceError>;

    fn set_frequency(&self, hz: u32) -> Result<(), DeviceError>;

    fn frequency(&self) -> u32;

    /// Manual gain in dB; disables AGC
    fn set_gain(&self, db: f32) -> Result<(), DeviceError>;

    fn set_agc(&self, enabled: bool) -> Result<(), DeviceError>;

    /// Drop buffered samples, e.g. after retuning
    fn reset(&self);

    /// Stop acquisition; blocked `get_samples` calls return promptly
    fn stop(&self);

    /// Restart acquisition after `stop`
    fn restart(&self) -> Result<(), DeviceError>;
}

/// Convert interleaved unsigned 8-bit IQ (rtl_sdr format) to complex samples
pub fn convert_u8_iq(raw: &[u8], out: &mut [Complex32]) -> usize {
    let n = (raw.len() / 2).min(out.len());
    for (dst, pair) in out.iter_mut().zip(raw.chunks_exact(2)).take(n) {
        *dst = Complex32::new(
            (pair[0] as f32 - 127.5) / 128.0,
            (pair[1] as f32 - 127.5) / 128.0,
        );
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_u8_iq() {
        let raw = [255u8, 0, 128, 127];
        let mut out = [Complex32::new(0.0, 0.0); 4];
        assert_eq!(convert_u8_iq(&raw, &mut out), 2);
        assert!((out[0].re - 0.99609).abs() < 1e-4);
        assert!((out[0].im + 0.99609).abs() < 1e-4);
        assert!(out[1].re > 0.0 && out[1].im < 0.0);
    }
}
