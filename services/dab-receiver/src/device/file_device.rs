//! Replay of a raw IQ recording (unsigned 8-bit I/Q pairs, as written by
//! `rtl_sdr`)

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use rustfft::num_complex::Complex32;
use tracing::info;

use super::input::{convert_u8_iq, InputDevice};
use crate::error::DeviceError;

pub struct FileDevice {
    path: PathBuf,
    reader: Mutex<BufReader<File>>,
    frequency: AtomicU32,
    stopped: AtomicBool,
}

impl FileDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| DeviceError::Open {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        info!("Replaying IQ recording {}", path.display());

        Ok(Self {
            path,
            reader: Mutex::new(BufReader::new(file)),
            frequency: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
        })
    }
}

impl InputDevice for FileDevice {
    fn name(&self) -> String {
        format!("File {}", self.path.display())
    }

    fn get_samples(&self, buf: &mut [Complex32]) -> Result<usize, DeviceError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(0);
        }

        let mut raw = vec![0u8; buf.len() * 2];
        let mut filled = 0;
        let mut reader = self.reader.lock().map_err(|_| DeviceError::Disconnected)?;
        while filled < raw.len() {
            match reader.read(&mut raw[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(convert_u8_iq(&raw[..filled - filled % 2], buf))
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

    /// Rewind to the start of the recording
    fn reset(&self) {
        if let Ok(mut reader) = self.reader.lock() {
            let _ = reader.seek(SeekFrom::Start(0));
        }
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn restart(&self) -> Result<(), DeviceError> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }
}
