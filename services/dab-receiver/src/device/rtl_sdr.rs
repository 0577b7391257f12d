//! RTL-SDR input via the `rtl_sdr` command line tool
//!
//! Spawns `rtl_sdr` to stream raw unsigned 8-bit IQ at 2.048 MSPS to stdout.
//! Retuning restarts the process since the tool takes its frequency once.

use std::io::{BufRead, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;

use rustfft::num_complex::Complex32;
use tracing::{debug, info, warn};

use super::input::{convert_u8_iq, InputDevice};
use crate::dab::constants::SAMPLE_RATE;
use crate::error::DeviceError;

/// Identification of an attached stick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtlDeviceInfo {
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
}

/// Sanitize a string to only contain printable ASCII characters
fn sanitize_string(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .collect::<String>()
        .trim()
        .to_string()
}

/// Parse the device listing `rtl_sdr` prints on stderr, e.g.
/// "  0:  Realtek, RTL2838UHIDIR, SN: 00000001"
pub fn parse_device_listing<I, S>(lines: I, device_index: u32) -> Option<RtlDeviceInfo>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let prefix = format!("{}:", device_index);
    let mut found: Option<RtlDeviceInfo> = None;

    for line in lines {
        let trimmed = line.as_ref().trim();
        if trimmed.starts_with("No supported devices") {
            return None;
        }
        let Some(rest) = trimmed.strip_prefix(&prefix) else {
            continue;
        };

        let fields: Vec<&str> = rest.trim().split(',').collect();
        let mut info = RtlDeviceInfo::default();
        if let Some(mfr) = fields.first().map(|f| sanitize_string(f)).filter(|s| !s.is_empty()) {
            info.manufacturer = Some(mfr);
        }
        if let Some(prd) = fields.get(1).map(|f| sanitize_string(f)).filter(|s| !s.is_empty()) {
            info.product = Some(prd);
        }
        if let Some(sn) = fields.get(2).and_then(|f| f.trim().strip_prefix("SN:")) {
            let sn = sanitize_string(sn);
            if !sn.is_empty() {
                info.serial = Some(sn);
            }
        }
        found = Some(info);
        break;
    }

    found
}

/// Probe for a stick by running `rtl_sdr` for a single sample
pub fn query_device_info(rtl_sdr_path: &str, device_index: u32) -> Option<RtlDeviceInfo> {
    let mut cmd = Command::new(rtl_sdr_path);
    cmd.arg("-d").arg(device_index.to_string())
       .arg("-f").arg("227360000")
       .arg("-s").arg(SAMPLE_RATE.to_string())
       .arg("-n").arg("1")
       .arg("-")
       .stdout(Stdio::null())
       .stderr(Stdio::piped());

    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to query device info: {}", e);
            return None;
        }
    };

    let stderr = child.stderr.take()?;
    let reader = std::io::BufReader::new(stderr);
    let info = parse_device_listing(reader.lines().map_while(Result::ok), device_index);
    let _ = child.wait();
    info
}

/// RTL-SDR configuration
#[derive(Debug, Clone)]
pub struct RtlSdrConfig {
    pub device_index: u32,
    /// Gain in dB, negative selects AGC
    pub gain_db: f32,
    pub ppm_error: i32,
    pub rtl_sdr_path: String,
}

impl Default for RtlSdrConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            gain_db: -1.0,
            ppm_error: 0,
            rtl_sdr_path: "rtl_sdr".to_string(),
        }
    }
}

pub struct RtlSdrDevice {
    config: Mutex<RtlSdrConfig>,
    /// Gain restored when AGC is switched off
    manual_gain_db: Mutex<Option<f32>>,
    info: RtlDeviceInfo,
    frequency: AtomicU32,
    child: Mutex<Option<Child>>,
    stdout: Mutex<Option<ChildStdout>>,
    stopped: AtomicBool,
}

impl RtlSdrDevice {
    /// Open the stick; fails when `rtl_sdr` finds no device
    pub fn open(config: RtlSdrConfig) -> Result<Self, DeviceError> {
        let info = query_device_info(&config.rtl_sdr_path, config.device_index).ok_or_else(|| {
            DeviceError::Open {
                name: format!("rtl_sdr #{}", config.device_index),
                reason: "no supported device found".to_string(),
            }
        })?;

        info!("===========================================");
        info!("  RTL-SDR device #{}", config.device_index);
        info!("  Manufacturer: {}", info.manufacturer.as_deref().unwrap_or("unknown"));
        info!("  Product: {}", info.product.as_deref().unwrap_or("unknown"));
        info!("  Serial: {}", info.serial.as_deref().unwrap_or("unknown"));
        info!("===========================================");

        Ok(Self::with_info(config, info))
    }

    fn with_info(config: RtlSdrConfig, info: RtlDeviceInfo) -> Self {
        Self {
            manual_gain_db: Mutex::new((config.gain_db >= 0.0).then_some(config.gain_db)),
            config: Mutex::new(config),
            info,
            frequency: AtomicU32::new(0),
            child: Mutex::new(None),
            stdout: Mutex::new(None),
            stopped: AtomicBool::new(true),
        }
    }

    /// Apply a gain setting, restarting a running capture
    fn apply_gain(&self, db: f32) -> Result<(), DeviceError> {
        self.config.lock().map_err(|_| DeviceError::Disconnected)?.gain_db = db;
        if self.child.lock().map_err(|_| DeviceError::Disconnected)?.is_some() {
            self.spawn_process()?;
        }
        Ok(())
    }

    fn kill_process(&self) {
        if let Ok(mut child) = self.child.lock() {
            if let Some(mut c) = child.take() {
                let _ = c.kill();
                let _ = c.wait();
            }
        }
    }

    /// (Re)start `rtl_sdr` on the current frequency
    fn spawn_process(&self) -> Result<(), DeviceError> {
        self.kill_process();

        let frequency = self.frequency.load(Ordering::SeqCst);
        if frequency == 0 {
            return Ok(());
        }
        let config = self.config.lock().map_err(|_| DeviceError::Disconnected)?.clone();

        // rtl_sdr -d <device> -f <freq> -s <rate> [-g <gain>] [-p <ppm>] -
        let mut cmd = Command::new(&config.rtl_sdr_path);
        cmd.arg("-d").arg(config.device_index.to_string())
           .arg("-f").arg(frequency.to_string())
           .arg("-s").arg(SAMPLE_RATE.to_string());
        if config.gain_db >= 0.0 {
            cmd.arg("-g").arg(config.gain_db.to_string());
        }
        if config.ppm_error != 0 {
            cmd.arg("-p").arg(config.ppm_error.to_string());
        }
        cmd.arg("-");
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        info!("Executing: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| DeviceError::Open {
            name: config.rtl_sdr_path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                let reader = std::io::BufReader::new(stderr);
                for line in reader.lines().map_while(Result::ok) {
                    if !line.trim().is_empty() {
                        debug!("[rtl_sdr] {}", line.trim());
                    }
                }
            });
        }

        let stdout = child.stdout.take().ok_or(DeviceError::Disconnected)?;
        *self.stdout.lock().map_err(|_| DeviceError::Disconnected)? = Some(stdout);
        *self.child.lock().map_err(|_| DeviceError::Disconnected)? = Some(child);
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl InputDevice for RtlSdrDevice {
    fn name(&self) -> String {
        format!(
            "{} {}",
            self.info.manufacturer.as_deref().unwrap_or("RTL-SDR"),
            self.info.product.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }

    fn get_samples(&self, buf: &mut [Complex32]) -> Result<usize, DeviceError> {
        let mut guard = self.stdout.lock().map_err(|_| DeviceError::Disconnected)?;
        let Some(stdout) = guard.as_mut() else {
            return Ok(0);
        };

        let mut raw = vec![0u8; buf.len() * 2];
        let mut filled = 0;
        while filled < raw.len() {
            match stdout.read(&mut raw[filled..]) {
                Ok(0) => {
                    if self.stopped.load(Ordering::SeqCst) {
                        return Ok(0);
                    }
                    warn!("rtl_sdr stdout closed (EOF)");
                    return Err(DeviceError::Disconnected);
                }
                Ok(n) => filled += n,
                Err(e) if self.stopped.load(Ordering::SeqCst) => {
                    debug!("Read after stop: {}", e);
                    return Ok(0);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(convert_u8_iq(&raw, buf))
    }

    fn set_frequency(&self, hz: u32) -> Result<(), DeviceError> {
        self.frequency.store(hz, Ordering::SeqCst);
        self.spawn_process()
    }

    fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::SeqCst)
    }

    fn set_gain(&self, db: f32) -> Result<(), DeviceError> {
        if db >= 0.0 {
            *self.manual_gain_db.lock().map_err(|_| DeviceError::Disconnected)? = Some(db);
        }
        self.apply_gain(db)
    }

    fn set_agc(&self, enabled: bool) -> Result<(), DeviceError> {
        if enabled {
            return self.apply_gain(-1.0);
        }
        match *self.manual_gain_db.lock().map_err(|_| DeviceError::Disconnected)? {
            Some(db) => self.apply_gain(db),
            None => {
                debug!("No manual gain set, AGC stays on until set_gain");
                Ok(())
            }
        }
    }

    fn reset(&self) {}

    fn stop(&self) {
        info!("Stopping RTL-SDR capture...");
        self.stopped.store(true, Ordering::SeqCst);
        self.kill_process();
    }

    fn restart(&self) -> Result<(), DeviceError> {
        let active = self.child.lock().map_err(|_| DeviceError::Disconnected)?.is_some();
        if active && !self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.spawn_process()
    }
}

impl Drop for RtlSdrDevice {
    fn drop(&mut self) {
        self.stop();
    }
}
