//! Configuration loaded from environment variables

use crate::device::RtlSdrConfig;
use crate::receiver::ReceiverOptions;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Input device: auto, rtl_sdr, null or file:<path>
    pub device: String,

    /// RTL-SDR device index
    pub device_index: u32,

    /// Tuner gain in dB (-1 for AGC)
    pub gain_db: f32,

    /// Channel to tune in normal mode
    pub channel: String,

    /// Service to play: label or hex service id
    pub service: Option<String>,

    /// Scan every channel instead of playing a service
    pub scan: bool,

    /// DAB transmission mode (1-4)
    pub mode: u8,

    /// Path to rtl_sdr executable
    pub rtl_sdr_path: String,

    /// PPM frequency correction
    pub ppm_error: i32,

    /// Bound of every event handler queue
    pub event_queue_depth: usize,

    /// Failed synchronisation attempts before signal loss is reported
    pub sync_loss_threshold: usize,

    /// Statistics logging interval in milliseconds
    pub stats_interval_ms: u64,

    /// How long to wait for services after the signal appears
    pub service_discovery_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            device: std::env::var("DAB_DEVICE").unwrap_or_else(|_| "auto".to_string()),

            device_index: std::env::var("DEVICE_INDEX")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            gain_db: std::env::var("DAB_GAIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(-1.0),

            channel: std::env::var("DAB_CHANNEL").unwrap_or_else(|_| "5C".to_string()),

            service: std::env::var("DAB_SERVICE").ok().filter(|s| !s.trim().is_empty()),

            scan: std::env::var("DAB_SCAN")
                .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),

            mode: std::env::var("DAB_MODE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|m| (1..=4).contains(m))
                .unwrap_or(1),

            rtl_sdr_path: std::env::var("RTL_SDR_PATH").unwrap_or_else(|_| "rtl_sdr".to_string()),

            ppm_error: std::env::var("PPM_ERROR")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            event_queue_depth: std::env::var("EVENT_QUEUE_DEPTH")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(64),

            sync_loss_threshold: std::env::var("SYNC_LOSS_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),

            stats_interval_ms: std::env::var("STATS_INTERVAL_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5000),

            service_discovery_timeout_secs: std::env::var("SERVICE_DISCOVERY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
        }
    }

    pub fn receiver_options(&self) -> ReceiverOptions {
        ReceiverOptions {
            mode: self.mode,
            sync_loss_threshold: self.sync_loss_threshold,
            event_queue_depth: self.event_queue_depth,
        }
    }

    pub fn rtl_config(&self) -> RtlSdrConfig {
        RtlSdrConfig {
            device_index: self.device_index,
            gain_db: self.gain_db,
            ppm_error: self.ppm_error,
            rtl_sdr_path: self.rtl_sdr_path.clone(),
        }
    }

    /// `DAB_SERVICE` as a service id when it is written in hex
    pub fn service_id(&self) -> Option<u32> {
        let s = self.service.as_deref()?.trim();
        let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if hex.len() < 4 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        u32::from_str_radix(hex, 16).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_service(service: &str) -> Config {
        Config {
            service: Some(service.to_string()),
            ..Config::from_env()
        }
    }

    #[test]
    fn test_service_id() {
        assert_eq!(with_service("0xD210").service_id(), Some(0xD210));
        assert_eq!(with_service("d210").service_id(), Some(0xD210));
        assert_eq!(with_service("E1C0D210").service_id(), Some(0xE1C0_D210));
        assert_eq!(with_service("Radio One").service_id(), None);
        assert_eq!(with_service("BBC").service_id(), None);
    }
}
