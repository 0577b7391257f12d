//! Receiver statistics, shared between the pipeline and its observers

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use serde::Serialize;

/// Counters updated by the pipeline thread and read from anywhere
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub samples: AtomicU64,
    pub frames: AtomicU64,
    pub sync_losses: AtomicU64,
    pub fib_ok: AtomicU64,
    pub fib_failed: AtomicU64,
    pub superframes: AtomicU64,
    pub rs_corrected: AtomicU64,
    pub rs_uncorrectable: AtomicU64,
    pub au_errors: AtomicU64,
    pub frame_errors: AtomicU64,
    /// f32 bit patterns
    snr_db: AtomicU32,
    freq_offset_hz: AtomicU32,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_samples(&self, total: u64) {
        self.samples.store(total, Ordering::Relaxed);
    }

    pub fn record_frame(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_loss(&self) {
        self.sync_losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fib(&self, crc_ok: bool) {
        if crc_ok {
            self.fib_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fib_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_superframe(&self, corrected: u64, uncorrectable: u64) {
        self.superframes.fetch_add(1, Ordering::Relaxed);
        self.rs_corrected.fetch_add(corrected, Ordering::Relaxed);
        self.rs_uncorrectable.fetch_add(uncorrectable, Ordering::Relaxed);
    }

    pub fn record_au_errors(&self, count: u64) {
        self.au_errors.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_frame_error(&self) {
        self.frame_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_snr_db(&self, snr: f32) {
        self.snr_db.store(snr.to_bits(), Ordering::Relaxed);
    }

    pub fn set_freq_offset_hz(&self, hz: f32) {
        self.freq_offset_hz.store(hz.to_bits(), Ordering::Relaxed);
    }

    pub fn get_fib_ok(&self) -> u64 {
        self.fib_ok.load(Ordering::Relaxed)
    }

    pub fn get_fib_failed(&self) -> u64 {
        self.fib_failed.load(Ordering::Relaxed)
    }

    pub fn get_frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn get_snr_db(&self) -> f32 {
        f32::from_bits(self.snr_db.load(Ordering::Relaxed))
    }

    pub fn get_freq_offset_hz(&self) -> f32 {
        f32::from_bits(self.freq_offset_hz.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            samples: self.samples.load(Ordering::Relaxed),
            frames: self.get_frames(),
            sync_losses: self.sync_losses.load(Ordering::Relaxed),
            fib_ok: self.get_fib_ok(),
            fib_failed: self.get_fib_failed(),
            superframes: self.superframes.load(Ordering::Relaxed),
            rs_corrected: self.rs_corrected.load(Ordering::Relaxed),
            rs_uncorrectable: self.rs_uncorrectable.load(Ordering::Relaxed),
            au_errors: self.au_errors.load(Ordering::Relaxed),
            frame_errors: self.frame_errors.load(Ordering::Relaxed),
            snr_db: self.get_snr_db(),
            freq_offset_hz: self.get_freq_offset_hz(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub samples: u64,
    pub frames: u64,
    pub sync_losses: u64,
    pub fib_ok: u64,
    pub fib_failed: u64,
    pub superframes: u64,
    pub rs_corrected: u64,
    pub rs_uncorrectable: u64,
    pub au_errors: u64,
    pub frame_errors: u64,
    pub snr_db: f32,
    pub freq_offset_hz: f32,
}

impl StatsSnapshot {
    /// Share of FIBs that passed their CRC, in percent
    pub fn fic_quality(&self) -> f64 {
        let total = self.fib_ok + self.fib_failed;
        if total == 0 {
            0.0
        } else {
            self.fib_ok as f64 * 100.0 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = ReceiverStats::new();
        stats.record_fib(true);
        stats.record_fib(true);
        stats.record_fib(false);
        stats.record_superframe(3, 1);
        stats.set_snr_db(12.5);

        let snap = stats.snapshot();
        assert_eq!(snap.fib_ok, 2);
        assert_eq!(snap.fib_failed, 1);
        assert_eq!(snap.rs_corrected, 3);
        assert_eq!(snap.rs_uncorrectable, 1);
        assert_eq!(snap.snr_db, 12.5);
        assert!((snap.fic_quality() - 66.666).abs() < 0.01);
    }
}
