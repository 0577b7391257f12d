//! Events delivered to receiver and programme handlers

use chrono::{DateTime, Utc};

use crate::msc::AccessUnit;
use crate::ofdm::SyncState;
use crate::pad::MotFile;

/// Ensemble wide events
#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    SyncChanged(SyncState),
    SignalPresence(bool),
    NewEnsemble(u16),
    ServiceDetected(u32),
    EnsembleLabel(String),
    ServiceLabel { sid: u32, label: String },
    DateTime(DateTime<Utc>),
    /// The device failed; the pipeline has stopped
    DeviceFault(String),
    /// The input ran out of samples; the pipeline has stopped
    EndOfStream,
}

/// Events of one subscribed service
#[derive(Debug, Clone, PartialEq)]
pub enum ProgrammeEvent {
    /// Error corrected audio access unit, for an external codec
    AccessUnit(AccessUnit),
    /// PCM returned by the subscription's codec
    NewAudio {
        pcm: Vec<i16>,
        sample_rate: u32,
        mode: String,
    },
    DynamicLabel(String),
    Mot(MotFile),
    /// Logical frames dropped while looking for superframe sync
    FrameErrors(u32),
    /// Reed-Solomon results of one superframe
    RsErrors { corrected: usize, uncorrectable: usize },
    /// Access units with a bad CRC or impossible bounds in one superframe
    AacErrors(u32),
}
