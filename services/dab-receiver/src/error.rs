//! Error types surfaced by the receiver

use thiserror::Error;

/// Tuner and sample source failures
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open device {name}: {reason}")]
    Open { name: String, reason: String },

    #[error("device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("device disconnected")]
    Disconnected,

    #[error("unknown device '{0}'")]
    UnknownDevice(String),
}

/// Failures of receiver commands
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("no input device initialised")]
    NoDevice,

    #[error("a channel is already active, clear it first")]
    ChannelActive,

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("no channel tuned")]
    NotTuned,

    #[error("service {0:#x} unknown or without resolved sub-channel")]
    ServiceUnknown(u32),

    #[error("service {0:#x} is not an audio service")]
    NotAudio(u32),

    #[error("service {0:#x} is already subscribed")]
    AlreadySubscribed(u32),

    #[error("service {0:#x} is not subscribed")]
    NotSubscribed(u32),

    #[error("channel was tuned in scan mode, audio decoding is disabled")]
    ScanMode,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("failed to start receiver thread: {0}")]
    Thread(std::io::Error),
}

pub type Result<T, E = ReceiverError> = std::result::Result<T, E>;
