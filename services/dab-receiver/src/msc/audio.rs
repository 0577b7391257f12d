//! Audio access units and the codec seam

use serde::Serialize;

use crate::dab::AudioType;

/// Coding parameters signalled in the audio stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioFormat {
    pub codec: AudioType,
    /// Output sample rate in Hz
    pub sample_rate: u32,
    pub channels: u8,
    /// Spectral band replication (HE-AAC)
    pub sbr: bool,
    /// Parametric stereo (HE-AAC v2)
    pub ps: bool,
    pub mpeg_surround: u8,
}

impl AudioFormat {
    /// Human readable coding mode, e.g. "HE-AACv2 stereo"
    pub fn mode(&self) -> String {
        let coding = match self.codec {
            AudioType::DabPlus if self.ps => "HE-AACv2",
            AudioType::DabPlus if self.sbr => "HE-AAC",
            AudioType::DabPlus => "AAC-LC",
            AudioType::Mp2 => "MP2",
            AudioType::Unknown => "unknown",
        };
        let layout = if self.channels >= 2 || self.ps { "stereo" } else { "mono" };
        format!("{} {}", coding, layout)
    }
}

/// One error corrected access unit (an AAC AU or an MP2 frame)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub format: AudioFormat,
    pub data: Vec<u8>,
    /// CRC failure or uncorrectable Reed-Solomon codeword; the codec may
    /// still conceal it
    pub error: bool,
}

/// PCM returned by a codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAudio {
    /// Interleaved samples
    pub pcm: Vec<i16>,
    pub sample_rate: u32,
}

/// External audio decoder attached to a subscription
pub trait AudioCodec: Send {
    /// Decode one access unit; None when it produced no output
    fn decode(&mut self, unit: &AccessUnit) -> Option<DecodedAudio>;
}
