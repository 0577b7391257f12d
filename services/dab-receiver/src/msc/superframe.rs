//! DAB+ superframe assembly (ETSI TS 102 563)
//!
//! Five logical frames form one superframe. The fire code in the first
//! frame marks the superframe start, Reed-Solomon corrects byte errors
//! across `bitrate / 8` interleaved codewords, and the header gives the
//! access unit layout.

use std::collections::VecDeque;

use tracing::{debug, trace};

use super::audio::{AccessUnit, AudioFormat};
use crate::dab::crc::{check_crc16, check_firecode};
use crate::dab::AudioType;
use crate::fec::{ReedSolomon, RS_K, RS_N};

/// Logical frames per superframe
pub const FRAMES_PER_SUPERFRAME: usize = 5;

/// Superframe header flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperframeHeader {
    pub dac_rate_48k: bool,
    pub sbr: bool,
    pub stereo: bool,
    pub ps: bool,
    pub mpeg_surround: u8,
}

impl SuperframeHeader {
    pub fn parse(byte: u8) -> Self {
        Self {
            dac_rate_48k: byte & 0x40 != 0,
            sbr: byte & 0x20 != 0,
            stereo: byte & 0x10 != 0,
            ps: byte & 0x08 != 0,
            mpeg_surround: byte & 0x07,
        }
    }

    /// Number of access units and the fixed start of the first one
    pub fn au_layout(&self) -> (usize, usize) {
        match (self.dac_rate_48k, self.sbr) {
            (false, true) => (2, 5),
            (true, true) => (3, 6),
            (false, false) => (4, 8),
            (true, false) => (6, 11),
        }
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            codec: AudioType::DabPlus,
            sample_rate: if self.dac_rate_48k { 48_000 } else { 32_000 },
            channels: if self.stereo { 2 } else { 1 },
            sbr: self.sbr,
            ps: self.ps,
            mpeg_surround: self.mpeg_surround,
        }
    }
}

/// Result of one decoded superframe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superframe {
    pub format: AudioFormat,
    pub units: Vec<AccessUnit>,
    /// Byte errors corrected by Reed-Solomon
    pub rs_corrected: usize,
    /// Codewords Reed-Solomon could not correct
    pub rs_uncorrectable: usize,
    /// AUs with a bad CRC or impossible bounds
    pub au_errors: u32,
}

/// What pushing a logical frame produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuperframeOutput {
    /// Waiting for more frames
    Pending,
    /// No superframe starts at the oldest frame; it was dropped
    FrameError,
    Decoded(Superframe),
}

pub struct SuperframeAssembler {
    frame_len: usize,
    /// Interleaved Reed-Solomon codewords per superframe
    codewords: usize,
    frames: VecDeque<Vec<u8>>,
    rs: ReedSolomon,
}

impl SuperframeAssembler {
    /// `bitrate` in kbit/s, a multiple of 8
    pub fn new(bitrate: u32) -> Self {
        Self {
            frame_len: bitrate as usize * 3,
            codewords: bitrate as usize / 8,
            frames: VecDeque::with_capacity(FRAMES_PER_SUPERFRAME),
            rs: ReedSolomon::new(),
        }
    }

    pub fn push_frame(&mut self, frame: &[u8]) -> SuperframeOutput {
        if frame.len() != self.frame_len || self.codewords == 0 {
            debug!("Unexpected DAB+ frame length {} (expected {})", frame.len(), self.frame_len);
            return SuperframeOutput::FrameError;
        }

        self.frames.push_back(frame.to_vec());
        if self.frames.len() < FRAMES_PER_SUPERFRAME {
            return SuperframeOutput::Pending;
        }

        let mut data: Vec<u8> = self.frames.iter().flatten().copied().collect();
        let (rs_corrected, rs_uncorrectable) = self.correct(&mut data);

        if !check_firecode(&data) {
            trace!("Fire code mismatch, dropping oldest frame");
            self.frames.pop_front();
            return SuperframeOutput::FrameError;
        }
        self.frames.clear();

        SuperframeOutput::Decoded(self.extract(&data, rs_corrected, rs_uncorrectable))
    }

    /// Run Reed-Solomon once over every codeword, in place
    fn correct(&self, data: &mut [u8]) -> (usize, usize) {
        let s = self.codewords;
        let mut corrected = 0;
        let mut uncorrectable = 0;
        let mut codeword = [0u8; RS_N];

        for i in 0..s {
            for (j, byte) in codeword.iter_mut().enumerate() {
                *byte = data[i + j * s];
            }
            match self.rs.decode(&mut codeword) {
                Ok(n) => {
                    corrected += n;
                    for (j, byte) in codeword.iter().enumerate().take(RS_K) {
                        data[i + j * s] = *byte;
                    }
                }
                Err(_) => uncorrectable += 1,
            }
        }
        (corrected, uncorrectable)
    }

    fn extract(&self, data: &[u8], rs_corrected: usize, rs_uncorrectable: usize) -> Superframe {
        let header = SuperframeHeader::parse(data[2]);
        let format = header.format();
        let (num_aus, first_start) = header.au_layout();
        let audio_len = RS_K * self.codewords;

        // 12-bit start addresses for AU 1.., packed after the header byte
        let mut starts = Vec::with_capacity(num_aus + 1);
        starts.push(first_start);
        for i in 1..num_aus {
            let bit = (i - 1) * 12;
            let b = 3 + bit / 8;
            let start = if bit % 8 == 0 {
                (data[b] as usize) << 4 | (data[b + 1] as usize) >> 4
            } else {
                ((data[b] & 0x0F) as usize) << 8 | data[b + 1] as usize
            };
            starts.push(start);
        }
        starts.push(audio_len);

        let mut units = Vec::with_capacity(num_aus);
        let mut au_errors = 0;
        for window in starts.windows(2) {
            let (start, end) = (window[0], window[1]);
            if end <= start + 2 || end > audio_len {
                debug!("Impossible AU bounds {}..{}", start, end);
                au_errors += 1;
                continue;
            }
            let au = &data[start..end];
            let crc_ok = check_crc16(au);
            if !crc_ok {
                au_errors += 1;
            }
            units.push(AccessUnit {
                format,
                data: au[..au.len() - 2].to_vec(),
                error: !crc_ok || rs_uncorrectable > 0,
            });
        }

        Superframe {
            format,
            units,
            rs_corrected,
            rs_uncorrectable,
            au_errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signal::build_superframe;

    /// Four AUs filling the 880 byte audio part of a 64 kbit/s superframe
    fn aus() -> Vec<Vec<u8>> {
        (0..4u8).map(|n| vec![n; 201 + n as usize * 10]).collect()
    }

    #[test]
    fn test_header_layouts() {
        assert_eq!(SuperframeHeader::parse(0x00).au_layout(), (4, 8));
        assert_eq!(SuperframeHeader::parse(0x20).au_layout(), (2, 5));
        assert_eq!(SuperframeHeader::parse(0x60).au_layout(), (3, 6));
        assert_eq!(SuperframeHeader::parse(0x40).au_layout(), (6, 11));
        let header = SuperframeHeader::parse(0x78);
        assert!(header.ps && header.stereo);
        assert_eq!(header.format().sample_rate, 48_000);
    }

    #[test]
    fn test_decodes_clean_superframe() {
        let frames = build_superframe(64, 0x10, &aus());
        let mut assembler = SuperframeAssembler::new(64);

        for frame in &frames[..4] {
            assert_eq!(assembler.push_frame(frame), SuperframeOutput::Pending);
        }
        let SuperframeOutput::Decoded(sf) = assembler.push_frame(&frames[4]) else {
            panic!("superframe not decoded");
        };
        assert_eq!(sf.units.len(), 4);
        assert_eq!(sf.rs_corrected, 0);
        assert_eq!(sf.au_errors, 0);
        for (unit, sent) in sf.units.iter().zip(aus()) {
            assert_eq!(unit.data, sent);
            assert!(!unit.error);
        }
        assert_eq!(sf.format.channels, 2);
        assert_eq!(sf.format.sample_rate, 32_000);
    }

    #[test]
    fn test_corrects_byte_errors() {
        let mut frames = build_superframe(64, 0x10, &aus());
        frames[1][7] ^= 0x5A;
        frames[3][100] ^= 0xFF;
        frames[0][5] ^= 0x01;

        let mut assembler = SuperframeAssembler::new(64);
        let mut last = SuperframeOutput::Pending;
        for frame in &frames {
            last = assembler.push_frame(frame);
        }
        let SuperframeOutput::Decoded(sf) = last else {
            panic!("superframe not decoded");
        };
        assert_eq!(sf.rs_corrected, 3);
        assert_eq!(sf.rs_uncorrectable, 0);
        for (unit, sent) in sf.units.iter().zip(aus()) {
            assert_eq!(unit.data, sent);
        }
    }

    #[test]
    fn test_uncorrectable_codeword_flags_units() {
        let mut frames = build_superframe(64, 0x10, &aus());
        let frame_len = frames[0].len();
        // Seven byte errors in codeword 7, clear of the header bytes
        for j in [10usize, 20, 30, 40, 50, 60, 70] {
            let pos = 7 + j * 8;
            frames[pos / frame_len][pos % frame_len] ^= 0xFF;
        }

        let mut assembler = SuperframeAssembler::new(64);
        let mut last = SuperframeOutput::Pending;
        for frame in &frames {
            last = assembler.push_frame(frame);
        }
        let SuperframeOutput::Decoded(sf) = last else {
            panic!("superframe dropped instead of flagged");
        };
        assert_eq!(sf.rs_uncorrectable, 1);
        assert_eq!(sf.units.len(), 4);
        assert!(sf.units.iter().all(|u| u.error));
    }

    #[test]
    fn test_resyncs_after_misaligned_start() {
        let frames = build_superframe(64, 0x10, &aus());
        let mut assembler = SuperframeAssembler::new(64);

        // Two frames from the tail of a previous superframe first
        assert_eq!(assembler.push_frame(&frames[3]), SuperframeOutput::Pending);
        assert_eq!(assembler.push_frame(&frames[4]), SuperframeOutput::Pending);
        assert_eq!(assembler.push_frame(&frames[0]), SuperframeOutput::Pending);
        assert_eq!(assembler.push_frame(&frames[1]), SuperframeOutput::Pending);
        assert_eq!(assembler.push_frame(&frames[2]), SuperframeOutput::FrameError);
        assert_eq!(assembler.push_frame(&frames[3]), SuperframeOutput::FrameError);
        assert!(matches!(assembler.push_frame(&frames[4]), SuperframeOutput::Decoded(_)));
    }
}
