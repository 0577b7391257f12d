//! MPEG-1/2 Layer II framing for classic DAB sub-channels
//!
//! Logical frames are searched for Layer II headers; each complete audio
//! frame is forwarded unchanged, together with the PAD carried in its tail.

use tracing::trace;

use super::audio::{AccessUnit, AudioFormat};
use crate::dab::AudioType;

/// Layer II bitrates in kbit/s by index, MPEG-1 (48 kHz)
const BITRATES_MPEG1: [u32; 15] = [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384];

/// Layer II bitrates in kbit/s by index, MPEG-2 low sampling frequency (24 kHz)
const BITRATES_MPEG2: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];

/// Bytes of F-PAD at the very end of each audio frame
pub const FPAD_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mp2Header {
    pub sample_rate: u32,
    pub bitrate: u32,
    pub channels: u8,
    pub padding: bool,
}

impl Mp2Header {
    /// Parse a Layer II header at the start of `data`
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 4 || data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return None;
        }
        let mpeg1 = data[1] & 0x08 != 0;
        let layer = (data[1] >> 1) & 0x03;
        if layer != 0b10 {
            return None;
        }

        let bitrate_index = (data[2] >> 4) as usize;
        let sample_rate = match ((data[2] >> 2) & 0x03, mpeg1) {
            (1, true) => 48_000,
            (1, false) => 24_000,
            _ => return None,
        };
        let bitrate = if mpeg1 {
            *BITRATES_MPEG1.get(bitrate_index)?
        } else {
            *BITRATES_MPEG2.get(bitrate_index)?
        };
        if bitrate == 0 {
            return None;
        }

        Some(Self {
            sample_rate,
            bitrate,
            channels: if data[3] >> 6 == 0b11 { 1 } else { 2 },
            padding: data[2] & 0x02 != 0,
        })
    }

    /// Frame length in bytes (1152 samples)
    pub fn frame_len(&self) -> usize {
        (144_000 * self.bitrate / self.sample_rate) as usize + self.padding as usize
    }

    /// Bytes of scale factor CRC in front of the F-PAD
    pub fn scf_crc_len(&self) -> usize {
        if self.sample_rate == 48_000 {
            4
        } else {
            2
        }
    }

    pub fn format(&self) -> AudioFormat {
        AudioFormat {
            codec: AudioType::Mp2,
            sample_rate: self.sample_rate,
            channels: self.channels,
            sbr: false,
            ps: false,
            mpeg_surround: 0,
        }
    }
}

/// One Layer II frame and the PAD carried in it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mp2Frame {
    pub unit: AccessUnit,
    /// Candidate X-PAD area (frame order), ends just before the ScF-CRC
    pub xpad: Vec<u8>,
    pub fpad: [u8; FPAD_LEN],
}

#[derive(Debug, Default)]
pub struct Mp2Framer {
    buffer: Vec<u8>,
    frame_errors: u32,
}

impl Mp2Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes skipped while searching for a header since the last call
    pub fn take_frame_errors(&mut self) -> u32 {
        std::mem::take(&mut self.frame_errors)
    }

    /// Append a logical frame and return every complete audio frame
    pub fn push(&mut self, logical_frame: &[u8]) -> Vec<Mp2Frame> {
        self.buffer.extend_from_slice(logical_frame);
        let mut frames = Vec::new();

        loop {
            let Some(sync) = (0..self.buffer.len()).find(|&i| Mp2Header::parse(&self.buffer[i..]).is_some())
            else {
                // Keep a possible partial header
                let keep = self.buffer.len().min(3);
                if self.buffer.len() > keep {
                    self.frame_errors += 1;
                }
                self.buffer.drain(..self.buffer.len() - keep);
                break;
            };
            if sync > 0 {
                trace!("Skipping {} bytes before Layer II header", sync);
                self.frame_errors += 1;
                self.buffer.drain(..sync);
            }

            let Some(header) = Mp2Header::parse(&self.buffer) else {
                break;
            };
            let len = header.frame_len();
            if self.buffer.len() < len {
                break;
            }

            let frame: Vec<u8> = self.buffer.drain(..len).collect();
            let pad_end = len - FPAD_LEN;
            let xpad_end = pad_end.saturating_sub(header.scf_crc_len()).max(4);
            frames.push(Mp2Frame {
                xpad: frame[4..xpad_end].to_vec(),
                fpad: [frame[pad_end], frame[pad_end + 1]],
                unit: AccessUnit {
                    format: header.format(),
                    data: frame,
                    error: false,
                },
            });
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bitrate_index: u8, fill: u8) -> Vec<u8> {
        // MPEG-1 Layer II, 48 kHz, joint stereo
        let header = Mp2Header::parse(&[0xFF, 0xFD, bitrate_index << 4 | 0x04, 0x40]).unwrap();
        let mut f = vec![fill; header.frame_len()];
        f[..4].copy_from_slice(&[0xFF, 0xFD, bitrate_index << 4 | 0x04, 0x40]);
        let n = f.len();
        f[n - 2] = 0x00;
        f[n - 1] = 0x20;
        f
    }

    #[test]
    fn test_header() {
        let header = Mp2Header::parse(&[0xFF, 0xFD, 0xA4, 0xC0]).unwrap();
        assert_eq!(header.bitrate, 192);
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.frame_len(), 576);
        assert!(Mp2Header::parse(&[0xFF, 0xFB, 0xA4, 0xC0]).is_none());
    }

    #[test]
    fn test_frames_from_logical_frames() {
        let mut framer = Mp2Framer::new();
        // 128 kbit/s: one 384-byte frame per 24 ms logical frame
        let first = framer.push(&frame(8, 0x11));
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].unit.data.len(), 384);
        assert_eq!(first[0].fpad, [0x00, 0x20]);
        assert_eq!(first[0].xpad.len(), 384 - 4 - 4 - 2);
        assert_eq!(first[0].unit.format.sample_rate, 48_000);

        let mut garbage = vec![0x55; 10];
        garbage.extend(frame(8, 0x22));
        let second = framer.push(&garbage);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].unit.data[4], 0x22);
        assert_eq!(framer.take_frame_errors(), 1);
    }
}
