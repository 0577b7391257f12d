//! Dynamic label reassembly (ETSI EN 300 401 clause 7.4.5.2)

use std::collections::BTreeMap;

use tracing::{debug, trace};

use crate::dab::charset::to_utf8;
use crate::dab::crc::check_crc16;
use crate::dab::Charset;

const FLAG_TOGGLE: u8 = 0x80;
const FLAG_FIRST: u8 = 0x40;
const FLAG_LAST: u8 = 0x20;
const FLAG_COMMAND: u8 = 0x10;

const COMMAND_CLEAR: u8 = 0x01;

/// Size of a dynamic label data group from its two prefix bytes
pub fn data_group_len(prefix: [u8; 2]) -> usize {
    let field1 = (prefix[0] & 0x0F) as usize;
    if prefix[0] & FLAG_COMMAND == 0 {
        2 + field1 + 1 + 2
    } else if field1 == COMMAND_CLEAR as usize {
        4
    } else {
        // DL Plus and other commands carry their length in byte 1
        2 + (prefix[1] & 0x0F) as usize + 1 + 2
    }
}

#[derive(Debug, Default)]
pub struct DynamicLabelDecoder {
    toggle: Option<bool>,
    charset: Charset,
    segments: BTreeMap<u8, Vec<u8>>,
    last_segment: Option<u8>,
    current: Option<String>,
}

impl DynamicLabelDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one complete data group; returns the label when a new one
    /// has been completed or the display was cleared
    pub fn process_data_group(&mut self, dg: &[u8]) -> Option<String> {
        if dg.len() < 4 || !check_crc16(dg) {
            debug!("Dynamic label data group with bad CRC");
            return None;
        }

        let prefix = dg[0];
        if prefix & FLAG_COMMAND != 0 {
            if prefix & 0x0F == COMMAND_CLEAR {
                self.segments.clear();
                self.last_segment = None;
                self.current = Some(String::new());
                return Some(String::new());
            }
            trace!("Ignoring dynamic label command {:X}", prefix & 0x0F);
            return None;
        }

        let toggle = prefix & FLAG_TOGGLE != 0;
        if self.toggle != Some(toggle) {
            self.toggle = Some(toggle);
            self.segments.clear();
            self.last_segment = None;
        }

        let segment = if prefix & FLAG_FIRST != 0 {
            self.charset = Charset::from_id(dg[1] >> 4);
            0
        } else {
            (dg[1] >> 4) & 0x07
        };
        if prefix & FLAG_LAST != 0 {
            self.last_segment = Some(segment);
        }

        let len = (prefix & 0x0F) as usize + 1;
        let end = (2 + len).min(dg.len() - 2);
        self.segments.insert(segment, dg[2..end].to_vec());

        let last = self.last_segment?;
        if !(0..=last).all(|s| self.segments.contains_key(&s)) {
            return None;
        }

        let raw: Vec<u8> = (0..=last).flat_map(|s| self.segments[&s].iter().copied()).collect();
        let label = to_utf8(&raw, self.charset)?.trim_end().to_string();
        if self.current.as_deref() == Some(label.as_str()) {
            return None;
        }
        self.current = Some(label.clone());
        Some(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signal::pad::dl_data_group;

    #[test]
    fn test_segmented_label() {
        let mut dl = DynamicLabelDecoder::new();
        let first = dl_data_group(false, 0, false, 0x0F, b"Now playing: ");
        let second = dl_data_group(false, 1, true, 0x0F, b"Song Title");

        assert_eq!(dl.process_data_group(&first), None);
        assert_eq!(dl.process_data_group(&second).as_deref(), Some("Now playing: Song Title"));
        // Carousel repetition does not emit again
        assert_eq!(dl.process_data_group(&first), None);
        assert_eq!(dl.process_data_group(&second), None);
    }

    #[test]
    fn test_last_segment_first() {
        let mut dl = DynamicLabelDecoder::new();
        assert_eq!(dl.process_data_group(&dl_data_group(true, 1, true, 0x0F, b"B")), None);
        assert_eq!(
            dl.process_data_group(&dl_data_group(true, 0, false, 0x0F, b"A")).as_deref(),
            Some("AB")
        );
    }

    #[test]
    fn test_toggle_restarts() {
        let mut dl = DynamicLabelDecoder::new();
        dl.process_data_group(&dl_data_group(false, 0, false, 0x0F, b"Old "));
        // New label with toggled flag: the old first segment must not be reused
        assert_eq!(dl.process_data_group(&dl_data_group(true, 1, true, 0x0F, b"tail")), None);
        assert_eq!(
            dl.process_data_group(&dl_data_group(true, 0, false, 0x0F, b"New ")).as_deref(),
            Some("New tail")
        );
    }

    #[test]
    fn test_clear_command_and_bad_crc() {
        let mut dl = DynamicLabelDecoder::new();
        let mut clear = vec![FLAG_COMMAND | COMMAND_CLEAR, 0x00];
        crate::dab::crc::append_crc16(&mut clear);
        assert_eq!(dl.process_data_group(&clear).as_deref(), Some(""));

        let mut bad = dl_data_group(false, 0, true, 0x0F, b"Hello");
        let n = bad.len();
        bad[n - 1] ^= 0xFF;
        assert_eq!(dl.process_data_group(&bad), None);
        assert_eq!(data_group_len([0x04, 0xF0]), 2 + 5 + 2);
    }
}
