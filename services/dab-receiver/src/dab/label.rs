//! Ensemble and service labels (FIG 1 and FIG 2)

use std::collections::BTreeMap;

use tracing::debug;

use super::charset::{to_utf8, Charset};

/// A label as received from FIG 1 (16 bytes, short-label flag) and
/// optionally FIG 2 (segmented extended label)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DabLabel {
    /// Raw FIG 1 label bytes
    pub fig1_label: Vec<u8>,
    /// Short label mask, MSB selects the first character
    pub fig1_flag: u16,
    pub charset: Charset,

    segments: BTreeMap<u8, Vec<u8>>,
    segment_count: usize,
    extended_charset: Charset,
    toggle: Option<bool>,
}

impl DabLabel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_fig1(&self) -> bool {
        !self.fig1_label.is_empty()
    }

    /// Store a FIG 1 label. Returns true when anything changed.
    pub fn set_fig1(&mut self, label: &[u8], flag: u16, charset: Charset) -> bool {
        if self.fig1_label == label && self.fig1_flag == flag && self.charset == charset {
            return false;
        }
        self.fig1_label = label.to_vec();
        self.fig1_flag = flag;
        self.charset = charset;
        true
    }

    /// Store one FIG 2 segment.
    ///
    /// `header` is present on segment 0 only and carries the segment count
    /// and charset. A toggle change invalidates everything received so far.
    /// Returns true when this segment completed a new label.
    pub fn set_fig2_segment(
        &mut self,
        toggle: bool,
        index: u8,
        header: Option<(usize, Charset)>,
        data: &[u8],
    ) -> bool {
        if self.toggle != Some(toggle) {
            self.segments.clear();
            self.segment_count = 0;
            self.toggle = Some(toggle);
        }

        let was_complete = self.fig2_complete();

        if let Some((count, charset)) = header {
            self.segment_count = count;
            self.extended_charset = charset;
        }

        if self.segments.get(&index).map(|s| s.as_slice()) == Some(data) {
            return false;
        }
        self.segments.insert(index, data.to_vec());

        !was_complete && self.fig2_complete()
    }

    fn fig2_complete(&self) -> bool {
        self.segment_count > 0 && (0..self.segment_count).all(|i| self.segments.contains_key(&(i as u8)))
    }

    /// Reassembled FIG 2 label, if every expected segment is present
    pub fn fig2_label(&self) -> Option<String> {
        if !self.fig2_complete() {
            return None;
        }

        let joined: Vec<u8> = (0..self.segment_count)
            .flat_map(|i| self.segments[&(i as u8)].iter().copied())
            .collect();

        match self.extended_charset {
            Charset::EbuLatin => {
                debug!("FIG 2 label encoded in EBU Latin is not allowed, using FIG 1");
                None
            }
            Charset::Utf8 | Charset::Ucs2 => to_utf8(&joined, self.extended_charset),
            Charset::Undefined(_) => None,
        }
    }

    pub fn fig1_label_utf8(&self) -> String {
        to_utf8(&self.fig1_label, self.charset)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default()
    }

    /// Characters of the FIG 1 label selected by the short label mask
    pub fn fig1_shortlabel_utf8(&self) -> String {
        let short: Vec<u8> = self
            .fig1_label
            .iter()
            .enumerate()
            .filter(|(i, _)| *i < 16 && self.fig1_flag & (0x8000 >> i) != 0)
            .map(|(_, &b)| b)
            .collect();
        to_utf8(&short, self.charset).unwrap_or_default()
    }

    /// Best available label text: complete FIG 2 first, FIG 1 otherwise
    pub fn utf8_label(&self) -> String {
        match self.fig2_label() {
            Some(label) if !label.is_empty() => label,
            _ => self.fig1_label_utf8(),
        }
    }
}
