//! Programme associated data: F-PAD and X-PAD demultiplexing
//!
//! X-PAD is transmitted byte reversed in front of the two F-PAD bytes. It
//! is split into sub-fields by the contents indicator list; sub-fields of
//! the dynamic label and MOT application types are gathered into data
//! groups and handed to their decoders.

use tracing::{debug, trace};

use super::dynamic_label::{data_group_len, DynamicLabelDecoder};
use super::mot::MotDecoder;
use crate::dab::crc::check_crc16;
use crate::events::ProgrammeEvent;

/// Sub-field lengths by the 3-bit length index of a contents indicator
const XPAD_LENGTHS: [usize; 8] = [4, 6, 8, 12, 16, 24, 32, 48];

/// Short X-PAD is always four bytes
const SHORT_XPAD_LEN: usize = 4;

/// Maximum contents indicators in a variable size X-PAD
const MAX_CIS: usize = 4;

const APP_END_MARKER: u8 = 0;
const APP_DGLI: u8 = 1;
const APP_DL_START: u8 = 2;
const APP_DL_CONTINUATION: u8 = 3;
const APP_MOT_START: u8 = 12;
const APP_MOT_CONTINUATION: u8 = 13;

/// AAC syntax element id of a data stream element
const AAC_ID_DSE: u8 = 4;

/// Application type carried by a sub-field without a contents indicator
fn continuation_of(app: u8) -> u8 {
    match app {
        APP_DL_START => APP_DL_CONTINUATION,
        APP_MOT_START => APP_MOT_CONTINUATION,
        other => other,
    }
}

/// PAD bytes in the data stream element opening a DAB+ access unit
pub fn dse_pad(au: &[u8]) -> Option<&[u8]> {
    if au.len() < 2 || au[0] >> 5 != AAC_ID_DSE {
        return None;
    }
    let (count, start) = if au[1] == 255 {
        (255 + *au.get(2)? as usize, 3)
    } else {
        (au[1] as usize, 2)
    };
    au.get(start..start + count)
}

/// A data group under construction
#[derive(Debug)]
struct DataGroupBuffer {
    data: Vec<u8>,
    expected: Option<usize>,
}

impl DataGroupBuffer {
    fn new(expected: Option<usize>) -> Self {
        Self {
            data: Vec::new(),
            expected,
        }
    }

    fn complete(&self) -> Option<&[u8]> {
        let expected = self.expected?;
        (self.data.len() >= expected).then(|| &self.data[..expected])
    }
}

#[derive(Debug, Default)]
pub struct PadDecoder {
    last_app: Option<u8>,
    last_xpad_len: usize,
    dl_group: Option<DataGroupBuffer>,
    mot_group_len: Option<usize>,
    mot_group: Option<DataGroupBuffer>,
    dynamic_label: DynamicLabelDecoder,
    mot: MotDecoder,
}

impl PadDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process the PAD of one audio frame.
    ///
    /// `xpad_area` holds the bytes preceding the F-PAD in frame order.
    /// `exact` tells whether it is exactly the X-PAD (DAB+) or a larger
    /// area ending with it (MP2).
    pub fn process(&mut self, xpad_area: &[u8], exact: bool, fpad: [u8; 2]) -> Vec<ProgrammeEvent> {
        let mut events = Vec::new();

        if fpad[0] >> 6 != 0 {
            return events;
        }
        let xpad_ind = (fpad[0] >> 4) & 0x03;
        let has_ci = fpad[1] & 0x02 != 0;
        let xpad: Vec<u8> = xpad_area.iter().rev().copied().collect();

        let subfields: Vec<(u8, &[u8])> = match xpad_ind {
            1 => self.short_subfields(&xpad, has_ci),
            2 => self.variable_subfields(&xpad, exact, has_ci),
            _ => return events,
        };

        for (app, data) in subfields {
            self.handle_subfield(app, data, &mut events);
        }
        events
    }

    fn short_subfields<'a>(&mut self, xpad: &'a [u8], has_ci: bool) -> Vec<(u8, &'a [u8])> {
        if xpad.len() < SHORT_XPAD_LEN {
            return Vec::new();
        }
        if has_ci {
            let app = xpad[0] & 0x1F;
            self.last_app = Some(app);
            vec![(app, &xpad[1..SHORT_XPAD_LEN])]
        } else if let Some(app) = self.last_app {
            let app = continuation_of(app);
            self.last_app = Some(app);
            vec![(app, &xpad[..SHORT_XPAD_LEN])]
        } else {
            Vec::new()
        }
    }

    fn variable_subfields<'a>(&mut self, xpad: &'a [u8], exact: bool, has_ci: bool) -> Vec<(u8, &'a [u8])> {
        if !has_ci {
            let Some(app) = self.last_app else {
                return Vec::new();
            };
            let app = continuation_of(app);
            let len = if exact { xpad.len() } else { self.last_xpad_len.min(xpad.len()) };
            self.last_app = Some(app);
            return vec![(app, &xpad[..len])];
        }

        let mut cis = Vec::with_capacity(MAX_CIS);
        let mut pos = 0;
        while pos < xpad.len() && cis.len() < MAX_CIS {
            let ci = xpad[pos];
            pos += 1;
            let app = ci & 0x1F;
            if app == APP_END_MARKER {
                break;
            }
            cis.push((app, XPAD_LENGTHS[(ci >> 5) as usize]));
        }

        let mut subfields = Vec::with_capacity(cis.len());
        let mut total = 0;
        for (app, len) in cis {
            if pos + len > xpad.len() {
                debug!("X-PAD sub-field exceeds the PAD area");
                break;
            }
            subfields.push((app, &xpad[pos..pos + len]));
            pos += len;
            total += len;
            self.last_app = Some(app);
        }
        self.last_xpad_len = total;
        subfields
    }

    fn handle_subfield(&mut self, app: u8, data: &[u8], events: &mut Vec<ProgrammeEvent>) {
        match app {
            APP_DGLI => {
                if data.len() >= 4 && check_crc16(&data[..4]) {
                    self.mot_group_len = Some(((data[0] & 0x3F) as usize) << 8 | data[1] as usize);
                }
            }
            APP_DL_START => {
                self.dl_group = Some(DataGroupBuffer::new(None));
                self.append_dl(data, events);
            }
            APP_DL_CONTINUATION => self.append_dl(data, events),
            APP_MOT_START => match self.mot_group_len.take() {
                Some(len) => {
                    self.mot_group = Some(DataGroupBuffer::new(Some(len)));
                    self.append_mot(data, events);
                }
                None => trace!("MOT data group start without length indicator"),
            },
            APP_MOT_CONTINUATION => self.append_mot(data, events),
            other => trace!("Ignoring X-PAD application type {}", other),
        }
    }

    fn append_dl(&mut self, data: &[u8], events: &mut Vec<ProgrammeEvent>) {
        let Some(group) = self.dl_group.as_mut() else {
            return;
        };
        group.data.extend_from_slice(data);
        if group.expected.is_none() && group.data.len() >= 2 {
            group.expected = Some(data_group_len([group.data[0], group.data[1]]));
        }
        if let Some(dg) = group.complete() {
            if let Some(label) = self.dynamic_label.process_data_group(dg) {
                events.push(ProgrammeEvent::DynamicLabel(label));
            }
            self.dl_group = None;
        }
    }

    fn append_mot(&mut self, data: &[u8], events: &mut Vec<ProgrammeEvent>) {
        let Some(group) = self.mot_group.as_mut() else {
            return;
        };
        group.data.extend_from_slice(data);
        if let Some(dg) = group.complete() {
            if let Some(file) = self.mot.process_data_group(dg) {
                events.push(ProgrammeEvent::Mot(file));
            }
            self.mot_group = None;
        }
    }
}
