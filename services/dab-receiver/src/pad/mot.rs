//! MOT object reassembly in header mode (ETSI EN 301 234)
//!
//! MSC data groups carry either header segments (type 3) or body segments
//! (type 4) of one object, identified by its transport id. An object is
//! emitted once its header and every body segment have arrived.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::dab::charset::to_utf8;
use crate::dab::crc::check_crc16;
use crate::dab::Charset;

const DG_TYPE_HEADER: u8 = 3;
const DG_TYPE_BODY: u8 = 4;

const PARAM_CONTENT_NAME: u8 = 0x0C;

/// MOT content type for images
const CONTENT_TYPE_IMAGE: u8 = 2;

/// A completely received MOT object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MotFile {
    #[serde(skip)]
    pub data: Vec<u8>,
    pub mime: String,
    pub name: String,
    pub content_type: u8,
    pub content_subtype: u16,
}

/// MIME type of a MOT content type/subtype pair
pub fn mime_type(content_type: u8, content_subtype: u16) -> &'static str {
    match (content_type, content_subtype) {
        (CONTENT_TYPE_IMAGE, 0) => "image/gif",
        (CONTENT_TYPE_IMAGE, 1) => "image/jpeg",
        (CONTENT_TYPE_IMAGE, 2) => "image/bmp",
        (CONTENT_TYPE_IMAGE, 3) => "image/png",
        _ => "unknown",
    }
}

/// Parsed MOT header core and extension
#[derive(Debug, Clone, PartialEq, Eq)]
struct MotHeader {
    body_size: usize,
    content_type: u8,
    content_subtype: u16,
    name: String,
}

impl MotHeader {
    fn parse(h: &[u8]) -> Option<Self> {
        if h.len() < 7 {
            return None;
        }
        let body_size = (h[0] as usize) << 20 | (h[1] as usize) << 12 | (h[2] as usize) << 4 | (h[3] as usize) >> 4;
        let header_size = ((h[3] & 0x0F) as usize) << 9 | (h[4] as usize) << 1 | (h[5] as usize) >> 7;
        let content_type = (h[5] >> 1) & 0x3F;
        let content_subtype = ((h[5] & 0x01) as u16) << 8 | h[6] as u16;

        let end = header_size.min(h.len());
        let mut name = String::new();
        let mut p = 7;
        while p < end {
            let pli = h[p] >> 6;
            let param_id = h[p] & 0x3F;
            p += 1;

            let len = match pli {
                0 => 0,
                1 => 1,
                2 => 4,
                _ => {
                    if p >= end {
                        break;
                    }
                    if h[p] & 0x80 != 0 {
                        if p + 1 >= end {
                            break;
                        }
                        let len = ((h[p] & 0x7F) as usize) << 8 | h[p + 1] as usize;
                        p += 2;
                        len
                    } else {
                        let len = (h[p] & 0x7F) as usize;
                        p += 1;
                        len
                    }
                }
            };
            if p + len > end {
                break;
            }
            let value = &h[p..p + len];
            p += len;

            if param_id == PARAM_CONTENT_NAME && !value.is_empty() {
                if let Some(n) = to_utf8(&value[1..], Charset::from_id(value[0] >> 4)) {
                    name = n;
                }
            }
        }

        Some(Self {
            body_size,
            content_type,
            content_subtype,
            name,
        })
    }
}

#[derive(Debug, Default)]
struct Segments {
    parts: BTreeMap<u16, Vec<u8>>,
    last: Option<u16>,
}

impl Segments {
    fn insert(&mut self, number: u16, last: bool, data: &[u8]) {
        self.parts.entry(number).or_insert_with(|| data.to_vec());
        if last {
            self.last = Some(number);
        }
    }

    fn assemble(&self) -> Option<Vec<u8>> {
        let last = self.last?;
        (0..=last)
            .map(|n| self.parts.get(&n))
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.into_iter().flatten().copied().collect())
    }
}

#[derive(Debug)]
struct MotObject {
    transport_id: u16,
    header: Segments,
    body: Segments,
}

/// One data group segment after the MSC data group headers
#[derive(Debug, PartialEq, Eq)]
struct DataGroupSegment<'a> {
    dg_type: u8,
    transport_id: u16,
    number: u16,
    last: bool,
    data: &'a [u8],
}

fn parse_data_group(dg: &[u8]) -> Option<DataGroupSegment<'_>> {
    if dg.len() < 2 {
        return None;
    }
    let extension = dg[0] & 0x80 != 0;
    let has_crc = dg[0] & 0x40 != 0;
    let segmented = dg[0] & 0x20 != 0;
    let user_access = dg[0] & 0x10 != 0;
    let dg_type = dg[0] & 0x0F;

    let end = if has_crc {
        if !check_crc16(dg) {
            debug!("MOT data group with bad CRC");
            return None;
        }
        dg.len() - 2
    } else {
        dg.len()
    };

    let mut p = 2 + if extension { 2 } else { 0 };
    let (last, number) = if segmented {
        if p + 2 > end {
            return None;
        }
        let seg = u16::from_be_bytes([dg[p], dg[p + 1]]);
        p += 2;
        (seg & 0x8000 != 0, seg & 0x7FFF)
    } else {
        (true, 0)
    };

    if !user_access || p >= end {
        return None;
    }
    let has_tid = dg[p] & 0x10 != 0;
    let len_ind = (dg[p] & 0x0F) as usize;
    p += 1;
    if !has_tid || len_ind < 2 || p + len_ind > end {
        return None;
    }
    let transport_id = u16::from_be_bytes([dg[p], dg[p + 1]]);
    p += len_ind;

    // Segmentation header: repetition count and segment size
    if p + 2 > end {
        return None;
    }
    let size = ((dg[p] & 0x1F) as usize) << 8 | dg[p + 1] as usize;
    p += 2;
    let data = &dg[p..(p + size).min(end)];

    Some(DataGroupSegment {
        dg_type,
        transport_id,
        number,
        last,
        data,
    })
}

#[derive(Debug, Default)]
pub struct MotDecoder {
    current: Option<MotObject>,
    /// Transport id of the last emitted object, to ignore carousel repeats
    completed: Option<u16>,
}

impl MotDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one complete MSC data group
    pub fn process_data_group(&mut self, dg: &[u8]) -> Option<MotFile> {
        let segment = parse_data_group(dg)?;
        if segment.dg_type != DG_TYPE_HEADER && segment.dg_type != DG_TYPE_BODY {
            trace!("Ignoring MOT data group type {}", segment.dg_type);
            return None;
        }
        if self.completed == Some(segment.transport_id) {
            return None;
        }

        let tid = segment.transport_id;
        match &self.current {
            Some(obj) if obj.transport_id == tid => {}
            Some(obj) => {
                debug!("Discarding incomplete MOT object {}", obj.transport_id);
                self.start(tid);
            }
            None => self.start(tid),
        }
        let obj = self.current.as_mut()?;

        if segment.dg_type == DG_TYPE_HEADER {
            obj.header.insert(segment.number, segment.last, segment.data);
        } else {
            obj.body.insert(segment.number, segment.last, segment.data);
        }

        let header = MotHeader::parse(&obj.header.assemble()?)?;
        let body = obj.body.assemble()?;
        if body.len() != header.body_size {
            debug!(
                "MOT object {} body size {} does not match header {}",
                tid,
                body.len(),
                header.body_size
            );
            self.current = None;
            return None;
        }

        self.current = None;
        self.completed = Some(tid);
        let file = MotFile {
            data: body,
            mime: mime_type(header.content_type, header.content_subtype).to_string(),
            name: header.name,
            content_type: header.content_type,
            content_subtype: header.content_subtype,
        };
        info!("MOT object \"{}\" complete: {} bytes, {}", file.name, file.data.len(), file.mime);
        Some(file)
    }

    fn start(&mut self, transport_id: u16) {
        self.completed = None;
        self.current = Some(MotObject {
            transport_id,
            header: Segments::default(),
            body: Segments::default(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_signal::pad::{mot_data_group, mot_header};

    fn object(tid: u16, body: &[u8], chunk: usize) -> Vec<Vec<u8>> {
        let header = mot_header(body.len(), 2, 1, "cover.jpg");
        let mut groups = vec![mot_data_group(3, tid, 0, true, &header)];
        let chunks: Vec<&[u8]> = body.chunks(chunk).collect();
        for (n, c) in chunks.iter().enumerate() {
            groups.push(mot_data_group(4, tid, n as u16, n + 1 == chunks.len(), c));
        }
        groups
    }

    #[test]
    fn test_header_parse() {
        let header = MotHeader::parse(&mot_header(5000, 2, 3, "logo.png")).unwrap();
        assert_eq!(header.body_size, 5000);
        assert_eq!(header.content_type, 2);
        assert_eq!(header.content_subtype, 3);
        assert_eq!(header.name, "logo.png");
        assert_eq!(mime_type(2, 3), "image/png");
        assert_eq!(mime_type(5, 0), "unknown");
    }

    #[test]
    fn test_reassembles_object() {
        let body: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let groups = object(0x1234, &body, 300);
        let mut mot = MotDecoder::new();

        for dg in &groups[..groups.len() - 1] {
            assert_eq!(mot.process_data_group(dg), None);
        }
        let file = mot.process_data_group(&groups[groups.len() - 1]).unwrap();
        assert_eq!(file.data, body);
        assert_eq!(file.mime, "image/jpeg");
        assert_eq!(file.name, "cover.jpg");

        // The carousel repeats the object; it is not emitted twice
        for dg in &groups {
            assert_eq!(mot.process_data_group(dg), None);
        }
    }

    #[test]
    fn test_new_object_discards_incomplete() {
        let first = object(1, &[0xAA; 600], 200);
        let second = object(2, &[0xBB; 100], 100);
        let mut mot = MotDecoder::new();

        assert_eq!(mot.process_data_group(&first[0]), None);
        assert_eq!(mot.process_data_group(&first[1]), None);

        let mut emitted = Vec::new();
        for dg in &second {
            emitted.extend(mot.process_data_group(dg));
        }
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].data, vec![0xBB; 100]);

        // The rest of the first object alone cannot complete it
        assert_eq!(mot.process_data_group(&first[2]), None);
        assert_eq!(mot.process_data_group(&first[3]), None);
    }

    #[test]
    fn test_rejects_corrupt_data_group() {
        let mut dg = mot_data_group(3, 9, 0, true, &mot_header(10, 2, 1, "x"));
        dg[8] ^= 0x40;
        assert_eq!(parse_data_group(&dg), None);
    }
}
