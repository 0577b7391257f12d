//! Fast Information Group parsing
//!
//! Each CRC checked FIB is walked FIG by FIG. The supported FIGs update the
//! shared [`Ensemble`]; every update that changes something visible to the
//! outside produces a [`RadioEvent`].

use std::sync::{Arc, RwLock};

use chrono::{Days, NaiveDate, NaiveTime};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::dab::constants::{FIB_SIZE, PROT_LEVEL};
use crate::dab::{
    Charset, EepProfile, Ensemble, ProtectionSettings, Service, ServiceComponent, Subchannel,
};
use crate::events::RadioEvent;

/// FIG header marking the end of useful data in a FIB
const END_MARKER: u8 = 0xFF;

#[derive(Debug, Error)]
enum FigError {
    #[error("FIG {fig} truncated: need {needed} bytes, have {available}")]
    Truncated {
        fig: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("FIG {fig} carries an invalid value: {what}")]
    Invalid { fig: &'static str, what: &'static str },
}

fn require(fig: &'static str, data: &[u8], needed: usize) -> Result<(), FigError> {
    if data.len() < needed {
        Err(FigError::Truncated {
            fig,
            needed,
            available: data.len(),
        })
    } else {
        Ok(())
    }
}

/// Read `len` bits (at most 32) starting at bit `offset`, MSB first
fn get_bits(data: &[u8], offset: usize, len: usize) -> u32 {
    (offset..offset + len).fold(0u32, |acc, bit| {
        (acc << 1) | ((data[bit / 8] >> (7 - bit % 8)) & 1) as u32
    })
}

/// Identifier field length of FIG 1 / FIG 2 extensions we decode
fn label_id_len(extension: u8) -> Option<usize> {
    match extension {
        0 | 1 => Some(2),
        5 => Some(4),
        _ => None,
    }
}

pub struct FibProcessor {
    ensemble: Arc<RwLock<Ensemble>>,
}

impl FibProcessor {
    pub fn new(ensemble: Arc<RwLock<Ensemble>>) -> Self {
        Self { ensemble }
    }

    /// Parse the data part of one FIB (CRC already checked)
    pub fn process_fib(&self, fib: &[u8]) -> Vec<RadioEvent> {
        let data = &fib[..fib.len().min(FIB_SIZE - 2)];
        let mut events = Vec::new();

        let Ok(mut ensemble) = self.ensemble.write() else {
            warn!("Ensemble lock poisoned, dropping FIB");
            return events;
        };

        let mut pos = 0;
        while pos < data.len() {
            let header = data[pos];
            if header == END_MARKER {
                break;
            }
            let fig_type = header >> 5;
            let length = (header & 0x1F) as usize;
            let end = pos + 1 + length;
            if length == 0 || end > data.len() {
                debug!(
                    "FIG type {} length {} does not fit the FIB: {}",
                    fig_type,
                    length,
                    hex::encode(data)
                );
                break;
            }

            let body = &data[pos + 1..end];
            let result = match fig_type {
                0 => process_fig0(&mut ensemble, &mut events, body),
                1 => process_fig1(&mut ensemble, &mut events, body),
                2 => process_fig2(&mut ensemble, &mut events, body),
                _ => {
                    trace!("Skipping FIG type {}", fig_type);
                    Ok(())
                }
            };
            if let Err(e) = result {
                debug!("Skipping malformed FIG: {}", e);
            }

            pos = end;
        }

        events
    }
}

fn process_fig0(
    ensemble: &mut Ensemble,
    events: &mut Vec<RadioEvent>,
    fig: &[u8],
) -> Result<(), FigError> {
    let other_ensemble = fig[0] & 0x40 != 0;
    let pd = fig[0] & 0x20 != 0;
    let extension = fig[0] & 0x1F;
    let data = &fig[1..];

    match extension {
        0 => fig0_ensemble(ensemble, events, data),
        1 if !other_ensemble => fig0_subchannels(ensemble, data),
        2 if !other_ensemble => fig0_services(ensemble, events, data, pd),
        9 => fig0_country_lto(ensemble, data),
        10 => fig0_datetime(ensemble, events, data),
        _ => Ok(()),
    }
}

/// FIG 0/0 ensemble information
fn fig0_ensemble(
    ensemble: &mut Ensemble,
    events: &mut Vec<RadioEvent>,
    data: &[u8],
) -> Result<(), FigError> {
    require("0/0", data, 4)?;
    let eid = u16::from_be_bytes([data[0], data[1]]);
    let change_flags = data[2] >> 6;
    let cif_count = (((data[2] & 0x1F) as u16) << 8 | data[3] as u16) % 5000;
    trace!("FIG 0/0 EId {:04X} change {} CIF count {}", eid, change_flags, cif_count);

    if ensemble.eid != Some(eid) {
        info!("New ensemble {:04X}", eid);
        ensemble.eid = Some(eid);
        events.push(RadioEvent::NewEnsemble(eid));
    }
    Ok(())
}

/// FIG 0/1 sub-channel organisation
fn fig0_subchannels(ensemble: &mut Ensemble, data: &[u8]) -> Result<(), FigError> {
    let mut p = 0;
    while p < data.len() {
        require("0/1", &data[p..], 3)?;
        let id = data[p] >> 2;
        let start_addr = ((data[p] & 0x03) as u16) << 8 | data[p + 1] as u16;
        let long_form = data[p + 2] & 0x80 != 0;

        let (protection, length) = if long_form {
            require("0/1", &data[p..], 4)?;
            let option = (data[p + 2] >> 4) & 0x07;
            let level = ((data[p + 2] >> 2) & 0x03) + 1;
            let size = ((data[p + 2] & 0x03) as u16) << 8 | data[p + 3] as u16;
            p += 4;
            let profile = match option {
                0 => EepProfile::A,
                1 => EepProfile::B,
                _ => {
                    debug!("Sub-channel {} uses unknown EEP option {}", id, option);
                    continue;
                }
            };
            (ProtectionSettings::Eep { profile, level }, size)
        } else {
            let table_switch = data[p + 2] & 0x40 != 0;
            let table_index = data[p + 2] & 0x3F;
            p += 3;
            if table_switch {
                debug!("Sub-channel {} uses an unsupported UEP table", id);
                continue;
            }
            (
                ProtectionSettings::Uep { table_index },
                PROT_LEVEL[table_index as usize][0],
            )
        };

        let sub = Subchannel {
            id,
            start_addr,
            length,
            protection,
        };
        if sub.bitrate() == 0 {
            debug!("Sub-channel {} of {} CUs carries no data, skipped", id, length);
            continue;
        }
        if ensemble.upsert_subchannel(sub.clone()) {
            debug!(
                "Sub-channel {}: start {} CU {} bitrate {} {}",
                id,
                start_addr,
                sub.num_cu(),
                sub.bitrate(),
                sub.protection()
            );
        }
    }
    Ok(())
}

/// FIG 0/2 basic service and service component definition
fn fig0_services(
    ensemble: &mut Ensemble,
    events: &mut Vec<RadioEvent>,
    data: &[u8],
    pd: bool,
) -> Result<(), FigError> {
    let sid_len = if pd { 4 } else { 2 };
    let mut p = 0;

    while p < data.len() {
        require("0/2", &data[p..], sid_len + 1)?;
        let sid = data[p..p + sid_len]
            .iter()
            .fold(0u32, |acc, &b| (acc << 8) | b as u32);
        p += sid_len;
        let count = (data[p] & 0x0F) as usize;
        p += 1;
        require("0/2", &data[p..], count * 2)?;

        for _ in 0..count {
            let (b0, b1) = (data[p], data[p + 1]);
            p += 2;

            let tmid = b0 >> 6;
            let (subchannel_id, scid) = match tmid {
                0 | 1 => (Some(b1 >> 2), None),
                2 => (None, None),
                _ => (None, Some(((b0 & 0x3F) as u16) << 6 | (b1 >> 2) as u16)),
            };

            let component = ServiceComponent {
                sid,
                tmid,
                subchannel_id,
                scid,
                ascty: if tmid == 3 { 0 } else { b0 & 0x3F },
                primary: b1 & 0x02 != 0,
                ca_flag: b1 & 0x01 != 0,
            };
            if ensemble.upsert_component(component) {
                info!("New service {:04X}", sid);
                events.push(RadioEvent::ServiceDetected(sid));
            }
        }
    }
    Ok(())
}

/// FIG 0/9 extended country code and local time offset
fn fig0_country_lto(ensemble: &mut Ensemble, data: &[u8]) -> Result<(), FigError> {
    require("0/9", data, 3)?;
    let magnitude = (data[0] & 0x1F) as i8;
    let lto = if data[0] & 0x20 != 0 { -magnitude } else { magnitude };
    ensemble.lto_half_hours = Some(lto);
    ensemble.ecc = Some(data[1]);
    Ok(())
}

/// FIG 0/10 date and time
fn fig0_datetime(
    ensemble: &mut Ensemble,
    events: &mut Vec<RadioEvent>,
    data: &[u8],
) -> Result<(), FigError> {
    require("0/10", data, 4)?;
    let mjd = get_bits(data, 1, 17);
    let long_form = get_bits(data, 20, 1) == 1;
    let hours = get_bits(data, 21, 5);
    let minutes = get_bits(data, 26, 6);
    let (seconds, millis) = if long_form {
        require("0/10", data, 6)?;
        (get_bits(data, 32, 6), get_bits(data, 38, 10))
    } else {
        (0, 0)
    };

    let invalid = || FigError::Invalid {
        fig: "0/10",
        what: "date/time",
    };
    let date = NaiveDate::from_ymd_opt(1858, 11, 17)
        .and_then(|epoch| epoch.checked_add_days(Days::new(mjd as u64)))
        .ok_or_else(invalid)?;
    let time = NaiveTime::from_hms_milli_opt(hours, minutes, seconds, millis).ok_or_else(invalid)?;
    let datetime = date.and_time(time).and_utc();

    if ensemble.datetime != Some(datetime) {
        ensemble.datetime = Some(datetime);
        events.push(RadioEvent::DateTime(datetime));
    }
    Ok(())
}

/// FIG 1/0, 1/1 and 1/5 labels
fn process_fig1(
    ensemble: &mut Ensemble,
    events: &mut Vec<RadioEvent>,
    fig: &[u8],
) -> Result<(), FigError> {
    let charset = Charset::from_id(fig[0] >> 4);
    let other_ensemble = fig[0] & 0x08 != 0;
    let extension = fig[0] & 0x07;
    let Some(id_len) = label_id_len(extension) else {
        return Ok(());
    };
    if other_ensemble {
        return Ok(());
    }

    require("1", fig, 1 + id_len + 18)?;
    let id = fig[1..1 + id_len]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32);
    let label = &fig[1 + id_len..1 + id_len + 16];
    let flag = u16::from_be_bytes([fig[1 + id_len + 16], fig[1 + id_len + 17]]);

    if extension == 0 {
        if ensemble.label.set_fig1(label, flag, charset) {
            let text = ensemble.label.utf8_label();
            info!("Ensemble label: {}", text);
            events.push(RadioEvent::EnsembleLabel(text));
        }
    } else {
        let service = ensemble
            .services
            .entry(id)
            .or_insert_with(|| Service::new(id));
        if service.label.set_fig1(label, flag, charset) {
            let text = service.label.utf8_label();
            debug!("Service {:04X} label: {}", id, text);
            events.push(RadioEvent::ServiceLabel { sid: id, label: text });
        }
    }
    Ok(())
}

/// FIG 2/0, 2/1 and 2/5 extended labels
fn process_fig2(
    ensemble: &mut Ensemble,
    events: &mut Vec<RadioEvent>,
    fig: &[u8],
) -> Result<(), FigError> {
    let toggle = fig[0] & 0x80 != 0;
    let segment = (fig[0] >> 4) & 0x07;
    let extension = fig[0] & 0x07;
    let Some(id_len) = label_id_len(extension) else {
        return Ok(());
    };

    require("2", fig, 1 + id_len)?;
    let id = fig[1..1 + id_len]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32);
    let mut p = 1 + id_len;

    let header = if segment == 0 {
        require("2", fig, p + 3)?;
        let charset = if fig[p] & 0x80 == 0 {
            Charset::Utf8
        } else {
            Charset::Ucs2
        };
        let count = (((fig[p] >> 4) & 0x07) + 1) as usize;
        p += 3;
        Some((count, charset))
    } else {
        None
    };
    let chars = &fig[p..];

    if extension == 0 {
        if ensemble.label.set_fig2_segment(toggle, segment, header, chars) {
            let text = ensemble.label.utf8_label();
            info!("Ensemble label: {}", text);
            events.push(RadioEvent::EnsembleLabel(text));
        }
    } else {
        let service = ensemble
            .services
            .entry(id)
            .or_insert_with(|| Service::new(id));
        if service.label.set_fig2_segment(toggle, segment, header, chars) {
            let text = service.label.utf8_label();
            debug!("Service {:04X} extended label: {}", id, text);
            events.push(RadioEvent::ServiceLabel { sid: id, label: text });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dab::{AudioType, TransportMode};
    use crate::test_signal::fig;

    fn processor() -> FibProcessor {
        FibProcessor::new(Arc::new(RwLock::new(Ensemble::new())))
    }

    #[test]
    fn test_service_table_round_trip() {
        let proc = processor();
        let organisation = fig::fib(&[
            fig::fig0_ensemble(0x4FFE),
            fig::fig0_subchannel_long(3, 84, EepProfile::A, 3, 72),
            fig::fig0_subchannel_short(5, 200, 8),
        ]);
        assert_eq!(proc.process_fib(&organisation[..30]), vec![RadioEvent::NewEnsemble(0x4FFE)]);

        let services = fig::fib(&[fig::fig0_service(0xD210, 3, 63), fig::fig0_service(0xD211, 5, 0)]);
        assert_eq!(
            proc.process_fib(&services[..30]),
            vec![RadioEvent::ServiceDetected(0xD210), RadioEvent::ServiceDetected(0xD211)]
        );

        let ensemble = proc.ensemble.read().unwrap();
        let (component, sub) = ensemble.subchannel_for_service(0xD210).unwrap();
        assert_eq!(component.transport_mode(), TransportMode::Audio);
        assert_eq!(component.audio_type(), AudioType::DabPlus);
        assert_eq!(sub.start_addr, 84);
        assert_eq!(sub.protection, ProtectionSettings::Eep { profile: EepProfile::A, level: 3 });
        assert_eq!(sub.bitrate(), 96);

        let (component, sub) = ensemble.subchannel_for_service(0xD211).unwrap();
        assert_eq!(component.audio_type(), AudioType::Mp2);
        assert_eq!(sub.num_cu(), PROT_LEVEL[8][0] as u32);
    }

    #[test]
    fn test_empty_subchannel_is_skipped() {
        let proc = processor();
        // EEP-A1 needs 12 CUs per 8 kbit/s, so 6 CUs carry nothing
        let organisation = fig::fib(&[
            fig::fig0_subchannel_long(1, 0, EepProfile::A, 1, 6),
            fig::fig0_subchannel_long(2, 6, EepProfile::B, 1, 20),
            fig::fig0_subchannel_long(3, 84, EepProfile::A, 3, 72),
            fig::fig0_service(0xD201, 1, 63),
        ]);
        proc.process_fib(&organisation[..30]);

        let ensemble = proc.ensemble.read().unwrap();
        assert_eq!(ensemble.subchannels.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert!(ensemble.subchannel_for_service(0xD201).is_none());
    }

    #[test]
    fn test_repeated_fib_is_idempotent() {
        let proc = processor();
        let basic = fig::fib(&[fig::fig0_ensemble(0x1001), fig::fig0_service(0xC221, 1, 63)]);
        let label = fig::fib(&[fig::fig1_label(1, 0xC221, "Radio One", 0xFF00)]);
        assert_eq!(proc.process_fib(&basic[..30]).len(), 2);
        assert_eq!(proc.process_fib(&label[..30]).len(), 1);
        assert!(proc.process_fib(&basic[..30]).is_empty());
        assert!(proc.process_fib(&label[..30]).is_empty());

        let ensemble = proc.ensemble.read().unwrap();
        assert_eq!(ensemble.services.len(), 1);
        assert_eq!(ensemble.services[&0xC221].components.len(), 1);
    }

    #[test]
    fn test_labels_and_overwrite() {
        let proc = processor();
        let events = proc.process_fib(&fig::fib(&[fig::fig1_label(0, 0x1001, "My Mux", 0xF000)])[..30]);
        assert_eq!(events, vec![RadioEvent::EnsembleLabel("My Mux".to_string())]);

        proc.process_fib(&fig::fib(&[fig::fig1_label(1, 0xC221, "Old Name", 0xFF00)])[..30]);
        let events = proc.process_fib(&fig::fib(&[fig::fig1_label(1, 0xC221, "New Name", 0xFF00)])[..30]);
        assert_eq!(
            events,
            vec![RadioEvent::ServiceLabel { sid: 0xC221, label: "New Name".to_string() }]
        );
    }

    #[test]
    fn test_service_known_from_label_first() {
        let proc = processor();
        proc.process_fib(&fig::fib(&[fig::fig1_label(1, 0xC222, "Early", 0xFF00)])[..30]);
        let events = proc.process_fib(&fig::fib(&[fig::fig0_service(0xC222, 2, 63)])[..30]);
        assert_eq!(events, vec![RadioEvent::ServiceDetected(0xC222)]);
    }

    #[test]
    fn test_extended_label_segments() {
        let proc = processor();
        proc.process_fib(&fig::fib(&[fig::fig1_label(1, 0xC221, "Short", 0xFF00)])[..30]);

        let first = fig::fig2_label_segment(1, 0xC221, false, 0, Some(2), "Grüne ".as_bytes());
        assert!(proc.process_fib(&fig::fib(&[first])[..30]).is_empty());

        let second = fig::fig2_label_segment(1, 0xC221, false, 1, None, b"Welle");
        let events = proc.process_fib(&fig::fib(&[second])[..30]);
        assert_eq!(
            events,
            vec![RadioEvent::ServiceLabel { sid: 0xC221, label: "Grüne Welle".to_string() }]
        );
    }

    #[test]
    fn test_datetime() {
        let proc = processor();
        // MJD 60000 is 2023-02-25
        let events = proc.process_fib(&fig::fib(&[fig::fig0_datetime(60000, 13, 37, 42, 500)])[..30]);
        let RadioEvent::DateTime(dt) = &events[0] else {
            panic!("expected date/time, got {:?}", events);
        };
        assert_eq!(dt.to_rfc3339(), "2023-02-25T13:37:42.500+00:00");
    }

    #[test]
    fn test_malformed_fig_is_skipped() {
        let proc = processor();
        // FIG 0/1 claiming a long form entry that is cut short, followed by a valid 0/0
        let mut truncated = vec![0x04, 0x01, 0x0C, 0x54, 0x80];
        truncated.extend(fig::fig0_ensemble(0x2002));
        let fib = fig::fib(&[truncated]);
        assert_eq!(proc.process_fib(&fib[..30]), vec![RadioEvent::NewEnsemble(0x2002)]);

        // Length beyond the FIB end stops parsing without panicking
        let mut bad = vec![0u8; 30];
        bad[0] = 0x1F;
        assert!(proc.process_fib(&bad).is_empty());
    }
}
