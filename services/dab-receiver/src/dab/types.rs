//! Ensemble data model built from FIC content
//!
//! Entities live in id-keyed maps; every FIG only ever overwrites the fields
//! it carries, so duplicate and out-of-order FIGs converge on the same state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::constants::PROT_LEVEL;
use super::label::DabLabel;

/// Service id that denotes "no such service"
pub const SERVICE_ID_UNKNOWN: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportMode {
    Audio,
    StreamData,
    Fidc,
    PacketData,
}

impl TransportMode {
    /// Map a 2-bit TMId. Values above 3 cannot come from the bitstream.
    pub fn from_tmid(tmid: u8) -> Self {
        match tmid {
            0 => TransportMode::Audio,
            1 => TransportMode::StreamData,
            2 => TransportMode::Fidc,
            3 => TransportMode::PacketData,
            _ => panic!("Illegal TMid {}", tmid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioType {
    /// MPEG-1/2 Layer II (classic DAB)
    Mp2,
    /// HE-AAC v2 in superframes (DAB+)
    DabPlus,
    Unknown,
}

impl AudioType {
    pub fn from_ascty(ascty: u8) -> Self {
        match ascty {
            0 => AudioType::Mp2,
            63 => AudioType::DabPlus,
            _ => AudioType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EepProfile {
    A,
    B,
}

/// Sub-channel protection; short form selects a UEP table row, long form
/// an EEP profile and level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtectionSettings {
    Uep { table_index: u8 },
    Eep { profile: EepProfile, level: u8 },
}

impl ProtectionSettings {
    /// Protection level as used in the displayed protection string
    pub fn level(&self) -> u8 {
        match *self {
            ProtectionSettings::Uep { table_index } => PROT_LEVEL[table_index as usize][1] as u8,
            ProtectionSettings::Eep { level, .. } => level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subchannel {
    pub id: u8,
    /// First capacity unit within the CIF
    pub start_addr: u16,
    /// Sub-channel size in CU as signalled (long form only)
    pub length: u16,
    pub protection: ProtectionSettings,
}

impl Subchannel {
    /// Bitrate in kbit/s
    pub fn bitrate(&self) -> u32 {
        let length = self.length as u32;
        match self.protection {
            ProtectionSettings::Uep { table_index } => PROT_LEVEL[table_index as usize][2] as u32,
            ProtectionSettings::Eep { profile: EepProfile::A, level } => match level {
                1 => length / 12 * 8,
                2 => length / 8 * 8,
                3 => length / 6 * 8,
                4 => length / 4 * 8,
                _ => panic!("Illegal EEP level {}", level),
            },
            ProtectionSettings::Eep { profile: EepProfile::B, level } => match level {
                1 => length / 27 * 32,
                2 => length / 21 * 32,
                3 => length / 18 * 32,
                4 => length / 15 * 32,
                _ => panic!("Illegal EEP level {}", level),
            },
        }
    }

    /// Capacity units occupied per CIF
    pub fn num_cu(&self) -> u32 {
        let bitrate = self.bitrate();
        match self.protection {
            ProtectionSettings::Uep { table_index } => PROT_LEVEL[table_index as usize][0] as u32,
            ProtectionSettings::Eep { profile: EepProfile::A, level } => match level {
                1 => (bitrate * 12) >> 3,
                2 => bitrate,
                3 => (bitrate * 6) >> 3,
                4 => bitrate >> 1,
                _ => panic!("Illegal EEP level {}", level),
            },
            ProtectionSettings::Eep { profile: EepProfile::B, level } => match level {
                1 => (bitrate * 27) >> 5,
                2 => (bitrate * 21) >> 5,
                3 => (bitrate * 18) >> 5,
                4 => (bitrate * 15) >> 5,
                _ => panic!("Illegal EEP level {}", level),
            },
        }
    }

    /// Bytes in one logical frame (24 ms of payload)
    pub fn frame_len(&self) -> usize {
        self.bitrate() as usize * 3
    }

    /// "UEP 3", "EEP 2-A", ...
    pub fn protection(&self) -> String {
        match self.protection {
            ProtectionSettings::Uep { .. } => format!("UEP {}", self.protection.level()),
            ProtectionSettings::Eep { profile, level } => {
                let suffix = match profile {
                    EepProfile::A => "A",
                    EepProfile::B => "B",
                };
                format!("EEP {}-{}", level, suffix)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceComponent {
    pub sid: u32,
    pub tmid: u8,
    /// Sub-channel id for stream modes
    pub subchannel_id: Option<u8>,
    /// Service component id for packet mode
    pub scid: Option<u16>,
    /// Audio service component type, meaningful for TMId 0
    pub ascty: u8,
    pub primary: bool,
    pub ca_flag: bool,
}

impl ServiceComponent {
    pub fn transport_mode(&self) -> TransportMode {
        TransportMode::from_tmid(self.tmid)
    }

    /// Audio coding, `Unknown` for anything but stream audio
    pub fn audio_type(&self) -> AudioType {
        match self.transport_mode() {
            TransportMode::Audio => AudioType::from_ascty(self.ascty),
            _ => AudioType::Unknown,
        }
    }

    fn same_slot(&self, other: &ServiceComponent) -> bool {
        self.tmid == other.tmid && self.subchannel_id == other.subchannel_id && self.scid == other.scid
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Service {
    pub sid: u32,
    pub label: DabLabel,
    pub components: Vec<ServiceComponent>,
}

impl Service {
    pub fn new(sid: u32) -> Self {
        Self {
            sid,
            ..Default::default()
        }
    }

    pub fn is_programme(&self) -> bool {
        self.sid <= 0xFFFF
    }

    pub fn primary_component(&self) -> Option<&ServiceComponent> {
        self.components
            .iter()
            .find(|c| c.primary)
            .or_else(|| self.components.first())
    }
}

/// Complete state of one ensemble as learned from the FIC
#[derive(Debug, Clone, Default)]
pub struct Ensemble {
    pub eid: Option<u16>,
    pub label: DabLabel,
    pub ecc: Option<u8>,
    /// Local time offset in half hours
    pub lto_half_hours: Option<i8>,
    pub datetime: Option<DateTime<Utc>>,
    pub services: BTreeMap<u32, Service>,
    pub subchannels: BTreeMap<u8, Subchannel>,
}

impl Ensemble {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a sub-channel. Returns true when anything changed.
    pub fn upsert_subchannel(&mut self, sub: Subchannel) -> bool {
        match self.subchannels.get(&sub.id) {
            Some(existing) if *existing == sub => false,
            _ => {
                self.subchannels.insert(sub.id, sub);
                true
            }
        }
    }

    /// Insert or update a component; creates the service on first sight.
    /// Returns true when the service had no components before, i.e. it was
    /// only known from its label or not at all.
    pub fn upsert_component(&mut self, component: ServiceComponent) -> bool {
        let service = self
            .services
            .entry(component.sid)
            .or_insert_with(|| Service::new(component.sid));
        let is_new = service.components.is_empty();

        match service.components.iter_mut().find(|c| c.same_slot(&component)) {
            Some(existing) => *existing = component,
            None => service.components.push(component),
        }
        is_new
    }

    pub fn service(&self, sid: u32) -> Option<&Service> {
        self.services.get(&sid)
    }

    /// Sub-channel carrying the service's primary stream component, if known
    pub fn subchannel_for_service(&self, sid: u32) -> Option<(&ServiceComponent, &Subchannel)> {
        let service = self.services.get(&sid)?;
        service
            .components
            .iter()
            .filter(|c| c.subchannel_id.is_some())
            .filter_map(|c| {
                let sub = self.subchannels.get(&c.subchannel_id?)?;
                Some((c, sub))
            })
            .max_by_key(|(c, _)| c.primary)
    }

    pub fn snapshot(&self) -> EnsembleInfo {
        EnsembleInfo {
            eid: self.eid,
            label: self.label.utf8_label(),
            short_label: self.label.fig1_shortlabel_utf8(),
            services: self.services.values().map(|s| self.service_info(s)).collect(),
        }
    }

    pub fn service_info(&self, service: &Service) -> ServiceInfo {
        let components = service
            .components
            .iter()
            .map(|c| {
                let sub = c.subchannel_id.and_then(|id| self.subchannels.get(&id));
                ComponentInfo {
                    transport_mode: c.transport_mode(),
                    audio_type: c.audio_type(),
                    subchannel_id: c.subchannel_id,
                    primary: c.primary,
                    bitrate: sub.map(|s| s.bitrate()),
                    protection: sub.map(|s| s.protection()),
                    start_addr: sub.map(|s| s.start_addr),
                    num_cu: sub.map(|s| s.num_cu()),
                }
            })
            .collect();

        ServiceInfo {
            sid: service.sid,
            label: service.label.utf8_label(),
            short_label: service.label.fig1_shortlabel_utf8(),
            components,
        }
    }
}

/// Serializable view of a service component
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub transport_mode: TransportMode,
    pub audio_type: AudioType,
    pub subchannel_id: Option<u8>,
    pub primary: bool,
    pub bitrate: Option<u32>,
    pub protection: Option<String>,
    pub start_addr: Option<u16>,
    pub num_cu: Option<u32>,
}

/// Serializable view of a service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub sid: u32,
    pub label: String,
    pub short_label: String,
    pub components: Vec<ComponentInfo>,
}

impl ServiceInfo {
    pub fn is_audio(&self) -> bool {
        self.components
            .iter()
            .any(|c| c.transport_mode == TransportMode::Audio)
    }
}

/// Serializable view of an ensemble
#[derive(Debug, Clone, Serialize)]
pub struct EnsembleInfo {
    pub eid: Option<u16>,
    pub label: String,
    pub short_label: String,
    pub services: Vec<ServiceInfo>,
}
