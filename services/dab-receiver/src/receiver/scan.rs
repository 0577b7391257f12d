//! Scan results: the audio services found on one channel

use serde::Serialize;

use crate::dab::{AudioType, EnsembleInfo};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScannedService {
    pub sid: u32,
    pub name: String,
    pub audio_type: AudioType,
    pub bitrate: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub channel: String,
    pub ensemble_id: Option<u16>,
    pub ensemble: String,
    pub services: Vec<ScannedService>,
}

impl ScanResult {
    /// Collect the audio services of an ensemble snapshot
    pub fn from_ensemble(channel: &str, ensemble: &EnsembleInfo) -> Self {
        let services = ensemble
            .services
            .iter()
            .filter(|s| s.is_audio())
            .map(|s| {
                let primary = s.components.iter().find(|c| c.primary).or_else(|| s.components.first());
                ScannedService {
                    sid: s.sid,
                    name: s.label.trim_end().to_string(),
                    audio_type: primary.map_or(AudioType::Unknown, |c| c.audio_type),
                    bitrate: primary.and_then(|c| c.bitrate),
                }
            })
            .collect();

        Self {
            channel: channel.to_string(),
            ensemble_id: ensemble.eid,
            ensemble: ensemble.label.trim_end().to_string(),
            services,
        }
    }

    /// A channel without signal
    pub fn empty(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            ensemble_id: None,
            ensemble: String::new(),
            services: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dab::{Ensemble, EepProfile, ProtectionSettings, ServiceComponent, Subchannel};

    #[test]
    fn test_only_audio_services_are_listed() {
        let mut ensemble = Ensemble::new();
        ensemble.eid = Some(0x10C4);
        ensemble.upsert_subchannel(Subchannel {
            id: 1,
            start_addr: 0,
            length: 72,
            protection: ProtectionSettings::Eep { profile: EepProfile::A, level: 3 },
        });
        for (sid, tmid, ascty) in [(0xD210u32, 0u8, 63u8), (0xE0D21001, 3, 0)] {
            ensemble.upsert_component(ServiceComponent {
                sid,
                tmid,
                subchannel_id: (tmid == 0).then_some(1),
                scid: (tmid == 3).then_some(5),
                ascty,
                primary: true,
                ca_flag: false,
            });
        }

        let result = ScanResult::from_ensemble("11D", &ensemble.snapshot());
        assert_eq!(result.ensemble_id, Some(0x10C4));
        assert_eq!(result.services.len(), 1);
        assert_eq!(result.services[0].sid, 0xD210);
        assert_eq!(result.services[0].audio_type, AudioType::DabPlus);
        assert_eq!(result.services[0].bitrate, Some(96));

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"channel\":\"11D\""));
    }
}
