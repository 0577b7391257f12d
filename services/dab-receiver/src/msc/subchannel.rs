//! Sub-channel decoding: CIF fragments to logical frames

use crate::dab::constants::BITS_PER_CU;
use crate::dab::Subchannel;
use crate::fec::{pack_bits, EnergyDispersal, PuncturePlan, ViterbiDecoder};

/// Depth of the time interleaver in CIFs
pub const INTERLEAVING_DEPTH: usize = 16;

/// Reverse the four low bits
fn bitrev4(i: usize) -> usize {
    ((i & 1) << 3) | ((i & 2) << 1) | ((i & 4) >> 1) | ((i & 8) >> 3)
}

/// Delay in CIFs the transmitter applies to bit `i` of a logical frame
pub fn interleaving_delay(i: usize) -> usize {
    bitrev4(i % INTERLEAVING_DEPTH)
}

/// Decoded logical frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFrame {
    pub data: Vec<u8>,
    pub bit_errors: usize,
}

pub struct SubchannelDecoder {
    fragment_bits: usize,
    plan: PuncturePlan,
    viterbi: ViterbiDecoder,
    dispersal: EnergyDispersal,
    history: Vec<Vec<i16>>,
    cifs_seen: usize,
}

impl SubchannelDecoder {
    pub fn new(sub: &Subchannel) -> Self {
        let fragment_bits = sub.num_cu() as usize * BITS_PER_CU;
        let plan = PuncturePlan::for_protection(sub.protection, sub.bitrate());
        let dispersal = EnergyDispersal::new(plan.info_bits());

        Self {
            fragment_bits,
            plan,
            viterbi: ViterbiDecoder::new(),
            dispersal,
            history: vec![vec![0; fragment_bits]; INTERLEAVING_DEPTH],
            cifs_seen: 0,
        }
    }

    /// Soft bits this sub-channel occupies in every CIF
    pub fn fragment_bits(&self) -> usize {
        self.fragment_bits
    }

    /// Feed the sub-channel's soft bits of one CIF. A logical frame comes
    /// out once the interleaver has filled.
    pub fn process(&mut self, fragment: &[i16]) -> Option<LogicalFrame> {
        let slot = self.cifs_seen % INTERLEAVING_DEPTH;
        let n = fragment.len().min(self.fragment_bits);
        self.history[slot][..n].copy_from_slice(&fragment[..n]);
        self.history[slot][n..].fill(0);
        self.cifs_seen += 1;

        if self.cifs_seen < INTERLEAVING_DEPTH {
            return None;
        }

        let current = self.cifs_seen - 1;
        let deinterleaved: Vec<i16> = (0..self.fragment_bits)
            .map(|i| {
                let age = INTERLEAVING_DEPTH - 1 - interleaving_delay(i);
                self.history[(current - age) % INTERLEAVING_DEPTH][i]
            })
            .collect();

        let mother = self.plan.depuncture(&deinterleaved);
        let mut decoded = self.viterbi.decode(&mother, self.plan.info_bits());
        self.dispersal.apply(&mut decoded.bits);

        Some(LogicalFrame {
            data: pack_bits(&decoded.bits),
            bit_errors: decoded.bit_errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dab::{EepProfile, ProtectionSettings};
    use crate::test_signal::SubchannelEncoder;

    #[test]
    fn test_bitrev4() {
        let delays: Vec<usize> = (0..16).map(interleaving_delay).collect();
        assert_eq!(delays, vec![0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15]);
    }

    #[test]
    fn test_round_trip_through_interleaver() {
        let sub = Subchannel {
            id: 1,
            start_addr: 0,
            length: 72,
            protection: ProtectionSettings::Eep { profile: EepProfile::A, level: 3 },
        };
        let mut encoder = SubchannelEncoder::new(&sub);
        let mut decoder = SubchannelDecoder::new(&sub);
        assert_eq!(decoder.fragment_bits(), 72 * 64);

        let frames: Vec<Vec<u8>> = (0..20u8)
            .map(|n| (0..sub.frame_len()).map(|i| (i as u8).wrapping_mul(31) ^ n).collect())
            .collect();

        let mut out = Vec::new();
        for frame in &frames {
            let fragment = encoder.encode(frame);
            if let Some(decoded) = decoder.process(&fragment) {
                out.push(decoded);
            }
        }

        assert_eq!(out.len(), frames.len() - 15);
        for (decoded, sent) in out.iter().zip(&frames) {
            assert_eq!(&decoded.data, sent);
            assert_eq!(decoded.bit_errors, 0);
        }
    }
}
