//! FIC decoding: soft bits of the FIC symbols to CRC checked FIBs

use std::sync::{Arc, RwLock};

use tracing::trace;

use super::fib_processor::FibProcessor;
use crate::dab::constants::FIB_SIZE;
use crate::dab::crc::check_crc16;
use crate::dab::{DabParams, Ensemble};
use crate::events::RadioEvent;
use crate::fec::{pack_bits, EnergyDispersal, PuncturePlan, ViterbiDecoder};
use crate::stats::ReceiverStats;

pub struct FicHandler {
    params: &'static DabParams,
    plan: PuncturePlan,
    viterbi: ViterbiDecoder,
    dispersal: EnergyDispersal,
    soft_bits: Vec<i16>,
    processor: FibProcessor,
    stats: Arc<ReceiverStats>,
}

impl FicHandler {
    pub fn new(
        params: &'static DabParams,
        ensemble: Arc<RwLock<Ensemble>>,
        stats: Arc<ReceiverStats>,
    ) -> Self {
        let plan = PuncturePlan::fic(params.mode);
        let dispersal = EnergyDispersal::new(plan.info_bits());
        debug_assert_eq!(plan.punctured_bits(), params.fic_block_bits());

        Self {
            params,
            plan,
            viterbi: ViterbiDecoder::new(),
            dispersal,
            soft_bits: Vec::with_capacity(params.fic_symbols() * params.bits_per_symbol()),
            processor: FibProcessor::new(ensemble),
            stats,
        }
    }

    /// Feed FIC symbol `index` of the current frame. Events are returned once
    /// the last FIC symbol of the frame has been decoded.
    pub fn process_symbol(&mut self, index: usize, bits: &[i16]) -> Vec<RadioEvent> {
        if index == 0 {
            self.soft_bits.clear();
        }
        self.soft_bits.extend_from_slice(bits);

        if index + 1 < self.params.fic_symbols() {
            return Vec::new();
        }
        if self.soft_bits.len() != self.params.fic_symbols() * self.params.bits_per_symbol() {
            // Symbols of a partially received frame
            self.soft_bits.clear();
            return Vec::new();
        }

        let block_bits = self.params.fic_block_bits();
        let blocks: Vec<Vec<i16>> = self.soft_bits.chunks(block_bits).map(|b| b.to_vec()).collect();
        let mut events = Vec::new();
        for block in blocks {
            events.extend(self.process_block(&block));
        }
        self.soft_bits.clear();
        events
    }

    /// Decode one FIC block (one CIF worth) into its FIBs
    pub fn process_block(&mut self, soft: &[i16]) -> Vec<RadioEvent> {
        let mother = self.plan.depuncture(soft);
        let mut decoded = self.viterbi.decode(&mother, self.plan.info_bits());
        self.dispersal.apply(&mut decoded.bits);

        let mut events = Vec::new();
        for fib_bits in decoded.bits.chunks_exact(FIB_SIZE * 8).take(self.params.fibs_per_block()) {
            let fib = pack_bits(fib_bits);
            let crc_ok = check_crc16(&fib);
            self.stats.record_fib(crc_ok);
            if crc_ok {
                events.extend(self.processor.process_fib(&fib[..FIB_SIZE - 2]));
            } else {
                trace!("FIB CRC failure: {}", hex::encode(&fib));
            }
        }
        events
    }
}
