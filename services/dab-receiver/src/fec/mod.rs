//! Forward error correction: depuncturing, Viterbi, energy dispersal,
//! Reed-Solomon

pub mod energy_dispersal;
pub mod puncture;
pub mod reed_solomon;
pub mod viterbi;

pub use energy_dispersal::{pack_bits, unpack_bits, EnergyDispersal};
pub use puncture::PuncturePlan;
pub use reed_solomon::{ReedSolomon, RsError, RS_K, RS_N};
pub use viterbi::{ViterbiDecoder, ViterbiOutput};
