//! OFDM synchronisation and demodulation

pub mod freq_interleaver;
pub mod phase_reference;
pub mod processor;
pub mod sample_reader;

pub use freq_interleaver::FreqInterleaver;
pub use phase_reference::PhaseReference;
pub use processor::{OfdmProcessor, RunOutcome, SymbolSink, SyncState};
pub use sample_reader::{ReadError, SampleReader};
