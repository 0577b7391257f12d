//! Reed-Solomon RS(120,110) for DAB+ superframes
//!
//! Shortened from RS(255,245) over GF(2^8) with field polynomial 0x11D and
//! generator roots alpha^0..alpha^9. The shortened code is handled by the
//! `reed_solomon` crate directly on the 120 transmitted bytes.

use reed_solomon::{Decoder, Encoder};
use thiserror::Error;

/// Transmitted codeword length
pub const RS_N: usize = 120;
/// Data bytes per codeword
pub const RS_K: usize = 110;
const NSYM: usize = RS_N - RS_K;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RsError {
    #[error("too many symbol errors to correct")]
    Uncorrectable,
}

/// Encoder and decoder for the DAB+ outer code
pub struct ReedSolomon {
    encoder: Encoder,
    decoder: Decoder,
}

impl Default for ReedSolomon {
    fn default() -> Self {
        Self::new()
    }
}

impl ReedSolomon {
    pub fn new() -> Self {
        Self {
            encoder: Encoder::new(NSYM),
            decoder: Decoder::new(NSYM),
        }
    }

    /// Systematic encoding: 110 data bytes followed by 10 parity bytes
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        assert_eq!(data.len(), RS_K, "RS data length must be {}", RS_K);
        let encoded = self.encoder.encode(data);
        let mut codeword = encoded.data().to_vec();
        codeword.extend_from_slice(encoded.ecc());
        codeword
    }

    /// Correct a 120-byte codeword in place; returns corrected symbols
    pub fn decode(&self, received: &mut [u8]) -> Result<usize, RsError> {
        assert_eq!(received.len(), RS_N, "RS codeword length must be {}", RS_N);
        if !self.decoder.is_corrupted(received) {
            return Ok(0);
        }

        let corrected = self
            .decoder
            .correct(received, None)
            .map_err(|_| RsError::Uncorrectable)?;
        let fixed = corrected.data().iter().chain(corrected.ecc());

        let mut count = 0;
        for (byte, &good) in received.iter_mut().zip(fixed) {
            if *byte != good {
                *byte = good;
                count += 1;
            }
        }
        Ok(count)
    }
}
