//! Energy dispersal scrambling (PRBS x^9 + x^5 + 1)

/// Precomputed PRBS of fixed length, restarted for every FIC block or
/// logical frame
#[derive(Debug, Clone)]
pub struct EnergyDispersal {
    prbs: Vec<u8>,
}

impl EnergyDispersal {
    pub fn new(len: usize) -> Self {
        let mut prbs = Vec::with_capacity(len);
        let mut reg: u16 = 0x1FF;
        for _ in 0..len {
            let bit = (((reg >> 8) ^ (reg >> 4)) & 1) as u8;
            reg = ((reg << 1) | bit as u16) & 0x1FF;
            prbs.push(bit);
        }
        Self { prbs }
    }

    pub fn len(&self) -> usize {
        self.prbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prbs.is_empty()
    }

    /// XOR the sequence onto `bits` (one bit per byte). Self-inverse.
    pub fn apply(&self, bits: &mut [u8]) {
        for (b, p) in bits.iter_mut().zip(&self.prbs) {
            *b ^= p;
        }
    }
}

/// Pack bits (MSB first) into bytes
pub fn pack_bits(bits: &[u8]) -> Vec<u8> {
    bits.chunks(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, &b| (acc << 1) | (b & 1)) << (8 - chunk.len()))
        .collect()
}

/// Unpack bytes into bits, MSB first
pub fn unpack_bits(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .flat_map(|&byte| (0..8).rev().map(move |i| (byte >> i) & 1))
        .collect()
}
