//! Soft-decision Viterbi decoder for the DAB mother code
//!
//! Rate 1/4, constraint length 7, generators 133/171/145/133 (octal).
//! Soft bits are signed: positive means 0, negative means 1, 0 is an erasure.

/// Tail bits appended by the encoder to return to state 0
pub const TAIL: usize = 6;

const NUM_STATES: usize = 64;

/// Generator taps on a register whose bit k holds a[i-k]
const POLYS: [u8; 4] = [0x6D, 0x4F, 0x53, 0x6D];

/// Encoder output bits for each 7-bit register value, first output in bit 3
static OUTPUTS: [u8; 128] = {
    let mut t = [0u8; 128];
    let mut reg = 0;
    while reg < 128 {
        let mut out = 0u8;
        let mut j = 0;
        while j < 4 {
            let parity = ((reg as u8) & POLYS[j]).count_ones() as u8 & 1;
            out = (out << 1) | parity;
            j += 1;
        }
        t[reg] = out;
        reg += 1;
    }
    t
};

/// Result of decoding one codeword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViterbiOutput {
    /// Information bits, one per byte
    pub bits: Vec<u8>,
    /// Received (non-erased) bits that disagree with the decoded path
    pub bit_errors: usize,
}

/// Convolutionally encode `bits` and the zero tail
pub fn encode(bits: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity((bits.len() + TAIL) * 4);
    let mut reg: u8 = 0;
    for &bit in bits.iter().chain([0u8; TAIL].iter()) {
        reg = ((reg << 1) | (bit & 1)) & 0x7F;
        let o = OUTPUTS[reg as usize];
        for j in (0..4).rev() {
            out.push((o >> j) & 1);
        }
    }
    out
}

/// Viterbi decoder with reusable decision memory
#[derive(Debug, Default)]
pub struct ViterbiDecoder {
    decisions: Vec<u64>,
}

impl ViterbiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `info_bits` information bits from depunctured soft bits.
    ///
    /// `soft` must hold `4 * (info_bits + TAIL)` values.
    pub fn decode(&mut self, soft: &[i16], info_bits: usize) -> ViterbiOutput {
        let steps = info_bits + TAIL;
        assert!(
            soft.len() >= steps * 4,
            "viterbi input too short: {} < {}",
            soft.len(),
            steps * 4
        );

        let mut metrics = [i32::MIN / 2; NUM_STATES];
        metrics[0] = 0;
        let mut next = [0i32; NUM_STATES];

        self.decisions.clear();
        self.decisions.resize(steps, 0);

        for step in 0..steps {
            let s = &soft[step * 4..step * 4 + 4];
            // Branch metric for every possible 4-bit output
            let mut branch = [0i32; 16];
            for (out, metric) in branch.iter_mut().enumerate() {
                *metric = (0..4)
                    .map(|j| {
                        let v = s[j] as i32;
                        if (out >> (3 - j)) & 1 == 0 {
                            v
                        } else {
                            -v
                        }
                    })
                    .sum();
            }

            let mut decision = 0u64;
            let mut best = i32::MIN;
            for (state, slot) in next.iter_mut().enumerate() {
                let prev0 = state >> 1;
                let prev1 = prev0 | 0x20;
                let m0 = metrics[prev0] + branch[OUTPUTS[state] as usize];
                let m1 = metrics[prev1] + branch[OUTPUTS[state | 0x40] as usize];
                if m1 > m0 {
                    *slot = m1;
                    decision |= 1 << state;
                } else {
                    *slot = m0;
                }
                best = best.max(*slot);
            }
            self.decisions[step] = decision;

            for (m, n) in metrics.iter_mut().zip(next.iter()) {
                *m = n - best;
            }
        }

        // Trace back from the terminated state
        let mut bits = vec![0u8; steps];
        let mut state = 0usize;
        for step in (0..steps).rev() {
            bits[step] = (state & 1) as u8;
            let oldest = ((self.decisions[step] >> state) & 1) as usize;
            state = (state >> 1) | (oldest << 5);
        }
        bits.truncate(info_bits);

        let reencoded = encode(&bits);
        let bit_errors = reencoded
            .iter()
            .zip(soft)
            .filter(|(&c, &s)| s != 0 && (c == 0) != (s > 0))
            .count();

        ViterbiOutput { bits, bit_errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn to_soft(bits: &[u8]) -> Vec<i16> {
        bits.iter().map(|&b| if b == 0 { 127 } else { -127 }).collect()
    }

    #[test]
    fn test_encoder_first_outputs() {
        // A single 1 shifts through every generator tap
        let out = encode(&[1]);
        assert_eq!(&out[..4], &[1, 1, 1, 1]);
        assert_eq!(out.len(), (1 + TAIL) * 4);
    }

    #[test]
    fn test_decode_clean() {
        let mut rng = rand::rng();
        let bits: Vec<u8> = (0..768).map(|_| rng.random_range(0..2)).collect();
        let soft = to_soft(&encode(&bits));

        let mut decoder = ViterbiDecoder::new();
        let out = decoder.decode(&soft, bits.len());
        assert_eq!(out.bits, bits);
        assert_eq!(out.bit_errors, 0);
    }

    #[test]
    fn test_decode_corrects_errors() {
        let mut rng = rand::rng();
        let bits: Vec<u8> = (0..512).map(|_| rng.random_range(0..2)).collect();
        let mut soft = to_soft(&encode(&bits));
        for i in (0..soft.len()).step_by(40) {
            soft[i] = -soft[i];
        }

        let mut decoder = ViterbiDecoder::new();
        let out = decoder.decode(&soft, bits.len());
        assert_eq!(out.bits, bits);
        assert_eq!(out.bit_errors, soft.len().div_ceil(40));
    }

    #[test]
    fn test_decode_with_erasures() {
        let bits: Vec<u8> = (0..256).map(|i| ((i * 7) % 5 == 0) as u8).collect();
        let mut soft = to_soft(&encode(&bits));
        // Rate 1/2: erase the two repeated outputs
        for chunk in soft.chunks_mut(4) {
            chunk[2] = 0;
            chunk[3] = 0;
        }

        let mut decoder = ViterbiDecoder::new();
        assert_eq!(decoder.decode(&soft, bits.len()).bits, bits);
    }
}
