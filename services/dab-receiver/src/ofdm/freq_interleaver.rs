//! Frequency interleaving table

use crate::dab::DabParams;

/// Maps logical QPSK symbol index n to the signed carrier that carries it
#[derive(Debug, Clone)]
pub struct FreqInterleaver {
    table: Vec<i32>,
}

impl FreqInterleaver {
    pub fn new(params: &DabParams) -> Self {
        let t_u = params.t_u;
        let lower = (t_u - params.k) / 2;
        let upper = t_u - lower;

        let mut table = Vec::with_capacity(params.k);
        let mut pi = 0usize;
        for i in 0..t_u {
            if i > 0 {
                pi = (13 * pi + t_u / 4 - 1) % t_u;
            }
            if (lower..=upper).contains(&pi) && pi != t_u / 2 {
                table.push(pi as i32 - (t_u / 2) as i32);
            }
        }
        assert_eq!(table.len(), params.k, "interleaver produced {} carriers", table.len());

        Self { table }
    }

    /// Carrier index for logical position `n`.
    ///
    /// An index beyond the carrier count means the demodulator is feeding
    /// the wrong symbol size and is a bug.
    pub fn carrier(&self, n: usize) -> i32 {
        self.table[n]
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.table.iter().copied()
    }
}
