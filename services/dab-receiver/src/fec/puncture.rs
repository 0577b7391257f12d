//! Puncturing vectors and per-protection depuncturing plans
//!
//! The mother code emits 4 bits per information bit. Blocks of 128 mother
//! code bits are punctured with one of the vectors PI_1..PI_24 (applied four
//! times, 32 bits each); the 24 tail bits always use PI_X.

use crate::dab::types::{EepProfile, ProtectionSettings};

/// Mother code bits per puncturing block
pub const BLOCK_BITS: usize = 128;

/// Mother code bits produced by the 6 tail bits
pub const TAIL_BITS: usize = 24;

/// Order in which the 4-bit groups of a vector gain their extra bits
const GROUP_ORDER: [usize; 8] = [0, 4, 2, 6, 1, 5, 3, 7];

/// Tail vector: 1100 repeated six times
const PI_X: [bool; 24] = {
    let mut v = [false; 24];
    let mut i = 0;
    while i < 24 {
        v[i] = i % 4 < 2;
        i += 1;
    }
    v
};

/// Puncturing vector PI_index (1..=24); it keeps 8 + index of 32 bits
pub fn pi_vector(index: usize) -> [bool; 32] {
    assert!((1..=24).contains(&index), "puncturing vector PI_{} does not exist", index);
    let mut v = [false; 32];
    for group in 0..8 {
        v[group * 4] = true;
    }
    for extra in 0..index {
        let group = GROUP_ORDER[extra % 8];
        let bit = 1 + extra / 8;
        v[group * 4 + bit] = true;
    }
    v
}

/// Run of `blocks` 128-bit blocks punctured with PI_`pi`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunctureRun {
    pub blocks: usize,
    pub pi: usize,
}

/// Complete puncturing layout of one codeword
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuncturePlan {
    pub runs: Vec<PunctureRun>,
}

impl PuncturePlan {
    fn new(runs: &[(usize, usize)]) -> Self {
        Self {
            runs: runs
                .iter()
                .filter(|(blocks, _)| *blocks > 0)
                .map(|&(blocks, pi)| PunctureRun { blocks, pi })
                .collect(),
        }
    }

    /// FIC: 21 (mode III: 29) blocks PI_16, 3 blocks PI_15
    pub fn fic(mode: u8) -> Self {
        let pi16_blocks = if mode == 3 { 29 } else { 21 };
        Self::new(&[(pi16_blocks, 16), (3, 15)])
    }

    /// Plan for an MSC sub-channel of the given protection and bitrate
    pub fn for_protection(protection: ProtectionSettings, bitrate: u32) -> Self {
        match protection {
            ProtectionSettings::Uep { table_index } => Self::uep(table_index as usize),
            ProtectionSettings::Eep { profile, level } => Self::eep(profile, level, bitrate),
        }
    }

    fn eep(profile: EepProfile, level: u8, bitrate: u32) -> Self {
        match profile {
            EepProfile::A => {
                let n = (bitrate / 8) as usize;
                match level {
                    1 => Self::new(&[(6 * n - 3, 24), (3, 23)]),
                    2 if n == 1 => Self::new(&[(5, 13), (1, 12)]),
                    2 => Self::new(&[(2 * n - 3, 14), (4 * n + 3, 13)]),
                    3 => Self::new(&[(6 * n - 3, 8), (3, 7)]),
                    4 => Self::new(&[(4 * n - 3, 3), (2 * n + 3, 2)]),
                    _ => panic!("Illegal EEP level {}", level),
                }
            }
            EepProfile::B => {
                let n = (bitrate / 32) as usize;
                let (pi1, pi2) = match level {
                    1 => (10, 9),
                    2 => (6, 5),
                    3 => (4, 3),
                    4 => (2, 1),
                    _ => panic!("Illegal EEP level {}", level),
                };
                Self::new(&[(24 * n - 3, pi1), (3, pi2)])
            }
        }
    }

    fn uep(table_index: usize) -> Self {
        let row = &UEP_PROFILES[table_index];
        Self::new(&[
            (row.l[0], row.pi[0]),
            (row.l[1], row.pi[1]),
            (row.l[2], row.pi[2]),
            (row.l[3], row.pi[3]),
        ])
    }

    /// Information bits carried, excluding the tail
    pub fn info_bits(&self) -> usize {
        self.runs.iter().map(|r| r.blocks).sum::<usize>() * BLOCK_BITS / 4
    }

    /// Punctured bits on air, including the tail
    pub fn punctured_bits(&self) -> usize {
        let body: usize = self.runs.iter().map(|r| r.blocks * 4 * (8 + r.pi)).sum();
        body + TAIL_BITS / 2
    }

    /// Expand received soft bits to the mother code rate, erasures as 0.
    ///
    /// Bits beyond `punctured_bits()` are padding and ignored.
    pub fn depuncture(&self, input: &[i16]) -> Vec<i16> {
        let mut out = Vec::with_capacity((self.info_bits() + 6) * 4);
        let mut src = input.iter().copied();

        for run in &self.runs {
            let v = pi_vector(run.pi);
            for _ in 0..run.blocks * 4 {
                for &keep in &v {
                    out.push(if keep { src.next().unwrap_or(0) } else { 0 });
                }
            }
        }
        for &keep in &PI_X {
            out.push(if keep { src.next().unwrap_or(0) } else { 0 });
        }
        out
    }

    /// Drop the punctured positions from a mother code bit stream
    pub fn puncture(&self, mother: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.punctured_bits());
        let mut src = mother.iter().copied();

        for run in &self.runs {
            let v = pi_vector(run.pi);
            for _ in 0..run.blocks * 4 {
                for &keep in &v {
                    if let Some(bit) = src.next() {
                        if keep {
                            out.push(bit);
                        }
                    }
                }
            }
        }
        for &keep in &PI_X {
            if let Some(bit) = src.next() {
                if keep {
                    out.push(bit);
                }
            }
        }
        out
    }
}

/// UEP puncturing row: block counts L1..L4 and vectors PI1..PI4
struct UepProfile {
    l: [usize; 4],
    pi: [usize; 4],
}

macro_rules! uep {
    ($l1:expr, $l2:expr, $l3:expr, $l4:expr, $p1:expr, $p2:expr, $p3:expr, $p4:expr) => {
        UepProfile {
            l: [$l1, $l2, $l3, $l4],
            pi: [$p1, $p2, $p3, $p4],
        }
    };
}

/// Indexed like `PROT_LEVEL`; unused fourth runs carry PI 1 with zero blocks
const UEP_PROFILES: [UepProfile; 64] = [
    // 32 kbit/s
    uep!(3, 4, 17, 0, 5, 3, 2, 1),
    uep!(3, 3, 18, 0, 11, 6, 5, 1),
    uep!(3, 4, 14, 3, 15, 9, 6, 8),
    uep!(3, 4, 14, 3, 22, 13, 8, 13),
    uep!(3, 5, 13, 3, 24, 17, 12, 17),
    // 48 kbit/s
    uep!(4, 3, 26, 3, 5, 4, 2, 3),
    uep!(3, 4, 26, 3, 9, 6, 4, 6),
    uep!(3, 4, 26, 3, 15, 10, 6, 9),
    uep!(3, 4, 26, 3, 24, 14, 8, 15),
    uep!(3, 5, 25, 3, 24, 18, 13, 18),
    // 56 kbit/s
    uep!(6, 10, 23, 3, 5, 4, 2, 3),
    uep!(6, 10, 23, 3, 9, 6, 4, 5),
    uep!(6, 12, 21, 3, 16, 7, 6, 9),
    uep!(6, 10, 23, 3, 23, 13, 8, 13),
    // 64 kbit/s
    uep!(6, 9, 31, 2, 5, 3, 2, 3),
    uep!(6, 9, 33, 0, 11, 6, 5, 1),
    uep!(6, 12, 27, 3, 16, 8, 6, 9),
    uep!(6, 10, 29, 3, 23, 13, 8, 13),
    uep!(6, 11, 28, 3, 24, 18, 12, 18),
    // 80 kbit/s
    uep!(6, 10, 41, 3, 6, 3, 2, 3),
    uep!(6, 10, 41, 3, 11, 6, 5, 6),
    uep!(6, 11, 40, 3, 16, 8, 6, 7),
    uep!(6, 10, 41, 3, 23, 13, 8, 13),
    uep!(6, 10, 41, 3, 24, 17, 12, 18),
    // 96 kbit/s
    uep!(7, 9, 53, 3, 5, 4, 2, 4),
    uep!(7, 10, 52, 3, 9, 6, 4, 6),
    uep!(6, 12, 51, 3, 16, 9, 6, 10),
    uep!(6, 10, 53, 3, 22, 12, 9, 12),
    uep!(6, 13, 50, 3, 24, 18, 13, 19),
    // 112 kbit/s
    uep!(14, 17, 50, 3, 5, 4, 2, 5),
    uep!(11, 21, 49, 3, 9, 6, 4, 8),
    uep!(11, 23, 47, 3, 16, 8, 6, 9),
    uep!(11, 21, 49, 3, 23, 12, 9, 14),
    // 128 kbit/s
    uep!(12, 19, 62, 3, 5, 3, 2, 4),
    uep!(11, 21, 61, 3, 11, 6, 5, 7),
    uep!(11, 22, 60, 3, 16, 9, 6, 10),
    uep!(11, 21, 61, 3, 22, 12, 9, 14),
    uep!(11, 20, 62, 3, 24, 17, 13, 19),
    // 160 kbit/s
    uep!(11, 19, 87, 3, 5, 4, 2, 4),
    uep!(11, 23, 83, 3, 11, 6, 5, 9),
    uep!(11, 24, 82, 3, 16, 8, 6, 11),
    uep!(11, 21, 85, 3, 22, 11, 9, 13),
    uep!(11, 22, 84, 3, 24, 18, 12, 19),
    // 192 kbit/s
    uep!(11, 20, 110, 3, 6, 4, 2, 5),
    uep!(11, 22, 108, 3, 10, 6, 4, 9),
    uep!(11, 24, 106, 3, 16, 10, 6, 11),
    uep!(11, 20, 110, 3, 22, 13, 9, 13),
    uep!(11, 21, 109, 3, 24, 20, 13, 24),
    // 224 kbit/s
    uep!(12, 22, 131, 3, 8, 6, 2, 6),
    uep!(12, 26, 127, 3, 12, 8, 4, 11),
    uep!(11, 20, 134, 3, 16, 10, 7, 9),
    uep!(11, 22, 132, 3, 24, 16, 10, 15),
    uep!(11, 24, 130, 3, 24, 20, 12, 20),
    // 256 kbit/s
    uep!(11, 24, 154, 3, 6, 5, 2, 5),
    uep!(11, 24, 154, 3, 12, 9, 5, 10),
    uep!(11, 27, 151, 3, 16, 10, 7, 10),
    uep!(11, 22, 156, 3, 24, 14, 10, 13),
    uep!(11, 26, 152, 3, 24, 19, 14, 18),
    // 320 kbit/s
    uep!(11, 26, 200, 3, 8, 5, 2, 6),
    uep!(11, 25, 201, 3, 13, 9, 5, 10),
    uep!(11, 26, 200, 3, 24, 17, 9, 17),
    // 384 kbit/s
    uep!(11, 27, 247, 3, 8, 6, 2, 7),
    uep!(11, 24, 250, 3, 16, 9, 7, 10),
    uep!(12, 28, 245, 3, 24, 20, 14, 23),
];
