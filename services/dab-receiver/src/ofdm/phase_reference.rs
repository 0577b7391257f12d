//! Phase reference symbol, coarse frequency and fine timing estimation

use std::f32::consts::FRAC_PI_2;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::dab::DabParams;

/// Coarse frequency search range in carrier spacings
pub const SEARCH_RANGE: i32 = 35;

/// Minimum impulse response peak-to-mean ratio to accept a frame
const MIN_PEAK_RATIO: f32 = 8.0;

/// Phase parameter table h[i][j]
const H_TABLE: [[u8; 32]; 4] = [
    [
        0, 2, 0, 0, 0, 0, 1, 1, 2, 0, 0, 0, 2, 2, 1, 1, 0, 2, 0, 0, 0, 0, 1, 1, 2, 0, 0, 0, 2, 2, 1, 1,
    ],
    [
        0, 3, 2, 3, 0, 1, 3, 0, 2, 1, 2, 3, 2, 3, 3, 0, 0, 3, 2, 3, 0, 1, 3, 0, 2, 1, 2, 3, 2, 3, 3, 0,
    ],
    [
        0, 0, 0, 2, 0, 2, 1, 3, 2, 2, 0, 2, 2, 0, 1, 3, 0, 0, 0, 2, 0, 2, 1, 3, 2, 2, 0, 2, 2, 0, 1, 3,
    ],
    [
        0, 1, 2, 1, 0, 3, 3, 2, 2, 3, 2, 1, 2, 1, 3, 2, 0, 1, 2, 1, 0, 3, 3, 2, 2, 3, 2, 1, 2, 1, 3, 2,
    ],
];

/// Rows of (k_min, i, n); each row covers 32 carriers starting at k_min
const MODE_I_ROWS: [(i16, u8, u8); 48] = [
    (-768, 0, 1),
    (-736, 1, 2),
    (-704, 2, 0),
    (-672, 3, 1),
    (-640, 0, 3),
    (-608, 1, 2),
    (-576, 2, 2),
    (-544, 3, 3),
    (-512, 0, 2),
    (-480, 1, 1),
    (-448, 2, 2),
    (-416, 3, 3),
    (-384, 0, 1),
    (-352, 1, 2),
    (-320, 2, 3),
    (-288, 3, 3),
    (-256, 0, 2),
    (-224, 1, 2),
    (-192, 2, 2),
    (-160, 3, 1),
    (-128, 0, 1),
    (-96, 1, 3),
    (-64, 2, 1),
    (-32, 3, 2),
    (1, 0, 3),
    (33, 3, 1),
    (65, 2, 1),
    (97, 1, 1),
    (129, 0, 2),
    (161, 3, 2),
    (193, 2, 1),
    (225, 1, 0),
    (257, 0, 2),
    (289, 3, 2),
    (321, 2, 3),
    (353, 1, 3),
    (385, 0, 0),
    (417, 3, 2),
    (449, 2, 1),
    (481, 1, 3),
    (513, 0, 3),
    (545, 3, 3),
    (577, 2, 3),
    (609, 1, 0),
    (641, 0, 3),
    (673, 3, 0),
    (705, 2, 1),
    (737, 1, 1),
];

const MODE_II_ROWS: [(i16, u8, u8); 12] = [
    (-192, 0, 2),
    (-160, 1, 3),
    (-128, 2, 2),
    (-96, 3, 2),
    (-64, 0, 1),
    (-32, 1, 2),
    (1, 2, 0),
    (33, 1, 2),
    (65, 0, 2),
    (97, 3, 1),
    (129, 2, 0),
    (161, 1, 3),
];

const MODE_III_ROWS: [(i16, u8, u8); 6] = [
    (-96, 0, 2),
    (-64, 1, 3),
    (-32, 2, 0),
    (1, 3, 2),
    (33, 2, 2),
    (65, 1, 2),
];

const MODE_IV_ROWS: [(i16, u8, u8); 24] = [
    (-384, 0, 0),
    (-352, 1, 1),
    (-320, 2, 1),
    (-288, 3, 2),
    (-256, 0, 2),
    (-224, 1, 2),
    (-192, 2, 0),
    (-160, 3, 3),
    (-128, 0, 3),
    (-96, 1, 1),
    (-64, 2, 3),
    (-32, 3, 2),
    (1, 0, 0),
    (33, 3, 1),
    (65, 2, 0),
    (97, 1, 2),
    (129, 0, 0),
    (161, 3, 1),
    (193, 2, 2),
    (225, 1, 2),
    (257, 0, 2),
    (289, 3, 1),
    (321, 2, 3),
    (353, 1, 0),
];

fn rows_for_mode(mode: u8) -> &'static [(i16, u8, u8)] {
    match mode {
        1 => &MODE_I_ROWS,
        2 => &MODE_II_ROWS,
        3 => &MODE_III_ROWS,
        4 => &MODE_IV_ROWS,
        _ => panic!("Unknown DAB transmission mode {}", mode),
    }
}

/// Phase of carrier k in the phase reference symbol
fn phi(rows: &[(i16, u8, u8)], k: i32) -> f32 {
    let &(k_min, i, n) = rows
        .iter()
        .find(|(k_min, _, _)| k >= *k_min as i32 && k < *k_min as i32 + 32)
        .unwrap_or_else(|| panic!("carrier {} outside phase reference table", k));
    let h = H_TABLE[i as usize][(k - k_min as i32) as usize];
    FRAC_PI_2 * (h + n) as f32
}

/// Map a signed carrier index to its FFT bin
pub fn carrier_bin(k: i32, t_u: usize) -> usize {
    k.rem_euclid(t_u as i32) as usize
}

/// Timing estimate from the impulse response
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingEstimate {
    /// Offset of the useful part start within the analysed window; negative
    /// means the window started late
    pub offset: i32,
    pub peak_ratio: f32,
}

impl TimingEstimate {
    pub fn is_valid(&self) -> bool {
        self.peak_ratio >= MIN_PEAK_RATIO
    }
}

/// Frequency-domain phase reference symbol of one mode
pub struct PhaseReference {
    t_u: usize,
    k: usize,
    /// Reference value per FFT bin, zero on unused bins
    reference: Vec<Complex32>,
    ifft: Arc<dyn Fft<f32>>,
}

impl PhaseReference {
    pub fn new(params: &DabParams) -> Self {
        let rows = rows_for_mode(params.mode);
        let half = (params.k / 2) as i32;
        let mut reference = vec![Complex32::new(0.0, 0.0); params.t_u];
        for k in (-half..=half).filter(|&k| k != 0) {
            reference[carrier_bin(k, params.t_u)] = Complex32::from_polar(1.0, phi(rows, k));
        }

        let ifft = FftPlanner::<f32>::new().plan_fft_inverse(params.t_u);

        Self {
            t_u: params.t_u,
            k: params.k,
            reference,
            ifft,
        }
    }

    /// Reference value per FFT bin
    pub fn bins(&self) -> &[Complex32] {
        &self.reference
    }

    /// Integer carrier offset that best aligns `spectrum` with the reference.
    ///
    /// Compares phase differences of neighbouring carriers, which makes the
    /// estimate independent of timing within the window.
    pub fn estimate_carrier_offset(&self, spectrum: &[Complex32]) -> i32 {
        let half = (self.k / 2) as i32;
        let mut best = (0.0f32, 0i32);

        for offset in -SEARCH_RANGE..=SEARCH_RANGE {
            let mut acc = Complex32::new(0.0, 0.0);
            for k in -half..half {
                if k == 0 || k == -1 {
                    continue;
                }
                let rx = spectrum[carrier_bin(k + offset, self.t_u)]
                    * spectrum[carrier_bin(k + 1 + offset, self.t_u)].conj();
                let rf = self.reference[carrier_bin(k, self.t_u)]
                    * self.reference[carrier_bin(k + 1, self.t_u)].conj();
                acc += rx * rf.conj();
            }
            let score = acc.norm();
            if score > best.0 {
                best = (score, offset);
            }
        }
        best.1
    }

    /// Locate the start of the useful part via the channel impulse response
    pub fn estimate_timing(&self, spectrum: &[Complex32]) -> TimingEstimate {
        let mut response: Vec<Complex32> = spectrum
            .iter()
            .zip(&self.reference)
            .map(|(s, r)| s * r.conj())
            .collect();
        self.ifft.process(&mut response);

        let magnitudes: Vec<f32> = response.iter().map(|c| c.norm()).collect();
        let mean = magnitudes.iter().sum::<f32>() / magnitudes.len() as f32;
        let (peak, peak_value) = magnitudes
            .iter()
            .enumerate()
            .fold((0usize, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best });

        let offset = if peak <= self.t_u / 2 {
            peak as i32
        } else {
            peak as i32 - self.t_u as i32
        };

        TimingEstimate {
            offset,
            peak_ratio: if mean > 0.0 { peak_value / mean } else { 0.0 },
        }
    }
}
