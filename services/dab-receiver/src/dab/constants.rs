//! Transmission mode parameters and protection tables (ETSI EN 300 401)

/// Baseband sample rate every mode is defined against
pub const SAMPLE_RATE: u32 = 2_048_000;

/// Bits in one Common Interleaved Frame (864 capacity units of 64 bits)
pub const CIF_BITS: usize = 55_296;

/// Capacity units per CIF
pub const CUS_PER_CIF: usize = 864;

/// Bits per capacity unit
pub const BITS_PER_CU: usize = 64;

/// Bytes in a Fast Information Block including its CRC
pub const FIB_SIZE: usize = 32;

/// OFDM timing parameters of one transmission mode, in samples at 2.048 MHz
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DabParams {
    pub mode: u8,
    /// OFDM symbols per frame, excluding the null symbol
    pub l: usize,
    /// Active carriers
    pub k: usize,
    /// Frame duration
    pub t_f: usize,
    /// Null symbol duration
    pub t_null: usize,
    /// Symbol duration (useful part plus guard)
    pub t_s: usize,
    /// Useful symbol duration, also the FFT size
    pub t_u: usize,
    /// Guard interval
    pub t_g: usize,
    /// Carrier spacing in Hz
    pub carrier_diff: i32,
}

const MODE_I: DabParams = DabParams {
    mode: 1,
    l: 76,
    k: 1536,
    t_f: 196_608,
    t_null: 2656,
    t_s: 2552,
    t_u: 2048,
    t_g: 504,
    carrier_diff: 1000,
};

const MODE_II: DabParams = DabParams {
    mode: 2,
    l: 76,
    k: 384,
    t_f: 49_152,
    t_null: 664,
    t_s: 638,
    t_u: 512,
    t_g: 126,
    carrier_diff: 4000,
};

const MODE_III: DabParams = DabParams {
    mode: 3,
    l: 153,
    k: 192,
    t_f: 49_152,
    t_null: 345,
    t_s: 319,
    t_u: 256,
    t_g: 63,
    carrier_diff: 2000,
};

const MODE_IV: DabParams = DabParams {
    mode: 4,
    l: 76,
    k: 768,
    t_f: 98_304,
    t_null: 1328,
    t_s: 1276,
    t_u: 1024,
    t_g: 252,
    carrier_diff: 2000,
};

impl DabParams {
    /// Parameters for transmission mode 1..=4.
    ///
    /// Panics on any other mode: the mode is fixed by configuration and an
    /// unknown value means the caller is broken.
    pub fn for_mode(mode: u8) -> &'static DabParams {
        match mode {
            1 => &MODE_I,
            2 => &MODE_II,
            3 => &MODE_III,
            4 => &MODE_IV,
            _ => panic!("Unknown DAB transmission mode {}", mode),
        }
    }

    /// OFDM symbols carrying the FIC (following the phase reference symbol)
    pub fn fic_symbols(&self) -> usize {
        if self.mode == 3 {
            8
        } else {
            3
        }
    }

    /// Soft bits carried by one OFDM symbol
    pub fn bits_per_symbol(&self) -> usize {
        2 * self.k
    }

    /// Common Interleaved Frames per transmission frame
    pub fn cifs_per_frame(&self) -> usize {
        match self.mode {
            1 => 4,
            4 => 2,
            _ => 1,
        }
    }

    /// Punctured size of one FIC block (one block per CIF)
    pub fn fic_block_bits(&self) -> usize {
        self.fic_symbols() * self.bits_per_symbol() / self.cifs_per_frame()
    }

    /// FIBs carried by one FIC block
    pub fn fibs_per_block(&self) -> usize {
        if self.mode == 3 {
            4
        } else {
            3
        }
    }

    /// Index of the first MSC symbol within the frame
    pub fn first_msc_symbol(&self) -> usize {
        1 + self.fic_symbols()
    }
}

/// Short form (UEP) sub-channel table: `[size in CU, protection level, bitrate]`
pub const PROT_LEVEL: [[u16; 3]; 64] = [
    [16, 5, 32],
    [21, 4, 32],
    [24, 3, 32],
    [29, 2, 32],
    [35, 1, 32],
    [24, 5, 48],
    [29, 4, 48],
    [35, 3, 48],
    [42, 2, 48],
    [52, 1, 48],
    [29, 5, 56],
    [35, 4, 56],
    [42, 3, 56],
    [52, 2, 56],
    [32, 5, 64],
    [42, 4, 64],
    [48, 3, 64],
    [58, 2, 64],
    [70, 1, 64],
    [40, 5, 80],
    [52, 4, 80],
    [58, 3, 80],
    [70, 2, 80],
    [84, 1, 80],
    [48, 5, 96],
    [58, 4, 96],
    [70, 3, 96],
    [84, 2, 96],
    [104, 1, 96],
    [58, 5, 112],
    [70, 4, 112],
    [84, 3, 112],
    [104, 2, 112],
    [64, 5, 128],
    [84, 4, 128],
    [96, 3, 128],
    [116, 2, 128],
    [140, 1, 128],
    [80, 5, 160],
    [104, 4, 160],
    [116, 3, 160],
    [140, 2, 160],
    [168, 1, 160],
    [96, 5, 192],
    [116, 4, 192],
    [140, 3, 192],
    [168, 2, 192],
    [208, 1, 192],
    [116, 5, 224],
    [140, 4, 224],
    [168, 3, 224],
    [208, 2, 224],
    [232, 1, 224],
    [128, 5, 256],
    [168, 4, 256],
    [192, 3, 256],
    [232, 2, 256],
    [280, 1, 256],
    [160, 5, 320],
    [208, 4, 320],
    [280, 2, 320],
    [192, 5, 384],
    [280, 3, 384],
    [416, 1, 384],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_i_params() {
        let p = DabParams::for_mode(1);
        assert_eq!(p.l, 76);
        assert_eq!(p.k, 1536);
        assert_eq!(p.t_u, 2048);
        assert_eq!(p.t_s, p.t_u + p.t_g);
        assert_eq!(p.fic_block_bits(), 2304);
    }

    #[test]
    fn test_msc_capacity_matches_cifs() {
        for mode in 1..=4 {
            let p = DabParams::for_mode(mode);
            let msc_symbols = p.l - p.first_msc_symbol();
            assert_eq!(msc_symbols * p.bits_per_symbol(), p.cifs_per_frame() * CIF_BITS);
            assert_eq!(p.t_f, p.t_null + p.l * p.t_s);
        }
    }

    #[test]
    fn test_mode_iii_fic() {
        let p = DabParams::for_mode(3);
        assert_eq!(p.fic_block_bits(), 3072);
        assert_eq!(p.fibs_per_block(), 4);
    }

    #[test]
    #[should_panic]
    fn test_unknown_mode_panics() {
        DabParams::for_mode(5);
    }
}
