//! Transmit side helpers for tests: FIG/FIB builders, FIC and sub-channel
//! encoders, DAB+ superframe and PAD builders, an OFDM modulator and an
//! in-memory input device.

use std::f32::consts::FRAC_1_SQRT_2;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};

use crate::dab::constants::BITS_PER_CU;
use crate::dab::crc::{append_crc16, compute_firecode};
use crate::dab::{DabParams, Subchannel};
use crate::device::InputDevice;
use crate::error::DeviceError;
use crate::fec::{unpack_bits, viterbi, EnergyDispersal, PuncturePlan, ReedSolomon, RS_K, RS_N};
use crate::msc::subchannel::{interleaving_delay, INTERLEAVING_DEPTH};
use crate::msc::SuperframeHeader;
use crate::ofdm::phase_reference::carrier_bin;
use crate::ofdm::{FreqInterleaver, PhaseReference};

fn soft(bits: &[u8]) -> Vec<i16> {
    bits.iter().map(|&b| if b == 0 { 127 } else { -127 }).collect()
}

pub mod fig {
    use crate::dab::constants::FIB_SIZE;
    use crate::dab::crc::append_crc16;
    use crate::dab::EepProfile;

    fn fig(fig_type: u8, body: Vec<u8>) -> Vec<u8> {
        assert!(!body.is_empty() && body.len() < 32, "FIG body of {} bytes", body.len());
        let mut out = vec![fig_type << 5 | body.len() as u8];
        out.extend(body);
        out
    }

    fn id_bytes(extension: u8, id: u32) -> Vec<u8> {
        match extension {
            5 => id.to_be_bytes().to_vec(),
            _ => (id as u16).to_be_bytes().to_vec(),
        }
    }

    /// FIGs followed by the end marker and padding, then the CRC
    pub fn fib(figs: &[Vec<u8>]) -> Vec<u8> {
        let mut data = figs.concat();
        assert!(data.len() <= FIB_SIZE - 2, "{} bytes of FIGs do not fit a FIB", data.len());
        if data.len() < FIB_SIZE - 2 {
            data.push(0xFF);
        }
        data.resize(FIB_SIZE - 2, 0);
        append_crc16(&mut data);
        data
    }

    pub fn fig0_ensemble(eid: u16) -> Vec<u8> {
        let [hi, lo] = eid.to_be_bytes();
        fig(0, vec![0x00, hi, lo, 0x00, 0x00])
    }

    pub fn fig0_subchannel_long(id: u8, start: u16, profile: EepProfile, level: u8, size: u16) -> Vec<u8> {
        let option = match profile {
            EepProfile::A => 0,
            EepProfile::B => 1,
        };
        fig(
            0,
            vec![
                0x01,
                id << 2 | (start >> 8) as u8 & 0x03,
                start as u8,
                0x80 | option << 4 | (level - 1) << 2 | (size >> 8) as u8 & 0x03,
                size as u8,
            ],
        )
    }

    pub fn fig0_subchannel_short(id: u8, start: u16, table_index: u8) -> Vec<u8> {
        fig(0, vec![0x01, id << 2 | (start >> 8) as u8 & 0x03, start as u8, table_index & 0x3F])
    }

    /// Programme service with one primary audio component
    pub fn fig0_service(sid: u16, subchannel: u8, ascty: u8) -> Vec<u8> {
        let [hi, lo] = sid.to_be_bytes();
        fig(0, vec![0x02, hi, lo, 0x01, ascty & 0x3F, subchannel << 2 | 0x02])
    }

    /// Long form date and time (UTC flag set)
    pub fn fig0_datetime(mjd: u32, hours: u32, minutes: u32, seconds: u32, millis: u32) -> Vec<u8> {
        let fields: [(u64, u32); 8] = [
            (0, 1),
            (mjd as u64, 17),
            (0, 2),
            (1, 1),
            (hours as u64, 5),
            (minutes as u64, 6),
            (seconds as u64, 6),
            (millis as u64, 10),
        ];
        let packed = fields
            .iter()
            .fold(0u64, |acc, &(value, width)| acc << width | (value & ((1 << width) - 1)));
        let mut body = vec![0x0A];
        body.extend_from_slice(&packed.to_be_bytes()[2..]);
        fig(0, body)
    }

    /// FIG 1 label in EBU Latin, space padded to 16 characters
    pub fn fig1_label(extension: u8, id: u32, text: &str, flag: u16) -> Vec<u8> {
        assert!(text.len() <= 16);
        let mut body = vec![extension & 0x07];
        body.extend(id_bytes(extension, id));
        let mut label = text.as_bytes().to_vec();
        label.resize(16, b' ');
        body.extend(label);
        body.extend(flag.to_be_bytes());
        fig(1, body)
    }

    /// FIG 2 UTF-8 label segment; `count` (segments in total) on segment 0 only
    pub fn fig2_label_segment(
        extension: u8,
        id: u32,
        toggle: bool,
        segment: u8,
        count: Option<u8>,
        chars: &[u8],
    ) -> Vec<u8> {
        assert_eq!(segment == 0, count.is_some());
        let mut body = vec![(toggle as u8) << 7 | (segment & 0x07) << 4 | (extension & 0x07)];
        body.extend(id_bytes(extension, id));
        if let Some(count) = count {
            body.extend([((count - 1) & 0x07) << 4, 0x00, 0x00]);
        }
        body.extend_from_slice(chars);
        fig(2, body)
    }
}

/// Punctured bits of one FIC block carrying `fibs`
pub fn fic_block_bits(params: &DabParams, fibs: &[Vec<u8>]) -> Vec<u8> {
    assert_eq!(fibs.len(), params.fibs_per_block());
    let plan = PuncturePlan::fic(params.mode);
    let mut bits = unpack_bits(&fibs.concat());
    EnergyDispersal::new(plan.info_bits()).apply(&mut bits);
    plan.puncture(&viterbi::encode(&bits))
}

/// Noise free soft bits of one FIC block
pub fn fic_block_soft_bits(params: &DabParams, fibs: &[Vec<u8>]) -> Vec<i16> {
    soft(&fic_block_bits(params, fibs))
}

/// Encodes logical frames of one sub-channel into its CIF fragments,
/// including the transmitter's time interleaving
pub struct SubchannelEncoder {
    fragment_bits: usize,
    plan: PuncturePlan,
    dispersal: EnergyDispersal,
    /// Encoded frames, newest first
    history: Vec<Vec<u8>>,
}

impl SubchannelEncoder {
    pub fn new(sub: &Subchannel) -> Self {
        let plan = PuncturePlan::for_protection(sub.protection, sub.bitrate());
        Self {
            fragment_bits: sub.num_cu() as usize * BITS_PER_CU,
            dispersal: EnergyDispersal::new(plan.info_bits()),
            plan,
            history: Vec::with_capacity(INTERLEAVING_DEPTH),
        }
    }

    /// Soft bits of the next CIF fragment; bit `i` of a frame goes out
    /// `interleaving_delay(i)` CIFs after the frame was handed in
    pub fn encode(&mut self, frame: &[u8]) -> Vec<i16> {
        let mut bits = unpack_bits(frame);
        assert_eq!(bits.len(), self.plan.info_bits());
        self.dispersal.apply(&mut bits);
        let mut punctured = self.plan.puncture(&viterbi::encode(&bits));
        punctured.resize(self.fragment_bits, 0);

        self.history.insert(0, punctured);
        self.history.truncate(INTERLEAVING_DEPTH);

        let fragment: Vec<u8> = (0..self.fragment_bits)
            .map(|i| self.history.get(interleaving_delay(i)).map_or(0, |f| f[i]))
            .collect();
        soft(&fragment)
    }
}

/// The five logical frames of one DAB+ superframe. The access units must
/// fill the audio part exactly, as the last one runs to its end.
pub fn build_superframe(bitrate: u32, header_byte: u8, aus: &[Vec<u8>]) -> Vec<Vec<u8>> {
    let s = bitrate as usize / 8;
    let audio_len = RS_K * s;
    let (num_aus, first_start) = SuperframeHeader::parse(header_byte).au_layout();
    assert_eq!(aus.len(), num_aus, "header {:02X} needs {} AUs", header_byte, num_aus);

    let mut data = vec![0u8; RS_N * s];
    data[2] = header_byte;

    let mut starts = Vec::with_capacity(num_aus);
    let mut pos = first_start;
    for au in aus {
        starts.push(pos);
        let mut unit = au.clone();
        append_crc16(&mut unit);
        data[pos..pos + unit.len()].copy_from_slice(&unit);
        pos += unit.len();
    }
    assert_eq!(pos, audio_len, "AUs must fill the {} byte audio part", audio_len);

    for (i, &start) in starts.iter().enumerate().skip(1) {
        let bit = (i - 1) * 12;
        let b = 3 + bit / 8;
        if bit % 8 == 0 {
            data[b] = (start >> 4) as u8;
            data[b + 1] |= ((start & 0x0F) << 4) as u8;
        } else {
            data[b] |= ((start >> 8) & 0x0F) as u8;
            data[b + 1] = start as u8;
        }
    }

    let code = compute_firecode(&data[2..11]);
    data[..2].copy_from_slice(&code.to_be_bytes());

    let rs = ReedSolomon::new();
    for i in 0..s {
        let message: Vec<u8> = (0..RS_K).map(|j| data[i + j * s]).collect();
        let codeword = rs.encode(&message);
        for (j, &byte) in codeword.iter().enumerate().skip(RS_K) {
            data[i + j * s] = byte;
        }
    }

    data.chunks(3 * bitrate as usize).map(|f| f.to_vec()).collect()
}

pub mod pad {
    use crate::dab::crc::append_crc16;

    const XPAD_LENGTHS: [usize; 8] = [4, 6, 8, 12, 16, 24, 32, 48];

    /// Dynamic label segment data group; the first flag follows `segment == 0`
    pub fn dl_data_group(toggle: bool, segment: u8, last: bool, charset: u8, text: &[u8]) -> Vec<u8> {
        assert!(!text.is_empty() && text.len() <= 16);
        let mut prefix = (text.len() - 1) as u8;
        if toggle {
            prefix |= 0x80;
        }
        if segment == 0 {
            prefix |= 0x40;
        }
        if last {
            prefix |= 0x20;
        }
        let second = if segment == 0 { charset << 4 } else { (segment & 0x07) << 4 };

        let mut dg = vec![prefix, second];
        dg.extend_from_slice(text);
        append_crc16(&mut dg);
        dg
    }

    /// MOT header core plus a UTF-8 ContentName parameter
    pub fn mot_header(body_size: usize, content_type: u8, content_subtype: u16, name: &str) -> Vec<u8> {
        let header_size = 7 + 3 + name.len();
        let mut h = vec![
            (body_size >> 20) as u8,
            (body_size >> 12) as u8,
            (body_size >> 4) as u8,
            ((body_size & 0x0F) << 4) as u8 | ((header_size >> 9) & 0x0F) as u8,
            (header_size >> 1) as u8,
            ((header_size & 0x01) << 7) as u8 | (content_type & 0x3F) << 1 | ((content_subtype >> 8) & 0x01) as u8,
            content_subtype as u8,
        ];
        h.push(0xC0 | 0x0C);
        h.push((name.len() + 1) as u8 & 0x7F);
        h.push(0xF0);
        h.extend_from_slice(name.as_bytes());
        h
    }

    /// MSC data group with CRC, segment field and a 2-byte transport id
    pub fn mot_data_group(dg_type: u8, transport_id: u16, segment: u16, last: bool, data: &[u8]) -> Vec<u8> {
        let mut dg = vec![0x40 | 0x20 | 0x10 | (dg_type & 0x0F), 0x00];
        let field = (segment & 0x7FFF) | if last { 0x8000 } else { 0 };
        dg.extend(field.to_be_bytes());
        dg.push(0x10 | 0x02);
        dg.extend(transport_id.to_be_bytes());
        dg.extend(((data.len() & 0x1FFF) as u16).to_be_bytes());
        dg.extend_from_slice(data);
        append_crc16(&mut dg);
        dg
    }

    /// Data group length indicator sub-field
    pub fn dgli(len: usize) -> Vec<u8> {
        let mut v = vec![((len >> 8) & 0x3F) as u8, len as u8];
        append_crc16(&mut v);
        v
    }

    /// Variable size X-PAD with contents indicators, in frame order, and
    /// the matching F-PAD
    pub fn xpad_variable(subfields: &[(u8, &[u8])]) -> (Vec<u8>, [u8; 2]) {
        assert!(!subfields.is_empty() && subfields.len() <= 4);
        let mut content = Vec::new();
        let mut fields = Vec::new();
        for &(app, data) in subfields {
            let index = XPAD_LENGTHS
                .iter()
                .position(|&l| l >= data.len())
                .unwrap_or_else(|| panic!("{} bytes do not fit one sub-field", data.len()));
            content.push((index as u8) << 5 | (app & 0x1F));
            let mut field = data.to_vec();
            field.resize(XPAD_LENGTHS[index], 0);
            fields.extend(field);
        }
        if subfields.len() < 4 {
            content.push(0);
        }
        content.extend(fields);
        content.reverse();
        (content, [0x20, 0x02])
    }
}

/// Builds complex baseband transmission frames
pub struct Modulator {
    params: &'static DabParams,
    reference: Vec<Complex32>,
    carrier_bins: Vec<usize>,
    ifft: Arc<dyn Fft<f32>>,
}

impl Modulator {
    pub fn new(params: &'static DabParams) -> Self {
        Self {
            params,
            reference: PhaseReference::new(params).bins().to_vec(),
            carrier_bins: FreqInterleaver::new(params)
                .iter()
                .map(|k| carrier_bin(k, params.t_u))
                .collect(),
            ifft: FftPlanner::<f32>::new().plan_fft_inverse(params.t_u),
        }
    }

    fn symbol(&self, bins: &[Complex32]) -> Vec<Complex32> {
        let p = self.params;
        let mut time = bins.to_vec();
        self.ifft.process(&mut time);
        let scale = 1.0 / (p.k as f32).sqrt();
        time[p.t_u - p.t_g..]
            .iter()
            .chain(time.iter())
            .map(|s| s * scale)
            .collect()
    }

    /// One frame: null symbol, phase reference and DQPSK symbols. The FIC
    /// carries `fibs`, the MSC zero bits.
    pub fn frame(&self, fibs: &[Vec<u8>]) -> Vec<Complex32> {
        let p = self.params;
        let per_block = p.fibs_per_block();
        assert_eq!(fibs.len(), per_block * p.cifs_per_frame());
        let fic: Vec<u8> = fibs
            .chunks(per_block)
            .flat_map(|block| fic_block_bits(p, block))
            .collect();

        let mut samples = vec![Complex32::new(0.0, 0.0); p.t_null];
        let mut phases = self.reference.clone();
        samples.extend(self.symbol(&phases));

        let n = p.bits_per_symbol();
        for symbol in 1..p.l {
            let first = (symbol - 1) * n;
            let bits = fic.get(first..first + n);
            for (i, &bin) in self.carrier_bins.iter().enumerate() {
                let (b0, b1) = bits.map_or((0, 0), |b| (b[i], b[p.k + i]));
                let z = Complex32::new(1.0 - 2.0 * b0 as f32, 1.0 - 2.0 * b1 as f32) * FRAC_1_SQRT_2;
                phases[bin] *= z;
            }
            samples.extend(self.symbol(&phases));
        }
        samples
    }
}

/// Unit magnitude samples with random phase
pub fn noise(n: usize, seed: u64) -> Vec<Complex32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| Complex32::from_polar(1.0, rng.random_range(0.0..std::f32::consts::TAU)))
        .collect()
}

/// Plays a fixed sample buffer once, then reports end of stream
pub struct MemoryDevice {
    samples: Vec<Complex32>,
    pos: Mutex<usize>,
    frequency: AtomicU32,
    stopped: AtomicBool,
}

impl MemoryDevice {
    pub fn new(samples: Vec<Complex32>) -> Self {
        Self {
            samples,
            pos: Mutex::new(0),
            frequency: AtomicU32::new(0),
            stopped: AtomicBool::new(false),
        }
    }
}

impl InputDevice for MemoryDevice {
    fn name(&self) -> String {
        "Memory device".to_string()
    }

    fn get_samples(&self, buf: &mut [Complex32]) -> Result<usize, DeviceError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut pos = self.pos.lock().unwrap();
        let n = buf.len().min(self.samples.len() - *pos);
        buf[..n].copy_from_slice(&self.samples[*pos..*pos + n]);
        *pos += n;
        Ok(n)
    }

    fn set_frequency(&self, hz: u32) -> Result<(), DeviceError> {
        self.frequency.store(hz, Ordering::Relaxed);
        Ok(())
    }

    fn frequency(&self) -> u32 {
        self.frequency.load(Ordering::Relaxed)
    }

    fn set_gain(&self, _db: f32) -> Result<(), DeviceError> {
        Ok(())
    }

    fn set_agc(&self, _enabled: bool) -> Result<(), DeviceError> {
        Ok(())
    }

    fn reset(&self) {
        *self.pos.lock().unwrap() = 0;
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn restart(&self) -> Result<(), DeviceError> {
        self.stopped.store(false, Ordering::SeqCst);
        Ok(())
    }
}
