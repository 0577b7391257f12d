//! OFDM frame synchronisation and demodulation
//!
//! Frame timing comes from the null symbol, fine timing and frequency from
//! the phase reference symbol. Every following symbol is transformed,
//! differentially demodulated against its predecessor, de-interleaved and
//! turned into soft bits which are handed to a [`SymbolSink`].

use std::f32::consts::TAU;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::freq_interleaver::FreqInterleaver;
use super::phase_reference::{carrier_bin, PhaseReference, SEARCH_RANGE};
use super::sample_reader::{ReadError, SampleReader};
use crate::dab::constants::SAMPLE_RATE;
use crate::dab::DabParams;
use crate::device::InputDevice;
use crate::error::DeviceError;
use crate::stats::ReceiverStats;

/// Moving average length for null symbol detection
const NULL_WINDOW: usize = 50;

/// Level ratio below which the input counts as a null symbol
const NULL_ENTER_RATIO: f32 = 0.5;

/// Level ratio above which the null symbol has ended
const NULL_LEAVE_RATIO: f32 = 0.75;

/// Loop gain of the per-frame fine frequency update
const FINE_LOOP_GAIN: f32 = 0.5;

/// Mean magnitude below which the input is considered silent
const SILENCE_LEVEL: f32 = 1e-6;

/// Soft bit scale, soft bits lie in -127..=127
const SOFT_SCALE: f32 = 127.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncState {
    NoSignal,
    SignalDetected,
    Synchronized,
}

/// Consumer of demodulated symbols and synchronisation events
pub trait SymbolSink {
    fn sync_state(&mut self, state: SyncState);

    fn signal_presence(&mut self, present: bool);

    /// Soft bits of FIC symbol `index` (0-based) of the current frame
    fn fic_symbol(&mut self, index: usize, bits: &[i16]);

    /// Soft bits of MSC symbol `index` (0-based) of the current frame
    fn msc_symbol(&mut self, index: usize, bits: &[i16]);

    /// Whether MSC symbols are needed at all
    fn wants_msc(&self) -> bool {
        true
    }

    /// Called after the last symbol of a frame
    fn frame_done(&mut self) {}
}

/// How the processing loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped,
    EndOfStream,
}

pub struct OfdmProcessor {
    params: &'static DabParams,
    reader: SampleReader,
    reference: PhaseReference,
    /// FFT bin of each logical carrier, in de-interleaved order
    carrier_bins: Vec<usize>,
    fft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex32>,
    coarse_carriers: i32,
    fine_hz: f32,
    sync_loss_threshold: usize,
    failures: usize,
    state: Option<SyncState>,
    presence: Option<bool>,
    stats: Arc<ReceiverStats>,
}

impl OfdmProcessor {
    pub fn new(
        params: &'static DabParams,
        device: Arc<dyn InputDevice>,
        running: Arc<AtomicBool>,
        sync_loss_threshold: usize,
        stats: Arc<ReceiverStats>,
    ) -> Self {
        let interleaver = FreqInterleaver::new(params);
        let carrier_bins = interleaver.iter().map(|k| carrier_bin(k, params.t_u)).collect();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(params.t_u);
        let scratch = vec![Complex32::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        Self {
            params,
            reader: SampleReader::new(device, running),
            reference: PhaseReference::new(params),
            carrier_bins,
            fft,
            scratch,
            coarse_carriers: 0,
            fine_hz: 0.0,
            sync_loss_threshold: sync_loss_threshold.max(1),
            failures: 0,
            state: None,
            presence: None,
            stats,
        }
    }

    /// Run until stopped or the input ends. Device errors are returned.
    pub fn run(&mut self, sink: &mut dyn SymbolSink) -> Result<RunOutcome, DeviceError> {
        info!(
            "OFDM processor started (mode {}, T_u={}, K={})",
            self.params.mode, self.params.t_u, self.params.k
        );
        self.set_state(SyncState::NoSignal, sink);

        match self.process(sink) {
            Ok(()) | Err(ReadError::Stopped) => Ok(RunOutcome::Stopped),
            Err(ReadError::EndOfStream) => {
                info!("Input stream ended");
                Ok(RunOutcome::EndOfStream)
            }
            Err(ReadError::Device(e)) => {
                warn!("Device failure in OFDM processor: {}", e);
                Err(e)
            }
        }
    }

    fn process(&mut self, sink: &mut dyn SymbolSink) -> Result<(), ReadError> {
        let mut null_already_seen = false;

        loop {
            if !null_already_seen {
                if !self.find_null_end()? {
                    self.sync_failure(sink);
                    continue;
                }
                if self.state != Some(SyncState::Synchronized) {
                    self.set_state(SyncState::SignalDetected, sink);
                }
            }

            let Some((prs, margin)) = self.acquire()? else {
                self.sync_failure(sink);
                null_already_seen = false;
                continue;
            };

            self.failures = 0;
            self.set_state(SyncState::Synchronized, sink);
            if self.presence != Some(true) {
                self.presence = Some(true);
                sink.signal_presence(true);
            }

            let signal_power = self.demodulate_frame(prs, margin, sink)?;
            null_already_seen = self.check_null(margin, signal_power)?;
            if !null_already_seen {
                trace!("Null symbol not where expected, searching");
            }
        }
    }

    fn set_state(&mut self, state: SyncState, sink: &mut dyn SymbolSink) {
        if self.state != Some(state) {
            debug!("Sync state {:?} -> {:?}", self.state, state);
            self.state = Some(state);
            sink.sync_state(state);
        }
    }

    fn sync_failure(&mut self, sink: &mut dyn SymbolSink) {
        self.failures += 1;
        if self.state == Some(SyncState::Synchronized) {
            self.set_state(SyncState::SignalDetected, sink);
        }
        if self.failures >= self.sync_loss_threshold && self.presence != Some(false) {
            info!("Signal lost after {} failed synchronisation attempts", self.failures);
            self.stats.record_sync_loss();
            self.set_state(SyncState::NoSignal, sink);
            self.presence = Some(false);
            sink.signal_presence(false);
            self.coarse_carriers = 0;
            self.fine_hz = 0.0;
            self.apply_offset();
        }
    }

    fn offset_hz(&self) -> f32 {
        self.coarse_carriers as f32 * self.params.carrier_diff as f32 + self.fine_hz
    }

    fn apply_offset(&mut self) {
        let hz = self.offset_hz();
        self.reader.set_offset_hz(hz as f64);
        self.stats.set_freq_offset_hz(hz);
    }

    /// Search for the end of a null symbol. False when none was found
    /// within one frame duration.
    fn find_null_end(&mut self) -> Result<bool, ReadError> {
        let p = self.params;
        let mut window = [0f32; NULL_WINDOW];
        let mut sum = 0f32;
        for slot in window.iter_mut() {
            *slot = self.reader.next_sample()?.norm();
            sum += *slot;
        }
        let mut idx = 0;

        let level = self.reader.level();
        if level < SILENCE_LEVEL {
            self.reader.skip(p.t_f)?;
            self.stats.set_samples(self.reader.samples_read());
            return Ok(false);
        }

        let mut consumed = 0;
        while sum / (NULL_WINDOW as f32) > NULL_ENTER_RATIO * self.reader.level() {
            if consumed > p.t_f {
                return Ok(false);
            }
            let v = self.reader.next_sample()?.norm();
            sum += v - window[idx];
            window[idx] = v;
            idx = (idx + 1) % NULL_WINDOW;
            consumed += 1;
        }

        let mut in_null = 0;
        while sum / (NULL_WINDOW as f32) < NULL_LEAVE_RATIO * self.reader.level() {
            if in_null > p.t_null + NULL_WINDOW {
                return Ok(false);
            }
            let v = self.reader.next_sample()?.norm();
            sum += v - window[idx];
            window[idx] = v;
            idx = (idx + 1) % NULL_WINDOW;
            in_null += 1;
        }

        Ok(true)
    }

    fn transform(&mut self, time: &[Complex32]) -> Vec<Complex32> {
        let mut spectrum = time.to_vec();
        self.fft.process_with_scratch(&mut spectrum, &mut self.scratch);
        spectrum
    }

    /// Multiply already buffered samples by the ramp a new offset of `hz`
    /// would have applied, so they line up with what the reader delivers next
    fn ramp_correct(samples: &mut [Complex32], hz: f32) {
        let n0 = samples.len() as f32;
        let step = -TAU * hz / SAMPLE_RATE as f32;
        for (n, s) in samples.iter_mut().enumerate() {
            *s *= Complex32::from_polar(1.0, step * (n as f32 - n0));
        }
    }

    /// Acquire the phase reference symbol that follows a null symbol.
    ///
    /// Returns its spectrum and the timing margin used for every symbol
    /// window of the frame, or None when the frame must be dropped.
    fn acquire(&mut self) -> Result<Option<(Vec<Complex32>, usize)>, ReadError> {
        let p = self.params;
        let mut buf = vec![Complex32::new(0.0, 0.0); p.t_u];
        self.reader.read(&mut buf)?;
        let mut spectrum = self.transform(&buf);

        let coarse = self.reference.estimate_carrier_offset(&spectrum);
        if coarse != 0 {
            self.coarse_carriers += coarse;
            if self.coarse_carriers.abs() > SEARCH_RANGE {
                debug!("Coarse offset {} out of range, resetting", self.coarse_carriers);
                self.coarse_carriers = 0;
                self.apply_offset();
                return Ok(None);
            }
            debug!("Coarse frequency correction {} carriers", self.coarse_carriers);
            self.apply_offset();
            Self::ramp_correct(&mut buf, coarse as f32 * p.carrier_diff as f32);
            spectrum = self.transform(&buf);
        }

        let timing = self.reference.estimate_timing(&spectrum);
        if !timing.is_valid() {
            trace!("Phase reference rejected, peak ratio {:.1}", timing.peak_ratio);
            return Ok(None);
        }

        let margin = p.t_g / 4;
        let start = timing.offset - margin as i32;
        if start < 0 {
            trace!("Phase reference window late by {} samples", -start);
            return Ok(None);
        }
        let start = start as usize;

        self.reader.read_into(&mut buf, start)?;

        // Cyclic prefix correlation for the residual fine offset
        let useful = timing.offset as usize;
        let cp_begin = useful.saturating_sub(p.t_g);
        let corr: Complex32 = (cp_begin..start)
            .map(|j| buf[j + p.t_u] * buf[j].conj())
            .sum();
        let delta = corr.arg() / TAU * p.carrier_diff as f32;
        self.fine_hz += delta;
        self.fold_fine_offset();
        self.apply_offset();
        Self::ramp_correct(&mut buf, delta);

        let prs = self.transform(&buf[start..start + p.t_u]);
        Ok(Some((prs, margin)))
    }

    fn fold_fine_offset(&mut self) {
        let half = self.params.carrier_diff as f32 / 2.0;
        if self.fine_hz > half {
            self.fine_hz -= self.params.carrier_diff as f32;
            self.coarse_carriers += 1;
        } else if self.fine_hz < -half {
            self.fine_hz += self.params.carrier_diff as f32;
            self.coarse_carriers -= 1;
        }
    }

    /// Demodulate the data symbols of one frame. Returns the mean power of
    /// the received symbols.
    fn demodulate_frame(
        &mut self,
        prs: Vec<Complex32>,
        margin: usize,
        sink: &mut dyn SymbolSink,
    ) -> Result<f32, ReadError> {
        let p = self.params;
        let fic_symbols = p.fic_symbols();
        let wants_msc = sink.wants_msc();

        let mut previous = prs;
        let mut block = vec![Complex32::new(0.0, 0.0); p.t_s];
        let mut bits = vec![0i16; 2 * p.k];
        let mut fine_corr = Complex32::new(0.0, 0.0);
        let mut power = 0f32;

        for symbol in 1..p.l {
            self.reader.read(&mut block)?;
            for j in margin..p.t_g {
                fine_corr += block[j + p.t_u] * block[j].conj();
            }
            power += block.iter().map(|s| s.norm_sqr()).sum::<f32>();

            let spectrum = self.transform(&block[p.t_g..]);

            let is_fic = symbol <= fic_symbols;
            if is_fic || wants_msc {
                for (i, &bin) in self.carrier_bins.iter().enumerate() {
                    let z = spectrum[bin] * previous[bin].conj();
                    let magnitude = z.norm();
                    if magnitude > 0.0 {
                        bits[i] = (z.re / magnitude * SOFT_SCALE) as i16;
                        bits[p.k + i] = (z.im / magnitude * SOFT_SCALE) as i16;
                    } else {
                        bits[i] = 0;
                        bits[p.k + i] = 0;
                    }
                }

                if is_fic {
                    sink.fic_symbol(symbol - 1, &bits);
                } else {
                    sink.msc_symbol(symbol - 1 - fic_symbols, &bits);
                }
            }

            previous = spectrum;
        }

        self.fine_hz += FINE_LOOP_GAIN * fine_corr.arg() / TAU * p.carrier_diff as f32;
        self.fold_fine_offset();
        self.apply_offset();

        sink.frame_done();
        self.stats.record_frame();
        self.stats.set_samples(self.reader.samples_read());

        Ok(power / ((p.l - 1) * p.t_s) as f32)
    }

    /// Check that the next null symbol sits where frame timing predicts.
    /// Also updates the signal-to-noise estimate.
    fn check_null(&mut self, margin: usize, signal_power: f32) -> Result<bool, ReadError> {
        let p = self.params;
        let mut null = vec![Complex32::new(0.0, 0.0); p.t_null];
        self.reader.read(&mut null)?;

        let tail = &null[margin..];
        let mean = tail.iter().map(|s| s.norm()).sum::<f32>() / tail.len() as f32;
        let noise = tail.iter().map(|s| s.norm_sqr()).sum::<f32>() / tail.len() as f32;
        if noise > 0.0 && signal_power > noise {
            self.stats.set_snr_db(10.0 * ((signal_power - noise) / noise).log10());
        }

        Ok(mean < NULL_ENTER_RATIO * self.reader.level())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dab::EepProfile;
    use crate::device::NullDevice;
    use crate::test_signal::{fig, noise, MemoryDevice, Modulator};
    use std::sync::atomic::Ordering;

    #[derive(Default)]
    struct Recorder {
        states: Vec<SyncState>,
        presence: Vec<bool>,
        stop_after_presence: Option<Arc<AtomicBool>>,
    }

    impl SymbolSink for Recorder {
        fn sync_state(&mut self, state: SyncState) {
            self.states.push(state);
        }
        fn signal_presence(&mut self, present: bool) {
            self.presence.push(present);
            if let Some(running) = &self.stop_after_presence {
                running.store(false, Ordering::SeqCst);
            }
        }
        fn fic_symbol(&mut self, _index: usize, _bits: &[i16]) {}
        fn msc_symbol(&mut self, _index: usize, _bits: &[i16]) {}
    }

    #[test]
    fn test_silence_reports_no_signal() {
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(ReceiverStats::new());
        let mut processor = OfdmProcessor::new(
            DabParams::for_mode(2),
            Arc::new(NullDevice::new(false)),
            running.clone(),
            3,
            stats.clone(),
        );
        let mut sink = Recorder {
            stop_after_presence: Some(running),
            ..Default::default()
        };

        let outcome = processor.run(&mut sink).unwrap();
        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(sink.states, vec![SyncState::NoSignal]);
        assert_eq!(sink.presence, vec![false]);
        assert_eq!(stats.snapshot().sync_losses, 1);
    }

    #[test]
    fn test_reacquires_after_dropout() {
        let params = DabParams::for_mode(2);
        let modulator = Modulator::new(params);
        let fibs = vec![
            fig::fib(&[
                fig::fig0_ensemble(0x4FFE),
                fig::fig0_subchannel_long(3, 84, EepProfile::A, 3, 72),
            ]),
            fig::fib(&[fig::fig1_label(0, 0x4FFE, "Test Mux", 0xFF00)]),
            fig::fib(&[fig::fig0_service(0xD210, 3, 63)]),
        ];
        let null = vec![Complex32::new(0.0, 0.0); params.t_null];

        let mut samples = noise(1000, 3);
        for _ in 0..3 {
            samples.extend(modulator.frame(&fibs));
        }
        samples.extend_from_slice(&null);
        // No null symbol for six frame durations
        samples.extend(noise(6 * params.t_f, 11));
        for _ in 0..3 {
            samples.extend(modulator.frame(&fibs));
        }
        samples.extend_from_slice(&null);

        let stats = Arc::new(ReceiverStats::new());
        let mut processor = OfdmProcessor::new(
            params,
            Arc::new(MemoryDevice::new(samples)),
            Arc::new(AtomicBool::new(true)),
            3,
            stats.clone(),
        );
        let mut sink = Recorder::default();

        assert_eq!(processor.run(&mut sink).unwrap(), RunOutcome::EndOfStream);
        assert_eq!(sink.presence, vec![true, false, true]);

        let lost = sink
            .states
            .iter()
            .rposition(|s| *s == SyncState::NoSignal)
            .unwrap();
        assert!(sink.states[..lost].contains(&SyncState::Synchronized));
        assert!(sink.states[lost..].contains(&SyncState::Synchronized));
        assert_eq!(stats.snapshot().sync_losses, 1);
        assert_eq!(stats.snapshot().frames, 6);
    }

    #[test]
    fn test_ramp_correction_is_continuous_at_the_end() {
        let mut samples = vec![Complex32::new(1.0, 0.0); 100];
        OfdmProcessor::ramp_correct(&mut samples, 4000.0);
        assert!((samples[99] - Complex32::new(1.0, 0.0)).norm() < 0.05);
        let expected = Complex32::from_polar(1.0, TAU * 4000.0 * 100.0 / SAMPLE_RATE as f32);
        assert!((samples[0] - expected).norm() < 1e-3);
    }
}
