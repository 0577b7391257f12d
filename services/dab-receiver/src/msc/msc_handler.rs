//! Main Service Channel handling
//!
//! MSC symbols are collected into CIFs; every complete CIF is sliced per
//! subscribed sub-channel and run through that sub-channel's decoder and
//! audio framing. Events go to the subscription's own dispatcher.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, trace, warn};

use super::audio::{AccessUnit, AudioCodec};
use super::mp2::Mp2Framer;
use super::subchannel::{LogicalFrame, SubchannelDecoder};
use super::superframe::{SuperframeAssembler, SuperframeOutput};
use crate::dab::constants::{BITS_PER_CU, CIF_BITS};
use crate::dab::{AudioType, DabParams, Ensemble, Subchannel};
use crate::dispatch::{Dispatcher, EventHandler, EventSender};
use crate::error::{ReceiverError, Result};
use crate::events::ProgrammeEvent;
use crate::pad::{dse_pad, PadDecoder};
use crate::stats::ReceiverStats;

enum AudioPath {
    DabPlus(SuperframeAssembler),
    Mp2(Mp2Framer),
}

/// One subscribed service and its decoding chain
struct Subscription {
    sid: u32,
    subchannel: Subchannel,
    decoder: SubchannelDecoder,
    audio: AudioPath,
    pad: PadDecoder,
    codec: Option<Box<dyn AudioCodec>>,
    events: Dispatcher<ProgrammeEvent>,
}

impl Subscription {
    fn process_frame(&mut self, frame: LogicalFrame, stats: &ReceiverStats) -> Vec<ProgrammeEvent> {
        let mut events = Vec::new();
        if frame.bit_errors > 0 {
            trace!("Sub-channel {}: {} Viterbi bit errors", self.subchannel.id, frame.bit_errors);
        }

        match &mut self.audio {
            AudioPath::DabPlus(assembler) => match assembler.push_frame(&frame.data) {
                SuperframeOutput::Pending => {}
                SuperframeOutput::FrameError => {
                    stats.record_frame_error();
                    events.push(ProgrammeEvent::FrameErrors(1));
                }
                SuperframeOutput::Decoded(superframe) => {
                    stats.record_superframe(superframe.rs_corrected as u64, superframe.rs_uncorrectable as u64);
                    stats.record_au_errors(superframe.au_errors as u64);
                    events.push(ProgrammeEvent::RsErrors {
                        corrected: superframe.rs_corrected,
                        uncorrectable: superframe.rs_uncorrectable,
                    });
                    events.push(ProgrammeEvent::AacErrors(superframe.au_errors));

                    for unit in superframe.units {
                        if !unit.error {
                            if let Some(pad) = dse_pad(&unit.data).filter(|p| p.len() >= 2) {
                                let (xpad, fpad) = pad.split_at(pad.len() - 2);
                                events.extend(self.pad.process(xpad, true, [fpad[0], fpad[1]]));
                            }
                        }
                        emit_unit(&mut self.codec, unit, &mut events);
                    }
                }
            },
            AudioPath::Mp2(framer) => {
                let frames = framer.push(&frame.data);
                let errors = framer.take_frame_errors();
                if errors > 0 {
                    for _ in 0..errors {
                        stats.record_frame_error();
                    }
                    events.push(ProgrammeEvent::FrameErrors(errors));
                }
                for mp2 in frames {
                    events.extend(self.pad.process(&mp2.xpad, false, mp2.fpad));
                    emit_unit(&mut self.codec, mp2.unit, &mut events);
                }
            }
        }
        events
    }
}

/// Queue an access unit and whatever the codec makes of it
fn emit_unit(codec: &mut Option<Box<dyn AudioCodec>>, unit: AccessUnit, events: &mut Vec<ProgrammeEvent>) {
    let decoded = codec.as_mut().and_then(|codec| codec.decode(&unit));
    let mode = unit.format.mode();
    events.push(ProgrammeEvent::AccessUnit(unit));
    if let Some(audio) = decoded {
        events.push(ProgrammeEvent::NewAudio {
            pcm: audio.pcm,
            sample_rate: audio.sample_rate,
            mode,
        });
    }
}

/// Subscription table shared by the controller and the pipeline thread
#[derive(Clone, Default)]
pub struct Subscriptions {
    table: Arc<Mutex<BTreeMap<u8, Subscription>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u8, Subscription>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start decoding the audio of service `sid`; events go to `handler`
    pub fn subscribe<H>(
        &self,
        ensemble: &Ensemble,
        sid: u32,
        handler: H,
        codec: Option<Box<dyn AudioCodec>>,
        queue_depth: usize,
    ) -> Result<()>
    where
        H: EventHandler<ProgrammeEvent>,
    {
        let (component, subchannel) = ensemble
            .subchannel_for_service(sid)
            .ok_or(ReceiverError::ServiceUnknown(sid))?;
        if subchannel.bitrate() == 0 {
            warn!("Service {:04X} has an empty sub-channel {}", sid, subchannel.id);
            return Err(ReceiverError::ServiceUnknown(sid));
        }
        let audio = match component.audio_type() {
            AudioType::DabPlus => AudioPath::DabPlus(SuperframeAssembler::new(subchannel.bitrate())),
            AudioType::Mp2 => AudioPath::Mp2(Mp2Framer::new()),
            AudioType::Unknown => return Err(ReceiverError::NotAudio(sid)),
        };

        let mut table = self.lock();
        if table.contains_key(&subchannel.id) || table.values().any(|s| s.sid == sid) {
            return Err(ReceiverError::AlreadySubscribed(sid));
        }

        let events = Dispatcher::spawn(&format!("dab-svc-{:04X}", sid), queue_depth, handler)
            .map_err(ReceiverError::Thread)?;
        info!(
            "Subscribed service {:04X}: sub-channel {} ({} kbit/s, {}, start CU {}, {} CUs)",
            sid,
            subchannel.id,
            subchannel.bitrate(),
            subchannel.protection(),
            subchannel.start_addr,
            subchannel.num_cu()
        );

        table.insert(
            subchannel.id,
            Subscription {
                sid,
                subchannel: subchannel.clone(),
                decoder: SubchannelDecoder::new(subchannel),
                audio,
                pad: PadDecoder::new(),
                codec,
                events,
            },
        );
        Ok(())
    }

    /// Stop decoding service `sid`. Queued events are still delivered
    /// before this returns.
    pub fn unsubscribe(&self, sid: u32) -> Result<()> {
        let removed = {
            let mut table = self.lock();
            let id = table
                .iter()
                .find(|(_, s)| s.sid == sid)
                .map(|(id, _)| *id)
                .ok_or(ReceiverError::NotSubscribed(sid))?;
            table.remove(&id)
        };
        // Joins the dispatcher outside the lock
        drop(removed);
        info!("Unsubscribed service {:04X}", sid);
        Ok(())
    }

    /// Drop every subscription and join their workers
    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.lock());
        if !removed.is_empty() {
            debug!("Dropping {} subscriptions", removed.len());
        }
        drop(removed);
    }

    pub fn is_subscribed(&self, sid: u32) -> bool {
        self.lock().values().any(|s| s.sid == sid)
    }

    pub fn subscribed_services(&self) -> Vec<u32> {
        self.lock().values().map(|s| s.sid).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

pub struct MscHandler {
    symbols_per_cif: usize,
    cif: Vec<i16>,
    subscriptions: Subscriptions,
    stats: Arc<ReceiverStats>,
}

impl MscHandler {
    pub fn new(params: &'static DabParams, subscriptions: Subscriptions, stats: Arc<ReceiverStats>) -> Self {
        let msc_symbols = params.l - params.first_msc_symbol();
        let symbols_per_cif = msc_symbols / params.cifs_per_frame();
        debug_assert_eq!(symbols_per_cif * params.bits_per_symbol(), CIF_BITS);

        Self {
            symbols_per_cif,
            cif: Vec::with_capacity(CIF_BITS),
            subscriptions,
            stats,
        }
    }

    /// Feed MSC symbol `index` (0-based within the frame)
    pub fn process_symbol(&mut self, index: usize, bits: &[i16]) {
        let position = index % self.symbols_per_cif;
        if position == 0 {
            self.cif.clear();
        }
        self.cif.extend_from_slice(bits);

        if position + 1 == self.symbols_per_cif {
            if self.cif.len() == CIF_BITS {
                self.process_cif();
            } else {
                warn!("Incomplete CIF of {} bits dropped", self.cif.len());
            }
            self.cif.clear();
        }
    }

    fn process_cif(&mut self) {
        let mut outgoing: Vec<(EventSender<ProgrammeEvent>, Vec<ProgrammeEvent>)> = Vec::new();
        {
            let mut table = self.subscriptions.lock();
            for subscription in table.values_mut() {
                let start = subscription.subchannel.start_addr as usize * BITS_PER_CU;
                let end = (start + subscription.decoder.fragment_bits()).min(CIF_BITS);
                if start >= end {
                    continue;
                }

                let Some(frame) = subscription.decoder.process(&self.cif[start..end]) else {
                    continue;
                };
                let events = subscription.process_frame(frame, &self.stats);
                if events.is_empty() {
                    continue;
                }
                if let Some(sender) = subscription.events.sender() {
                    outgoing.push((sender, events));
                }
            }
        }

        // Blocking sends happen without the table lock held
        for (sender, events) in outgoing {
            sender.send_all(events);
        }
    }
}
