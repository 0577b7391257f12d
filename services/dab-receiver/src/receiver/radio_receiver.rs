//! One tuned channel: the pipeline thread from samples to events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{error, info, warn};

use crate::dab::{DabParams, Ensemble};
use crate::device::InputDevice;
use crate::dispatch::EventSender;
use crate::error::{ReceiverError, Result};
use crate::events::RadioEvent;
use crate::fic::FicHandler;
use crate::msc::{MscHandler, Subscriptions};
use crate::ofdm::{OfdmProcessor, RunOutcome, SymbolSink, SyncState};
use crate::stats::ReceiverStats;

/// Options of the receive pipeline
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// DAB transmission mode 1-4
    pub mode: u8,
    /// Failed synchronisation attempts before the signal counts as lost
    pub sync_loss_threshold: usize,
    /// Bound of every handler's event queue
    pub event_queue_depth: usize,
}

impl Default for ReceiverOptions {
    fn default() -> Self {
        Self {
            mode: 1,
            sync_loss_threshold: 5,
            event_queue_depth: 64,
        }
    }
}

/// Receives the pipeline's symbols on its thread
struct PipelineSink {
    fic: FicHandler,
    msc: Option<MscHandler>,
    subscriptions: Subscriptions,
    sync_state: Arc<Mutex<SyncState>>,
    events: EventSender<RadioEvent>,
}

impl SymbolSink for PipelineSink {
    fn sync_state(&mut self, state: SyncState) {
        if let Ok(mut current) = self.sync_state.lock() {
            *current = state;
        }
        self.events.send(RadioEvent::SyncChanged(state));
    }

    fn signal_presence(&mut self, present: bool) {
        self.events.send(RadioEvent::SignalPresence(present));
    }

    fn fic_symbol(&mut self, index: usize, bits: &[i16]) {
        let events = self.fic.process_symbol(index, bits);
        self.events.send_all(events);
    }

    fn msc_symbol(&mut self, index: usize, bits: &[i16]) {
        if let Some(msc) = self.msc.as_mut() {
            msc.process_symbol(index, bits);
        }
    }

    fn wants_msc(&self) -> bool {
        self.msc.is_some() && !self.subscriptions.is_empty()
    }
}

pub struct RadioReceiver {
    device: Arc<dyn InputDevice>,
    running: Arc<AtomicBool>,
    pipeline: Option<JoinHandle<()>>,
    ensemble: Arc<RwLock<Ensemble>>,
    subscriptions: Subscriptions,
    sync_state: Arc<Mutex<SyncState>>,
    scan: bool,
}

impl RadioReceiver {
    /// Start the pipeline on an already tuned device. In scan mode only the
    /// FIC is decoded.
    pub fn start(
        device: Arc<dyn InputDevice>,
        options: &ReceiverOptions,
        scan: bool,
        events: EventSender<RadioEvent>,
        stats: Arc<ReceiverStats>,
    ) -> Result<Self> {
        let params = DabParams::for_mode(options.mode);
        let running = Arc::new(AtomicBool::new(true));
        let ensemble = Arc::new(RwLock::new(Ensemble::new()));
        let subscriptions = Subscriptions::new();
        let sync_state = Arc::new(Mutex::new(SyncState::NoSignal));

        let sink = PipelineSink {
            fic: FicHandler::new(params, ensemble.clone(), stats.clone()),
            msc: (!scan).then(|| MscHandler::new(params, subscriptions.clone(), stats.clone())),
            subscriptions: subscriptions.clone(),
            sync_state: sync_state.clone(),
            events,
        };
        let processor = OfdmProcessor::new(
            params,
            device.clone(),
            running.clone(),
            options.sync_loss_threshold,
            stats,
        );

        let thread_device = device.clone();
        let thread_running = running.clone();
        let pipeline = thread::Builder::new()
            .name("dab-pipeline".to_string())
            .spawn(move || run_pipeline(processor, sink, thread_device, thread_running))
            .map_err(ReceiverError::Thread)?;

        info!("Receiver started (mode {}{})", options.mode, if scan { ", scan" } else { "" });

        Ok(Self {
            device,
            running,
            pipeline: Some(pipeline),
            ensemble,
            subscriptions,
            sync_state,
            scan,
        })
    }

    pub fn ensemble(&self) -> &Arc<RwLock<Ensemble>> {
        &self.ensemble
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    pub fn is_scan(&self) -> bool {
        self.scan
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state.lock().map(|s| *s).unwrap_or(SyncState::NoSignal)
    }

    /// Whether the pipeline thread is still processing
    pub fn is_running(&self) -> bool {
        self.pipeline.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Stop the device, join the pipeline and drop every subscription
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.device.stop();
        if let Some(pipeline) = self.pipeline.take() {
            if pipeline.join().is_err() {
                error!("Pipeline thread panicked");
            }
            info!("Receiver stopped");
        }
        self.subscriptions.clear();
    }
}

impl Drop for RadioReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pipeline(
    mut processor: OfdmProcessor,
    mut sink: PipelineSink,
    device: Arc<dyn InputDevice>,
    running: Arc<AtomicBool>,
) {
    match processor.run(&mut sink) {
        Ok(RunOutcome::Stopped) => {}
        Ok(RunOutcome::EndOfStream) => {
            sink.events.send(RadioEvent::EndOfStream);
        }
        Err(e) => {
            warn!("Stopping device {} after fault: {}", device.name(), e);
            device.stop();
            sink.events.send(RadioEvent::DeviceFault(e.to_string()));
        }
    }
    running.store(false, Ordering::SeqCst);
}
