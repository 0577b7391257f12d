//! DAB Receiver - RTL-SDR based DAB/DAB+ radio
//!
//! Tunes a Band III channel, decodes the ensemble and follows one service,
//! or scans every channel and prints the audio services found as JSON.

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::block_in_place;
use tokio::time::{interval, timeout, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use dab_receiver::ofdm::SyncState;
use dab_receiver::{Config, ProgrammeEvent, RadioController, RadioEvent, ScanResult};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("===========================================");
    info!("   DAB Receiver - Native RTL-SDR");
    info!("   DAB/DAB+ decoder in Rust");
    info!("===========================================");

    // Load configuration
    let config = Config::from_env();

    info!("Configuration:");
    info!("  Device: {}", config.device);
    info!("  Gain: {}", if config.gain_db < 0.0 { "AGC".to_string() } else { format!("{} dB", config.gain_db) });
    info!("  Mode: {}", config.mode);
    if config.scan {
        info!("  Scan: all {} channels", RadioController::channel_names().len());
    } else {
        info!("  Channel: {}", config.channel);
        info!("  Service: {}", config.service.as_deref().unwrap_or("(none)"));
    }
    info!("  rtl_sdr path: {}", config.rtl_sdr_path);
    info!("  PPM error: {}", config.ppm_error);

    // Ensemble events come from the controller's dispatcher thread, which
    // blocks while this queue is full
    let (radio_tx, mut radio_rx) = mpsc::channel::<RadioEvent>(config.event_queue_depth.max(1));
    let mut controller = RadioController::new(config.receiver_options(), move |event: RadioEvent| {
        let _ = radio_tx.blocking_send(event);
    })
    .context("Failed to start receiver")?
    .with_rtl_config(config.rtl_config());

    let device = controller
        .init_device(&config.device, config.gain_db)
        .context("Failed to open input device")?;
    if device.fallback {
        warn!("Using {} instead of '{}', no signal will be received", device.name, config.device);
    }

    let result = if config.scan {
        run_scan(&mut controller, &mut radio_rx, &config).await
    } else {
        run_receiver(&mut controller, &mut radio_rx, &config).await
    };

    block_in_place(|| controller.close_device());
    drop(controller);

    info!("Shutdown complete.");
    result
}

/// Counters of the followed service
#[derive(Default)]
struct ProgrammeCounters {
    access_units: u64,
    audio_errors: u64,
    frame_errors: u64,
    mode: Option<String>,
}

impl ProgrammeCounters {
    fn record(&mut self, sid: u32, event: ProgrammeEvent) {
        match event {
            ProgrammeEvent::AccessUnit(unit) => {
                self.access_units += 1;
                if unit.error {
                    self.audio_errors += 1;
                }
                let mode = unit.format.mode();
                if self.mode.as_deref() != Some(mode.as_str()) {
                    info!("Service {:04X} audio: {}, {} Hz", sid, mode, unit.format.sample_rate);
                    self.mode = Some(mode);
                }
            }
            ProgrammeEvent::NewAudio { pcm, sample_rate, .. } => {
                debug!("Service {:04X}: {} PCM samples at {} Hz", sid, pcm.len(), sample_rate);
            }
            ProgrammeEvent::DynamicLabel(label) => info!("Service {:04X} text: {}", sid, label),
            ProgrammeEvent::Mot(file) => info!(
                "Service {:04X} slide: \"{}\" ({}, {} bytes)",
                sid,
                file.name,
                file.mime,
                file.data.len()
            ),
            ProgrammeEvent::FrameErrors(n) => self.frame_errors += n as u64,
            ProgrammeEvent::RsErrors { uncorrectable, .. } if uncorrectable > 0 => {
                debug!("Service {:04X}: {} uncorrectable RS codewords", sid, uncorrectable);
            }
            ProgrammeEvent::RsErrors { .. } | ProgrammeEvent::AacErrors(_) => {}
        }
    }
}

fn log_radio_event(event: &RadioEvent, controller: &RadioController) {
    match event {
        RadioEvent::SyncChanged(state) => info!("Sync: {:?}", state),
        RadioEvent::SignalPresence(present) => {
            info!("Signal {}", if *present { "present" } else { "lost" })
        }
        RadioEvent::NewEnsemble(eid) => info!("Ensemble {:04X}", eid),
        RadioEvent::EnsembleLabel(label) => info!("Ensemble label: {}", label.trim_end()),
        RadioEvent::ServiceDetected(sid) => debug!("Service {:04X} detected", sid),
        RadioEvent::ServiceLabel { sid, label } => info!(
            "Service {:04X}: {}{}",
            sid,
            label.trim_end(),
            if controller.is_audio_service(*sid) { "" } else { " (data)" }
        ),
        RadioEvent::DateTime(dt) => debug!("Ensemble time {}", dt),
        RadioEvent::DeviceFault(reason) => error!("Device fault: {}", reason),
        RadioEvent::EndOfStream => info!("End of input stream"),
    }
}

fn log_stats(controller: &RadioController, counters: &ProgrammeCounters) {
    let stats = controller.stats();
    info!(
        "[DAB Stats] sync={:?} frames={} fic={:.1}% snr={:.1}dB offset={:.0}Hz",
        controller.sync_state(),
        stats.frames,
        stats.fic_quality(),
        stats.snr_db,
        stats.freq_offset_hz
    );
    if stats.superframes > 0 || counters.access_units > 0 {
        info!(
            "[DAB Stats] superframes={} rs_corrected={} rs_failed={} au={} au_errors={} frame_errors={}",
            stats.superframes,
            stats.rs_corrected,
            stats.rs_uncorrectable,
            counters.access_units,
            stats.au_errors,
            counters.frame_errors
        );
    }
}

/// The configured service, once its label or id is known
fn resolve_service(controller: &RadioController, config: &Config) -> Option<u32> {
    config
        .service_id()
        .or_else(|| config.service.as_deref().and_then(|label| controller.find_service_by_label(label)))
}

async fn run_receiver(
    controller: &mut RadioController,
    radio_rx: &mut Receiver<RadioEvent>,
    config: &Config,
) -> Result<()> {
    controller
        .set_channel(&config.channel, false)
        .with_context(|| format!("Failed to tune channel {}", config.channel))?;

    let (programme_tx, mut programme_rx) = mpsc::channel::<ProgrammeEvent>(config.event_queue_depth.max(1));
    let mut subscribed: Option<u32> = None;
    let mut counters = ProgrammeCounters::default();
    let discovery_deadline = Instant::now() + Duration::from_secs(config.service_discovery_timeout_secs);
    let mut discovery_reported = false;
    let mut stats_timer = interval(Duration::from_millis(config.stats_interval_ms.max(100)));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!("===========================================");
    info!("  Receiving channel {}...", config.channel);
    info!("  Press Ctrl+C to stop.");
    info!("===========================================");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl+C received, stopping");
                break;
            }
            event = radio_rx.recv() => {
                let Some(event) = event else {
                    warn!("Receiver event channel closed");
                    break;
                };
                log_radio_event(&event, controller);
                match event {
                    RadioEvent::EndOfStream | RadioEvent::DeviceFault(_) => break,
                    RadioEvent::ServiceDetected(_) | RadioEvent::ServiceLabel { .. } if subscribed.is_none() => {
                        subscribed = try_subscribe(controller, config, &programme_tx);
                    }
                    _ => {}
                }
            }
            Some(event) = programme_rx.recv() => {
                counters.record(subscribed.unwrap_or_default(), event);
            }
            _ = stats_timer.tick() => {
                log_stats(controller, &counters);
                if subscribed.is_none() && config.service.is_some() {
                    subscribed = try_subscribe(controller, config, &programme_tx);
                    if subscribed.is_none() && !discovery_reported && Instant::now() >= discovery_deadline {
                        warn!(
                            "Service '{}' not found within {} s, still waiting",
                            config.service.as_deref().unwrap_or_default(),
                            config.service_discovery_timeout_secs
                        );
                        discovery_reported = true;
                    }
                }
            }
        }
    }

    // Release dispatcher threads blocked on a full queue before joining them
    radio_rx.close();
    programme_rx.close();

    if let Some(sid) = subscribed {
        if let Err(e) = block_in_place(|| controller.unsubscribe_service(sid)) {
            warn!("Failed to unsubscribe {:04X}: {}", sid, e);
        }
    }
    block_in_place(|| controller.clear_channel());
    log_stats(controller, &counters);
    Ok(())
}

fn try_subscribe(
    controller: &RadioController,
    config: &Config,
    programme_tx: &Sender<ProgrammeEvent>,
) -> Option<u32> {
    let sid = resolve_service(controller, config)?;
    let tx = programme_tx.clone();
    match controller.subscribe_service(
        sid,
        move |event: ProgrammeEvent| {
            let _ = tx.blocking_send(event);
        },
        None,
    ) {
        Ok(()) => {
            info!(
                "Playing service {:04X} ({})",
                sid,
                controller.service_name(sid).unwrap_or_default().trim_end()
            );
            Some(sid)
        }
        Err(e) => {
            // Sub-channel organisation may not have arrived yet
            debug!("Service {:04X} not ready: {}", sid, e);
            None
        }
    }
}

/// Wait for the new pipeline's first event, then for its signal verdict
async fn wait_for_signal(radio_rx: &mut Receiver<RadioEvent>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    let mut started = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, radio_rx.recv()).await {
            Ok(Some(RadioEvent::SyncChanged(SyncState::NoSignal))) if !started => started = true,
            Ok(Some(RadioEvent::SignalPresence(present))) if started => return present,
            Ok(Some(RadioEvent::EndOfStream | RadioEvent::DeviceFault(_))) if started => return false,
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return false,
        }
    }
}

async fn run_scan(
    controller: &mut RadioController,
    radio_rx: &mut Receiver<RadioEvent>,
    config: &Config,
) -> Result<()> {
    let discovery = Duration::from_secs(config.service_discovery_timeout_secs.max(1));
    let channels = RadioController::channel_names();
    let mut results: Vec<ScanResult> = Vec::with_capacity(channels.len());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    for (n, channel) in channels.iter().enumerate() {
        info!("Scanning {} ({} of {})", channel, n + 1, channels.len());
        block_in_place(|| controller.set_channel(channel, true))
            .with_context(|| format!("Failed to tune channel {}", channel))?;

        let signal = tokio::select! {
            _ = &mut ctrl_c => {
                info!("Scan stopped");
                radio_rx.close();
                block_in_place(|| controller.clear_channel());
                break;
            }
            signal = wait_for_signal(radio_rx, discovery) => signal,
        };

        if signal {
            // Let the FIC fill in services and labels
            let deadline = Instant::now() + discovery;
            while let Ok(Some(event)) = timeout(deadline.saturating_duration_since(Instant::now()), radio_rx.recv()).await {
                log_radio_event(&event, controller);
            }
        }

        let result = controller
            .scan_result()
            .filter(|_| signal)
            .unwrap_or_else(|| ScanResult::empty(channel));
        info!("{}: {} audio services", channel, result.services.len());
        results.push(result);

        while let Ok(event) = radio_rx.try_recv() {
            log_radio_event(&event, controller);
        }
        block_in_place(|| controller.clear_channel());
    }

    let found: usize = results.iter().map(|r| r.services.len()).sum();
    info!("Scan finished. Found {} radio services.", found);
    println!("{}", serde_json::to_string_pretty(&results).context("Failed to serialise scan results")?);
    Ok(())
}
