//! Radio controller: device lifecycle, tuning and service subscriptions
//!
//! State moves `NoDevice -> DeviceReady -> Tuned -> Synchronized`; the last
//! two follow the pipeline's sync state.

use std::sync::{Arc, RwLockReadGuard};

use serde::Serialize;
use tracing::{info, warn};

use super::radio_receiver::{RadioReceiver, ReceiverOptions};
use super::scan::ScanResult;
use crate::channels;
use crate::dab::{Ensemble, EnsembleInfo, ServiceInfo};
use crate::device::{open_device, DeviceInfo, InputDevice, RtlSdrConfig};
use crate::dispatch::{Dispatcher, EventHandler};
use crate::error::{ReceiverError, Result};
use crate::events::{ProgrammeEvent, RadioEvent};
use crate::msc::AudioCodec;
use crate::ofdm::SyncState;
use crate::stats::{ReceiverStats, StatsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    NoDevice,
    DeviceReady,
    Tuned,
    Synchronized,
}

pub struct RadioController {
    options: ReceiverOptions,
    rtl_config: RtlSdrConfig,
    device: Option<Arc<dyn InputDevice>>,
    device_info: Option<DeviceInfo>,
    receiver: Option<RadioReceiver>,
    channel: Option<&'static str>,
    stats: Arc<ReceiverStats>,
    // Declared last: dropped after the receiver has released its senders
    events: Dispatcher<RadioEvent>,
}

impl RadioController {
    /// `handler` receives every ensemble wide event of every channel
    pub fn new<H: EventHandler<RadioEvent>>(options: ReceiverOptions, handler: H) -> Result<Self> {
        let events = Dispatcher::spawn("dab-radio-events", options.event_queue_depth, handler)
            .map_err(ReceiverError::Thread)?;

        Ok(Self {
            options,
            rtl_config: RtlSdrConfig::default(),
            device: None,
            device_info: None,
            receiver: None,
            channel: None,
            stats: Arc::new(ReceiverStats::new()),
            events,
        })
    }

    /// Settings used when an RTL-SDR stick is opened
    pub fn with_rtl_config(mut self, config: RtlSdrConfig) -> Self {
        self.rtl_config = config;
        self
    }

    /// Open a device by name (`auto`, `rtl_sdr`, `null`, `file:<path>`).
    /// Open failures fall back to the null device, see [`DeviceInfo`].
    pub fn init_device(&mut self, name: &str, gain_db: f32) -> Result<DeviceInfo> {
        self.close_device();
        let (device, info) = open_device(name, gain_db, self.rtl_config.clone())?;
        self.device = Some(device);
        self.device_info = Some(info.clone());
        Ok(info)
    }

    /// Use a device opened by the caller
    pub fn init_with_device(&mut self, device: Arc<dyn InputDevice>) -> DeviceInfo {
        self.close_device();
        let info = DeviceInfo {
            name: device.name(),
            fallback: false,
        };
        self.device = Some(device);
        self.device_info = Some(info.clone());
        info
    }

    pub fn close_device(&mut self) {
        self.clear_channel();
        if let Some(device) = self.device.take() {
            device.stop();
            info!("Closed device {}", device.name());
        }
        self.device_info = None;
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    /// Tune to a channel and start the pipeline. An empty name clears the
    /// current channel. In scan mode only the FIC is decoded.
    pub fn set_channel(&mut self, name: &str, scan: bool) -> Result<()> {
        if name.trim().is_empty() {
            self.clear_channel();
            return Ok(());
        }
        let device = self.device.clone().ok_or(ReceiverError::NoDevice)?;
        if self.receiver.is_some() {
            return Err(ReceiverError::ChannelActive);
        }
        let channel = channels::canonical_name(name).ok_or_else(|| ReceiverError::UnknownChannel(name.to_string()))?;
        let frequency = channels::frequency(channel).ok_or_else(|| ReceiverError::UnknownChannel(name.to_string()))?;

        info!(
            "Tuning to channel {} ({:.3} MHz){}",
            channel,
            frequency as f64 / 1e6,
            if scan { " for scan" } else { "" }
        );
        device.set_frequency(frequency)?;
        device.reset();
        device.restart()?;

        let sender = self.events.sender().ok_or(ReceiverError::NoDevice)?;
        let receiver = RadioReceiver::start(device, &self.options, scan, sender, self.stats.clone())?;
        self.receiver = Some(receiver);
        self.channel = Some(channel);
        Ok(())
    }

    /// Stop the pipeline and drop all subscriptions
    pub fn clear_channel(&mut self) {
        if let Some(mut receiver) = self.receiver.take() {
            receiver.stop();
            info!("Cleared channel {}", self.channel.unwrap_or("?"));
        }
        self.channel = None;
    }

    pub fn current_channel(&self) -> Option<&'static str> {
        self.channel
    }

    pub fn channel_names() -> Vec<&'static str> {
        channels::channel_names()
    }

    pub fn state(&self) -> ControllerState {
        match (&self.device, &self.receiver) {
            (None, _) => ControllerState::NoDevice,
            (Some(_), None) => ControllerState::DeviceReady,
            (Some(_), Some(rx)) if rx.sync_state() == SyncState::Synchronized => ControllerState::Synchronized,
            (Some(_), Some(_)) => ControllerState::Tuned,
        }
    }

    pub fn sync_state(&self) -> SyncState {
        self.receiver.as_ref().map_or(SyncState::NoSignal, |rx| rx.sync_state())
    }

    /// Decode the audio of `sid`; programme events go to `handler`
    pub fn subscribe_service<H>(&self, sid: u32, handler: H, codec: Option<Box<dyn AudioCodec>>) -> Result<()>
    where
        H: EventHandler<ProgrammeEvent>,
    {
        let receiver = self.receiver.as_ref().ok_or(ReceiverError::NotTuned)?;
        if receiver.is_scan() {
            return Err(ReceiverError::ScanMode);
        }
        let ensemble = read_ensemble(receiver);
        receiver
            .subscriptions()
            .subscribe(&ensemble, sid, handler, codec, self.options.event_queue_depth)
    }

    pub fn unsubscribe_service(&self, sid: u32) -> Result<()> {
        let receiver = self.receiver.as_ref().ok_or(ReceiverError::NotTuned)?;
        receiver.subscriptions().unsubscribe(sid)
    }

    /// Label of a known service
    pub fn service_name(&self, sid: u32) -> Option<String> {
        let receiver = self.receiver.as_ref()?;
        let ensemble = read_ensemble(receiver);
        ensemble.service(sid).map(|s| s.label.utf8_label())
    }

    pub fn is_audio_service(&self, sid: u32) -> bool {
        let Some(receiver) = self.receiver.as_ref() else {
            return false;
        };
        let ensemble = read_ensemble(receiver);
        ensemble
            .service(sid)
            .map(|s| ensemble.service_info(s).is_audio())
            .unwrap_or(false)
    }

    /// Snapshot of every service of the current ensemble
    pub fn services(&self) -> Vec<ServiceInfo> {
        self.ensemble().map(|e| e.services).unwrap_or_default()
    }

    pub fn ensemble(&self) -> Option<EnsembleInfo> {
        let receiver = self.receiver.as_ref()?;
        Some(read_ensemble(receiver).snapshot())
    }

    /// Service whose long or short label matches, ignoring case and padding
    pub fn find_service_by_label(&self, label: &str) -> Option<u32> {
        let wanted = label.trim();
        self.services()
            .into_iter()
            .find(|s| s.label.trim().eq_ignore_ascii_case(wanted) || s.short_label.trim().eq_ignore_ascii_case(wanted))
            .map(|s| s.sid)
    }

    /// Audio services found on the current channel
    pub fn scan_result(&self) -> Option<ScanResult> {
        let channel = self.channel?;
        Some(ScanResult::from_ensemble(channel, &self.ensemble()?))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl Drop for RadioController {
    fn drop(&mut self) {
        self.close_device();
    }
}

fn read_ensemble(receiver: &RadioReceiver) -> RwLockReadGuard<'_, Ensemble> {
    receiver.ensemble().read().unwrap_or_else(|e| {
        warn!("Ensemble lock poisoned");
        e.into_inner()
    })
}
