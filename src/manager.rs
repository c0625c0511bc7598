//! The acquisition manager.
//!
//! [`RecordingManager`] is the context object that owns everything in the
//! core: the physical-device arena, the virtual-device registry, the
//! position clock, the annotation ledgers, and the active transport mode.
//! It is constructed once per process and passed to all consumers; there is
//! no global instance.
//!
//! One consumer context drives it: call [`advance`](RecordingManager::advance)
//! once per scheduling tick, issue reads ([`get_data`],
//! [`get_samples_envelope`]) from the same context, and register an event
//! callback for change notifications. Live transports produce on their own
//! callback threads behind lock-free rings; all manager state is mutated
//! only from the consumer side.
//!
//! [`get_data`]: RecordingManager::get_data
//! [`get_samples_envelope`]: RecordingManager::get_samples_envelope

use std::path::Path;

use crate::config::{AcquireConfig, DEFAULT_THRESHOLD};
use crate::device::{Device, DeviceArena};
use crate::event::{EventCallback, ManagerEvent};
use crate::metadata::{ChannelEntry, Marker, MetadataChunk, SpikeTrain};
use crate::threshold::ThresholdDetector;
use crate::transport::{FilePlayback, TransportDriver};
use crate::AcquireError;

#[cfg(feature = "firmware-update")]
use crate::firmware::{FirmwareImage, FirmwareSource, UpdateStage};

/// Sentinel meaning "no virtual device selected".
pub const INVALID_VIRTUAL_DEVICE_INDEX: usize = usize::MAX;

/// Seconds of samples the DC-bias accumulator covers before decaying.
const DC_DECAY_SECONDS: u32 = 4;

/// One logical recording channel exposed to analysis and UI code.
///
/// Virtual devices hold the physical device *id*, never a reference, so
/// device teardown cannot dangle.
#[derive(Debug, Clone)]
pub struct VirtualDevice {
    /// Backing physical device id within the active transport topology.
    pub device: usize,
    /// Hardware channel index on that device.
    pub channel: usize,
    /// Display name.
    pub name: String,
    /// `true` while this channel holds a reference to its physical device.
    pub enabled: bool,
    /// Threshold level for crossing detection.
    pub threshold: i32,
    /// Display range bound.
    pub bound: i32,
}

/// The active transport mode. Exactly one is live at a time; switching
/// always passes through a full teardown of the previous mode's devices.
enum Mode {
    Idle,
    File(FilePlayback),
    Serial(Box<dyn TransportDriver>),
    Hid(Box<dyn TransportDriver>),
    LiveAudio(Box<dyn TransportDriver>),
}

impl Mode {
    fn driver_mut(&mut self) -> Option<&mut dyn TransportDriver> {
        match self {
            Mode::Idle => None,
            Mode::File(playback) => Some(playback),
            Mode::Serial(driver) | Mode::Hid(driver) | Mode::LiveAudio(driver) => {
                Some(driver.as_mut())
            }
        }
    }

    fn driver(&self) -> Option<&dyn TransportDriver> {
        match self {
            Mode::Idle => None,
            Mode::File(playback) => Some(playback),
            Mode::Serial(driver) | Mode::Hid(driver) | Mode::LiveAudio(driver) => {
                Some(driver.as_ref())
            }
        }
    }

    /// Modes whose samples arrive through per-tick pulls.
    fn is_live(&self) -> bool {
        matches!(self, Mode::Serial(_) | Mode::Hid(_) | Mode::LiveAudio(_))
    }
}

/// Acquisition-and-buffering core: multiplexes physical transports into
/// virtual devices over one shared sample timeline.
pub struct RecordingManager {
    config: AcquireConfig,
    mode: Mode,
    devices: DeviceArena,
    recording_devices: Vec<VirtualDevice>,
    pos: i64,
    paused: bool,
    thresh_mode: bool,
    sample_rate: u32,
    selected_vdevice: usize,
    thresh_avg_count: usize,
    detector: ThresholdDetector,
    triggers: Vec<i64>,
    markers: Vec<Marker>,
    spike_trains: Vec<SpikeTrain>,
    serial_error: String,
    hid_error: String,
    filename: String,
    event_cb: Option<EventCallback>,
    tick_remainder: u64,
    #[cfg(feature = "firmware-update")]
    firmware: Option<Box<dyn FirmwareSource>>,
}

impl RecordingManager {
    /// Creates an idle manager with default configuration.
    pub fn new() -> Self {
        Self::with_config(AcquireConfig::default())
    }

    /// Creates an idle manager with the given configuration.
    pub fn with_config(config: AcquireConfig) -> Self {
        let thresh_avg_count = config.thresh_avg_count;
        Self {
            sample_rate: config.sample_rate,
            config,
            mode: Mode::Idle,
            devices: DeviceArena::new(),
            recording_devices: Vec::new(),
            pos: 0,
            paused: false,
            thresh_mode: false,
            selected_vdevice: INVALID_VIRTUAL_DEVICE_INDEX,
            thresh_avg_count,
            detector: ThresholdDetector::new(DEFAULT_THRESHOLD, thresh_avg_count),
            triggers: Vec::new(),
            markers: Vec::new(),
            spike_trains: Vec::new(),
            serial_error: String::new(),
            hid_error: String::new(),
            filename: String::new(),
            event_cb: None,
            tick_remainder: 0,
            #[cfg(feature = "firmware-update")]
            firmware: None,
        }
    }

    /// Registers the event callback. Replaces any previous one.
    pub fn on_event<F>(&mut self, f: F)
    where
        F: Fn(ManagerEvent) + Send + Sync + 'static,
    {
        self.event_cb = Some(crate::event::event_callback(f));
    }

    fn emit(&self, event: ManagerEvent) {
        if let Some(cb) = &self.event_cb {
            cb(event);
        }
    }

    // --- timeline & state accessors ---

    /// Current absolute sample position.
    pub fn pos(&self) -> i64 {
        self.pos
    }

    /// Whether acquisition is paused.
    pub fn paused(&self) -> bool {
        self.paused
    }

    /// Whether threshold detection is active.
    pub fn thresh_mode(&self) -> bool {
        self.thresh_mode
    }

    /// Sample rate of the active timeline in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Index of the virtual device eligible for threshold evaluation, or
    /// [`INVALID_VIRTUAL_DEVICE_INDEX`].
    pub fn selected_vdevice(&self) -> usize {
        self.selected_vdevice
    }

    /// Smoothing window applied before crossing detection.
    pub fn thresh_avg_count(&self) -> usize {
        self.thresh_avg_count
    }

    /// `true` when no mode is active.
    pub fn is_idle(&self) -> bool {
        matches!(self.mode, Mode::Idle)
    }

    /// `true` in file playback mode.
    pub fn is_file_mode(&self) -> bool {
        matches!(self.mode, Mode::File(_))
    }

    /// `true` in serial transport mode.
    pub fn is_serial_mode(&self) -> bool {
        matches!(self.mode, Mode::Serial(_))
    }

    /// `true` in HID transport mode.
    pub fn is_hid_mode(&self) -> bool {
        matches!(self.mode, Mode::Hid(_))
    }

    /// `true` in live-audio mode.
    pub fn is_live_audio_mode(&self) -> bool {
        matches!(self.mode, Mode::LiveAudio(_))
    }

    /// Last serial mode-entry failure, empty when none.
    pub fn serial_error(&self) -> &str {
        &self.serial_error
    }

    /// Last HID mode-entry failure, empty when none.
    pub fn hid_error(&self) -> &str {
        &self.hid_error
    }

    /// Path of the loaded recording, empty outside file mode.
    pub fn file_name(&self) -> &str {
        &self.filename
    }

    /// Total recording length in frames.
    ///
    /// # Errors
    ///
    /// Fails outside file mode.
    pub fn file_length(&self) -> Result<i64, AcquireError> {
        match &self.mode {
            Mode::File(playback) => Ok(playback.frame_count()),
            _ => Err(AcquireError::NotInFileMode),
        }
    }

    /// The virtual-device registry for the active topology.
    pub fn recording_devices(&self) -> &[VirtualDevice] {
        &self.recording_devices
    }

    /// The marker ledger, in insertion order.
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// The spike-train ledger.
    pub fn spike_trains(&self) -> &[SpikeTrain] {
        &self.spike_trains
    }

    /// The rolling trigger log, oldest first.
    pub fn triggers(&self) -> &[i64] {
        &self.triggers
    }

    // --- registry & reference counting ---

    /// Takes a reference to the virtual device's backing physical device,
    /// opening it on first use.
    ///
    /// # Errors
    ///
    /// Fails when the index is unknown or the hardware cannot be opened;
    /// state is unchanged on failure.
    pub fn inc_ref(&mut self, virtual_device: usize) -> Result<(), AcquireError> {
        let vd = self
            .recording_devices
            .get(virtual_device)
            .ok_or(AcquireError::InvalidVirtualDevice {
                index: virtual_device,
            })?;
        let device_id = vd.device;

        if self.devices.get(device_id).is_none() {
            let sample_rate = self.sample_rate;
            let capacity = self.config.buffer_capacity(sample_rate);
            let pos = self.pos;

            let driver = self.mode.driver_mut().ok_or_else(|| {
                AcquireError::DeviceOpenFailed {
                    device_id,
                    reason: "no active transport".to_string(),
                }
            })?;
            let descriptor = driver
                .devices()
                .into_iter()
                .find(|d| d.id == device_id)
                .ok_or_else(|| AcquireError::DeviceOpenFailed {
                    device_id,
                    reason: "not in transport topology".to_string(),
                })?;
            let handle =
                driver
                    .open(device_id)
                    .map_err(|e| AcquireError::DeviceOpenFailed {
                        device_id,
                        reason: e.to_string(),
                    })?;

            tracing::info!(device_id, channels = descriptor.channels, "device opened");
            self.devices.insert(
                device_id,
                Device::new(
                    handle,
                    descriptor.channels,
                    descriptor.bytes_per_sample,
                    pos,
                    capacity,
                    i64::from(sample_rate) * i64::from(DC_DECAY_SECONDS),
                ),
            );
        }

        // Unwrap-free: just inserted or already present.
        if let Some(device) = self.devices.get_mut(device_id) {
            device.ref_count += 1;
        }
        self.recording_devices[virtual_device].enabled = true;
        Ok(())
    }

    /// Drops a reference; tears the physical device down synchronously when
    /// the count reaches zero, before this call returns.
    ///
    /// # Errors
    ///
    /// Fails when the index is unknown.
    pub fn dec_ref(&mut self, virtual_device: usize) -> Result<(), AcquireError> {
        let vd = self
            .recording_devices
            .get_mut(virtual_device)
            .ok_or(AcquireError::InvalidVirtualDevice {
                index: virtual_device,
            })?;
        vd.enabled = false;
        let device_id = vd.device;

        let Some(device) = self.devices.get_mut(device_id) else {
            tracing::warn!(device_id, "dec_ref on a device that is not open");
            return Ok(());
        };
        if device.ref_count == 0 {
            tracing::warn!(device_id, "dec_ref would underflow; ignored");
            return Ok(());
        }

        device.ref_count -= 1;
        if !device.needed() {
            if let Some(device) = self.devices.remove(device_id) {
                if let Some(driver) = self.mode.driver_mut() {
                    driver.close(device.handle);
                }
                tracing::info!(device_id, "device closed");
            }
        }
        Ok(())
    }

    /// Selects the virtual device used for threshold/trigger evaluation.
    /// Pass [`INVALID_VIRTUAL_DEVICE_INDEX`] to clear the selection.
    ///
    /// # Errors
    ///
    /// Fails when the index is neither valid nor the invalid sentinel.
    pub fn set_selected_vdevice(&mut self, virtual_device: usize) -> Result<(), AcquireError> {
        if virtual_device != INVALID_VIRTUAL_DEVICE_INDEX
            && virtual_device >= self.recording_devices.len()
        {
            return Err(AcquireError::InvalidVirtualDevice {
                index: virtual_device,
            });
        }
        self.selected_vdevice = virtual_device;
        self.reset_detector();
        Ok(())
    }

    /// Sets a virtual device's threshold level.
    ///
    /// # Errors
    ///
    /// Fails when the index is unknown.
    pub fn set_vdevice_threshold(
        &mut self,
        virtual_device: usize,
        threshold: i32,
    ) -> Result<(), AcquireError> {
        let vd = self
            .recording_devices
            .get_mut(virtual_device)
            .ok_or(AcquireError::InvalidVirtualDevice {
                index: virtual_device,
            })?;
        if vd.threshold == threshold {
            return Ok(());
        }
        vd.threshold = threshold;
        if virtual_device == self.selected_vdevice {
            self.reset_detector();
        }
        self.emit(ManagerEvent::ThresholdChanged);
        Ok(())
    }

    /// Pauses or resumes acquisition. While paused, `advance` pulls nothing
    /// and the position clock is frozen; reads against the frozen buffers
    /// remain valid.
    pub fn set_paused(&mut self, pausing: bool) {
        if self.paused == pausing {
            return;
        }
        self.paused = pausing;
        self.emit(ManagerEvent::PauseChanged { paused: pausing });
    }

    /// Enables or disables threshold detection.
    pub fn set_thresh_mode(&mut self, thresh_mode: bool) {
        if self.thresh_mode != thresh_mode {
            self.thresh_mode = thresh_mode;
            self.reset_detector();
        }
    }

    /// Sets the moving-average window (in samples) applied before crossing
    /// detection. Clamped to at least 1.
    pub fn set_thresh_avg_count(&mut self, thresh_avg_count: usize) {
        let clamped = thresh_avg_count.max(1);
        if self.thresh_avg_count != clamped {
            self.thresh_avg_count = clamped;
            self.reset_detector();
        }
    }

    /// Sets the idle-mode sample rate. Live transports report their own
    /// rate at mode entry and override this.
    ///
    /// # Errors
    ///
    /// Fails on a zero rate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) -> Result<(), AcquireError> {
        if sample_rate == 0 {
            return Err(AcquireError::InvalidSampleRate {
                requested: sample_rate,
            });
        }
        self.sample_rate = sample_rate;
        Ok(())
    }

    fn reset_detector(&mut self) {
        let level = self
            .recording_devices
            .get(self.selected_vdevice)
            .map_or(DEFAULT_THRESHOLD, |vd| vd.threshold);
        self.detector = ThresholdDetector::new(level, self.thresh_avg_count);
    }

    // --- ledgers ---

    /// Appends a marker annotation at the given position.
    pub fn add_marker(&mut self, label: impl Into<String>, position: i64) {
        self.markers.push(Marker {
            label: label.into(),
            position,
        });
    }

    /// Records a trigger timestamp, as protocol collaborators do for
    /// externally detected events. Emits [`ManagerEvent::Triggered`].
    pub fn add_trigger(&mut self, position: i64) {
        self.triggers.push(position);
        if self.triggers.len() > self.config.trigger_log_capacity {
            self.triggers.remove(0);
        }
        self.emit(ManagerEvent::Triggered { position });
    }

    /// Creates a spike train from a virtual device's current threshold
    /// state and returns its index. The live engine appends detections to
    /// it while that device is selected.
    ///
    /// # Errors
    ///
    /// Fails when the index is unknown.
    pub fn add_spike_train(&mut self, virtual_device: usize) -> Result<usize, AcquireError> {
        let vd = self
            .recording_devices
            .get(virtual_device)
            .ok_or(AcquireError::InvalidVirtualDevice {
                index: virtual_device,
            })?;
        let pair = ThresholdDetector::new(vd.threshold, 1).threshold_pair();
        self.spike_trains.push(SpikeTrain {
            spikes: Vec::new(),
            upper_thresh: pair.0,
            lower_thresh: pair.1,
            color: self.spike_trains.len() as i32,
            source: virtual_device,
        });
        Ok(self.spike_trains.len() - 1)
    }

    /// Removes and returns a spike train.
    ///
    /// # Errors
    ///
    /// Fails when the index is out of range.
    pub fn remove_spike_train(&mut self, index: usize) -> Result<SpikeTrain, AcquireError> {
        if index >= self.spike_trains.len() {
            return Err(AcquireError::InvalidVirtualDevice { index });
        }
        Ok(self.spike_trains.remove(index))
    }

    // --- acquisition tick ---

    /// Advances acquisition by an elapsed-time budget.
    ///
    /// In live modes this pulls from the active transport, appends to the
    /// channel buffers, moves the position clock, and runs threshold
    /// evaluation over the new window. A no-op while paused, idle, or in
    /// file mode (where [`set_pos`](Self::set_pos) drives the clock).
    /// Always runs to completion within the tick.
    pub fn advance(&mut self, milliseconds: u32) {
        if self.paused || !self.mode.is_live() {
            return;
        }

        let budget = self.samples_for_tick(milliseconds);
        if budget == 0 {
            return;
        }

        let mut advanced = 0usize;
        if let Some(driver) = self.mode.driver_mut() {
            for (id, device) in self.devices.iter_mut() {
                match driver.pull(device.handle, budget) {
                    Ok(chunk) => {
                        let frames = device.append_chunk(&chunk);
                        if frames < budget {
                            tracing::trace!(device = id, frames, budget, "short tick");
                        }
                        advanced = advanced.max(frames);
                    }
                    Err(err) => {
                        tracing::warn!(device = id, %err, "pull failed; empty tick");
                    }
                }
            }
        }

        if advanced > 0 {
            let from = self.pos;
            self.pos += advanced as i64;
            self.run_threshold(from, self.pos);
        }
    }

    /// Converts elapsed milliseconds to a sample budget, carrying the
    /// sub-sample remainder so long runs do not drift.
    fn samples_for_tick(&mut self, milliseconds: u32) -> usize {
        let total = u64::from(milliseconds) * u64::from(self.sample_rate) + self.tick_remainder;
        self.tick_remainder = total % 1000;
        (total / 1000) as usize
    }

    /// Runs crossing detection over `[from, to)` on the selected device.
    fn run_threshold(&mut self, from: i64, to: i64) {
        if !self.thresh_mode {
            return;
        }
        let Some(vd) = self.recording_devices.get(self.selected_vdevice) else {
            return;
        };
        if !vd.enabled {
            return;
        }
        let Some(device) = self.devices.get(vd.device) else {
            return;
        };
        let buffer = device.buffer(vd.channel);
        let to = to.min(buffer.pos());

        let detector = &mut self.detector;
        let mut crossings = Vec::new();
        for p in from..to {
            if detector.process(buffer.sample_at(p)) {
                crossings.push(p);
            }
        }

        for position in crossings {
            self.record_detection(position);
        }
    }

    fn record_detection(&mut self, position: i64) {
        let pair = self.detector.threshold_pair();
        let source = self.selected_vdevice;
        for train in &mut self.spike_trains {
            if train.source == source {
                train.spikes.push(position);
                train.upper_thresh = pair.0;
                train.lower_thresh = pair.1;
            }
        }
        tracing::debug!(position, "threshold crossing");
        self.add_trigger(position);
    }

    // --- file mode ---

    /// Seeks the shared position clock (file mode only). Forward seeks
    /// reveal the new window from the recording, append it to the channel
    /// buffers, and run threshold evaluation over it.
    ///
    /// # Errors
    ///
    /// Fails outside file mode or on a read error.
    pub fn set_pos(&mut self, pos: i64) -> Result<(), AcquireError> {
        let Mode::File(playback) = &mut self.mode else {
            return Err(AcquireError::NotInFileMode);
        };
        let pos = pos.clamp(0, playback.frame_count());

        // Reveal from the buffer head, not from the previous position: a
        // backward seek followed by a forward seek must not double-append.
        let reveal_from = self
            .devices
            .get(0)
            .map_or(pos, |d| d.buffer(0).pos());

        if pos > reveal_from {
            let frames = (pos - reveal_from) as usize;
            let chunk = playback.read_at(reveal_from, frames).map_err(|e| {
                AcquireError::FileLoadFailed {
                    path: self.filename.clone(),
                    reason: e.to_string(),
                }
            })?;
            let appended = self
                .devices
                .get_mut(0)
                .map_or(0, |d| d.append_chunk(&chunk));
            self.pos = pos;
            if appended > 0 {
                self.run_threshold(reveal_from, reveal_from + appended as i64);
            }
        } else {
            self.pos = pos;
        }
        Ok(())
    }

    // --- mode transitions ---

    /// Loads a recording and enters file mode.
    ///
    /// # Errors
    ///
    /// On failure the manager is left idle with all refcounts at zero.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), AcquireError> {
        let path = path.as_ref();
        match FilePlayback::open(path) {
            Ok(playback) => {
                self.switch_mode(Mode::File(playback));
                self.filename = path.display().to_string();
                Ok(())
            }
            Err(e) => {
                self.switch_mode(Mode::Idle);
                Err(AcquireError::FileLoadFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Enters serial mode with an external serial driver.
    ///
    /// # Errors
    ///
    /// On a failed handshake the manager is left idle and
    /// [`serial_error`](Self::serial_error) is populated.
    pub fn init_serial(
        &mut self,
        driver: Box<dyn TransportDriver>,
    ) -> Result<(), AcquireError> {
        self.serial_error.clear();
        match self.enter_live(driver, Mode::Serial) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.serial_error = e.to_string();
                Err(e)
            }
        }
    }

    /// Enters HID mode with an external HID driver.
    ///
    /// # Errors
    ///
    /// On a failed handshake the manager is left idle and
    /// [`hid_error`](Self::hid_error) is populated.
    pub fn init_hid(&mut self, driver: Box<dyn TransportDriver>) -> Result<(), AcquireError> {
        self.hid_error.clear();
        match self.enter_live(driver, Mode::Hid) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.hid_error = e.to_string();
                Err(e)
            }
        }
    }

    /// Enters live-audio mode on the system default input device.
    ///
    /// # Errors
    ///
    /// On failure the manager is left idle.
    pub fn init_live_audio(&mut self) -> Result<(), AcquireError> {
        match crate::transport::AudioDriver::open_default() {
            Ok(driver) => self.init_live_audio_driver(Box::new(driver)),
            Err(e) => {
                self.switch_mode(Mode::Idle);
                Err(AcquireError::BackendError(e.to_string()))
            }
        }
    }

    /// Enters live-audio mode with a caller-provided driver (a specific
    /// input device, or a test double).
    ///
    /// # Errors
    ///
    /// On failure the manager is left idle.
    pub fn init_live_audio_driver(
        &mut self,
        driver: Box<dyn TransportDriver>,
    ) -> Result<(), AcquireError> {
        self.enter_live(driver, Mode::LiveAudio)
    }

    /// Tears down the active mode and returns to idle.
    pub fn disconnect(&mut self) {
        self.switch_mode(Mode::Idle);
    }

    fn enter_live(
        &mut self,
        driver: Box<dyn TransportDriver>,
        wrap: fn(Box<dyn TransportDriver>) -> Mode,
    ) -> Result<(), AcquireError> {
        if driver.devices().is_empty() {
            let transport = driver.name().to_string();
            self.switch_mode(Mode::Idle);
            return Err(AcquireError::NoDevices { transport });
        }
        self.switch_mode(wrap(driver));
        Ok(())
    }

    /// The one mode-transition path: previous devices are torn down before
    /// the new mode activates, the registry is rebuilt from the new
    /// topology, the timeline resets, and `DeviceReload` fires once.
    fn switch_mode(&mut self, mode: Mode) {
        let mut old = std::mem::replace(&mut self.mode, mode);
        self.devices.drain_with(|device| {
            if let Some(driver) = old.driver_mut() {
                driver.close(device.handle);
            }
        });
        drop(old);

        if let Some(driver) = self.mode.driver() {
            self.sample_rate = driver.sample_rate();
            tracing::info!(transport = driver.name(), rate = self.sample_rate, "mode entered");
        } else {
            self.sample_rate = self.config.sample_rate;
            tracing::info!("idle");
        }

        self.rebuild_registry();
        self.pos = 0;
        self.tick_remainder = 0;
        self.triggers.clear();
        self.markers.clear();
        self.spike_trains.clear();
        self.filename.clear();
        self.selected_vdevice = INVALID_VIRTUAL_DEVICE_INDEX;
        self.reset_detector();
        self.emit(ManagerEvent::DeviceReload);
    }

    fn rebuild_registry(&mut self) {
        self.recording_devices.clear();
        let Some(driver) = self.mode.driver() else {
            return;
        };
        for descriptor in driver.devices() {
            for channel in 0..descriptor.channels as usize {
                self.recording_devices.push(VirtualDevice {
                    device: descriptor.id,
                    channel,
                    name: format!("{} ch {}", descriptor.name, channel + 1),
                    enabled: false,
                    threshold: DEFAULT_THRESHOLD,
                    bound: 0,
                });
            }
        }
    }

    // --- query surface ---

    fn mapped_buffer(
        &self,
        virtual_device: usize,
    ) -> Result<Option<(&Device, usize)>, AcquireError> {
        let vd = self
            .recording_devices
            .get(virtual_device)
            .ok_or(AcquireError::InvalidVirtualDevice {
                index: virtual_device,
            })?;
        Ok(self.devices.get(vd.device).map(|d| (d, vd.channel)))
    }

    /// Copies samples starting at absolute `offset` into `out`, applying
    /// DC-bias correction. Positions outside the retained window come back
    /// as zero. Never blocks, never allocates.
    ///
    /// # Errors
    ///
    /// Fails when the index is unknown; `out` is untouched.
    pub fn get_data(
        &self,
        virtual_device: usize,
        offset: i64,
        out: &mut [i16],
    ) -> Result<(), AcquireError> {
        let Some((device, channel)) = self.mapped_buffer(virtual_device)? else {
            out.fill(0);
            return Ok(());
        };
        let buffer = device.buffer(channel);
        buffer.read_into(offset, out);

        let bias = device.dc_bias(channel);
        if bias != 0 {
            // Correct only samples actually inside the retained window;
            // sentinel zeros stay zero.
            let start = (buffer.retained_start().max(offset) - offset).max(0) as usize;
            let end = ((buffer.pos().min(offset + out.len() as i64)) - offset).max(0) as usize;
            for sample in &mut out[start.min(end)..end] {
                *sample = sample.saturating_sub(bias);
            }
        }
        Ok(())
    }

    /// Downsampled `(min, max)` envelope for waveform rendering: `len`
    /// groups of `sample_skip` raw samples starting at `offset`. Groups
    /// past the retained history are zero-filled.
    ///
    /// # Errors
    ///
    /// Fails when the index is unknown.
    pub fn get_samples_envelope(
        &self,
        virtual_device: usize,
        offset: i64,
        len: usize,
        sample_skip: usize,
    ) -> Result<Vec<(i16, i16)>, AcquireError> {
        match self.mapped_buffer(virtual_device)? {
            Some((device, channel)) => Ok(device.buffer(channel).envelope(offset, len, sample_skip)),
            None => Ok(vec![(0, 0); len]),
        }
    }

    /// Envelope anchored on the most recent trigger, for scope-sync
    /// rendering: the trigger sits at the centre of the window. All-zero
    /// groups when the trigger log is empty.
    ///
    /// # Errors
    ///
    /// Fails when the index is unknown.
    pub fn get_trigger_samples_envelope(
        &self,
        virtual_device: usize,
        len: usize,
        sample_skip: usize,
    ) -> Result<Vec<(i16, i16)>, AcquireError> {
        let Some(&trigger) = self.triggers.last() else {
            // Still validate the index so a bad caller fails loudly.
            self.mapped_buffer(virtual_device)?;
            return Ok(vec![(0, 0); len]);
        };
        let offset = trigger - (len * sample_skip.max(1)) as i64 / 2;
        self.get_samples_envelope(virtual_device, offset, len, sample_skip)
    }

    // --- metadata round-trip ---

    /// Snapshots the state a saved recording must reproduce.
    pub fn construct_metadata(&self) -> MetadataChunk {
        MetadataChunk {
            sample_rate: self.sample_rate,
            channels: self
                .recording_devices
                .iter()
                .map(|vd| ChannelEntry {
                    name: vd.name.clone(),
                    threshold: vd.threshold,
                    bound: vd.bound,
                    enabled: vd.enabled,
                })
                .collect(),
            markers: self.markers.clone(),
            spike_trains: self.spike_trains.clone(),
        }
    }

    /// Restores registry names/thresholds, markers, and spike trains from a
    /// metadata chunk. Channel enablement is *not* restored - re-reference
    /// devices with [`inc_ref`](Self::inc_ref) to reopen hardware.
    pub fn apply_metadata(&mut self, metadata: &MetadataChunk) {
        if metadata.sample_rate != 0 {
            self.sample_rate = metadata.sample_rate;
        }
        for (vd, entry) in self
            .recording_devices
            .iter_mut()
            .zip(metadata.channels.iter())
        {
            vd.name = entry.name.clone();
            vd.threshold = entry.threshold;
            vd.bound = entry.bound;
        }
        self.markers = metadata.markers.clone();
        self.spike_trains = metadata.spike_trains.clone();
        self.reset_detector();
        self.emit(ManagerEvent::ThresholdChanged);
    }

    // --- optional firmware capability ---

    /// Attaches a firmware-image source.
    #[cfg(feature = "firmware-update")]
    pub fn set_firmware_source(&mut self, source: Box<dyn FirmwareSource>) {
        self.firmware = Some(source);
    }

    /// Firmware images available for the connected board.
    #[cfg(feature = "firmware-update")]
    pub fn firmware_list(&self) -> Vec<FirmwareImage> {
        self.firmware.as_ref().map_or_else(Vec::new, |s| s.firmwares())
    }

    /// Progress of an in-flight firmware update.
    #[cfg(feature = "firmware-update")]
    pub fn firmware_update_stage(&self) -> UpdateStage {
        self.firmware
            .as_ref()
            .map_or(UpdateStage::Idle, |s| s.update_stage())
    }
}

impl Default for RecordingManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockDriver;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn serial_manager(mock: MockDriver) -> RecordingManager {
        let mut manager = RecordingManager::new();
        manager.init_serial(Box::new(mock)).unwrap();
        manager
    }

    #[test]
    fn test_starts_idle() {
        let manager = RecordingManager::new();
        assert!(manager.is_idle());
        assert_eq!(manager.pos(), 0);
        assert_eq!(manager.selected_vdevice(), INVALID_VIRTUAL_DEVICE_INDEX);
        assert!(manager.recording_devices().is_empty());
    }

    #[test]
    fn test_mode_entry_builds_registry() {
        let manager = serial_manager(MockDriver::new(10_000, 2));
        assert!(manager.is_serial_mode());
        assert_eq!(manager.sample_rate(), 10_000);
        assert_eq!(manager.recording_devices().len(), 2);
        assert_eq!(manager.recording_devices()[1].channel, 1);
        assert!(!manager.recording_devices()[0].enabled);
    }

    #[test]
    fn test_shared_device_refcounting() {
        let mut manager = serial_manager(MockDriver::new(10_000, 2));

        // Both virtual devices map to channels of physical device 0.
        manager.inc_ref(0).unwrap();
        manager.inc_ref(1).unwrap();
        assert!(manager.recording_devices()[0].enabled);

        // Dropping one reference must not close the shared device.
        manager.dec_ref(0).unwrap();
        assert!(!manager.recording_devices()[0].enabled);
        assert!(manager.recording_devices()[1].enabled);

        manager.advance(10);
        assert_eq!(manager.pos(), 0); // nothing queued, but no crash either

        // Last reference: synchronous teardown.
        manager.dec_ref(1).unwrap();
        manager.advance(10);
        assert_eq!(manager.pos(), 0);
    }

    #[test]
    fn test_dec_ref_never_underflows() {
        let mut manager = serial_manager(MockDriver::new(10_000, 1));
        manager.inc_ref(0).unwrap();
        manager.dec_ref(0).unwrap();
        // Extra drops are ignored, not fatal.
        manager.dec_ref(0).unwrap();
        manager.dec_ref(0).unwrap();
    }

    #[test]
    fn test_inc_ref_unknown_index() {
        let mut manager = serial_manager(MockDriver::new(10_000, 1));
        assert!(matches!(
            manager.inc_ref(5),
            Err(AcquireError::InvalidVirtualDevice { index: 5 })
        ));
    }

    #[test]
    fn test_inc_ref_open_failure_leaves_state() {
        let mut mock = MockDriver::new(10_000, 1);
        mock.fail_next_open();
        let mut manager = serial_manager(mock);

        assert!(manager.inc_ref(0).is_err());
        assert!(!manager.recording_devices()[0].enabled);

        // Hardware recovered: the retry succeeds.
        assert!(manager.inc_ref(0).is_ok());
    }

    #[test]
    fn test_advance_appends_and_moves_clock() {
        let mut mock = MockDriver::new(1000, 1);
        mock.add_samples(&[5; 100]);
        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();

        // 50ms at 1kHz = 50 samples.
        manager.advance(50);
        assert_eq!(manager.pos(), 50);

        let mut out = [0i16; 50];
        manager.get_data(0, 0, &mut out).unwrap();
        assert!(out.iter().all(|&s| s != 0));
    }

    #[test]
    fn test_short_tick_advances_by_actual_count() {
        let mut mock = MockDriver::new(1000, 1);
        mock.add_samples(&[1; 30]);
        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();

        // 100ms asks for 100 samples; only 30 are available.
        manager.advance(100);
        assert_eq!(manager.pos(), 30);
    }

    #[test]
    fn test_tick_remainder_does_not_drift() {
        let mut mock = MockDriver::new(44_100, 1);
        mock.generate_silence(1000);
        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();

        // 3ms at 44.1kHz is 132.3 samples; over 10 ticks the remainder
        // must accumulate to exactly 1323.
        for _ in 0..10 {
            manager.advance(3);
        }
        assert_eq!(manager.pos(), 1323);
    }

    #[test]
    fn test_pause_freezes_everything() {
        let mut mock = MockDriver::new(1000, 1);
        mock.add_samples(&[7; 200]);
        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();
        manager.advance(50);

        let mut before = [0i16; 50];
        manager.get_data(0, 0, &mut before).unwrap();

        manager.set_paused(true);
        manager.advance(50);
        manager.advance(50);
        assert_eq!(manager.pos(), 50);

        let mut after = [0i16; 50];
        manager.get_data(0, 0, &mut after).unwrap();
        assert_eq!(before, after);

        manager.set_paused(false);
        manager.advance(50);
        assert_eq!(manager.pos(), 100);
    }

    #[test]
    fn test_pause_event_fires_once_per_change() {
        let mut manager = serial_manager(MockDriver::new(1000, 1));
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        manager.on_event(move |event| {
            if matches!(event, ManagerEvent::PauseChanged { .. }) {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.set_paused(true);
        manager.set_paused(true);
        manager.set_paused(false);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failed_serial_entry_leaves_idle() {
        let mut manager = serial_manager(MockDriver::new(10_000, 1));
        manager.inc_ref(0).unwrap();

        // A driver with no devices fails the handshake.
        struct EmptyDriver;
        impl TransportDriver for EmptyDriver {
            fn name(&self) -> &str {
                "dead-port"
            }
            fn devices(&self) -> Vec<crate::transport::DeviceDescriptor> {
                Vec::new()
            }
            fn sample_rate(&self) -> u32 {
                0
            }
            fn open(
                &mut self,
                device_id: usize,
            ) -> Result<crate::transport::TransportHandle, crate::TransportError> {
                Err(crate::TransportError::NoSuchDevice { device_id })
            }
            fn pull(
                &mut self,
                handle: crate::transport::TransportHandle,
                _max_frames: usize,
            ) -> Result<crate::SampleChunk, crate::TransportError> {
                Err(crate::TransportError::StaleHandle(handle.raw()))
            }
            fn close(&mut self, _handle: crate::transport::TransportHandle) {}
        }

        assert!(manager.init_serial(Box::new(EmptyDriver)).is_err());
        assert!(manager.is_idle());
        assert!(manager.recording_devices().is_empty());
        assert!(manager.serial_error().contains("dead-port"));
    }

    #[test]
    fn test_mode_switch_emits_device_reload() {
        let mut manager = RecordingManager::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        manager.on_event(move |event| {
            if event == ManagerEvent::DeviceReload {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        manager.init_serial(Box::new(MockDriver::new(1000, 1))).unwrap();
        manager.init_hid(Box::new(MockDriver::new(1000, 1))).unwrap();
        manager.disconnect();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_threshold_detection_end_to_end() {
        let mut mock = MockDriver::new(10_000, 1);
        // Flat, one excursion above 100 at samples 500..510, flat again.
        let mut samples = vec![0i16; 1000];
        for s in &mut samples[500..510] {
            *s = 400;
        }
        mock.add_samples(&samples);

        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();
        manager.set_selected_vdevice(0).unwrap();
        manager.set_thresh_mode(true);

        let triggered = Arc::new(AtomicUsize::new(0));
        let triggered_clone = triggered.clone();
        manager.on_event(move |event| {
            if matches!(event, ManagerEvent::Triggered { .. }) {
                triggered_clone.fetch_add(1, Ordering::SeqCst);
            }
        });

        // 100ms at 10kHz reveals all 1000 samples.
        manager.advance(100);

        assert_eq!(manager.triggers(), &[500]);
        assert_eq!(triggered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detection_feeds_bound_spike_trains() {
        let mut mock = MockDriver::new(10_000, 1);
        let mut samples = vec![0i16; 300];
        samples[100] = 400;
        samples[200] = 400;
        mock.add_samples(&samples);

        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();
        manager.set_selected_vdevice(0).unwrap();
        manager.set_thresh_mode(true);
        let train = manager.add_spike_train(0).unwrap();

        manager.advance(30);

        assert_eq!(manager.spike_trains()[train].spikes, vec![100, 200]);
        assert_eq!(manager.spike_trains()[train].upper_thresh, 100);
        assert_eq!(manager.spike_trains()[train].lower_thresh, 50);
    }

    #[test]
    fn test_dc_bias_corrected_in_get_data() {
        let mut mock = MockDriver::new(1000, 1);
        mock.add_samples(&[200; 1000]);
        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();
        manager.advance(1000);

        let mut out = [0i16; 10];
        manager.get_data(0, 500, &mut out).unwrap();
        // Constant signal: the rolling mean converges on the offset and
        // correction pulls the samples toward zero.
        assert!(out.iter().all(|&s| s.abs() < 5), "got {out:?}");
    }

    #[test]
    fn test_envelope_matches_raw_extremes() {
        let mut mock = MockDriver::new(1000, 1);
        mock.add_samples(&[10, -30, 50, 0, 20, -5, 15, 40]);
        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();
        manager.advance(8);

        let groups = manager.get_samples_envelope(0, 0, 2, 4).unwrap();
        assert_eq!(groups, vec![(-30, 50), (-5, 40)]);
    }

    #[test]
    fn test_trigger_envelope_centres_on_last_trigger() {
        let mut mock = MockDriver::new(1000, 1);
        let mut samples = vec![0i16; 100];
        samples[60] = 400;
        mock.add_samples(&samples);

        let mut manager = serial_manager(mock);
        manager.inc_ref(0).unwrap();
        manager.set_selected_vdevice(0).unwrap();
        manager.set_thresh_mode(true);
        manager.advance(100);
        assert_eq!(manager.triggers(), &[60]);

        // Window of 10 groups x 1 sample centred on 60 covers [55, 65);
        // the spike lands in the middle group.
        let groups = manager.get_trigger_samples_envelope(0, 10, 1).unwrap();
        assert_eq!(groups[5], (400, 400));
    }

    #[test]
    fn test_trigger_envelope_without_triggers_is_zero() {
        let mut manager = serial_manager(MockDriver::new(1000, 1));
        manager.inc_ref(0).unwrap();
        let groups = manager.get_trigger_samples_envelope(0, 4, 2).unwrap();
        assert_eq!(groups, vec![(0, 0); 4]);
    }

    #[test]
    fn test_query_unknown_vdevice_fails() {
        let manager = serial_manager(MockDriver::new(1000, 1));
        let mut out = [0i16; 4];
        assert!(manager.get_data(9, 0, &mut out).is_err());
        assert!(manager.get_samples_envelope(9, 0, 4, 1).is_err());
    }

    #[test]
    fn test_metadata_round_trip_through_json() {
        let mut manager = serial_manager(MockDriver::new(10_000, 2));
        manager.inc_ref(0).unwrap();
        manager.set_vdevice_threshold(0, 150).unwrap();
        manager.add_marker("stim", 40);
        manager.add_marker("rest", 90);
        let train = manager.add_spike_train(0).unwrap();
        manager.spike_trains[train].spikes = vec![10, 20, 30];

        let saved = manager.construct_metadata();
        let json = saved.to_json();

        // A fresh session on the same topology restores the state.
        let mut reloaded = serial_manager(MockDriver::new(10_000, 2));
        reloaded.apply_metadata(&MetadataChunk::from_json(&json).unwrap());

        assert_eq!(reloaded.markers(), manager.markers());
        assert_eq!(reloaded.spike_trains(), manager.spike_trains());
        assert_eq!(reloaded.recording_devices()[0].threshold, 150);
    }

    #[test]
    fn test_set_pos_outside_file_mode_fails() {
        let mut manager = serial_manager(MockDriver::new(1000, 1));
        assert!(matches!(
            manager.set_pos(10),
            Err(AcquireError::NotInFileMode)
        ));
    }

    #[test]
    fn test_set_sample_rate_rejects_zero() {
        let mut manager = RecordingManager::new();
        assert!(manager.set_sample_rate(0).is_err());
        assert!(manager.set_sample_rate(22_050).is_ok());
        assert_eq!(manager.sample_rate(), 22_050);
    }
}
