//! Playback scheduler: drives one panel indefinitely.
//!
//! Ties the pipeline together for a single device:
//!
//! 1. A [`FrameSource`] produces a frame at its native size.
//! 2. [`transform`] fits it onto the panel.
//! 3. A [`FrameEncoder`] turns it into device packets.
//! 4. The [`TransportLink`] writes the packets.
//!
//! The scheduler is an explicit state machine. [`step`](Scheduler::step)
//! performs exactly one transition so tests can walk it deterministically;
//! [`run`](Scheduler::run) loops until [`SchedulerState::Stopped`].
//!
//! ```text
//!  Idle ──► Reconfiguring ──► Running ◄──────────┐
//!   │            ▲   │          │  │             │
//!   │            │   │          │  └─► Recovering┘
//!   │            └───┼──────────┘        ▲
//!   └────────────────┴───────────────────┘
//!
//!  any ──► Stopped   (stop handle cleared)
//! ```
//!
//! Configuration arrives as complete snapshots through a
//! `tokio::sync::watch` channel; the scheduler only ever sees whole
//! configurations, and picks them up in every state.
//!
//! Pipeline builds and per-frame work (resampling, encoding, USB writes)
//! run on tokio's blocking pool; the async side only waits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::DeviceConfig;
use crate::encoder::{FrameEncoder, encoder_for};
use crate::error::LcdError;
use crate::profile::{DeviceId, DeviceProfile, ProfileRegistry, Resolution};
use crate::source::{FrameSource, SourceEvent, WindowBackend, capture, open_source_with};
use crate::transform::{Overlay, TransformParams, transform};
use crate::transport::{TransportLink, UsbBackend};
use crate::types::Frame;

/// Longest uninterrupted sleep; bounds how late a stop request is noticed.
const STOP_POLL: Duration = Duration::from_millis(100);

/// How often throughput is logged while running.
const REPORT_INTERVAL: Duration = Duration::from_secs(30);

// ── SchedulerState ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    /// Not connected yet.
    #[default]
    Idle,
    /// Streaming frames (or waiting for a usable configuration).
    Running,
    /// Rebuilding the pipeline from the latest snapshot.
    Reconfiguring,
    /// Link lost; waiting out the backoff before reconnecting.
    Recovering,
    /// Terminal.
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Reconfiguring => "Reconfiguring",
            Self::Recovering => "Recovering",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

// ── SchedulerStats ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub frames_sent: u64,
    /// Black frames sent because the source had nothing to show.
    pub blank_frames: u64,
    /// Frames a live source produced but the panel never got.
    pub frames_dropped: u64,
    pub reconnects: u64,
    /// Times a finite source wrapped around.
    pub loops_completed: u64,
    pub build_failures: u64,
}

// ── Pipeline ─────────────────────────────────────────────────────

/// Everything built from one configuration snapshot.
struct Pipeline {
    source: Box<dyn FrameSource>,
    params: TransformParams,
    overlay: Option<Overlay>,
    encoder: Box<dyn FrameEncoder>,
    device: DeviceId,
    resolution: Resolution,
    frame_interval: Duration,
}

impl Pipeline {
    fn build(
        config: &DeviceConfig,
        profile: &DeviceProfile,
        windows: Option<Arc<dyn WindowBackend>>,
    ) -> Result<Self, LcdError> {
        let display = &config.display;
        display.validate()?;
        let resolution = profile.resolve_resolution(config.selector.resolution);
        let encoder = encoder_for(profile, resolution)?;
        let overlay = display
            .foreground
            .as_ref()
            .map(|fg| Overlay::load(fg, resolution))
            .transpose()?;
        let source = open_source_with(display, windows)?;
        Ok(Self {
            source,
            params: display.transform_params(),
            overlay,
            encoder,
            device: profile.id,
            resolution,
            frame_interval: display.frame_interval(),
        })
    }

    /// Next frame to show, looping finite sources.
    ///
    /// `None` means the source has nothing to show this tick.
    fn pull(&mut self, stats: &mut SchedulerStats) -> Result<Option<Frame>, LcdError> {
        let mut restarted = false;
        loop {
            match self.source.next_frame() {
                Ok(SourceEvent::Frame(frame)) => return Ok(Some(frame)),
                Ok(SourceEvent::NoContent) => return Ok(None),
                Ok(SourceEvent::EndOfCycle) if !restarted => {
                    stats.loops_completed += 1;
                    debug!("{:?} source looped", self.source.kind());
                    self.source.restart()?;
                    restarted = true;
                }
                Ok(SourceEvent::EndOfCycle) => return Ok(None),
                Err(e) => {
                    warn!("source error: {e}");
                    return Ok(None);
                }
            }
        }
    }

    /// Pull, transform, encode and write one frame. Blocks on USB.
    ///
    /// Errors are broken invariants; a failed write is reported in
    /// [`Rendered::sent`].
    fn render(
        &mut self,
        link: &mut TransportLink,
        stats: &mut SchedulerStats,
        blank_sequence: &mut u64,
    ) -> Result<Rendered, LcdError> {
        let frame = match self.pull(stats)? {
            Some(frame) => frame,
            None => {
                stats.blank_frames += 1;
                *blank_sequence += 1;
                Frame::blank(self.resolution, *blank_sequence)
            }
        };
        let hold = frame.hold.unwrap_or(Duration::ZERO);
        let period = self.frame_interval.max(hold);

        let frame = transform(frame, &self.params, self.resolution, self.overlay.as_ref());
        let encoded = self.encoder.encode(&frame)?;
        let sent = link.send(&encoded);
        if sent.is_ok() {
            stats.frames_sent += 1;
        }
        Ok(Rendered { period, sent })
    }
}

/// Outcome of [`Pipeline::render`].
struct Rendered {
    /// How long the frame stays on screen.
    period: Duration,
    sent: Result<(), LcdError>,
}

// ── Scheduler ────────────────────────────────────────────────────

pub struct Scheduler {
    name: String,
    state: SchedulerState,
    registry: Arc<ProfileRegistry>,
    link: TransportLink,
    config_rx: watch::Receiver<DeviceConfig>,
    /// `false` once the sending side of `config_rx` is gone.
    config_open: bool,
    config: DeviceConfig,
    pipeline: Option<Pipeline>,
    windows: Option<Arc<dyn WindowBackend>>,
    backoff: Backoff,
    running: Arc<AtomicBool>,
    stats: SchedulerStats,
    /// Drops counted by sources that have since been replaced.
    dropped_before: u64,
    blank_sequence: u64,
    last_report: Instant,
}

impl Scheduler {
    /// Create a scheduler in the `Idle` state.
    ///
    /// The current value of `config_rx` becomes the initial configuration.
    pub fn new(
        name: impl Into<String>,
        registry: Arc<ProfileRegistry>,
        backend: Arc<dyn UsbBackend>,
        mut config_rx: watch::Receiver<DeviceConfig>,
    ) -> Self {
        let config = config_rx.borrow_and_update().clone();
        let link = TransportLink::new(
            Arc::clone(&registry),
            backend,
            config.link.write_timeout(),
        );
        Self {
            name: name.into(),
            state: SchedulerState::Idle,
            registry,
            link,
            config_rx,
            config_open: true,
            backoff: Backoff::from_settings(&config.link),
            config,
            pipeline: None,
            windows: capture::platform_backend(),
            running: Arc::new(AtomicBool::new(true)),
            stats: SchedulerStats::default(),
            dropped_before: 0,
            blank_sequence: 0,
            last_report: Instant::now(),
        }
    }

    /// Use `backend` for window capture instead of the platform one.
    pub fn with_window_backend(mut self, backend: Arc<dyn WindowBackend>) -> Self {
        self.windows = Some(backend);
        self
    }

    /// A cloneable handle that stops the scheduler when set to `false`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = self.stats;
        stats.frames_dropped = self.dropped_before
            + self
                .pipeline
                .as_ref()
                .map_or(0, |p| p.source.dropped_frames());
        stats
    }

    pub fn link(&self) -> &TransportLink {
        &self.link
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// The configuration the current pipeline was built from.
    pub fn active_config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn has_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    /// Resolution frames are currently sent at.
    pub fn resolution(&self) -> Option<Resolution> {
        self.pipeline.as_ref().map(|p| p.resolution)
    }

    // ── Driving ──────────────────────────────────────────────────

    /// Run until stopped. Returns the final statistics.
    pub async fn run(&mut self) -> Result<SchedulerStats, LcdError> {
        info!("[{}] scheduler started", self.name);
        loop {
            match self.step().await {
                Ok(SchedulerState::Stopped) => break,
                Ok(_) => {}
                Err(e) => {
                    self.enter_stopped();
                    return Err(e);
                }
            }
        }
        let stats = self.stats();
        info!(
            "[{}] scheduler stopped: {} frames sent, {} reconnects, {} loops",
            self.name, stats.frames_sent, stats.reconnects, stats.loops_completed
        );
        Ok(stats)
    }

    /// Perform one state transition and return the new state.
    ///
    /// Errors are reserved for broken invariants (a frame of the wrong
    /// size reaching the encoder, an invalid link transition); everything
    /// the outside world can cause is handled by changing state.
    pub async fn step(&mut self) -> Result<SchedulerState, LcdError> {
        if !self.is_running() && self.state != SchedulerState::Stopped {
            self.enter_stopped();
        }
        let next = match self.state {
            SchedulerState::Idle => self.on_idle()?,
            SchedulerState::Reconfiguring => self.on_reconfigure().await?,
            SchedulerState::Running => self.on_tick().await?,
            SchedulerState::Recovering => self.on_recover().await?,
            SchedulerState::Stopped => SchedulerState::Stopped,
        };
        if next != self.state {
            debug!("[{}] {} → {}", self.name, self.state, next);
        }
        self.state = next;
        Ok(next)
    }

    // ── States ───────────────────────────────────────────────────

    fn on_idle(&mut self) -> Result<SchedulerState, LcdError> {
        self.adopt_snapshot();
        match self.link.connect(&self.config.selector) {
            Ok(_) => {
                self.backoff.reset();
                Ok(SchedulerState::Reconfiguring)
            }
            Err(e @ LcdError::InvalidTransition(_)) => Err(e),
            Err(e) => {
                warn!("[{}] connect failed: {e}", self.name);
                Ok(SchedulerState::Recovering)
            }
        }
    }

    async fn on_reconfigure(&mut self) -> Result<SchedulerState, LcdError> {
        if self.adopt_snapshot() == Some(true) {
            info!(
                "[{}] device changed to {}; reconnecting",
                self.name,
                self.config.selector.describe()
            );
            return Ok(SchedulerState::Recovering);
        }

        let Some(profile) = self.link.profile().cloned() else {
            return Ok(SchedulerState::Recovering);
        };

        let config = self.config.clone();
        let windows = self.windows.clone();
        let built = tokio::task::spawn_blocking(move || Pipeline::build(&config, &profile, windows))
            .await
            .map_err(|e| LcdError::Other(format!("pipeline build task failed: {e}")))?;

        match built {
            Ok(pipeline) => {
                info!(
                    "[{}] showing {} on {} at {}",
                    self.name,
                    self.config.display.locator(),
                    pipeline.device,
                    pipeline.resolution
                );
                self.replace_pipeline(Some(pipeline));
            }
            Err(e) => {
                warn!("[{}] pipeline build failed: {e}; waiting for a new configuration", self.name);
                self.stats.build_failures += 1;
                self.replace_pipeline(None);
            }
        }
        Ok(SchedulerState::Running)
    }

    async fn on_tick(&mut self) -> Result<SchedulerState, LcdError> {
        if self.config_open && self.config_rx.has_changed().unwrap_or(false) {
            return Ok(SchedulerState::Reconfiguring);
        }
        if !self.link.is_connected() {
            return Ok(SchedulerState::Recovering);
        }

        let tick_start = Instant::now();
        let Some(mut pipeline) = self.pipeline.take() else {
            // No usable configuration: idle until one arrives.
            let interval = self.config.display.frame_interval();
            self.wait_until(tick_start + interval, true).await;
            return Ok(SchedulerState::Running);
        };
        if pipeline.device != self.link.profile().map_or(pipeline.device, |p| p.id) {
            self.replace_pipeline(Some(pipeline));
            return Ok(SchedulerState::Reconfiguring);
        }

        // Lanczos resampling and USB writes stay off the async workers.
        let mut link = self.link.take();
        let mut stats = self.stats;
        let mut blank_sequence = self.blank_sequence;
        let (pipeline, link, stats, blank_sequence, rendered) =
            tokio::task::spawn_blocking(move || {
                let rendered = pipeline.render(&mut link, &mut stats, &mut blank_sequence);
                (pipeline, link, stats, blank_sequence, rendered)
            })
            .await
            .map_err(|e| LcdError::Other(format!("frame task failed: {e}")))?;
        self.pipeline = Some(pipeline);
        self.link = link;
        self.stats = stats;
        self.blank_sequence = blank_sequence;
        let rendered = rendered?;

        match rendered.sent {
            Ok(()) => {}
            Err(LcdError::ProfileMismatch { expected, actual }) => {
                warn!("[{}] pipeline built for {actual}, link is {expected}; rebuilding", self.name);
                return Ok(SchedulerState::Reconfiguring);
            }
            Err(e) => {
                warn!("[{}] {e}; recovering", self.name);
                return Ok(SchedulerState::Recovering);
            }
        }

        self.report();
        self.wait_until(tick_start + rendered.period, true).await;
        Ok(SchedulerState::Running)
    }

    async fn on_recover(&mut self) -> Result<SchedulerState, LcdError> {
        if self.link.is_connected() {
            self.link.disconnect();
        }
        let delay = self.backoff.next_delay();
        info!(
            "[{}] reconnecting in {delay:?} (attempt {})",
            self.name,
            self.backoff.attempts()
        );
        // A new snapshot may name a panel that is actually attached.
        self.wait_until(Instant::now() + delay, true).await;
        if !self.is_running() {
            return Ok(SchedulerState::Recovering);
        }
        if self.adopt_snapshot() == Some(true) {
            info!(
                "[{}] device changed to {} while recovering",
                self.name,
                self.config.selector.describe()
            );
        }

        match self.link.connect(&self.config.selector) {
            Ok(profile) => {
                let id = profile.id;
                self.stats.reconnects += 1;
                self.backoff.reset();
                let pipeline_matches = self.pipeline.as_ref().is_some_and(|p| p.device == id);
                Ok(if pipeline_matches {
                    SchedulerState::Running
                } else {
                    SchedulerState::Reconfiguring
                })
            }
            Err(e @ LcdError::InvalidTransition(_)) => Err(e),
            Err(e) => {
                debug!("[{}] reconnect failed: {e}", self.name);
                Ok(SchedulerState::Recovering)
            }
        }
    }

    fn enter_stopped(&mut self) {
        self.replace_pipeline(None);
        self.link.close();
        self.state = SchedulerState::Stopped;
    }

    // ── Helpers ──────────────────────────────────────────────────

    /// Switch to a pending configuration snapshot, if there is one.
    ///
    /// Returns `None` when nothing changed, otherwise whether the new
    /// snapshot selects a different device. The current pipeline is
    /// dropped either way; a device change also releases the link and
    /// restarts the backoff.
    fn adopt_snapshot(&mut self) -> Option<bool> {
        if !self.config_open || !self.config_rx.has_changed().unwrap_or(false) {
            return None;
        }
        let next = self.config_rx.borrow_and_update().clone();
        let switch_device = !next.selector.same_device(&self.config.selector);
        if next.link != self.config.link {
            self.backoff = Backoff::from_settings(&next.link);
            self.link.set_write_timeout(next.link.write_timeout());
        }
        self.config = next;
        self.replace_pipeline(None);
        if switch_device {
            if self.link.is_connected() {
                self.link.disconnect();
            }
            self.backoff.reset();
        }
        Some(switch_device)
    }

    fn replace_pipeline(&mut self, pipeline: Option<Pipeline>) {
        if let Some(old) = self.pipeline.take() {
            self.dropped_before += old.source.dropped_frames();
        }
        self.pipeline = pipeline;
    }

    /// Sleep until `deadline`, waking early on stop and optionally on a
    /// new configuration snapshot.
    async fn wait_until(&mut self, deadline: Instant, wake_on_config: bool) {
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let slice = (deadline - now).min(STOP_POLL);
            if wake_on_config && self.config_open {
                tokio::select! {
                    _ = tokio::time::sleep(slice) => {}
                    changed = self.config_rx.changed() => match changed {
                        Ok(()) => return,
                        Err(_) => self.config_open = false,
                    },
                }
            } else {
                tokio::time::sleep(slice).await;
            }
        }
    }

    fn report(&mut self) {
        let elapsed = self.last_report.elapsed();
        if elapsed < REPORT_INTERVAL {
            return;
        }
        self.last_report = Instant::now();
        let report = self.link.drain_throughput(elapsed);
        info!(
            "[{}] {} frames sent, {} in the last {elapsed:?}, {:.1} KiB/s, write {:?} mean {:?} max",
            self.name,
            self.stats.frames_sent,
            report.frames,
            report.bytes_per_sec / 1024.0,
            report.mean_write,
            report.max_write
        );
    }

    /// Registry shared with the link.
    pub fn registry(&self) -> &ProfileRegistry {
        &self.registry
    }
}
