//! Scheduler tests: the whole pipeline from a file on disk to bytes on a
//! fake USB bus, driven one state transition at a time on a paused clock.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::codecs::gif::GifEncoder;
use image::{Delay, Rgb, RgbImage, Rgba, RgbaImage};
use lcdlink_core::{
    BackgroundKind, DeviceConfig, DeviceId, DeviceProfile, DeviceSelector, DisplayConfig,
    LcdError, LinkSettings, ProfileRegistry, Resolution, Scheduler, SchedulerState, UsbBackend,
    UsbDeviceInfo, UsbWriter, WindowBackend,
};
use lcdlink_core::source::WindowHandle;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_test::assert_ok;

// ── Helpers ──────────────────────────────────────────────────────

const SMALL_HID: DeviceId = DeviceId {
    vendor_id: 0x0416,
    product_id: 0x5302,
};
const SQUARE_HID: DeviceId = DeviceId {
    vendor_id: 0x0418,
    product_id: 0x5304,
};

#[derive(Default)]
struct Bus {
    devices: Vec<UsbDeviceInfo>,
    /// Every write fails while set.
    broken: bool,
    opens: usize,
    bytes: usize,
    /// The next write sleeps this long.
    stall: Option<Duration>,
    stall_finished: bool,
}

#[derive(Clone, Default)]
struct FakeUsb(Arc<Mutex<Bus>>);

impl FakeUsb {
    fn with(ids: &[DeviceId]) -> Self {
        let fake = Self::default();
        for (i, id) in ids.iter().enumerate() {
            fake.attach(*id, i as u8 + 1);
        }
        fake
    }

    fn attach(&self, id: DeviceId, address: u8) {
        self.0.lock().unwrap().devices.push(UsbDeviceInfo {
            id,
            bus: 1,
            address,
        });
    }

    fn unplug_all(&self) {
        self.0.lock().unwrap().devices.clear();
    }

    fn set_broken(&self, broken: bool) {
        self.0.lock().unwrap().broken = broken;
    }

    fn bytes(&self) -> usize {
        self.0.lock().unwrap().bytes
    }

    fn opens(&self) -> usize {
        self.0.lock().unwrap().opens
    }

    fn stall_next_write(&self, duration: Duration) {
        self.0.lock().unwrap().stall = Some(duration);
    }

    fn stall_finished(&self) -> bool {
        self.0.lock().unwrap().stall_finished
    }
}

struct FakeWriter(Arc<Mutex<Bus>>);

impl UsbWriter for FakeWriter {
    fn write(&mut self, data: &[u8]) -> Result<usize, LcdError> {
        let stall = self.0.lock().unwrap().stall.take();
        if let Some(duration) = stall {
            std::thread::sleep(duration);
            self.0.lock().unwrap().stall_finished = true;
        }
        let mut bus = self.0.lock().unwrap();
        if bus.broken {
            return Err(LcdError::LinkLost("device unplugged".into()));
        }
        bus.bytes += data.len();
        Ok(data.len())
    }
}

impl UsbBackend for FakeUsb {
    fn enumerate(&self) -> Result<Vec<UsbDeviceInfo>, LcdError> {
        Ok(self.0.lock().unwrap().devices.clone())
    }

    fn open(
        &self,
        _info: &UsbDeviceInfo,
        _profile: &DeviceProfile,
        _write_timeout: Duration,
    ) -> Result<Box<dyn UsbWriter>, LcdError> {
        self.0.lock().unwrap().opens += 1;
        Ok(Box::new(FakeWriter(Arc::clone(&self.0))))
    }
}

/// A window backend with no windows at all.
struct NoWindows;

impl WindowBackend for NoWindows {
    fn find(&self, _pattern: &str) -> Option<WindowHandle> {
        None
    }

    fn capture(&self, _handle: WindowHandle) -> Option<RgbImage> {
        None
    }
}

fn write_png(dir: &Path) -> PathBuf {
    let path = dir.join("background.png");
    RgbImage::from_pixel(64, 48, Rgb([200, 40, 10]))
        .save(&path)
        .unwrap();
    path
}

fn write_gif(dir: &Path, frames: usize, delay_ms: u32) -> PathBuf {
    let path = dir.join("anim.gif");
    let file = std::fs::File::create(&path).unwrap();
    let mut enc = GifEncoder::new(file);
    let frames = (0..frames).map(|i| {
        image::Frame::from_parts(
            RgbaImage::from_pixel(8, 8, Rgba([(i * 60) as u8, 0, 0, 255])),
            0,
            0,
            Delay::from_numer_denom_ms(delay_ms, 1),
        )
    });
    enc.encode_frames(frames).unwrap();
    path
}

fn still_config(id: DeviceId, path: PathBuf) -> DeviceConfig {
    DeviceConfig {
        selector: DeviceSelector::for_device(id),
        display: DisplayConfig {
            background_type: BackgroundKind::Image,
            path,
            capture_fps: 10,
            ..Default::default()
        },
        link: LinkSettings::default(),
    }
}

fn scheduler(usb: &FakeUsb, config: DeviceConfig) -> (Scheduler, watch::Sender<DeviceConfig>) {
    let (tx, rx) = watch::channel(config);
    let sched = Scheduler::new(
        "test",
        Arc::new(ProfileRegistry::builtin()),
        Arc::new(usb.clone()),
        rx,
    );
    (sched, tx)
}

async fn step(sched: &mut Scheduler) -> SchedulerState {
    assert_ok!(sched.step().await)
}

/// Step from `Idle` to the first `Running`.
async fn start(sched: &mut Scheduler) {
    assert_eq!(step(sched).await, SchedulerState::Reconfiguring);
    assert_eq!(step(sched).await, SchedulerState::Running);
}

// ── Streaming ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_streams_still_image_at_panel_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let (mut sched, _tx) = scheduler(&usb, still_config(SMALL_HID, write_png(dir.path())));

    start(&mut sched).await;
    assert!(sched.has_pipeline());
    assert_eq!(sched.resolution(), Some(Resolution::new(320, 240)));

    for _ in 0..3 {
        assert_eq!(step(&mut sched).await, SchedulerState::Running);
    }
    let stats = sched.stats();
    assert_eq!(stats.frames_sent, 3);
    assert_eq!(sched.link().stats().frames_sent, 3);
    // Three RGB565 frames plus headers.
    assert!(usb.bytes() > 3 * 320 * 240 * 2);
}

#[tokio::test(start_paused = true)]
async fn test_frames_are_paced_by_capture_fps() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let (mut sched, _tx) = scheduler(&usb, still_config(SMALL_HID, write_png(dir.path())));
    start(&mut sched).await;

    let t0 = Instant::now();
    step(&mut sched).await;
    step(&mut sched).await;
    // capture_fps = 10
    assert!(t0.elapsed() >= Duration::from_millis(200));
}

#[tokio::test(start_paused = true)]
async fn test_gif_loops_and_honours_frame_delay() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let mut config = still_config(SMALL_HID, write_gif(dir.path(), 3, 300));
    config.display.background_type = BackgroundKind::Gif;
    config.display.capture_fps = 30;
    let (mut sched, _tx) = scheduler(&usb, config);
    start(&mut sched).await;

    let t0 = Instant::now();
    for _ in 0..3 {
        step(&mut sched).await;
    }
    // Each frame holds longer than the 33 ms tick.
    assert!(t0.elapsed() >= Duration::from_millis(900));
    assert_eq!(sched.stats().loops_completed, 0);

    step(&mut sched).await;
    let stats = sched.stats();
    assert_eq!(stats.loops_completed, 1);
    assert_eq!(stats.frames_sent, 4);
}

#[tokio::test(start_paused = true)]
async fn test_extreme_scale_factors_stream_at_panel_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(dir.path());
    for scale in [1e-6, 1e7] {
        let usb = FakeUsb::with(&[SMALL_HID]);
        let mut config = still_config(SMALL_HID, path.clone());
        config.display.scale_factor = scale;
        let (mut sched, _tx) = scheduler(&usb, config);
        start(&mut sched).await;
        assert!(sched.has_pipeline(), "scale {scale}");

        assert_eq!(step(&mut sched).await, SchedulerState::Running);
        assert_eq!(sched.stats().frames_sent, 1, "scale {scale}");
        assert_eq!(sched.resolution(), Some(Resolution::new(320, 240)));
    }
}

#[tokio::test]
async fn test_blocking_usb_write_leaves_runtime_responsive() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    usb.stall_next_write(Duration::from_millis(500));
    let (mut sched, _tx) = scheduler(&usb, still_config(SMALL_HID, write_png(dir.path())));
    let stop = sched.stop_handle();
    let task = tokio::spawn(async move { sched.run().await });

    // The test runtime has one thread; a write on it would stall this loop.
    let started = std::time::Instant::now();
    let mut longest = Duration::ZERO;
    while !usb.stall_finished() && started.elapsed() < Duration::from_secs(5) {
        let t = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(5)).await;
        longest = longest.max(t.elapsed());
    }
    assert!(usb.stall_finished());
    assert!(longest < Duration::from_millis(250), "runtime stalled for {longest:?}");

    stop.store(false, Ordering::SeqCst);
    assert_ok!(task.await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_missing_window_sends_black_frames() {
    let usb = FakeUsb::with(&[SMALL_HID]);
    let config = DeviceConfig {
        selector: DeviceSelector::for_device(SMALL_HID),
        display: DisplayConfig {
            background_type: BackgroundKind::WindowCapture,
            window_title: "does not exist".into(),
            capture_fps: 20,
            ..Default::default()
        },
        link: LinkSettings::default(),
    };
    let (sched, _tx) = scheduler(&usb, config);
    let mut sched = sched.with_window_backend(Arc::new(NoWindows));
    start(&mut sched).await;

    step(&mut sched).await;
    step(&mut sched).await;
    let stats = sched.stats();
    assert_eq!(stats.blank_frames, 2);
    assert_eq!(stats.frames_sent, 2);
}

// ── Recovery ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_no_device_retries_with_growing_backoff() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::default();
    let (mut sched, _tx) = scheduler(&usb, still_config(SMALL_HID, write_png(dir.path())));

    assert_eq!(step(&mut sched).await, SchedulerState::Recovering);

    let mut waits = Vec::new();
    for _ in 0..3 {
        let t0 = Instant::now();
        assert_eq!(step(&mut sched).await, SchedulerState::Recovering);
        waits.push(t0.elapsed());
    }
    assert!(waits[0] >= Duration::from_millis(250));
    assert!(waits[1] >= Duration::from_millis(500));
    assert!(waits[2] >= Duration::from_millis(1000));
    assert_eq!(sched.stats().reconnects, 0);

    usb.attach(SMALL_HID, 1);
    assert_eq!(step(&mut sched).await, SchedulerState::Reconfiguring);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert_eq!(sched.stats().reconnects, 1);
    assert_eq!(sched.backoff().attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_recovers_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let (mut sched, _tx) = scheduler(&usb, still_config(SMALL_HID, write_png(dir.path())));
    start(&mut sched).await;
    step(&mut sched).await;

    usb.set_broken(true);
    usb.unplug_all();
    assert_eq!(step(&mut sched).await, SchedulerState::Recovering);
    assert!(!sched.link().is_connected());
    assert_eq!(step(&mut sched).await, SchedulerState::Recovering);

    usb.set_broken(false);
    usb.attach(SMALL_HID, 7);
    // Same device: the existing pipeline is reused.
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);

    let stats = sched.stats();
    assert_eq!(stats.frames_sent, 2);
    assert_eq!(stats.reconnects, 1);
    assert_eq!(sched.link().stats().failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_new_selector_while_recovering_reaches_attached_panel() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SQUARE_HID]);
    let mut config = still_config(SMALL_HID, write_png(dir.path()));
    config.link.backoff_initial_ms = 60_000;
    config.link.backoff_max_ms = 60_000;
    let (mut sched, tx) = scheduler(&usb, config.clone());

    assert_eq!(step(&mut sched).await, SchedulerState::Recovering);

    let mut next = config;
    next.selector = DeviceSelector::for_device(SQUARE_HID);
    tx.send(next).unwrap();

    // The new snapshot cuts the one-minute backoff short.
    let t0 = Instant::now();
    assert_eq!(step(&mut sched).await, SchedulerState::Reconfiguring);
    assert!(t0.elapsed() < Duration::from_secs(1));
    assert_eq!(sched.active_config().selector.product_id, Some(0x5304));
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);

    assert_eq!(sched.link().profile().map(|p| p.id), Some(SQUARE_HID));
    assert_eq!(sched.resolution(), Some(Resolution::new(480, 480)));
    assert_eq!(sched.stats().frames_sent, 1);
    assert_eq!(sched.backoff().attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_sent_before_first_connect_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SQUARE_HID]);
    let config = still_config(SMALL_HID, write_png(dir.path()));
    let (mut sched, tx) = scheduler(&usb, config.clone());

    let mut next = config;
    next.selector = DeviceSelector::for_device(SQUARE_HID);
    next.display.rotation = 180.0;
    tx.send(next).unwrap();

    start(&mut sched).await;
    assert_eq!(sched.link().profile().map(|p| p.id), Some(SQUARE_HID));
    assert_eq!(sched.active_config().display.rotation, 180.0);
    assert_eq!(sched.stats().reconnects, 0);
}

#[tokio::test(start_paused = true)]
async fn test_display_change_while_recovering_rebuilds_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let config = still_config(SMALL_HID, write_png(dir.path()));
    let (mut sched, tx) = scheduler(&usb, config.clone());
    start(&mut sched).await;
    step(&mut sched).await;

    usb.set_broken(true);
    assert_eq!(step(&mut sched).await, SchedulerState::Recovering);
    usb.set_broken(false);

    let mut next = config;
    next.display.scale_factor = 0.5;
    tx.send(next).unwrap();

    // Same device, new display settings: reconnect, then rebuild.
    assert_eq!(step(&mut sched).await, SchedulerState::Reconfiguring);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert_eq!(sched.active_config().display.scale_factor, 0.5);
    assert!(sched.has_pipeline());
}

// ── Reconfiguration ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_display_change_keeps_link_open() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let config = still_config(SMALL_HID, write_png(dir.path()));
    let (mut sched, tx) = scheduler(&usb, config.clone());
    start(&mut sched).await;
    step(&mut sched).await;

    let mut next = config;
    next.display.rotation = 90.0;
    next.display.scale_factor = 0.5;
    tx.send(next).unwrap();

    assert_eq!(step(&mut sched).await, SchedulerState::Reconfiguring);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert_eq!(sched.active_config().display.rotation, 90.0);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);

    assert_eq!(usb.opens(), 1);
    assert_eq!(sched.link().stats().connects, 1);
    assert_eq!(sched.stats().frames_sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_selector_change_moves_to_other_device() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID, SQUARE_HID]);
    let config = still_config(SMALL_HID, write_png(dir.path()));
    let (mut sched, tx) = scheduler(&usb, config.clone());
    start(&mut sched).await;

    let mut next = config;
    next.selector = DeviceSelector::for_device(SQUARE_HID);
    tx.send(next).unwrap();

    assert_eq!(step(&mut sched).await, SchedulerState::Reconfiguring);
    assert_eq!(step(&mut sched).await, SchedulerState::Recovering);
    assert!(!sched.has_pipeline());
    assert_eq!(step(&mut sched).await, SchedulerState::Reconfiguring);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);

    assert_eq!(sched.link().profile().map(|p| p.id), Some(SQUARE_HID));
    assert_eq!(sched.resolution(), Some(Resolution::new(480, 480)));
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert_eq!(sched.stats().frames_sent, 1);
}

#[tokio::test(start_paused = true)]
async fn test_bad_config_waits_for_a_good_one() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let good = still_config(SMALL_HID, write_png(dir.path()));
    let bad = still_config(SMALL_HID, dir.path().join("missing.png"));
    let (mut sched, tx) = scheduler(&usb, bad);

    start(&mut sched).await;
    assert!(!sched.has_pipeline());
    assert_eq!(sched.stats().build_failures, 1);

    // Idles without sending while there is nothing to show.
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert_eq!(sched.stats().frames_sent, 0);

    tx.send(good).unwrap();
    assert_eq!(step(&mut sched).await, SchedulerState::Reconfiguring);
    assert_eq!(step(&mut sched).await, SchedulerState::Running);
    assert!(sched.has_pipeline());
    step(&mut sched).await;
    assert_eq!(sched.stats().frames_sent, 1);
    assert!(sched.link().is_connected());
}

// ── Shutdown ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_stop_handle_ends_run() {
    let dir = tempfile::tempdir().unwrap();
    let usb = FakeUsb::with(&[SMALL_HID]);
    let (mut sched, _tx) = scheduler(&usb, still_config(SMALL_HID, write_png(dir.path())));
    let stop = sched.stop_handle();

    let task = tokio::spawn(async move {
        let stats = sched.run().await;
        (stats, sched.state(), sched.link().phase().is_closed())
    });

    tokio::time::sleep(Duration::from_millis(550)).await;
    stop.store(false, Ordering::SeqCst);

    let (stats, state, closed) = task.await.unwrap();
    let stats = assert_ok!(stats);
    assert!(stats.frames_sent >= 1);
    assert_eq!(state, SchedulerState::Stopped);
    assert!(closed);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_backoff() {
    let usb = FakeUsb::default();
    let mut config = still_config(SMALL_HID, PathBuf::from("unused.png"));
    config.link.backoff_initial_ms = 60_000;
    config.link.backoff_max_ms = 60_000;
    let (mut sched, _tx) = scheduler(&usb, config);

    assert_eq!(step(&mut sched).await, SchedulerState::Recovering);
    let stop = sched.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        stop.store(false, Ordering::SeqCst);
    });

    let t0 = Instant::now();
    step(&mut sched).await;
    assert!(t0.elapsed() < Duration::from_secs(1));
    assert_eq!(step(&mut sched).await, SchedulerState::Stopped);
}
