//! Live capture of an external application window.
//!
//! Window lookup and pixel grabbing go through a [`WindowBackend`] so the
//! source itself stays platform-independent; the Win32 implementation lives
//! in [`capture`](super::capture). The last successful title lookup is
//! memoized in a [`WindowMatchCache`], which is invalidated as soon as a
//! capture through the cached handle fails.
//!
//! [`WindowCaptureSource::spawn`] runs the capture on its own thread and
//! publishes each capture on a `tokio::sync::watch` channel; the scheduler
//! always reads the newest one and captures it never saw count as dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use image::RgbImage;
use tokio::sync::watch;

use super::{FrameSource, SourceEvent};
use crate::config::BackgroundKind;
use crate::error::LcdError;
use crate::types::Frame;

// ── WindowBackend ────────────────────────────────────────────────

/// Opaque OS window handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// Platform window enumeration and capture.
pub trait WindowBackend: Send + Sync {
    /// First visible window whose title contains `pattern`
    /// (case-insensitive).
    fn find(&self, pattern: &str) -> Option<WindowHandle>;

    /// Client-area pixels, or `None` if the window is gone.
    fn capture(&self, handle: WindowHandle) -> Option<RgbImage>;
}

/// Case-insensitive substring match used by every backend.
pub fn title_matches(title: &str, pattern: &str) -> bool {
    title.to_lowercase().contains(&pattern.to_lowercase())
}

// ── WindowMatchCache ─────────────────────────────────────────────

/// Memoized title → handle lookup.
#[derive(Debug, Clone)]
pub struct WindowMatchCache {
    pattern: String,
    handle: Option<WindowHandle>,
    lookups: u64,
}

impl WindowMatchCache {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            handle: None,
            lookups: 0,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn cached(&self) -> Option<WindowHandle> {
        self.handle
    }

    /// Number of times the backend was asked to search.
    pub fn lookups(&self) -> u64 {
        self.lookups
    }

    /// Cached handle, or a fresh lookup if none is cached.
    pub fn resolve(&mut self, backend: &dyn WindowBackend) -> Option<WindowHandle> {
        if self.handle.is_none() {
            self.lookups += 1;
            self.handle = backend.find(&self.pattern);
        }
        self.handle
    }

    pub fn invalidate(&mut self) {
        self.handle = None;
    }

    /// Capture the matched window, searching again once if the cached
    /// handle went stale.
    pub fn capture(&mut self, backend: &dyn WindowBackend) -> Option<RgbImage> {
        let was_cached = self.handle.is_some();
        let handle = self.resolve(backend)?;
        if let Some(image) = backend.capture(handle) {
            return Some(image);
        }
        self.invalidate();
        if !was_cached {
            return None;
        }
        let handle = self.resolve(backend)?;
        let image = backend.capture(handle);
        if image.is_none() {
            self.invalidate();
        }
        image
    }
}

// ── WindowCaptureSource ──────────────────────────────────────────

enum Mode {
    /// Capture on the caller's thread at every pull.
    Inline {
        backend: Arc<dyn WindowBackend>,
        cache: WindowMatchCache,
    },
    /// Capture on a producer thread, hand off through a watch channel.
    Threaded {
        frame_rx: watch::Receiver<Capture>,
        running: Arc<AtomicBool>,
        worker: Option<JoinHandle<()>>,
        last: Option<RgbImage>,
        /// Sequence of the last capture read from `frame_rx`.
        seen: u64,
        dropped: u64,
    },
}

/// One capture published by the producer thread.
#[derive(Debug, Clone, Default)]
struct Capture {
    /// Starts at 1; 0 is the empty initial value.
    sequence: u64,
    image: Option<RgbImage>,
}

pub struct WindowCaptureSource {
    pattern: String,
    mode: Mode,
    sequence: u64,
}

impl WindowCaptureSource {
    /// Capture synchronously inside [`next_frame`](FrameSource::next_frame).
    pub fn new(backend: Arc<dyn WindowBackend>, pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            mode: Mode::Inline {
                backend,
                cache: WindowMatchCache::new(pattern),
            },
            sequence: 0,
        }
    }

    /// Start a producer thread that captures every `interval`.
    pub fn spawn(
        backend: Arc<dyn WindowBackend>,
        pattern: &str,
        interval: Duration,
    ) -> Result<Self, LcdError> {
        let (frame_tx, frame_rx) = watch::channel(Capture::default());
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let running = Arc::clone(&running);
            let mut cache = WindowMatchCache::new(pattern);
            std::thread::Builder::new()
                .name("window-capture".into())
                .spawn(move || {
                    tracing::debug!("window capture thread started for '{}'", cache.pattern());
                    let mut sequence = 0;
                    while running.load(Ordering::Relaxed) {
                        sequence += 1;
                        frame_tx.send_replace(Capture {
                            sequence,
                            image: cache.capture(backend.as_ref()),
                        });
                        std::thread::sleep(interval);
                    }
                    tracing::debug!("window capture thread stopped");
                })?
        };

        Ok(Self {
            pattern: pattern.to_string(),
            mode: Mode::Threaded {
                frame_rx,
                running,
                worker: Some(worker),
                last: None,
                seen: 0,
                dropped: 0,
            },
            sequence: 0,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn latest(&mut self) -> Option<RgbImage> {
        match &mut self.mode {
            Mode::Inline { backend, cache } => cache.capture(backend.as_ref()),
            Mode::Threaded {
                frame_rx,
                last,
                seen,
                dropped,
                ..
            } => {
                if frame_rx.has_changed().unwrap_or(false) {
                    let capture = frame_rx.borrow_and_update();
                    *dropped += capture.sequence.saturating_sub(*seen + 1);
                    *seen = capture.sequence;
                    *last = capture.image.clone();
                }
                last.clone()
            }
        }
    }

    /// Captures overwritten before the scheduler took them.
    pub fn dropped(&self) -> u64 {
        match &self.mode {
            Mode::Inline { .. } => 0,
            Mode::Threaded { dropped, .. } => *dropped,
        }
    }
}

impl FrameSource for WindowCaptureSource {
    fn kind(&self) -> BackgroundKind {
        BackgroundKind::WindowCapture
    }

    fn next_frame(&mut self) -> Result<SourceEvent, LcdError> {
        let Some(image) = self.latest() else {
            return Ok(SourceEvent::NoContent);
        };
        let frame = Frame::new(image, self.sequence);
        self.sequence += 1;
        Ok(SourceEvent::Frame(frame))
    }

    fn restart(&mut self) -> Result<(), LcdError> {
        Ok(())
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped()
    }
}

impl Drop for WindowCaptureSource {
    fn drop(&mut self) {
        if let Mode::Threaded {
            running, worker, ..
        } = &mut self.mode
        {
            running.store(false, Ordering::Relaxed);
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}
