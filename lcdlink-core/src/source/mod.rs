//! Frame sources: everything that can fill the panel.
//!
//! ## Sub-modules
//!
//! | Module       | Purpose                                               |
//! |--------------|-------------------------------------------------------|
//! | `still`      | Single image, decoded once, repeated forever          |
//! | `clip`       | Fully buffered finite sequence with per-frame hold    |
//! | `gif`        | Animated GIF → `ClipSource`                           |
//! | `collection` | Directory of images → `ClipSource`                    |
//! | `video`      | FFmpeg-decoded video → `ClipSource` (`video` feature) |
//! | `window`     | Live capture of an external window                    |
//! | `capture`    | Win32 and X11 backends for `window`                   |
//!
//! Finite sources report their end with [`SourceEvent::EndOfCycle`]; the
//! scheduler then calls [`FrameSource::restart`] to loop.

pub mod capture;
pub mod clip;
pub mod collection;
pub mod gif;
pub mod still;
pub mod video;
pub mod window;

use std::sync::Arc;

use crate::config::{BackgroundKind, DisplayConfig};
use crate::error::LcdError;
use crate::types::Frame;

pub use clip::{ClipFrame, ClipSource};
pub use still::StillSource;
pub use window::{WindowBackend, WindowCaptureSource, WindowHandle, WindowMatchCache};

// ── SourceEvent ──────────────────────────────────────────────────

/// Result of one pull from a source.
#[derive(Debug)]
pub enum SourceEvent {
    Frame(Frame),
    /// A finite source has delivered its last frame.
    EndOfCycle,
    /// A live source has nothing to show right now.
    NoContent,
}

// ── FrameSource ──────────────────────────────────────────────────

/// Produces frames at the source's native resolution.
pub trait FrameSource: Send {
    fn kind(&self) -> BackgroundKind;

    fn next_frame(&mut self) -> Result<SourceEvent, LcdError>;

    /// Rewind to the first frame. No-op for infinite sources.
    fn restart(&mut self) -> Result<(), LcdError>;

    /// Frames produced but overwritten before they were pulled.
    fn dropped_frames(&self) -> u64 {
        0
    }
}

// ── Factory ──────────────────────────────────────────────────────

/// Open the source described by `config`, using the platform window
/// backend for window capture.
pub fn open_source(config: &DisplayConfig) -> Result<Box<dyn FrameSource>, LcdError> {
    open_source_with(config, capture::platform_backend())
}

/// Open the source described by `config` with an explicit window backend.
pub fn open_source_with(
    config: &DisplayConfig,
    windows: Option<Arc<dyn WindowBackend>>,
) -> Result<Box<dyn FrameSource>, LcdError> {
    let source: Box<dyn FrameSource> = match config.background_type {
        BackgroundKind::Image => Box::new(StillSource::open(&config.path)?),
        BackgroundKind::Video if !video::can_decode(&config.path) => {
            tracing::warn!(
                "cannot decode {} as video (supported: {}); showing it as a still image",
                config.path.display(),
                video::VIDEO_EXTENSIONS.join(", ")
            );
            Box::new(StillSource::open(&config.path)?)
        }
        BackgroundKind::Video => Box::new(video::open_video(&config.path)?),
        BackgroundKind::Gif => Box::new(gif::open_gif(&config.path)?),
        BackgroundKind::ImageCollection => {
            Box::new(collection::open_collection(&config.path, config.dwell())?)
        }
        BackgroundKind::WindowCapture => {
            let pattern = config.window_title.trim();
            if pattern.is_empty() {
                return Err(LcdError::source_unavailable(
                    config.locator(),
                    "empty window title pattern",
                ));
            }
            let backend = windows.ok_or_else(|| {
                LcdError::source_unavailable(
                    config.locator(),
                    "window capture is not supported on this platform",
                )
            })?;
            Box::new(WindowCaptureSource::spawn(
                backend,
                pattern,
                config.frame_interval(),
            )?)
        }
    };
    tracing::debug!("opened {:?} source: {}", source.kind(), config.locator());
    Ok(source)
}
