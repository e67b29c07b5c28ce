//! Frame type passed between pipeline stages.
//!
//! A [`Frame`] is owned by exactly one stage at a time: the source creates
//! it, the transform consumes it and returns a new one, the encoder borrows
//! it to produce packets and then it is dropped.

use std::time::{Duration, Instant};

use image::{Rgb, RgbImage};

use crate::profile::Resolution;

// ── Frame ────────────────────────────────────────────────────────

/// A raw RGB8 frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Pixels, packed R, G, B.
    pub image: RgbImage,
    /// Monotonically increasing per source.
    pub sequence: u64,
    /// When the source produced the frame.
    pub timestamp: Instant,
    /// How long the source wants the frame on screen (native frame
    /// interval, GIF delay, collection dwell). `None` for live and
    /// still sources.
    pub hold: Option<Duration>,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            timestamp: Instant::now(),
            hold: None,
        }
    }

    /// All-black frame, used when a live source has nothing to show.
    pub fn blank(resolution: Resolution, sequence: u64) -> Self {
        Self::new(
            RgbImage::from_pixel(resolution.width, resolution.height, Rgb([0, 0, 0])),
            sequence,
        )
    }

    pub fn with_hold(mut self, hold: Option<Duration>) -> Self {
        self.hold = hold;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.image.width(), self.image.height())
    }

    /// Returns the RGB triple at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        self.image.get_pixel(x, y).0
    }

    /// Replace the pixels, keeping sequence, timestamp and hold.
    pub fn map_image(self, f: impl FnOnce(RgbImage) -> RgbImage) -> Self {
        Self {
            image: f(self.image),
            ..self
        }
    }
}
