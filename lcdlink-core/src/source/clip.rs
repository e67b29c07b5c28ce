//! Fully buffered finite frame sequence.
//!
//! Video, GIF and image collections all decode up front into a
//! [`ClipSource`]. Playback is a cursor over the buffered frames; the end
//! of the buffer is reported as [`SourceEvent::EndOfCycle`].

use std::time::Duration;

use image::RgbImage;

use super::{FrameSource, SourceEvent};
use crate::config::BackgroundKind;
use crate::error::LcdError;
use crate::types::Frame;

/// One buffered frame and how long it stays on screen.
#[derive(Debug, Clone)]
pub struct ClipFrame {
    pub image: RgbImage,
    /// `None` means "use the panel refresh rate".
    pub hold: Option<Duration>,
}

#[derive(Debug)]
pub struct ClipSource {
    kind: BackgroundKind,
    frames: Vec<ClipFrame>,
    cursor: usize,
    /// Keeps counting across restarts.
    sequence: u64,
}

impl ClipSource {
    /// Fails with `SourceUnavailable` if `frames` is empty.
    pub fn new(
        kind: BackgroundKind,
        locator: &str,
        frames: Vec<ClipFrame>,
    ) -> Result<Self, LcdError> {
        if frames.is_empty() {
            return Err(LcdError::source_unavailable(locator, "no frames"));
        }
        Ok(Self {
            kind,
            frames,
            cursor: 0,
            sequence: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Position of the next frame to be pulled.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Sum of all per-frame holds that are set.
    pub fn total_hold(&self) -> Duration {
        self.frames.iter().filter_map(|f| f.hold).sum()
    }
}

impl FrameSource for ClipSource {
    fn kind(&self) -> BackgroundKind {
        self.kind
    }

    fn next_frame(&mut self) -> Result<SourceEvent, LcdError> {
        let Some(clip) = self.frames.get(self.cursor) else {
            return Ok(SourceEvent::EndOfCycle);
        };
        let frame = Frame::new(clip.image.clone(), self.sequence).with_hold(clip.hold);
        self.cursor += 1;
        self.sequence += 1;
        Ok(SourceEvent::Frame(frame))
    }

    fn restart(&mut self) -> Result<(), LcdError> {
        self.cursor = 0;
        Ok(())
    }
}
