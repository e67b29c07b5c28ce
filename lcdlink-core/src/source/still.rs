//! Static image background.

use std::path::Path;

use image::RgbImage;

use super::{FrameSource, SourceEvent};
use crate::config::BackgroundKind;
use crate::error::LcdError;
use crate::types::Frame;

/// Decoded once; every pull returns the same pixels.
#[derive(Debug, Clone)]
pub struct StillSource {
    image: RgbImage,
    sequence: u64,
}

impl StillSource {
    pub fn open(path: &Path) -> Result<Self, LcdError> {
        let image = image::open(path)
            .map_err(|e| LcdError::source_unavailable(path.display().to_string(), e))?
            .to_rgb8();
        tracing::info!(
            "loaded image {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::from_image(image))
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self { image, sequence: 0 }
    }
}

impl FrameSource for StillSource {
    fn kind(&self) -> BackgroundKind {
        BackgroundKind::Image
    }

    fn next_frame(&mut self) -> Result<SourceEvent, LcdError> {
        let frame = Frame::new(self.image.clone(), self.sequence);
        self.sequence += 1;
        Ok(SourceEvent::Frame(frame))
    }

    fn restart(&mut self) -> Result<(), LcdError> {
        Ok(())
    }
}
