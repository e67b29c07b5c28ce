//! Animated GIF background.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage};

use super::clip::{ClipFrame, ClipSource};
use crate::config::BackgroundKind;
use crate::error::LcdError;

/// Used when a frame carries no delay.
pub const DEFAULT_FRAME_DELAY: Duration = Duration::from_millis(100);

/// Decode every frame of the GIF at `path` with its delay.
pub fn open_gif(path: &Path) -> Result<ClipSource, LcdError> {
    let locator = path.display().to_string();
    let unavailable = |e: &dyn std::fmt::Display| LcdError::source_unavailable(&locator, e);

    let file = File::open(path).map_err(|e| unavailable(&e))?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| unavailable(&e))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| unavailable(&e))?;

    let clip: Vec<ClipFrame> = frames
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let ms = if denom == 0 { 0 } else { numer / denom };
            let hold = if ms == 0 {
                DEFAULT_FRAME_DELAY
            } else {
                Duration::from_millis(ms as u64)
            };
            ClipFrame {
                image: DynamicImage::ImageRgba8(frame.into_buffer()).to_rgb8(),
                hold: Some(hold),
            }
        })
        .collect();

    tracing::info!("decoded GIF {} ({} frames)", locator, clip.len());
    ClipSource::new(BackgroundKind::Gif, &locator, clip)
}
