//! Looping video background.
//!
//! The whole video stream is decoded into memory on open (audio is never
//! touched) and then played back as a [`ClipSource`] at the container's
//! native frame rate. Long or high-resolution clips therefore cost memory
//! proportional to `frames × width × height × 3`.
//!
//! Decoding uses FFmpeg through `ffmpeg-next` and is only compiled with the
//! `video` cargo feature. Without it, or for a file that is not a known
//! video container, [`open_source`](super::open_source) shows the file as a
//! still image instead.

use std::path::Path;

use super::clip::ClipSource;
use crate::error::LcdError;

/// Container extensions accepted as video, compared case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm", "flv", "wmv", "m4v"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
}

/// Whether [`open_video`] can handle `path` in this build.
pub fn can_decode(path: &Path) -> bool {
    cfg!(feature = "video") && is_video_file(path)
}

/// Decode the video at `path` into a looping clip.
pub fn open_video(path: &Path) -> Result<ClipSource, LcdError> {
    let locator = path.display().to_string();
    if !is_video_file(path) {
        return Err(LcdError::source_unavailable(
            locator,
            "unsupported video container",
        ));
    }
    if !path.is_file() {
        return Err(LcdError::source_unavailable(locator, "file not found"));
    }
    ffmpeg::decode(path, &locator)
}

// ── FFmpeg backend ───────────────────────────────────────────────

#[cfg(feature = "video")]
mod ffmpeg {
    use std::path::Path;
    use std::time::Duration;

    use ffmpeg_next::{
        codec, format,
        frame::Video as FfFrame,
        media::Type as StreamType,
        software::scaling::{context::Context as ScalingContext, flag::Flags},
        util::format::pixel::Pixel as PixelFormat,
    };
    use image::RgbImage;

    use crate::config::BackgroundKind;
    use crate::error::LcdError;
    use crate::source::clip::{ClipFrame, ClipSource};

    pub(super) fn decode(path: &Path, locator: &str) -> Result<ClipSource, LcdError> {
        let fail = |e: &dyn std::fmt::Display| LcdError::source_unavailable(locator, e);

        ffmpeg_next::init().map_err(|e| fail(&e))?;
        let mut ictx = format::input(&path).map_err(|e| fail(&e))?;
        let stream_idx = ictx
            .streams()
            .best(StreamType::Video)
            .ok_or_else(|| fail(&"no video stream"))?
            .index();
        let stream = ictx
            .stream(stream_idx)
            .ok_or_else(|| fail(&"video stream missing"))?;

        let rate = stream.avg_frame_rate();
        let hold = (rate.numerator() > 0 && rate.denominator() > 0).then(|| {
            Duration::from_secs_f64(rate.denominator() as f64 / rate.numerator() as f64)
        });

        let ctx_decoder =
            codec::Context::from_parameters(stream.parameters()).map_err(|e| fail(&e))?;
        let mut decoder = ctx_decoder.decoder().video().map_err(|e| fail(&e))?;
        let (width, height) = (decoder.width(), decoder.height());
        let mut scaler = ScalingContext::get(
            decoder.format(),
            width,
            height,
            PixelFormat::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|e| fail(&e))?;

        let mut frames = Vec::new();
        let mut decoded = FfFrame::empty();
        let mut rgb = FfFrame::empty();
        let mut drain = |decoder: &mut ffmpeg_next::decoder::Video,
                         frames: &mut Vec<ClipFrame>|
         -> Result<(), LcdError> {
            while decoder.receive_frame(&mut decoded).is_ok() {
                scaler.run(&decoded, &mut rgb).map_err(|e| fail(&e))?;
                frames.push(ClipFrame {
                    image: copy_rgb24(&rgb, width, height),
                    hold,
                });
            }
            Ok(())
        };

        for (s, packet) in ictx.packets() {
            if s.index() != stream_idx {
                continue;
            }
            decoder.send_packet(&packet).map_err(|e| fail(&e))?;
            drain(&mut decoder, &mut frames)?;
        }
        decoder.send_eof().map_err(|e| fail(&e))?;
        drain(&mut decoder, &mut frames)?;

        tracing::info!(
            "decoded video {} ({} frames, {}x{}, {:?}/frame)",
            locator,
            frames.len(),
            width,
            height,
            hold
        );
        ClipSource::new(BackgroundKind::Video, locator, frames)
    }

    /// Copy a packed RGB24 FFmpeg frame, dropping row padding.
    fn copy_rgb24(frame: &FfFrame, width: u32, height: u32) -> RgbImage {
        let stride = frame.stride(0);
        let data = frame.data(0);
        let row = width as usize * 3;
        let mut out = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            match data.get(start..start + row) {
                Some(line) => out.extend_from_slice(line),
                None => out.resize(out.len() + row, 0),
            }
        }
        RgbImage::from_raw(width, height, out).unwrap_or_else(|| RgbImage::new(width, height))
    }
}

#[cfg(not(feature = "video"))]
mod ffmpeg {
    use std::path::Path;

    use crate::error::LcdError;
    use crate::source::clip::ClipSource;

    pub(super) fn decode(_path: &Path, locator: &str) -> Result<ClipSource, LcdError> {
        Err(LcdError::source_unavailable(
            locator,
            "built without video support (enable the `video` feature)",
        ))
    }
}
