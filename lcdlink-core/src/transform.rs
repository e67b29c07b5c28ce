//! Frame transform: rotation, scale/crop and foreground overlay.
//!
//! [`transform`] maps a source-native frame onto the exact panel
//! resolution. It is a pure function of its inputs and keeps no state, so
//! every scheduler can call it without synchronisation.
//!
//! ```text
//! source frame ──► rotate ──► scale (fill | letterbox | zoom) ──► overlay ──► panel frame
//! ```

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage, RgbaImage};

use crate::config::{Foreground, RotationFit};
use crate::error::LcdError;
use crate::profile::Resolution;
use crate::types::Frame;

/// Resampling filter used for every resize.
pub const RESIZE_FILTER: FilterType = FilterType::Lanczos3;

const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

// ── TransformParams ──────────────────────────────────────────────

/// The geometric part of a display configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    /// Clockwise, in degrees. Any finite value; normalised into `[0, 360)`.
    pub rotation: f64,
    pub rotation_fit: RotationFit,
    /// Must be positive.
    pub scale_factor: f64,
}

impl Default for TransformParams {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            rotation_fit: RotationFit::Crop,
            scale_factor: 1.0,
        }
    }
}

// ── Overlay ──────────────────────────────────────────────────────

/// Foreground image composited on top of the scaled frame.
#[derive(Debug, Clone)]
pub struct Overlay {
    image: RgbaImage,
    opacity: f32,
    position: (i32, i32),
}

impl Overlay {
    pub fn new(image: RgbaImage, opacity: f32, position: (i32, i32)) -> Self {
        Self {
            image,
            opacity: opacity.clamp(0.0, 1.0),
            position,
        }
    }

    /// Decode the configured foreground and fit it to the panel.
    pub fn load(foreground: &Foreground, target: Resolution) -> Result<Self, LcdError> {
        let image = open_rgba(&foreground.path)?;
        let image = if image.dimensions() != (target.width, target.height) {
            imageops::resize(&image, target.width, target.height, RESIZE_FILTER)
        } else {
            image
        };
        Ok(Self::new(image, foreground.opacity, foreground.position))
    }

    /// Alpha-blend onto `dst` in place.
    pub fn composite(&self, dst: &mut RgbImage) {
        if self.opacity <= 0.0 {
            return;
        }
        let (dw, dh) = (dst.width() as i64, dst.height() as i64);
        let (px, py) = (self.position.0 as i64, self.position.1 as i64);
        for (ox, oy, src) in self.image.enumerate_pixels() {
            let (x, y) = (px + ox as i64, py + oy as i64);
            if x < 0 || y < 0 || x >= dw || y >= dh {
                continue;
            }
            let alpha = src[3] as f32 / 255.0 * self.opacity;
            if alpha <= 0.0 {
                continue;
            }
            let out = dst.get_pixel_mut(x as u32, y as u32);
            for c in 0..3 {
                let blended = out[c] as f32 * (1.0 - alpha) + src[c] as f32 * alpha;
                out[c] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

fn open_rgba(path: &Path) -> Result<RgbaImage, LcdError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|e| LcdError::source_unavailable(path.display().to_string(), e))
}

// ── Entry point ──────────────────────────────────────────────────

/// Map `frame` onto exactly `target` pixels.
///
/// Sequence number, timestamp and hold duration are carried over.
pub fn transform(
    frame: Frame,
    params: &TransformParams,
    target: Resolution,
    overlay: Option<&Overlay>,
) -> Frame {
    frame.map_image(|image| {
        let rotated = rotate(image, params.rotation, params.rotation_fit);
        let mut scaled = scale_to_target(&rotated, params.scale_factor, target);
        if let Some(overlay) = overlay {
            overlay.composite(&mut scaled);
        }
        scaled
    })
}

// ── Rotation ─────────────────────────────────────────────────────

/// Number of clockwise quarter turns if `degrees` is a multiple of 90.
pub fn quarter_turns(degrees: f64) -> Option<u8> {
    let normalized = degrees.rem_euclid(360.0);
    let quarters = normalized / 90.0;
    let rounded = quarters.round();
    if (quarters - rounded).abs() < 1e-9 {
        Some((rounded as i64).rem_euclid(4) as u8)
    } else {
        None
    }
}

/// Rotate clockwise by `degrees`.
///
/// Quarter turns are exact pixel permutations. Any other angle is
/// resampled bilinearly onto a canvas picked by `fit`.
pub fn rotate(image: RgbImage, degrees: f64, fit: RotationFit) -> RgbImage {
    match quarter_turns(degrees) {
        Some(0) => image,
        Some(1) => imageops::rotate90(&image),
        Some(2) => imageops::rotate180(&image),
        Some(3) => imageops::rotate270(&image),
        _ => rotate_bilinear(&image, degrees.rem_euclid(360.0).to_radians(), fit),
    }
}

/// Output canvas for an arbitrary rotation of a `w × h` image.
///
/// Every variant keeps the pre-rotation aspect ratio.
pub fn rotated_canvas(w: u32, h: u32, radians: f64, fit: RotationFit) -> (u32, u32) {
    let (wf, hf) = (w as f64, h as f64);
    let (c, s) = (radians.cos().abs(), radians.sin().abs());
    let k = match fit {
        RotationFit::Crop => 1.0,
        RotationFit::Pad => {
            let (bw, bh) = (wf * c + hf * s, wf * s + hf * c);
            (bw / wf).max(bh / hf)
        }
        RotationFit::Fill => (wf / (wf * c + hf * s)).min(hf / (wf * s + hf * c)),
    };
    let size = |v: f64| -> u32 {
        let scaled = v * k;
        // Snap values within float noise of an integer before rounding outward/inward.
        let snapped = if (scaled - scaled.round()).abs() < 1e-6 {
            scaled.round()
        } else if k >= 1.0 {
            scaled.ceil()
        } else {
            scaled.floor()
        };
        (snapped as u32).max(1)
    };
    (size(wf), size(hf))
}

fn rotate_bilinear(src: &RgbImage, radians: f64, fit: RotationFit) -> RgbImage {
    let (sw, sh) = src.dimensions();
    let (cw, ch) = rotated_canvas(sw, sh, radians, fit);
    let (sin, cos) = radians.sin_cos();
    let (src_cx, src_cy) = (sw as f64 / 2.0, sh as f64 / 2.0);
    let (dst_cx, dst_cy) = (cw as f64 / 2.0, ch as f64 / 2.0);

    let mut out = RgbImage::from_pixel(cw, ch, BLACK);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let dx = x as f64 + 0.5 - dst_cx;
        let dy = y as f64 + 0.5 - dst_cy;
        // Inverse of a clockwise rotation in y-down coordinates.
        let sx = dx * cos + dy * sin + src_cx - 0.5;
        let sy = -dx * sin + dy * cos + src_cy - 0.5;
        *px = sample_bilinear(src, sx, sy);
    }
    out
}

/// Bilinear sample at continuous pixel coordinates; outside is black.
fn sample_bilinear(src: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (w, h) = (src.width() as i64, src.height() as i64);
    if x <= -1.0 || y <= -1.0 || x >= w as f64 || y >= h as f64 {
        return BLACK;
    }
    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f64, y - y0 as f64);
    let fetch = |xi: i64, yi: i64| -> [f64; 3] {
        if xi < 0 || yi < 0 || xi >= w || yi >= h {
            [0.0; 3]
        } else {
            let p = src.get_pixel(xi as u32, yi as u32);
            [p[0] as f64, p[1] as f64, p[2] as f64]
        }
    };
    let (p00, p10) = (fetch(x0, y0), fetch(x0 + 1, y0));
    let (p01, p11) = (fetch(x0, y0 + 1), fetch(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

// ── Scaling ──────────────────────────────────────────────────────

/// Apply the zoom factor and land on exactly `target` pixels.
///
/// - `== 1.0`: crop-to-fill straight to the target.
/// - `< 1.0`: crop-to-fill into a smaller box, centred on black.
/// - `> 1.0`: crop a centre window `1 / factor` the size of the fill region
///   out of the source, then resize it to the target.
pub fn scale_to_target(src: &RgbImage, factor: f64, target: Resolution) -> RgbImage {
    if (factor - 1.0).abs() < f64::EPSILON || !factor.is_finite() || factor <= 0.0 {
        return resize_to_fill(src, target.width, target.height);
    }
    if factor > 1.0 {
        return zoom(src, factor, target);
    }
    let sw = ((target.width as f64 * factor).floor() as u32).max(1);
    let sh = ((target.height as f64 * factor).floor() as u32).max(1);
    let content = resize_to_fill(src, sw, sh);
    let mut canvas = RgbImage::from_pixel(target.width, target.height, BLACK);
    let x = (target.width.saturating_sub(sw) / 2) as i64;
    let y = (target.height.saturating_sub(sh) / 2) as i64;
    imageops::replace(&mut canvas, &content, x, y);
    canvas
}

/// Zoom in without ever allocating more than the source and the target.
fn zoom(src: &RgbImage, factor: f64, target: Resolution) -> RgbImage {
    let (sw, sh) = src.dimensions();
    if sw == 0 || sh == 0 {
        return RgbImage::from_pixel(target.width, target.height, BLACK);
    }
    let (fx, fy, fw, fh) = fill_window(sw, sh, target.width, target.height);
    let zw = ((fw as f64 / factor).round() as u32).clamp(1, fw);
    let zh = ((fh as f64 / factor).round() as u32).clamp(1, fh);
    let window = imageops::crop_imm(src, fx + (fw - zw) / 2, fy + (fh - zh) / 2, zw, zh).to_image();
    imageops::resize(&window, target.width, target.height, RESIZE_FILTER)
}

/// Centred `(x, y, w, h)` of the largest `width:height` window inside a
/// `sw × sh` image.
fn fill_window(sw: u32, sh: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let target_aspect = width as f64 / height as f64;
    let src_aspect = sw as f64 / sh as f64;
    let (cw, ch) = if (src_aspect - target_aspect).abs() < 1e-9 {
        (sw, sh)
    } else if src_aspect > target_aspect {
        (((sh as f64 * target_aspect).round() as u32).clamp(1, sw), sh)
    } else {
        (sw, ((sw as f64 / target_aspect).round() as u32).clamp(1, sh))
    };
    ((sw - cw) / 2, (sh - ch) / 2, cw, ch)
}

/// Resize preserving aspect ratio, cropping the overflow from the centre.
pub fn resize_to_fill(src: &RgbImage, width: u32, height: u32) -> RgbImage {
    let (sw, sh) = src.dimensions();
    if sw == 0 || sh == 0 {
        return RgbImage::from_pixel(width, height, BLACK);
    }
    let (x, y, cw, ch) = fill_window(sw, sh, width, height);

    let cropped;
    let region = if (cw, ch) == (sw, sh) {
        src
    } else {
        cropped = imageops::crop_imm(src, x, y, cw, ch).to_image();
        &cropped
    };
    if region.dimensions() == (width, height) {
        region.clone()
    } else {
        imageops::resize(region, width, height, RESIZE_FILTER)
    }
}

// ── Tests ────────────────────────────────────────────────────────
