//! Configuration snapshots consumed by the pipeline.
//!
//! These types are filled in by whoever owns the configuration document
//! (see the `lcdlink-service` crate) and handed to a scheduler as one
//! complete [`DeviceConfig`] value. The pipeline never mutates them.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LcdError;
use crate::profile::{DeviceId, Resolution};
use crate::transform::TransformParams;

/// Upper bound for `capture_fps`.
pub const MAX_FPS: u32 = 60;

// ── Enums ────────────────────────────────────────────────────────

/// Content origin for the panel background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackgroundKind {
    #[default]
    Image,
    Video,
    Gif,
    ImageCollection,
    WindowCapture,
}

/// How an arbitrary-angle rotation is fitted back into a rectangle with
/// the pre-rotation aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationFit {
    /// Keep the pre-rotation canvas size: corners are lost, black wedges
    /// appear where the rotated source does not reach.
    #[default]
    Crop,
    /// Zoom in until no black wedges remain.
    Fill,
    /// Zoom out until the whole rotated source is visible.
    Pad,
}

// ── DisplayConfig ────────────────────────────────────────────────

/// Foreground image drawn on top of every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Foreground {
    pub path: PathBuf,
    /// 0.0 = invisible, 1.0 = opaque.
    pub opacity: f32,
    /// Top-left offset on the panel, in pixels.
    pub position: (i32, i32),
}

impl Default for Foreground {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            opacity: 1.0,
            position: (0, 0),
        }
    }
}

/// What to show and how to fit it onto the panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub background_type: BackgroundKind,
    /// File or directory, depending on `background_type`.
    pub path: PathBuf,
    /// Case-insensitive title substring for window capture.
    pub window_title: String,
    /// Clockwise, in degrees.
    pub rotation: f64,
    pub rotation_fit: RotationFit,
    /// 1.0 = fit, < 1.0 = letterbox, > 1.0 = zoom in.
    pub scale_factor: f64,
    /// Target refresh rate of the panel.
    pub capture_fps: u32,
    /// Time each image of a collection stays on screen.
    pub dwell_secs: f64,
    pub foreground: Option<Foreground>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            background_type: BackgroundKind::Image,
            path: PathBuf::new(),
            window_title: String::new(),
            rotation: 0.0,
            rotation_fit: RotationFit::Crop,
            scale_factor: 1.0,
            capture_fps: 30,
            dwell_secs: 2.0,
            foreground: None,
        }
    }
}

impl DisplayConfig {
    /// Reject values the pipeline cannot honour.
    pub fn validate(&self) -> Result<(), LcdError> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return Err(LcdError::InvalidConfig(format!(
                "scale_factor must be a positive number, got {}",
                self.scale_factor
            )));
        }
        if !self.rotation.is_finite() {
            return Err(LcdError::InvalidConfig("rotation must be finite".into()));
        }
        if !self.dwell_secs.is_finite() || self.dwell_secs <= 0.0 {
            return Err(LcdError::InvalidConfig(format!(
                "dwell_secs must be positive, got {}",
                self.dwell_secs
            )));
        }
        match self.background_type {
            BackgroundKind::WindowCapture if self.window_title.trim().is_empty() => {
                return Err(LcdError::InvalidConfig(
                    "window_title must be set for window_capture".into(),
                ));
            }
            BackgroundKind::WindowCapture => {}
            _ if self.path.as_os_str().is_empty() => {
                return Err(LcdError::InvalidConfig(format!(
                    "path must be set for {:?}",
                    self.background_type
                )));
            }
            _ => {}
        }
        if let Some(fg) = &self.foreground {
            if !(0.0..=1.0).contains(&fg.opacity) {
                return Err(LcdError::InvalidConfig(format!(
                    "foreground opacity must be within 0..=1, got {}",
                    fg.opacity
                )));
            }
        }
        Ok(())
    }

    /// Panel refresh period derived from `capture_fps` (clamped to 1..=60).
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.capture_fps.clamp(1, MAX_FPS) as f64)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs_f64(self.dwell_secs.max(0.001))
    }

    /// Human-readable name of the content origin, for logs and errors.
    pub fn locator(&self) -> String {
        match self.background_type {
            BackgroundKind::WindowCapture => format!("window '{}'", self.window_title),
            _ => self.path.display().to_string(),
        }
    }

    pub fn transform_params(&self) -> TransformParams {
        TransformParams {
            rotation: self.rotation,
            rotation_fit: self.rotation_fit,
            scale_factor: self.scale_factor,
        }
    }
}

// ── DeviceSelector ───────────────────────────────────────────────

/// Picks one attached panel among those the registry knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSelector {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Position among matching devices, in enumeration order.
    pub index: usize,
    pub resolution: Option<Resolution>,
}

impl DeviceSelector {
    pub fn for_device(id: DeviceId) -> Self {
        Self {
            vendor_id: Some(id.vendor_id),
            product_id: Some(id.product_id),
            ..Default::default()
        }
    }

    pub fn matches(&self, id: DeviceId) -> bool {
        self.vendor_id.is_none_or(|v| v == id.vendor_id)
            && self.product_id.is_none_or(|p| p == id.product_id)
    }

    /// Whether switching from `self` to `other` means talking to a
    /// different physical device.
    pub fn same_device(&self, other: &Self) -> bool {
        self.vendor_id == other.vendor_id
            && self.product_id == other.product_id
            && self.index == other.index
    }

    pub fn describe(&self) -> String {
        let part = |v: Option<u16>| v.map_or_else(|| "*".to_string(), |v| format!("{v:04x}"));
        format!(
            "{}:{}#{}",
            part(self.vendor_id),
            part(self.product_id),
            self.index
        )
    }
}

// ── LinkSettings ─────────────────────────────────────────────────

/// Transport and reconnection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    pub write_timeout_ms: u64,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            write_timeout_ms: 1000,
            backoff_initial_ms: 250,
            backoff_max_ms: 10_000,
        }
    }
}

impl LinkSettings {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }

    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms.max(1))
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms.max(self.backoff_initial_ms).max(1))
    }
}

// ── DeviceConfig ─────────────────────────────────────────────────

/// Complete snapshot handed to one scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceConfig {
    pub selector: DeviceSelector,
    pub display: DisplayConfig,
    pub link: LinkSettings,
}

// ── Tests ────────────────────────────────────────────────────────
