//! Built-in registry of supported LCD panels.
//!
//! A [`DeviceProfile`] describes one hardware family: which USB identity it
//! enumerates as, which panel resolutions it accepts and which wire protocol
//! variant its firmware speaks. The registry is built once at startup and
//! shared read-only (`Arc<ProfileRegistry>`) between every scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Resolution ───────────────────────────────────────────────────

/// Panel or frame size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub const fn pixel_count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Width divided by height.
    pub fn aspect(self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }

    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

impl From<Resolution> for (u32, u32) {
    fn from(r: Resolution) -> Self {
        (r.width, r.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── DeviceId ─────────────────────────────────────────────────────

/// USB vendor/product pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

// ── Protocol parameters ──────────────────────────────────────────

/// Wire protocol family. Selects the encoder in
/// [`encoder_for`](crate::encoder::encoder_for).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolVariant {
    /// 512-byte HID reports, RGB565 payload, header on every report.
    HidRgb565,
    /// 16 KiB bulk transfers, big-endian RGB565 payload, full header on
    /// the first transfer and a short continuation header on the rest.
    BulkRgb565,
}

impl ProtocolVariant {
    pub const fn tag(self) -> &'static str {
        match self {
            ProtocolVariant::HidRgb565 => "hid-rgb565",
            ProtocolVariant::BulkRgb565 => "bulk-rgb565",
        }
    }
}

impl fmt::Display for ProtocolVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// USB endpoint type the panel firmware listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Interrupt,
    Bulk,
}

// ── DeviceProfile ────────────────────────────────────────────────

/// Static description of one panel family.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceProfile {
    pub id: DeviceId,
    pub name: String,
    /// Supported panel resolutions; the first one is the default.
    pub resolutions: Vec<Resolution>,
    pub variant: ProtocolVariant,
    /// Upper bound for a single USB write, header included.
    pub max_chunk_size: usize,
    pub transfer: TransferKind,
    pub interface: u8,
}

impl DeviceProfile {
    /// Default panel resolution.
    pub fn native_resolution(&self) -> Resolution {
        self.resolutions
            .first()
            .copied()
            .unwrap_or(Resolution::new(0, 0))
    }

    pub fn supports(&self, resolution: Resolution) -> bool {
        self.resolutions.contains(&resolution)
    }

    /// Pick `preferred` if the panel supports it, the native resolution
    /// otherwise.
    pub fn resolve_resolution(&self, preferred: Option<Resolution>) -> Resolution {
        match preferred {
            Some(r) if self.supports(r) => r,
            Some(r) => {
                tracing::warn!(
                    "{} does not support {r}; using {}",
                    self.name,
                    self.native_resolution()
                );
                self.native_resolution()
            }
            None => self.native_resolution(),
        }
    }
}

// ── ProfileRegistry ──────────────────────────────────────────────

/// Read-only table of known panels.
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: Vec<DeviceProfile>,
}

impl ProfileRegistry {
    /// The panels this build knows how to drive.
    pub fn builtin() -> Self {
        Self::from_profiles(vec![
            DeviceProfile {
                id: DeviceId::new(0x0416, 0x5302),
                name: "Thermalright LCD 320x240".into(),
                resolutions: vec![Resolution::new(320, 240), Resolution::new(240, 320)],
                variant: ProtocolVariant::HidRgb565,
                max_chunk_size: 512,
                transfer: TransferKind::Interrupt,
                interface: 0,
            },
            DeviceProfile {
                id: DeviceId::new(0x0418, 0x5304),
                name: "Thermalright LCD 480x480".into(),
                resolutions: vec![Resolution::new(480, 480)],
                variant: ProtocolVariant::HidRgb565,
                max_chunk_size: 512,
                transfer: TransferKind::Interrupt,
                interface: 0,
            },
            DeviceProfile {
                id: DeviceId::new(0x87AD, 0x70DB),
                name: "ChiZhu Tech USBDISPLAY".into(),
                resolutions: vec![Resolution::new(480, 480), Resolution::new(320, 480)],
                variant: ProtocolVariant::BulkRgb565,
                max_chunk_size: 16 * 1024,
                transfer: TransferKind::Bulk,
                interface: 0,
            },
        ])
    }

    pub fn from_profiles(profiles: Vec<DeviceProfile>) -> Self {
        Self { profiles }
    }

    pub fn lookup(&self, id: DeviceId) -> Option<&DeviceProfile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceProfile> {
        self.profiles.iter()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ── Tests ────────────────────────────────────────────────────────
