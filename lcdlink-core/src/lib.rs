//! # lcdlink-core
//!
//! Core pipeline library for driving small USB LCD panels.
//!
//! This crate contains:
//! - **Profiles**: `DeviceProfile`, `ProfileRegistry`: what each supported panel speaks
//! - **Config**: `DeviceConfig` snapshots: selector, display and link settings
//! - **Sources**: `FrameSource` for stills, GIFs, image collections, video and window capture
//! - **Transform**: rotation, scaling and foreground compositing onto the panel
//! - **Encoder**: `FrameEncoder` implementations for each wire protocol variant
//! - **Transport**: `TransportLink` over `rusb`, with a validated connection phase
//! - **Scheduler**: `Scheduler`, the per-device state machine tying it all together
//! - **Error**: `LcdError`, typed, `thiserror`-based error hierarchy

pub mod backoff;
pub mod config;
pub mod encoder;
pub mod error;
pub mod flags;
pub mod profile;
pub mod scheduler;
pub mod source;
pub mod transform;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use backoff::Backoff;
pub use config::{
    BackgroundKind, DeviceConfig, DeviceSelector, DisplayConfig, Foreground, LinkSettings,
    RotationFit,
};
pub use encoder::{EncodedFrame, EncodedPacket, FrameEncoder, encoder_for};
pub use error::LcdError;
pub use flags::PacketFlags;
pub use profile::{DeviceId, DeviceProfile, ProfileRegistry, ProtocolVariant, Resolution};
pub use scheduler::{Scheduler, SchedulerState, SchedulerStats};
pub use source::{FrameSource, SourceEvent, WindowBackend, open_source, open_source_with};
pub use transform::{Overlay, TransformParams, transform};
pub use transport::{
    LinkPhase, LinkStats, RusbBackend, TransportLink, UsbBackend, UsbDeviceInfo, UsbWriter,
};
pub use types::Frame;
