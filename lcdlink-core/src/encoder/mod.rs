//! Protocol encoders: frame → device wire packets.
//!
//! Each wire protocol family is one struct implementing [`FrameEncoder`].
//! [`encoder_for`] picks the right one for a [`DeviceProfile`] from a
//! table keyed by [`ProtocolVariant`]. Encoders are deterministic: the only
//! per-frame input besides the pixels is the frame sequence number.

pub mod bulk;
pub mod chunk;
pub mod hid;

use bytes::Bytes;

use crate::error::LcdError;
use crate::flags::PacketFlags;
use crate::profile::{DeviceId, DeviceProfile, ProtocolVariant, Resolution};
use crate::types::Frame;

pub use bulk::BulkRgb565Encoder;
pub use chunk::{ChunkLayout, chunk_payload};
pub use hid::HidRgb565Encoder;

// ── EncodedPacket / EncodedFrame ─────────────────────────────────

/// One USB write, header included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub index: usize,
    pub flags: PacketFlags,
    pub data: Bytes,
}

/// All packets of one frame, in send order.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Device the packets were produced for.
    pub device: DeviceId,
    pub resolution: Resolution,
    /// Sequence of the source frame.
    pub sequence: u64,
    pub packets: Vec<EncodedPacket>,
}

impl EncodedFrame {
    pub fn packet_count(&self) -> usize {
        self.packets.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.packets.iter().map(|p| p.data.len()).sum()
    }
}

// ── FrameEncoder ─────────────────────────────────────────────────

/// Turns frames of one fixed resolution into device packets.
pub trait FrameEncoder: Send {
    fn variant(&self) -> ProtocolVariant;

    /// The only resolution this encoder accepts.
    fn resolution(&self) -> Resolution;

    /// Fails with [`LcdError::ResolutionMismatch`] if `frame` is not
    /// exactly [`resolution`](FrameEncoder::resolution).
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, LcdError>;
}

/// Fail fast on a frame that skipped the transform stage.
pub(crate) fn check_resolution(expected: Resolution, frame: &Frame) -> Result<(), LcdError> {
    let actual = frame.resolution();
    if actual != expected {
        return Err(LcdError::ResolutionMismatch { expected, actual });
    }
    Ok(())
}

// ── Lookup table ─────────────────────────────────────────────────

type EncoderCtor = fn(&DeviceProfile, Resolution) -> Box<dyn FrameEncoder>;

const ENCODERS: &[(ProtocolVariant, EncoderCtor)] = &[
    (ProtocolVariant::HidRgb565, HidRgb565Encoder::boxed),
    (ProtocolVariant::BulkRgb565, BulkRgb565Encoder::boxed),
];

/// Build the encoder for `profile` at `resolution`.
pub fn encoder_for(
    profile: &DeviceProfile,
    resolution: Resolution,
) -> Result<Box<dyn FrameEncoder>, LcdError> {
    if !profile.supports(resolution) {
        return Err(LcdError::InvalidConfig(format!(
            "{} does not support {resolution}",
            profile.name
        )));
    }
    ENCODERS
        .iter()
        .find(|(variant, _)| *variant == profile.variant)
        .map(|(_, ctor)| ctor(profile, resolution))
        .ok_or_else(|| LcdError::Other(format!("no encoder for {}", profile.variant)))
}
