//! `hid-rgb565`: Thermalright 320×240 / 480×480 panels.
//!
//! Every HID report carries a 16-byte little-endian header followed by up
//! to `max_chunk - 16` bytes of RGB565 pixel data:
//!
//! ```text
//! 0      4    5     6        8      10      12          14     16
//! ┌──────┬────┬─────┬────────┬──────┬───────┬───────────┬──────┐
//! │magic │cmd │flags│ index  │width │height │payload len│ seq  │ payload…
//! └──────┴────┴─────┴────────┴──────┴───────┴───────────┴──────┘
//! ```

use bytes::{BufMut, BytesMut};

use super::{ChunkLayout, EncodedFrame, EncodedPacket, FrameEncoder, check_resolution};
use crate::error::LcdError;
use crate::flags::PacketFlags;
use crate::profile::{DeviceId, DeviceProfile, ProtocolVariant, Resolution};
use crate::types::Frame;

pub const MAGIC: [u8; 4] = [0xDA, 0xDB, 0xDC, 0xDD];
pub const CMD_DRAW: u8 = 0x02;
pub const HEADER_LEN: usize = 16;

/// Pack an RGB888 triple into RGB565.
pub fn rgb565(r: u8, g: u8, b: u8) -> u16 {
    ((r as u16 >> 3) << 11) | ((g as u16 >> 2) << 5) | (b as u16 >> 3)
}

#[derive(Debug, Clone)]
pub struct HidRgb565Encoder {
    device: DeviceId,
    resolution: Resolution,
    layout: ChunkLayout,
}

impl HidRgb565Encoder {
    pub fn new(profile: &DeviceProfile, resolution: Resolution) -> Self {
        Self {
            device: profile.id,
            resolution,
            layout: ChunkLayout::uniform(profile.max_chunk_size, HEADER_LEN),
        }
    }

    pub fn boxed(profile: &DeviceProfile, resolution: Resolution) -> Box<dyn FrameEncoder> {
        Box::new(Self::new(profile, resolution))
    }

    fn pixels(frame: &Frame) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame.resolution().pixel_count() * 2);
        for px in frame.image.pixels() {
            out.extend_from_slice(&rgb565(px[0], px[1], px[2]).to_le_bytes());
        }
        out
    }
}

impl FrameEncoder for HidRgb565Encoder {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::HidRgb565
    }

    fn resolution(&self) -> Resolution {
        self.resolution
    }

    fn encode(&self, frame: &Frame) -> Result<EncodedFrame, LcdError> {
        check_resolution(self.resolution, frame)?;

        let payload = Self::pixels(frame);
        let count = self.layout.packet_count(payload.len());
        let mut packets = Vec::with_capacity(count);

        for (index, chunk) in self.layout.split(&payload) {
            let flags = PacketFlags::for_position(index, count);
            let mut buf = BytesMut::with_capacity(HEADER_LEN + chunk.len());
            buf.put_slice(&MAGIC);
            buf.put_u8(CMD_DRAW);
            buf.put_u8(flags.bits());
            buf.put_u16_le(index as u16);
            buf.put_u16_le(self.resolution.width as u16);
            buf.put_u16_le(self.resolution.height as u16);
            buf.put_u16_le(chunk.len() as u16);
            buf.put_u16_le(frame.sequence as u16);
            buf.put_slice(chunk);
            packets.push(EncodedPacket {
                index,
                flags,
                data: buf.freeze(),
            });
        }

        Ok(EncodedFrame {
            device: self.device,
            resolution: self.resolution,
            sequence: frame.sequence,
            packets,
        })
    }
}
