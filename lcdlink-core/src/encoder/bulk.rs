//! `bulk-rgb565`: ChiZhu USBDISPLAY panels.
//!
//! Pixels are RGB565 big-endian (high byte first), row-major. The first bulk
//! transfer opens with a 64-byte frame header; every following transfer
//! opens with an 8-byte continuation header. Header integer fields are
//! little-endian `u32`.
//!
//! ```text
//! frame header (64 B)
//! 0      4     8      12      16      20          24    28      32 ... 64
//! ┌──────┬─────┬──────┬───────┬───────┬───────────┬─────┬───────┬────────┐
//! │magic │ cmd │width │height │format │payload len│ seq │packets│ zero   │
//! └──────┴─────┴──────┴───────┴───────┴───────────┴─────┴───────┴────────┘
//!
//! continuation header (8 B)
//! ┌──────────┬───────┐
//! │ marker   │ index │
//! └──────────┴───────┘
//! ```

use bytes::{BufMut, BytesMut};

use super::hid::rgb565;
use super::{ChunkLayout, EncodedFrame, EncodedPacket, FrameEncoder, check_resolution};
use crate::error::LcdError;
use crate::flags::PacketFlags;
use crate::profile::{DeviceId, DeviceProfile, ProtocolVariant, Resolution};
use crate::types::Frame;

pub const FRAME_MAGIC: [u8; 4] = [0x12, 0x34, 0x56, 0x78];
pub const CONTINUATION_MAGIC: [u8; 4] = [0x12, 0x34, 0x56, 0x79];
pub const CMD_DRAW: u32 = 3;
pub const FORMAT_RGB565_BE: u32 = 2;
pub const FRAME_HEADER_LEN: usize = 64;
pub const CONTINUATION_HEADER_LEN: usize = 8;

#[derive(Debug, Clone)]
pub struct BulkRgb565Encoder {
    device: DeviceId,
    resolution: Resolution,
    layout: ChunkLayout,
}

impl BulkRgb565Encoder {
    pub fn new(profile: &DeviceProfile, resolution: Resolution) -> Self {
        Self {
            device: profile.id,
            resolution,
            layout: ChunkLayout {
                max_chunk: profile.max_chunk_size,
                first_header: FRAME_HEADER_LEN,
                next_header: CONTINUATION_HEADER_LEN,
            },
        }
    }

    pub fn boxed(profile: &DeviceProfile, resolution: Resolution) -> Box<dyn FrameEncoder> {
        Box::new(Self::new(profile, resolution))
    }

    fn pixels(frame: &Frame) -> Vec<u8> {
        let mut out = Vec::with_capacity(frame.resolution().pixel_count() * 2);
        for px in frame.image.pixels() {
            out.extend_from_slice(&rgb565(px[0], px[1], px[2]).to_be_bytes());
        }
        out
    }

    fn frame_header(&self, buf: &mut BytesMut, payload_len: usize, sequence: u64, count: usize) {
        let start = buf.len();
        buf.put_slice(&FRAME_MAGIC);
        buf.put_u32_le(CMD_DRAW);
        buf.put_u32_le(self.resolution.width);
        buf.put_u32_le(self.resolution.height);
        buf.put_u32_le(FORMAT_RGB565_BE);
        buf.put_u32_le(payload_len as u32);
        buf.put_u32_le(sequence as u32);
        buf.put_u32_le(count as u32);
        buf.put_bytes(0, FRAME_HEADER_LEN - (buf.len() - start));
    }
}

impl FrameEncoder for BulkRgb565Encoder {
    fn variant(&self) -> ProtocolVariant {
        ProtocolVariant::BulkRgb565
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
            let mut buf;
            if index == 0 {
                buf = BytesMut::with_capacity(FRAME_HEADER_LEN + chunk.len());
                self.frame_header(&mut buf, payload.len(), frame.sequence, count);
            } else {
                buf = BytesMut::with_capacity(CONTINUATION_HEADER_LEN + chunk.len());
                buf.put_slice(&CONTINUATION_MAGIC);
                buf.put_u32_le(index as u32);
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileRegistry;
    use image::{Rgb, RgbImage};

    fn u32_at(d: &[u8], off: usize) -> u32 {
        u32::from_le_bytes([d[off], d[off + 1], d[off + 2], d[off + 3]])
    }

    /// Inverse of the encoder, for checking what the panel would draw.
    fn decode(frame: &EncodedFrame) -> RgbImage {
        let first = &frame.packets[0].data;
        assert_eq!(first[0..4], FRAME_MAGIC);
        assert_eq!(u32_at(first, 4), CMD_DRAW);
        let (w, h) = (u32_at(first, 8), u32_at(first, 12));
        assert_eq!(u32_at(first, 16), FORMAT_RGB565_BE);
        let total = u32_at(first, 20) as usize;
        assert_eq!(u32_at(first, 28) as usize, frame.packet_count());
        assert!(first[32..FRAME_HEADER_LEN].iter().all(|&b| b == 0));

        let mut payload = first[FRAME_HEADER_LEN..].to_vec();
        for (i, p) in frame.packets.iter().enumerate().skip(1) {
            assert_eq!(p.data[0..4], CONTINUATION_MAGIC);
            assert_eq!(u32_at(&p.data, 4) as usize, i);
            payload.extend_from_slice(&p.data[CONTINUATION_HEADER_LEN..]);
        }
        assert_eq!(payload.len(), total);

        RgbImage::from_fn(w, h, |x, y| {
            let i = ((y * w + x) * 2) as usize;
            let v = u16::from_be_bytes([payload[i], payload[i + 1]]);
            let (r, g, b) = ((v >> 11) & 0x1f, (v >> 5) & 0x3f, v & 0x1f);
            Rgb([
                ((r << 3) | (r >> 2)) as u8,
                ((g << 2) | (g >> 4)) as u8,
                ((b << 3) | (b >> 2)) as u8,
            ])
        })
    }

    fn quantize(c: Rgb<u8>) -> Rgb<u8> {
        let (r, g, b) = (c[0] >> 3, c[1] >> 2, c[2] >> 3);
        Rgb([(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2)])
    }

    fn encoder(res: Resolution) -> BulkRgb565Encoder {
        let reg = ProfileRegistry::builtin();
        let p = reg.lookup(DeviceId::new(0x87AD, 0x70DB)).unwrap();
        BulkRgb565Encoder::new(p, res)
    }

    #[test]
    fn round_trip_reproduces_pixels() {
        for res in [Resolution::new(480, 480), Resolution::new(320, 480)] {
            let img = RgbImage::from_fn(res.width, res.height, |x, y| {
                quantize(Rgb([(x % 256) as u8, (y % 256) as u8, ((x ^ y) % 256) as u8]))
            });
            let out = encoder(res).encode(&Frame::new(img.clone(), 1)).unwrap();
            assert_eq!(decode(&out), img, "{res}");
        }
    }

    #[test]
    fn packet_sizes() {
        let res = Resolution::new(480, 480);
        let out = encoder(res).encode(&Frame::blank(res, 0)).unwrap();
        let total = 480 * 480 * 2;
        let first_cap = 16 * 1024 - FRAME_HEADER_LEN;
        let next_cap = 16 * 1024 - CONTINUATION_HEADER_LEN;
        assert_eq!(out.packet_count(), 1 + (total - first_cap).div_ceil(next_cap));
        assert_eq!(out.packets[0].data.len(), 16 * 1024);
        for p in &out.packets {
            assert!(p.data.len() <= 16 * 1024);
        }
        let headers = FRAME_HEADER_LEN + (out.packet_count() - 1) * CONTINUATION_HEADER_LEN;
        assert_eq!(out.total_bytes(), total + headers);
    }

    #[test]
    fn pixels_are_big_endian_rgb565() {
        let res = Resolution::new(320, 480);
        let mut img = RgbImage::new(res.width, res.height);
        img.put_pixel(0, 0, Rgb([255, 128, 0]));
        img.put_pixel(1, 0, Rgb([0, 0, 255]));
        let out = encoder(res).encode(&Frame::new(img, 0)).unwrap();
        let payload = &out.packets[0].data[FRAME_HEADER_LEN..];
        assert_eq!(payload[0..4], [0xFC, 0x00, 0x00, 0x1F]);
        assert_eq!(u32_at(&out.packets[0].data, 20) as usize, 320 * 480 * 2);
    }

    #[test]
    fn sequence_in_header() {
        let res = Resolution::new(320, 480);
        let out = encoder(res).encode(&Frame::blank(res, 1234)).unwrap();
        assert_eq!(u32_at(&out.packets[0].data, 24), 1234);
    }
}
