//! Splitting a frame payload into transfer-sized packets.

/// Packet geometry of one protocol variant.
///
/// The first packet may carry a larger header than the ones that follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    /// Upper bound for a whole packet, header included.
    pub max_chunk: usize,
    pub first_header: usize,
    pub next_header: usize,
}

impl ChunkLayout {
    /// Same header on every packet.
    pub const fn uniform(max_chunk: usize, header: usize) -> Self {
        Self {
            max_chunk,
            first_header: header,
            next_header: header,
        }
    }

    pub const fn first_capacity(&self) -> usize {
        self.max_chunk.saturating_sub(self.first_header)
    }

    pub const fn next_capacity(&self) -> usize {
        self.max_chunk.saturating_sub(self.next_header)
    }

    /// Number of packets needed for `payload_len` bytes. Never zero.
    pub fn packet_count(&self, payload_len: usize) -> usize {
        let first = self.first_capacity();
        if payload_len <= first {
            return 1;
        }
        let rest = payload_len - first;
        1 + rest.div_ceil(self.next_capacity().max(1))
    }

    /// Yields `(index, slice)` for each packet's share of `payload`.
    pub fn split<'a>(&self, payload: &'a [u8]) -> impl Iterator<Item = (usize, &'a [u8])> + 'a {
        let first_len = payload.len().min(self.first_capacity());
        let (head, tail) = payload.split_at(first_len);
        let next = self.next_capacity().max(1);
        std::iter::once(head)
            .chain(tail.chunks(next))
            .enumerate()
    }
}

/// Packet count for a variant whose packets all carry a `header_len`-byte header.
pub fn chunk_payload(payload_len: usize, max_chunk: usize, header_len: usize) -> usize {
    ChunkLayout::uniform(max_chunk, header_len).packet_count(payload_len)
}
