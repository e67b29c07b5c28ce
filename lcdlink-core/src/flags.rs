use bitflags::bitflags;

bitflags! {
    /// Position of a packet within an encoded frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PacketFlags: u8 {
        const FIRST        = 0b0000_0001;
        const CONTINUATION = 0b0000_0010;
        const LAST         = 0b0000_0100;
    }
}

impl PacketFlags {
    /// Flags for packet `index` of a frame split into `count` packets.
    ///
    /// A single-packet frame is both `FIRST` and `LAST`.
    pub fn for_position(index: usize, count: usize) -> Self {
        let mut flags = if index == 0 {
            PacketFlags::FIRST
        } else {
            PacketFlags::CONTINUATION
        };
        if index + 1 >= count {
            flags |= PacketFlags::LAST;
        }
        flags
    }
}
