use crate::region::SLOT_COUNT;

/// Per-slot binary size: offset (i32) + length (i32).
pub const SLOT_ENTRY_SIZE: usize = 8;

/// Total header size: 1024 * 8 = 8192 bytes. Payloads always start at or after this.
pub const HEADER_SIZE: usize = SLOT_COUNT * SLOT_ENTRY_SIZE;

/// Location of one chunk payload inside a region file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotEntry {
    pub offset: i32,
    pub length: i32,
}

impl SlotEntry {
    pub const EMPTY: Self = Self { offset: 0, length: 0 };

    /// `(0, 0)` marks a slot that has never been written or was deleted.
    pub fn is_empty(&self) -> bool {
        self.offset == 0 && self.length == 0
    }

    /// Whether a read should go to disk for this slot.
    pub fn has_data(&self) -> bool {
        self.offset != 0 && self.length != 0
    }

    /// Committed byte count, zero for anything that does not hold data.
    pub fn committed_len(&self) -> u64 {
        if self.length > 0 {
            self.length as u64
        } else {
            0
        }
    }

    /// Encode a slot into the 8-byte little-endian format.
    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= SLOT_ENTRY_SIZE);
        buf[0..4].copy_from_slice(&self.offset.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
    }

    /// Decode a slot from the 8-byte little-endian format.
    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= SLOT_ENTRY_SIZE);
        Self {
            offset: i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: i32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

/// The slot table stored in the first 8192 bytes of every region file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionHeader {
    slots: Box<[SlotEntry; SLOT_COUNT]>,
}

impl Default for RegionHeader {
    fn default() -> Self {
        Self {
            slots: Box::new([SlotEntry::EMPTY; SLOT_COUNT]),
        }
    }
}

impl RegionHeader {
    pub fn get(&self, index: usize) -> SlotEntry {
        self.slots[index]
    }

    pub fn set(&mut self, index: usize, entry: SlotEntry) {
        self.slots[index] = entry;
    }

    pub fn clear(&mut self, index: usize) {
        self.slots[index] = SlotEntry::EMPTY;
    }

    /// Slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, SlotEntry)> + '_ {
        self.slots.iter().copied().enumerate()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_SIZE];
        for (slot, chunk) in self.slots.iter().zip(buf.chunks_exact_mut(SLOT_ENTRY_SIZE)) {
            slot.encode(chunk);
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= HEADER_SIZE);
        let mut header = Self::default();
        for (slot, chunk) in header.slots.iter_mut().zip(buf.chunks_exact(SLOT_ENTRY_SIZE)) {
            *slot = SlotEntry::decode(chunk);
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_8k() {
        assert_eq!(HEADER_SIZE, 8192);
        assert_eq!(RegionHeader::default().encode().len(), HEADER_SIZE);
    }

    #[test]
    fn slots_are_little_endian_pairs() {
        let mut header = RegionHeader::default();
        header.set(1, SlotEntry { offset: 8192, length: 0x0102_0304 });
        let bytes = header.encode();
        assert_eq!(&bytes[0..8], &[0u8; 8]);
        assert_eq!(&bytes[8..12], &8192i32.to_le_bytes());
        assert_eq!(&bytes[12..16], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(RegionHeader::decode(&bytes), header);
    }

    #[test]
    fn empty_and_data_flags() {
        assert!(SlotEntry::EMPTY.is_empty());
        assert!(!SlotEntry::EMPTY.has_data());
        let zero_len = SlotEntry { offset: 9000, length: 0 };
        assert!(!zero_len.is_empty());
        assert!(!zero_len.has_data());
        assert_eq!(SlotEntry { offset: 9000, length: -5 }.committed_len(), 0);
    }
}
