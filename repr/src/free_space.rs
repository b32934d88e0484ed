//! Free Space Directory
//!
//! The directory starts at the `free_space_position` of the compressed device header with
//! the 8 byte [`TAG`](constant.TAG.html), followed by 8 byte [slots](struct.Slot.html) in
//! the byte order of the image. The first `free_space_count` slots are live.
//!
//! One of the slots describes the storage of the directory itself: its position equals
//! `free_space_position`, and its length is the size of the whole directory region,
//! including the tag. That slot is never handed out.

use crate::Endian;

pub const TAG: [u8; 8] = *b"FREE_BLK";
pub const SLOT_SIZE: usize = 8;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Slot {
    pub position: u32,
    pub length: u32,
}

impl Slot {
    pub fn parse(bytes: &[u8; SLOT_SIZE], endian: Endian) -> Self {
        Self {
            position: endian.read_u32(&bytes[0..4]),
            length: endian.read_u32(&bytes[4..8]),
        }
    }

    pub fn serialize(&self, endian: Endian) -> [u8; SLOT_SIZE] {
        let mut bytes = [0; SLOT_SIZE];
        endian.write_u32(&mut bytes[0..4], self.position);
        endian.write_u32(&mut bytes[4..8], self.length);
        bytes
    }

    /// Offset of slot `index` from the start of the directory
    pub fn offset(index: usize) -> usize {
        TAG.len() + index * SLOT_SIZE
    }
}

/// Number of slots which fit in a directory region of `length` bytes
pub fn capacity(length: u32) -> usize {
    (length as usize).saturating_sub(TAG.len()) / SLOT_SIZE
}
