//! Level 1 and Level 2 Tables
//!
//! Track images are located through two levels of tables, similar to a page table.
//!
//! The level 1 table starts at [`LEVEL1_OFFSET`](constant.LEVEL1_OFFSET.html) and holds
//! `level1_size` u32 entries. Entry `track / level2_size` is the offset of the level 2 table
//! covering that track, 0 if no level 2 table has been written yet (every track it would
//! cover is a null track), or [`OTHER_FILE`](constant.OTHER_FILE.html) if the table lives
//! in a different file.
//!
//! Every level 2 table holds `level2_size` [entries](struct.Level2Entry.html). Entry
//! `track % level2_size` locates the track image. Both tables are fixed size once created.

use crate::Endian;

pub const LEVEL1_OFFSET: u64 = (crate::device::SIZE + crate::header::SIZE) as u64;
pub const LEVEL1_ENTRY_SIZE: usize = 4;
pub const LEVEL2_ENTRY_SIZE: usize = 8;

/// Level 1 entry of a table which is not stored in this file
pub const OTHER_FILE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Level2Entry {
    /// Offset of the track image, 0 for a null track
    pub position: u32,
    /// Bytes used by the track image, including its 5 byte header.
    /// For a null track, this is the null track format instead
    pub length: u16,
    /// Bytes reserved for the track image. Always `>= length`
    pub size: u16,
}

impl Level2Entry {
    /// An entry describing a track which has never been written
    pub fn null(format: u8) -> Self {
        Self {
            position: 0,
            length: u16::from(format),
            size: u16::from(format),
        }
    }

    pub fn is_null(&self) -> bool {
        self.position == 0
    }

    pub fn parse(bytes: &[u8; LEVEL2_ENTRY_SIZE], endian: Endian) -> Self {
        Self {
            position: endian.read_u32(&bytes[0..4]),
            length: endian.read_u16(&bytes[4..6]),
            size: endian.read_u16(&bytes[6..8]),
        }
    }

    pub fn serialize(&self, endian: Endian) -> [u8; LEVEL2_ENTRY_SIZE] {
        let mut bytes = [0; LEVEL2_ENTRY_SIZE];
        endian.write_u32(&mut bytes[0..4], self.position);
        endian.write_u16(&mut bytes[4..6], self.length);
        endian.write_u16(&mut bytes[6..8], self.size);
        bytes
    }
}

/// Bytes of a freshly created level 2 table: every entry is a null track of `null_format`
pub fn empty_level2_table(entries: u32, null_format: u8, endian: Endian) -> Vec<u8> {
    let entry = Level2Entry::null(null_format).serialize(endian);
    entry
        .iter()
        .copied()
        .cycle()
        .take(entries as usize * LEVEL2_ENTRY_SIZE)
        .collect()
}
