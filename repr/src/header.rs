//! Compressed Device Header
//!
//! Stored at offset 512, directly after the [device header](../device/index.html). The first
//! four bytes are single bytes; every field after `options` is stored in the byte order
//! selected by [`Options::BIG_ENDIAN`](struct.Options.html).
//!
//! | offset | size | field                  |
//! |--------|------|------------------------|
//! | 0      | 3    | version/release/modlvl |
//! | 3      | 1    | options                |
//! | 4      | 4    | level 1 table entries  |
//! | 8      | 4    | level 2 table entries  |
//! | 12     | 4    | file size              |
//! | 16     | 4    | file used              |
//! | 20     | 4    | position of free space |
//! | 24     | 4    | total free space       |
//! | 28     | 4    | largest free space     |
//! | 32     | 4    | number of free spaces  |
//! | 36     | 4    | imbedded free space    |
//! | 40     | 4    | cylinders on device    |
//! | 44     | 1    | null track format      |
//! | 45     | 1    | compression algorithm  |
//! | 46     | 2    | compression parameter  |
//! | 48     | 464  | reserved               |

use bitflags::bitflags;
use std::fmt;

use crate::Endian;

pub const SIZE: usize = 512;
/// Offset of the compressed header within the image
pub const OFFSET: u64 = crate::device::SIZE as u64;
pub const RESERVED_SIZE: usize = SIZE - 48;

pub const VERSION: u8 = 0;
pub const RELEASE: u8 = 3;
pub const MOD_LEVEL: u8 = 1;

bitflags! {
    pub struct Options: u8 {
        /// Track images do not carry the legacy length fudge
        const NO_FUDGE        = 0x01;
        /// Every field after the options byte is big endian
        const BIG_ENDIAN      = 0x02;
        /// Space errors were detected when the image was last checked
        const SPACE_ERRORS    = 0x20;
        /// The image was last opened read/write
        const OPEN_READ_WRITE = 0x40;
        /// The image is currently open (or was not closed cleanly)
        const OPENED          = 0x80;
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct CompressedHeader {
    pub version: u8,
    pub release: u8,
    pub mod_level: u8,
    /// Raw option byte, see [`Options`](struct.Options.html). Unknown bits are preserved.
    pub options: u8,
    /// Number of entries in the level 1 table
    pub level1_size: u32,
    /// Number of entries in every level 2 table
    pub level2_size: u32,
    /// Logical end of the image
    pub file_size: u32,
    /// Bytes in use by headers, tables and track images
    pub file_used: u32,
    /// Offset of the free space directory, 0 if there is none
    pub free_space_position: u32,
    pub total_free_space: u32,
    pub largest_free_space: u32,
    pub free_space_count: u32,
    /// Undocumented; carried through unchanged
    pub imbedded_free_space: u32,
    pub cylinders: u32,
    pub null_track_format: u8,
    pub compression: u8,
    pub compression_parameter: i16,
    pub reserved: [u8; RESERVED_SIZE],
}

impl Default for CompressedHeader {
    /// A header of the current version with empty tables and no free space
    fn default() -> Self {
        Self {
            version: VERSION,
            release: RELEASE,
            mod_level: MOD_LEVEL,
            options: Options::NO_FUDGE.bits(),
            level1_size: 0,
            level2_size: 0,
            file_size: 0,
            file_used: 0,
            free_space_position: 0,
            total_free_space: 0,
            largest_free_space: 0,
            free_space_count: 0,
            imbedded_free_space: 0,
            cylinders: 0,
            null_track_format: 0,
            compression: 0,
            compression_parameter: -1,
            reserved: [0; RESERVED_SIZE],
        }
    }
}

impl CompressedHeader {
    pub fn options(&self) -> Options {
        Options::from_bits_truncate(self.options)
    }

    /// Returns `None` if `bytes` is shorter than a compressed header
    pub fn parse(bytes: &[u8], endian: Endian) -> Option<Self> {
        if bytes.len() < SIZE {
            return None;
        }
        let u32_at = |offset: usize| endian.read_u32(&bytes[offset..offset + 4]);
        let mut reserved = [0; RESERVED_SIZE];
        reserved.copy_from_slice(&bytes[48..SIZE]);
        Some(Self {
            version: bytes[0],
            release: bytes[1],
            mod_level: bytes[2],
            options: bytes[3],
            level1_size: u32_at(4),
            level2_size: u32_at(8),
            file_size: u32_at(12),
            file_used: u32_at(16),
            free_space_position: u32_at(20),
            total_free_space: u32_at(24),
            largest_free_space: u32_at(28),
            free_space_count: u32_at(32),
            imbedded_free_space: u32_at(36),
            cylinders: u32_at(40),
            null_track_format: bytes[44],
            compression: bytes[45],
            compression_parameter: endian.read_i16(&bytes[46..48]),
            reserved,
        })
    }

    pub fn serialize(&self, endian: Endian) -> [u8; SIZE] {
        let mut bytes = [0; SIZE];
        bytes[0] = self.version;
        bytes[1] = self.release;
        bytes[2] = self.mod_level;
        bytes[3] = self.options;
        let fields = [
            self.level1_size,
            self.level2_size,
            self.file_size,
            self.file_used,
            self.free_space_position,
            self.total_free_space,
            self.largest_free_space,
            self.free_space_count,
            self.imbedded_free_space,
            self.cylinders,
        ];
        for (i, &field) in fields.iter().enumerate() {
            let offset = 4 + i * 4;
            endian.write_u32(&mut bytes[offset..offset + 4], field);
        }
        bytes[44] = self.null_track_format;
        bytes[45] = self.compression;
        endian.write_i16(&mut bytes[46..48], self.compression_parameter);
        bytes[48..].copy_from_slice(&self.reserved);
        bytes
    }
}

impl fmt::Debug for CompressedHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompressedHeader")
            .field(
                "vrm",
                &format_args!("{}.{}.{}", self.version, self.release, self.mod_level),
            )
            .field("options", &self.options())
            .field("level1_size", &self.level1_size)
            .field("level2_size", &self.level2_size)
            .field("file_size", &self.file_size)
            .field("file_used", &self.file_used)
            .field("free_space_position", &self.free_space_position)
            .field("total_free_space", &self.total_free_space)
            .field("largest_free_space", &self.largest_free_space)
            .field("free_space_count", &self.free_space_count)
            .field("imbedded_free_space", &self.imbedded_free_space)
            .field("cylinders", &self.cylinders)
            .field("null_track_format", &self.null_track_format)
            .field("compression", &self.compression)
            .field("compression_parameter", &self.compression_parameter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> [u8; SIZE] {
        let mut bytes = [0u8; SIZE];
        bytes[..4].copy_from_slice(&[0, 3, 1, Options::BIG_ENDIAN.bits()]);
        bytes[4..8].copy_from_slice(&[0, 0, 0, 4]);
        bytes[8..12].copy_from_slice(&[0, 0, 1, 0]);
        bytes[36..40].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        bytes[44] = 2;
        bytes[45] = 1;
        bytes[46..48].copy_from_slice(&[0xFF, 0xFF]);
        bytes[100] = 0x5A;
        bytes
    }

    #[test]
    fn big_endian_fields() {
        let bytes = sample();
        let header = CompressedHeader::parse(&bytes, Endian::Big).unwrap();
        assert!(header.options().contains(Options::BIG_ENDIAN));
        assert_eq!(header.level1_size, 4);
        assert_eq!(header.level2_size, 256);
        assert_eq!(header.imbedded_free_space, 0xDEAD_BEEF);
        assert_eq!(header.null_track_format, 2);
        assert_eq!(header.compression_parameter, -1);
        assert_eq!(&header.serialize(Endian::Big)[..], &bytes[..]);
    }

    #[test]
    fn little_endian_reads_differ() {
        let header = CompressedHeader::parse(&sample(), Endian::Little).unwrap();
        assert_eq!(header.level1_size, 0x0400_0000);
        assert_eq!(header.level2_size, 0x0001_0000);
    }
}
