//! Volume Label and VTOC
//!
//! Record 3 on track 0 of a volume is the standard volume label. Its key and the first four
//! bytes of its data are `VOL1` in EBCDIC, and bytes 11..16 of the data point at the first
//! record of the volume table of contents (VTOC).
//!
//! Every VTOC record is a dataset control block (DSCB) with a 44 byte key and 96 bytes of
//! data. The first data byte identifies the DSCB format. Format 1 DSCBs describe one
//! dataset; their key is the dataset name, padded with EBCDIC spaces, and they hold up to
//! three [extents](struct.Extent.html).
//!
//! All fields are big endian.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

/// Record number of the volume label on track 0
pub const VOLUME_LABEL_RECORD: u8 = 3;
pub const VOLUME_LABEL_SIZE: usize = 80;
/// `VOL1` in EBCDIC
pub const VOLUME_LABEL_ID: [u8; 4] = [0xE5, 0xD6, 0xD3, 0xF1];

/// VTOC records are walked up to (not including) this record number
pub const MAX_VTOC_RECORD: u8 = 255;

pub const DSCB_KEY_SIZE: usize = 44;
pub const DSCB_DATA_SIZE: usize = 96;

pub const FORMAT1_ID: u8 = 0xF1;
pub const FORMAT4_ID: u8 = 0xF4;
/// Key of a format 4 DSCB: 44 bytes of `0x04`
pub const FORMAT4_KEY: [u8; DSCB_KEY_SIZE] = [0x04; DSCB_KEY_SIZE];

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct VolumeLabel {
    /// [`VOLUME_LABEL_ID`](constant.VOLUME_LABEL_ID.html)
    pub label_id: [u8; 4],
    /// Volume serial, EBCDIC
    pub volser: [u8; 6],
    pub security: u8,
    pub vtoc_cylinder: U16<BigEndian>,
    pub vtoc_head: U16<BigEndian>,
    pub vtoc_record: u8,
    pub reserved1: [u8; 21],
    pub owner: [u8; 14],
    pub reserved2: [u8; 29],
}

assert_eq_size!(VolumeLabel, [u8; VOLUME_LABEL_SIZE]);

impl VolumeLabel {
    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(label, _)| *label)
    }
}

/// A dataset extent: an inclusive range of cylinder/head track addresses
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Extent {
    /// 0 if the extent is unused
    pub kind: u8,
    pub sequence: u8,
    pub begin_cylinder: U16<BigEndian>,
    pub begin_head: U16<BigEndian>,
    pub end_cylinder: U16<BigEndian>,
    pub end_head: U16<BigEndian>,
}

assert_eq_size!(Extent, [u8; 10]);

impl Extent {
    /// Extent type of an ordinary data extent
    pub const DATA: u8 = 0x01;
    /// Extent type of a data extent on a cylinder boundary
    pub const CYLINDER_BOUNDARY: u8 = 0x81;

    pub fn new(kind: u8, sequence: u8, begin: (u16, u16), end: (u16, u16)) -> Self {
        Self {
            kind,
            sequence,
            begin_cylinder: U16::new(begin.0),
            begin_head: U16::new(begin.1),
            end_cylinder: U16::new(end.0),
            end_head: U16::new(end.1),
        }
    }

    pub fn is_used(&self) -> bool {
        self.kind != 0
    }
}

/// A date in `YDD` form: years since 1900 and the day of the year (1-based)
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Date {
    pub year: u8,
    pub day: U16<BigEndian>,
}

impl Date {
    pub fn new(year: u8, day: u16) -> Self {
        Self {
            year,
            day: U16::new(day),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.year == 0 && self.day.get() == 0
    }
}

/// The data portion of a format 1 DSCB
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Format1 {
    /// [`FORMAT1_ID`](constant.FORMAT1_ID.html)
    pub format_id: u8,
    pub volser: [u8; 6],
    pub volume_sequence: U16<BigEndian>,
    pub creation_date: Date,
    pub expiration_date: Date,
    pub extent_count: u8,
    pub last_directory_block_bytes: u8,
    pub reserved1: u8,
    pub system_code: [u8; 13],
    pub reserved2: [u8; 7],
    pub dataset_organization: U16<BigEndian>,
    pub record_format: u8,
    pub option_codes: u8,
    pub block_length: U16<BigEndian>,
    pub logical_record_length: U16<BigEndian>,
    pub key_length: u8,
    pub relative_key_position: U16<BigEndian>,
    pub dataset_indicators: u8,
    pub secondary_allocation: [u8; 4],
    pub last_used_track: [u8; 3],
    pub bytes_unused_last_track: U16<BigEndian>,
    pub reserved3: [u8; 2],
    pub extents: [Extent; 3],
    /// CCHHR of the format 2 or format 3 DSCB chained to this one
    pub next_dscb: [u8; 5],
}

assert_eq_size!(Format1, [u8; DSCB_DATA_SIZE]);

impl Format1 {
    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(dscb, _)| *dscb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem;

    #[test]
    fn format1_offsets() {
        let mut data = [0u8; DSCB_DATA_SIZE];
        data[0] = FORMAT1_ID;
        data[42..44].copy_from_slice(&4096u16.to_be_bytes());
        data[61..71].copy_from_slice(&[0x81, 0, 0, 1, 0, 0, 0, 9, 0, 11]);
        data[81] = 0x01;

        let dscb = Format1::read(&data).unwrap();
        assert_eq!(dscb.format_id, FORMAT1_ID);
        assert_eq!(dscb.block_length.get(), 4096);
        assert_eq!(dscb.extents[0], Extent::new(0x81, 0, (1, 0), (9, 11)));
        assert!(!dscb.extents[1].is_used());
        assert!(dscb.extents[2].is_used());
        assert_eq!(dscb.as_bytes(), &data[..]);
    }

    #[test]
    fn volume_label_pointer() {
        let mut data = [0u8; VOLUME_LABEL_SIZE];
        data[..4].copy_from_slice(&VOLUME_LABEL_ID);
        data[11..16].copy_from_slice(&[0, 2, 0, 5, 1]);
        let label = VolumeLabel::read(&data).unwrap();
        assert_eq!(label.vtoc_cylinder.get(), 2);
        assert_eq!(label.vtoc_head.get(), 5);
        assert_eq!(label.vtoc_record, 1);
        assert!(VolumeLabel::read(&data[..15]).is_none());
        assert_eq!(mem::size_of::<Date>(), 3);
    }
}
