//! Track Images
//!
//! A track image on disk is a 5 byte [header](struct.TrackHeader.html) followed by the
//! track data, compressed as selected by the low four bits of the header flags.
//!
//! Decompressed track data is a sequence of records. Each record is an 8 byte
//! [count field](struct.Count.html), followed by `key_length` bytes of key and
//! `data_length` bytes of data. Record 0 (the track descriptor) has no key and 8 bytes of
//! data, and is always present. The last record is followed by 8 bytes of `0xFF`.
//!
//! All fields are big endian, regardless of the byte order of the image.

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

pub const HEADER_SIZE: usize = 5;
pub const COUNT_SIZE: usize = 8;

/// Marks the end of the records on a track
pub const END_OF_TRACK: [u8; COUNT_SIZE] = [0xFF; COUNT_SIZE];

/// Largest raw track a level 2 entry can describe
pub const MAX_TRACK_SIZE: u32 = u16::MAX as u32;

/// Size of the data of record 0
pub const R0_DATA_SIZE: u16 = 8;

/// Mask of the compression algorithm in [`TrackHeader::flags`](struct.TrackHeader.html)
pub const COMPRESSION_MASK: u8 = 0x0F;

/// Compression algorithm ids, shared by track headers and the compressed device header
pub mod compression {
    pub const NONE: u8 = 0;
    pub const ZLIB: u8 = 1;
    pub const BZIP2: u8 = 2;
}

/// Formats of tracks which have never been written
pub mod null_format {
    /// Record 0 only
    pub const EMPTY: u8 = 0;
    /// Record 0 and twelve 4KiB records, as written by linux dasdfmt
    pub const LINUX: u8 = 2;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct TrackHeader {
    /// Compression algorithm in the low four bits
    pub flags: u8,
    pub cylinder: U16<BigEndian>,
    pub head: U16<BigEndian>,
}

assert_eq_size!(TrackHeader, [u8; HEADER_SIZE]);

impl TrackHeader {
    pub fn new(compression: u8, cylinder: u16, head: u16) -> Self {
        Self {
            flags: compression & COMPRESSION_MASK,
            cylinder: U16::new(cylinder),
            head: U16::new(head),
        }
    }

    pub fn compression(&self) -> u8 {
        self.flags & COMPRESSION_MASK
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(header, _)| *header)
    }
}

/// The count field which precedes the key and data of every record
#[derive(Debug, Copy, Clone, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Count {
    pub cylinder: U16<BigEndian>,
    pub head: U16<BigEndian>,
    pub record: u8,
    pub key_length: u8,
    pub data_length: U16<BigEndian>,
}

assert_eq_size!(Count, [u8; COUNT_SIZE]);

impl Count {
    pub fn new(cylinder: u16, head: u16, record: u8, key_length: u8, data_length: u16) -> Self {
        Self {
            cylinder: U16::new(cylinder),
            head: U16::new(head),
            record,
            key_length,
            data_length: U16::new(data_length),
        }
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(count, _)| *count)
    }

    /// Bytes of key and data following this count field
    pub fn body_len(&self) -> usize {
        usize::from(self.key_length) + usize::from(self.data_length.get())
    }
}

pub fn is_end_of_track(bytes: &[u8]) -> bool {
    bytes.len() >= COUNT_SIZE && bytes[..COUNT_SIZE] == END_OF_TRACK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_is_big_endian() {
        let header = TrackHeader::new(compression::ZLIB, 0x0102, 0x0304);
        assert_eq!(header.as_bytes(), &[1, 1, 2, 3, 4]);
        let read = TrackHeader::read(&[0x21, 0, 7, 0, 3, 0xAA]).unwrap();
        assert_eq!(read.compression(), 1);
        assert_eq!(read.cylinder.get(), 7);
        assert_eq!(read.head.get(), 3);
    }

    #[test]
    fn count_layout() {
        let count = Count::new(1, 2, 3, 4, 0x1000);
        assert_eq!(count.as_bytes(), &[0, 1, 0, 2, 3, 4, 0x10, 0]);
        assert_eq!(count.body_len(), 4 + 4096);
        assert!(Count::read(&[0; 7]).is_none());
        assert!(is_end_of_track(&END_OF_TRACK));
        assert!(!is_end_of_track(count.as_bytes()));
    }
}
