//! A compressed CKD image consists of the following parts, packed together on a byte alignment:
//!
//! * [Device Header](device/index.html) (512 bytes at offset 0)
//! * [Compressed Device Header](header/index.html) (512 bytes at offset 512)
//! * [Level 1 Table](level/index.html) (immediately following, at offset 1024)
//! * [Level 2 Tables](level/index.html), [Track Images](track/index.html) and the
//!   [Free Space Directory](free_space/index.html), placed anywhere by the allocator
//!
//! Decompressed track images are a sequence of count-key-data records. The records on
//! the volume's first track and in the VTOC are described by the [vtoc](vtoc/index.html)
//! module.
//!
//! Only the device header, track headers and record contents have a fixed byte order.
//! Everything addressed through the compressed device header is stored in the byte order
//! of the host which created the image, recorded in the
//! [`BIG_ENDIAN`](header/struct.Options.html) option bit.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

pub mod device;
pub mod ebcdic;
pub mod free_space;
pub mod header;
pub mod level;
pub mod track;
pub mod vtoc;

/// Number of 4KiB sectors stored on each track of a linux-formatted volume
pub const SECTORS_PER_TRACK: u32 = 12;
/// Size of one sector record
pub const SECTOR_SIZE: u32 = 4096;

/// Byte order of the variable-endian parts of an image
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Default for Endian {
    fn default() -> Self {
        Endian::Little
    }
}

impl Endian {
    #[inline]
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(buf),
            Endian::Big => BigEndian::read_u16(buf),
        }
    }

    #[inline]
    pub fn read_i16(self, buf: &[u8]) -> i16 {
        match self {
            Endian::Little => LittleEndian::read_i16(buf),
            Endian::Big => BigEndian::read_i16(buf),
        }
    }

    #[inline]
    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    #[inline]
    pub fn write_u16(self, buf: &mut [u8], n: u16) {
        match self {
            Endian::Little => LittleEndian::write_u16(buf, n),
            Endian::Big => BigEndian::write_u16(buf, n),
        }
    }

    #[inline]
    pub fn write_i16(self, buf: &mut [u8], n: i16) {
        match self {
            Endian::Little => LittleEndian::write_i16(buf, n),
            Endian::Big => BigEndian::write_i16(buf, n),
        }
    }

    #[inline]
    pub fn write_u32(self, buf: &mut [u8], n: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(buf, n),
            Endian::Big => BigEndian::write_u32(buf, n),
        }
    }
}

#[test]
fn endian_tests() {
    let mut buf = [0; 4];
    Endian::Big.write_u32(&mut buf, 0x0102_0304);
    assert_eq!(buf, [1, 2, 3, 4]);
    assert_eq!(Endian::Little.read_u32(&buf), 0x0403_0201);
    Endian::Little.write_i16(&mut buf[..2], -1);
    assert_eq!(Endian::Big.read_u16(&buf), 0xFFFF);
}
