//! Device Header
//!
//! The first 512 bytes of every CKD image describe the emulated device. Unlike the rest of
//! the compressed format, the multi-byte fields here are always little endian.
//!
//! | offset | size | field            |
//! |--------|------|------------------|
//! | 0      | 8    | device id        |
//! | 8      | 4    | heads/cylinder   |
//! | 12     | 4    | track size       |
//! | 16     | 1    | device type      |
//! | 17     | 1    | file sequence    |
//! | 18     | 2    | highest cylinder |
//! | 20     | 492  | reserved         |

use std::fmt;

use crate::Endian;

pub const SIZE: usize = 512;
pub const RESERVED_SIZE: usize = SIZE - 20;

/// Regular (uncompressed) CKD image
pub const ID_PLAIN: [u8; 8] = *b"CKD_P370";
/// Compressed CKD image
pub const ID_COMPRESSED: [u8; 8] = *b"CKD_C370";
/// Compressed CKD shadow file
pub const ID_SHADOW: [u8; 8] = *b"CKD_S370";

#[derive(Copy, Clone, PartialEq, Eq)]
pub struct DeviceHeader {
    /// One of the `ID_*` constants
    pub device_id: [u8; 8],
    /// Number of tracks per cylinder
    pub heads: u32,
    /// Maximum size in bytes of one (uncompressed) track image
    pub track_size: u32,
    /// Low byte of the device type, e.g. `0x90` for a 3390
    pub device_type: u8,
    /// Sequence number of this file within a multi-file device, 0 if there is only one
    pub file_sequence: u8,
    /// Highest cylinder in this file, or 0 for the last file of the device
    pub highest_cylinder: u16,
    pub reserved: [u8; RESERVED_SIZE],
}

impl DeviceHeader {
    /// Returns `None` if `bytes` is shorter than a device header
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < SIZE {
            return None;
        }
        let le = Endian::Little;
        let mut device_id = [0; 8];
        device_id.copy_from_slice(&bytes[0..8]);
        let mut reserved = [0; RESERVED_SIZE];
        reserved.copy_from_slice(&bytes[20..SIZE]);
        Some(Self {
            device_id,
            heads: le.read_u32(&bytes[8..12]),
            track_size: le.read_u32(&bytes[12..16]),
            device_type: bytes[16],
            file_sequence: bytes[17],
            highest_cylinder: le.read_u16(&bytes[18..20]),
            reserved,
        })
    }

    pub fn serialize(&self) -> [u8; SIZE] {
        let le = Endian::Little;
        let mut bytes = [0; SIZE];
        bytes[0..8].copy_from_slice(&self.device_id);
        le.write_u32(&mut bytes[8..12], self.heads);
        le.write_u32(&mut bytes[12..16], self.track_size);
        bytes[16] = self.device_type;
        bytes[17] = self.file_sequence;
        le.write_u16(&mut bytes[18..20], self.highest_cylinder);
        bytes[20..].copy_from_slice(&self.reserved);
        bytes
    }

    /// True for images which carry a compressed device header after this one
    pub fn is_compressed(&self) -> bool {
        self.device_id == ID_COMPRESSED || self.device_id == ID_SHADOW
    }

    pub fn device_id_lossy(&self) -> String {
        String::from_utf8_lossy(&self.device_id).into_owned()
    }
}

impl fmt::Debug for DeviceHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DeviceHeader")
            .field("device_id", &self.device_id_lossy())
            .field("heads", &self.heads)
            .field("track_size", &self.track_size)
            .field("device_type", &format_args!("{:#04x}", self.device_type))
            .field("file_sequence", &self.file_sequence)
            .field("highest_cylinder", &self.highest_cylinder)
            .finish()
    }
}
