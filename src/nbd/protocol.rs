//! Network Block Device wire format
//!
//! Only fixed newstyle negotiation and simple replies are spoken. Every integer on the
//! wire is big endian.

use bitflags::bitflags;
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

pub const NBDMAGIC: u64 = 0x4e42_444d_4147_4943;
pub const IHAVEOPT: u64 = 0x4948_4156_454f_5054;
pub const OPTION_REPLY_MAGIC: u64 = 0x0003_e889_0455_65a9;
pub const REQUEST_MAGIC: u32 = 0x2560_9513;
pub const REPLY_MAGIC: u32 = 0x6744_6698;

/// Zero bytes after the export information, unless `NO_ZEROES` was negotiated
pub const ZERO_PAD: usize = 124;

pub const MAX_OPTION_LENGTH: u32 = 4096;
pub const MAX_REQUEST_LENGTH: u32 = 32 * 1024 * 1024;

pub mod option {
    pub const EXPORT_NAME: u32 = 1;
    pub const ABORT: u32 = 2;
    pub const LIST: u32 = 3;
}

pub mod reply {
    pub const ACK: u32 = 1;
    pub const SERVER: u32 = 2;
    pub const ERROR: u32 = 1 << 31;
    pub const ERR_UNSUP: u32 = 1 | ERROR;
}

pub mod command {
    pub const READ: u16 = 0;
    pub const WRITE: u16 = 1;
    pub const DISC: u16 = 2;
    pub const FLUSH: u16 = 3;
    pub const TRIM: u16 = 4;
}

/// Error values of simple replies, as defined for linux
pub mod errno {
    pub const EPERM: u32 = 1;
    pub const EIO: u32 = 5;
    pub const EINVAL: u32 = 22;
    pub const ENOSPC: u32 = 28;
}

bitflags! {
    pub struct HandshakeFlags: u16 {
        const FIXED_NEWSTYLE = 1 << 0;
        const NO_ZEROES = 1 << 1;
    }
}

bitflags! {
    pub struct ClientFlags: u32 {
        const FIXED_NEWSTYLE = 1 << 0;
        const NO_ZEROES = 1 << 1;
    }
}

bitflags! {
    pub struct TransmissionFlags: u16 {
        const HAS_FLAGS = 1 << 0;
        const READ_ONLY = 1 << 1;
        const SEND_FLUSH = 1 << 2;
        const SEND_FUA = 1 << 3;
        const ROTATIONAL = 1 << 4;
        const SEND_TRIM = 1 << 5;
    }
}

pub const OPTION_HEADER_SIZE: usize = 16;
pub const OPTION_REPLY_SIZE: usize = 20;
pub const REQUEST_SIZE: usize = 28;
pub const REPLY_SIZE: usize = 16;

/// Sent by the client for every option during negotiation, followed by `length` bytes
#[derive(Debug, Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct OptionHeader {
    pub magic: U64<BigEndian>,
    pub option: U32<BigEndian>,
    pub length: U32<BigEndian>,
}

assert_eq_size!(OptionHeader, [u8; OPTION_HEADER_SIZE]);

impl OptionHeader {
    pub fn new(option: u32, length: u32) -> Self {
        Self {
            magic: U64::new(IHAVEOPT),
            option: U32::new(option),
            length: U32::new(length),
        }
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(header, _)| *header)
    }
}

/// Server answer to an option, followed by `length` bytes
#[derive(Debug, Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct OptionReply {
    pub magic: U64<BigEndian>,
    pub option: U32<BigEndian>,
    pub reply_type: U32<BigEndian>,
    pub length: U32<BigEndian>,
}

assert_eq_size!(OptionReply, [u8; OPTION_REPLY_SIZE]);

impl OptionReply {
    pub fn new(option: u32, reply_type: u32, length: u32) -> Self {
        Self {
            magic: U64::new(OPTION_REPLY_MAGIC),
            option: U32::new(option),
            reply_type: U32::new(reply_type),
            length: U32::new(length),
        }
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(reply, _)| *reply)
    }
}

#[derive(Debug, Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Request {
    pub magic: U32<BigEndian>,
    pub flags: U16<BigEndian>,
    pub kind: U16<BigEndian>,
    /// Opaque to the server, echoed in the reply
    pub handle: U64<BigEndian>,
    pub offset: U64<BigEndian>,
    pub length: U32<BigEndian>,
}

assert_eq_size!(Request, [u8; REQUEST_SIZE]);

impl Request {
    pub fn new(kind: u16, handle: u64, offset: u64, length: u32) -> Self {
        Self {
            magic: U32::new(REQUEST_MAGIC),
            flags: U16::new(0),
            kind: U16::new(kind),
            handle: U64::new(handle),
            offset: U64::new(offset),
            length: U32::new(length),
        }
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(request, _)| *request)
    }
}

/// Simple reply, followed by the data of a successful read
#[derive(Debug, Copy, Clone, AsBytes, FromBytes, Unaligned)]
#[repr(C)]
pub struct Reply {
    pub magic: U32<BigEndian>,
    pub error: U32<BigEndian>,
    pub handle: U64<BigEndian>,
}

assert_eq_size!(Reply, [u8; REPLY_SIZE]);

impl Reply {
    pub fn new(error: u32, handle: u64) -> Self {
        Self {
            magic: U32::new(REPLY_MAGIC),
            error: U32::new(error),
            handle: U64::new(handle),
        }
    }

    pub fn read(bytes: &[u8]) -> Option<Self> {
        LayoutVerified::<_, Self>::new_unaligned_from_prefix(bytes).map(|(reply, _)| *reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let request = Request::new(command::WRITE, 0x0102_0304_0506_0708, 4096, 512);
        let bytes = request.as_bytes();
        assert_eq!(&bytes[..4], &[0x25, 0x60, 0x95, 0x13]);
        assert_eq!(&bytes[6..8], &[0, 1]);
        assert_eq!(&bytes[8..16], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[16..24], &[0, 0, 0, 0, 0, 0, 0x10, 0]);
        assert_eq!(&bytes[24..], &[0, 0, 2, 0]);
        assert!(Request::read(&bytes[..REQUEST_SIZE - 1]).is_none());
    }

    #[test]
    fn option_reply_magic() {
        let reply = OptionReply::new(option::LIST, reply::ERR_UNSUP, 0);
        let bytes = reply.as_bytes();
        assert_eq!(&bytes[..8], &[0, 0x03, 0xe8, 0x89, 0x04, 0x55, 0x65, 0xa9]);
        assert_eq!(&bytes[12..16], &[0x80, 0, 0, 1]);
    }
}
