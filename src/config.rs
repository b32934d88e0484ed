use std::net::{Ipv4Addr, SocketAddr};

/// How the byte order of an image is derived from the compressed header options
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ByteOrderDetection {
    /// Big endian exactly when the big endian option bit is set
    OptionsBit,
    /// Compare the masked option bit against 1, which never matches
    ///
    /// Images are always read as little endian. Only useful to read images the way some
    /// older tools did.
    LegacyEquality,
}

impl Default for ByteOrderDetection {
    fn default() -> Self {
        ByteOrderDetection::OptionsBit
    }
}

/// When a free space slot is considered large enough for an allocation
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotFit {
    /// Only search the directory for requests strictly smaller than the largest free
    /// space, and only take slots strictly larger than the request
    ///
    /// Exact fits are appended to the end of the file instead
    Strict,
    /// Search for requests up to the largest free space, and take slots at least as
    /// large as the request
    AllowExact,
}

impl Default for SlotFit {
    fn default() -> Self {
        SlotFit::Strict
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Config {
    pub byte_order: ByteOrderDetection,
    pub slot_fit: SlotFit,
    /// Write the header back when an image is dropped without being closed
    pub sync_on_drop: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            byte_order: ByteOrderDetection::default(),
            slot_fit: SlotFit::default(),
            sync_on_drop: true,
        }
    }
}

pub const DEFAULT_NBD_PORT: u16 = 10809;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    /// Advertise every export as read only and reject writes
    pub read_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_NBD_PORT)),
            read_only: false,
        }
    }
}
