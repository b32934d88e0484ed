use repr::track::compression as id;
use std::{fmt, io};

#[cfg(feature = "zlib")]
pub mod zlib;

/// Compression level used when the image does not specify one
pub const DEFAULT_LEVEL: u32 = 6;

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    None = id::NONE,
    ZLib = id::ZLIB,
    Unknown = 0xFF,
}

impl Default for Kind {
    fn default() -> Self {
        Kind::ZLib
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Kind {
    pub fn from_id(id: u8) -> Kind {
        match id {
            id::NONE => Kind::None,
            id::ZLIB => Kind::ZLib,
            _ => Kind::Unknown,
        }
    }

    /// Names are matched case-insensitively
    pub fn from_name(name: &str) -> Kind {
        match name.to_ascii_lowercase().as_str() {
            "none" => Kind::None,
            "zlib" => Kind::ZLib,
            _ => Kind::Unknown,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::None => "none",
            Kind::ZLib => "zlib",
            Kind::Unknown => "unknown",
        }
    }

    pub fn supported(self) -> bool {
        match self {
            Kind::None => true,
            Kind::ZLib => cfg!(feature = "zlib"),
            Kind::Unknown => false,
        }
    }
}

/// Maps the compression parameter of an image onto a compression level
///
/// Anything outside of 0..=9 (usually -1) selects the default level.
pub fn level_from_parameter(parameter: i16) -> u32 {
    match parameter {
        0..=9 => parameter as u32,
        _ => DEFAULT_LEVEL,
    }
}

pub trait Compressor {
    /// Fails with `UnexpectedEof` if the result does not fit in `dst`
    fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize>;
}

pub trait Decompressor {
    /// Fails with `UnexpectedEof` if the result does not fit in `dst`
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize>;
}

#[derive(Debug, Default, Copy, Clone)]
pub struct Stored;

impl Compressor for Stored {
    fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        copy_to(src, dst)
    }
}

impl Decompressor for Stored {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        copy_to(src, dst)
    }
}

fn copy_to(src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
    let dst = dst
        .get_mut(..src.len())
        .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
    dst.copy_from_slice(src);
    Ok(src.len())
}

#[derive(Debug)]
pub enum AnyCodec {
    Stored(Stored),
    #[cfg(feature = "zlib")]
    ZLib(zlib::Zlib),
}

impl AnyCodec {
    /// Returns `None` for kinds this build cannot handle
    pub fn new(kind: Kind, level: u32) -> Option<AnyCodec> {
        match kind {
            Kind::None => Some(AnyCodec::Stored(Stored)),
            #[cfg(feature = "zlib")]
            Kind::ZLib => Some(AnyCodec::ZLib(zlib::Zlib::with_level(level))),
            _ => {
                let _ = level;
                None
            }
        }
    }

    pub fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        match self {
            AnyCodec::Stored(stored) => stored.compress(src, dst),
            #[cfg(feature = "zlib")]
            AnyCodec::ZLib(zlib) => zlib.compress(src, dst),
        }
    }

    pub fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        match self {
            AnyCodec::Stored(stored) => stored.decompress(src, dst),
            #[cfg(feature = "zlib")]
            AnyCodec::ZLib(zlib) => zlib.decompress(src, dst),
        }
    }

    /// Compression level, for codecs which have one
    pub fn level(&self) -> Option<u32> {
        match self {
            AnyCodec::Stored(_) => None,
            #[cfg(feature = "zlib")]
            AnyCodec::ZLib(zlib) => Some(zlib.level()),
        }
    }

    pub fn kind(&self) -> Kind {
        match *self {
            AnyCodec::Stored(_) => Kind::None,
            #[cfg(feature = "zlib")]
            AnyCodec::ZLib(_) => Kind::ZLib,
        }
    }
}

/// Codecs created on first use, one per kind
#[derive(Debug)]
pub struct Codecs {
    level: u32,
    codecs: Vec<AnyCodec>,
}

impl Codecs {
    pub fn new(level: u32) -> Self {
        Self {
            level,
            codecs: Vec::new(),
        }
    }

    pub fn get(&mut self, kind: Kind) -> Option<&mut AnyCodec> {
        let index = match self.codecs.iter().position(|c| c.kind() == kind) {
            Some(index) => index,
            None => {
                let codec = AnyCodec::new(kind, self.level)?;
                self.codecs.push(codec);
                self.codecs.len() - 1
            }
        };
        self.codecs.get_mut(index)
    }
}
