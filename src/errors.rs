use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The image is not a valid compressed CKD image
    Format,
    /// The image uses a feature which is not implemented
    Unsupported,
    /// Space could not be allocated, or the image was poisoned by an earlier failure
    Allocation,
    /// Unknown partition name
    NotFound,
    /// Offset or length outside of the partition
    Range,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid image: {0}")]
    Format(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Unable to allocate space: {0}")]
    Allocation(String),
    #[error("Image refuses writes after an earlier allocation failure")]
    Poisoned,
    #[error("No partition named {0:?}")]
    NotFound(String),
    #[error("Range {offset}..{end} is outside of a partition of {size} bytes")]
    Range { offset: u64, end: u64, size: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Format(_) => ErrorKind::Format,
            Error::Unsupported(_) => ErrorKind::Unsupported,
            Error::Allocation(_) | Error::Poisoned => ErrorKind::Allocation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Range { .. } => ErrorKind::Range,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    pub(crate) fn allocation(msg: impl Into<String>) -> Self {
        Error::Allocation(msg.into())
    }
}
