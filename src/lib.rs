//! Compressed CKD disk images
//!
//! An [`Image`](struct.Image.html) opens a compressed count-key-data image, finds the
//! datasets listed in its VTOC, and exposes each of them as a flat, byte addressed
//! partition. [`ImageBuilder`](format/struct.ImageBuilder.html) creates new images, and
//! the [`nbd`](nbd/index.html) module serves partitions to network block device clients.

use slog::{Drain, Logger};

pub mod address;
pub mod alloc;
pub mod compression;
pub mod config;
mod errors;
pub mod format;
mod image;
pub mod nbd;
pub mod partition;
pub mod storage;
pub mod track;
pub mod vtoc;

pub use crate::config::{Config, ServerConfig};
pub use crate::errors::{Error, ErrorKind, Result};
pub use crate::format::ImageBuilder;
pub use crate::image::{detect_endian, Image};
pub use crate::vtoc::{Partition, PartitionTable, TrackAddress};
pub use repr::Endian;

pub(crate) fn default_logger() -> Logger {
    slog::Logger::root(slog_stdlog::StdLog.fuse(), slog::o!())
}
