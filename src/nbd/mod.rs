//! Serving partitions over the Network Block Device protocol
//!
//! Every partition of the image is an export, named after its dataset. Clients are
//! handled by their own task; access to the image is serialized through a mutex, and
//! reads, writes and flushes run on the blocking thread pool.

use std::io;
use thiserror::Error;

pub mod protocol;
mod server;

pub use self::server::{serve, serve_connection, SharedImage};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Bad {what} magic {actual:#x}")]
    BadMagic { what: &'static str, actual: u64 },
    #[error("Client does not support fixed newstyle negotiation")]
    NotFixedNewstyle,
    #[error("No export named {0:?}")]
    UnknownExport(String),
    #[error("Option of {0} bytes is too large")]
    OptionTooLarge(u32),
    #[error("Request of {0} bytes is too large")]
    RequestTooLarge(u32),
    #[error("Image task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
