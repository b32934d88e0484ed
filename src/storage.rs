use crate::errors::*;
use positioned_io::{ReadAt, WriteAt};
use std::fs::File;
use std::io;

/// Random access backing store of an image
pub trait Storage: ReadAt + WriteAt {
    /// Flush written data all the way to durable storage
    fn sync(&mut self) -> io::Result<()>;
}

impl Storage for File {
    fn sync(&mut self) -> io::Result<()> {
        WriteAt::flush(self)?;
        self.sync_all()
    }
}

/// Reads exactly `len` bytes at `pos` into a new buffer
pub(crate) fn read_vec<S: ReadAt + ?Sized>(storage: &S, pos: u64, len: usize) -> io::Result<Vec<u8>> {
    let mut buf = vec![0; len];
    storage.read_exact_at(pos, &mut buf)?;
    Ok(buf)
}

/// Reads `len` bytes at `pos` of a region which must end at or below `file_size`
///
/// Regions reaching past `file_size` or the end of the storage are Format errors.
pub(crate) fn read_region<S: ReadAt + ?Sized>(
    storage: &S,
    pos: u64,
    len: usize,
    file_size: u32,
    what: &str,
) -> Result<Vec<u8>> {
    let end = pos + len as u64;
    if end > u64::from(file_size) {
        return Err(Error::format(format!(
            "{} at {:#x}..{:#x} lies beyond the end of the image ({:#x})",
            what, pos, end, file_size
        )));
    }
    read_vec(storage, pos, len).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            Error::format(format!("{} at {:#x} is truncated", what, pos))
        }
        _ => e.into(),
    })
}
