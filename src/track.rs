//! Reading and writing whole tracks, and walking the records on a track
//!
//! Track buffers handled here never include the 5 byte track header: they start with the
//! count field of record 0 and end with the end of track marker.

use crate::address::{Geometry, Level1Entry, Level1Table};
use crate::alloc::FreeSpace;
use crate::compression::{self, Codecs};
use crate::errors::*;
use crate::storage::{self, Storage};
use positioned_io::WriteAt;
use repr::header::CompressedHeader;
use repr::level::{empty_level2_table, Level2Entry};
use repr::track::{
    is_end_of_track, null_format, Count, TrackHeader, COUNT_SIZE, END_OF_TRACK, HEADER_SIZE,
    R0_DATA_SIZE,
};
use repr::{SECTORS_PER_TRACK, SECTOR_SIZE};
use slog::Logger;
use std::convert::TryFrom;
use std::io;
use zerocopy::AsBytes;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Record<'a> {
    pub count: Count,
    pub key: &'a [u8],
    pub data: &'a [u8],
    /// Offset of the count field within the track
    pub offset: usize,
}

impl Record<'_> {
    pub fn number(&self) -> u8 {
        self.count.record
    }
}

/// Iterator over the records of a track, see [`records`](fn.records.html)
#[derive(Debug, Clone)]
pub struct Records<'a> {
    track: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<Record<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let rest = &self.track[self.offset..];
        if is_end_of_track(rest) {
            self.done = true;
            return None;
        }
        let count = match Count::read(rest) {
            Some(count) => count,
            None => {
                self.done = true;
                return Some(Err(Error::format(format!(
                    "track ends at offset {} without an end marker",
                    self.offset
                ))));
            }
        };
        let key_end = COUNT_SIZE + usize::from(count.key_length);
        let data_end = COUNT_SIZE + count.body_len();
        if rest.len() < data_end {
            self.done = true;
            return Some(Err(Error::format(format!(
                "record {} at offset {} is truncated",
                count.record, self.offset
            ))));
        }
        let record = Record {
            count,
            key: &rest[COUNT_SIZE..key_end],
            data: &rest[key_end..data_end],
            offset: self.offset,
        };
        self.offset += data_end;
        Some(Ok(record))
    }
}

pub fn records(track: &[u8]) -> Records<'_> {
    Records {
        track,
        offset: 0,
        done: false,
    }
}

/// The first record numbered `number`, if any
pub fn find_record(track: &[u8], number: u8) -> Result<Option<Record<'_>>> {
    for record in records(track) {
        let record = record?;
        if record.number() == number {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Overwrites the key and data of record `number` in place
///
/// The lengths of the key and data cannot change.
pub fn replace_record(track: &mut [u8], number: u8, key: &[u8], data: &[u8]) -> Result<()> {
    let (offset, count) = match find_record(track, number)? {
        Some(record) => (record.offset, record.count),
        None => {
            return Err(Error::format(format!("no record {} on track", number)));
        }
    };
    if key.len() != usize::from(count.key_length) || data.len() != usize::from(count.data_length.get()) {
        return Err(Error::allocation(format!(
            "record {} is {}+{} bytes, cannot store {}+{} in place",
            number,
            count.key_length,
            count.data_length.get(),
            key.len(),
            data.len()
        )));
    }
    let key_start = offset + COUNT_SIZE;
    let data_start = key_start + key.len();
    track[key_start..data_start].copy_from_slice(key);
    track[data_start..data_start + data.len()].copy_from_slice(data);
    Ok(())
}

/// Builds a track buffer record by record
#[derive(Debug, Clone)]
pub struct TrackBuilder {
    cylinder: u16,
    head: u16,
    bytes: Vec<u8>,
}

impl TrackBuilder {
    /// Starts a track holding only an empty record 0
    pub fn new(cylinder: u16, head: u16) -> Self {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(Count::new(cylinder, head, 0, 0, R0_DATA_SIZE).as_bytes());
        bytes.extend_from_slice(&[0; R0_DATA_SIZE as usize]);
        Self {
            cylinder,
            head,
            bytes,
        }
    }

    pub fn record(&mut self, number: u8, key: &[u8], data: &[u8]) -> Result<&mut Self> {
        let key_length = u8::try_from(key.len())
            .map_err(|_| Error::format(format!("{} byte key is too long", key.len())))?;
        let data_length = u16::try_from(data.len())
            .map_err(|_| Error::format(format!("{} byte record is too long", data.len())))?;
        let count = Count::new(self.cylinder, self.head, number, key_length, data_length);
        self.bytes.extend_from_slice(count.as_bytes());
        self.bytes.extend_from_slice(key);
        self.bytes.extend_from_slice(data);
        Ok(self)
    }

    pub fn finish(mut self) -> Vec<u8> {
        self.bytes.extend_from_slice(&END_OF_TRACK);
        self.bytes
    }
}

/// The contents of a track which has never been written
pub fn null_track(cylinder: u16, head: u16, format: u8) -> Result<Vec<u8>> {
    let mut builder = TrackBuilder::new(cylinder, head);
    match format {
        null_format::EMPTY => {}
        null_format::LINUX => {
            let sector = vec![0; SECTOR_SIZE as usize];
            for number in 1..=SECTORS_PER_TRACK as u8 {
                builder.record(number, &[], &sector)?;
            }
        }
        other => {
            return Err(Error::unsupported(format!("null track format {}", other)));
        }
    }
    Ok(builder.finish())
}

/// Track level access to an image, borrowing the parts of the image it needs
pub struct TrackCodec<'a, S: ?Sized> {
    pub storage: &'a mut S,
    pub header: &'a mut CompressedHeader,
    pub level1: &'a mut Level1Table,
    pub free_space: &'a mut FreeSpace,
    pub codecs: &'a mut Codecs,
    pub geometry: Geometry,
    /// Largest decompressed track
    pub track_size: usize,
    pub logger: &'a Logger,
}

impl<S: Storage + ?Sized> TrackCodec<'_, S> {
    fn address(&self, track: u32) -> Result<(u16, u16)> {
        let (cylinder, head) = self.geometry.cylinder_head(track);
        match (u16::try_from(cylinder), u16::try_from(head)) {
            (Ok(cylinder), Ok(head)) => Ok((cylinder, head)),
            _ => Err(Error::format(format!("track {} is not addressable", track))),
        }
    }

    /// Reads and decompresses a track
    pub fn read_track(&mut self, track: u32) -> Result<Vec<u8>> {
        let (cylinder, head) = self.address(track)?;
        let table = match self.level1.lookup(track)? {
            Level1Entry::Unallocated => {
                return null_track(cylinder, head, self.header.null_track_format);
            }
            Level1Entry::OtherFile => {
                return Err(Error::unsupported(format!(
                    "track {} is stored in another file",
                    track
                )));
            }
            Level1Entry::Level2(table) => table,
        };
        let entry = self.level1.read_level2(&*self.storage, table, track)?;
        if entry.is_null() {
            let format = u8::try_from(entry.length)
                .map_err(|_| Error::unsupported(format!("null track format {}", entry.length)))?;
            return null_track(cylinder, head, format);
        }
        if usize::from(entry.length) < HEADER_SIZE {
            return Err(Error::format(format!(
                "track {} image of {} bytes has no header",
                track, entry.length
            )));
        }

        let image = storage::read_region(
            &*self.storage,
            u64::from(entry.position),
            usize::from(entry.length),
            self.header.file_size,
            "track image",
        )?;
        let track_header = TrackHeader::read(&image)
            .ok_or_else(|| Error::format(format!("track {} header is truncated", track)))?;
        if track_header.cylinder.get() != cylinder || track_header.head.get() != head {
            return Err(Error::format(format!(
                "track {} at {:#x} is labelled as cylinder {} head {}",
                track,
                entry.position,
                track_header.cylinder.get(),
                track_header.head.get()
            )));
        }

        let kind = compression::Kind::from_id(track_header.compression());
        let codec = self
            .codecs
            .get(kind)
            .ok_or_else(|| Error::unsupported(format!("{} compressed track {}", kind, track)))?;
        let mut raw = vec![0; self.track_size];
        let size = codec
            .decompress(&image[HEADER_SIZE..], &mut raw)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData => Error::format(
                    format!("track {} image is corrupt: {}", track, e),
                ),
                _ => Error::Io(e),
            })?;
        raw.truncate(size);
        Ok(raw)
    }

    /// Compresses and stores a track, moving it when it no longer fits its region
    pub fn write_track(&mut self, track: u32, raw: &[u8]) -> Result<()> {
        let (cylinder, head) = self.address(track)?;
        let kind = compression::Kind::from_id(self.header.compression);
        let codec = self
            .codecs
            .get(kind)
            .ok_or_else(|| Error::unsupported(format!("writing {} compressed tracks", kind)))?;
        let level = codec.level();

        let mut image = vec![0; HEADER_SIZE + raw.len()];
        let (kind, size) = match codec.compress(raw, &mut image[HEADER_SIZE..]) {
            Ok(size) => (kind, size),
            // Incompressible: store it as is
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                image[HEADER_SIZE..].copy_from_slice(raw);
                (compression::Kind::None, raw.len())
            }
            Err(e) => return Err(e.into()),
        };
        image.truncate(HEADER_SIZE + size);
        image[..HEADER_SIZE].copy_from_slice(TrackHeader::new(kind.id(), cylinder, head).as_bytes());
        let length = u16::try_from(image.len()).map_err(|_| {
            Error::unsupported(format!("track {} image of {} bytes", track, image.len()))
        })?;

        let table = match self.level1.lookup(track)? {
            Level1Entry::Level2(table) => table,
            Level1Entry::OtherFile => {
                return Err(Error::unsupported(format!(
                    "track {} is stored in another file",
                    track
                )));
            }
            Level1Entry::Unallocated => self.new_level2_table(track)?,
        };

        let old = self.level1.read_level2(&*self.storage, table, track)?;
        let entry = if old.is_null() {
            let position = self.allocate(u32::from(length))?;
            Level2Entry {
                position,
                length,
                size: length,
            }
        } else if length > old.size {
            let position = self.allocate(u32::from(length))?;
            self.free_space.deallocate(
                &mut *self.storage,
                &mut *self.header,
                old.position,
                u32::from(old.size),
            )?;
            Level2Entry {
                position,
                length,
                size: length,
            }
        } else {
            Level2Entry { length, ..old }
        };

        self.storage.write_all_at(u64::from(entry.position), &image)?;
        self.level1
            .write_level2(&mut *self.storage, table, track, entry)?;
        slog::debug!(self.logger, "Wrote track";
            "track" => track,
            "position" => entry.position,
            "length" => entry.length,
            "size" => entry.size,
            "compression" => %kind,
            "level" => ?level
        );
        Ok(())
    }

    fn allocate(&mut self, length: u32) -> Result<u32> {
        self.free_space
            .allocate(&mut *self.storage, &mut *self.header, length)
    }

    fn new_level2_table(&mut self, track: u32) -> Result<u32> {
        let index = self.level1.index_of(track)?;
        let length = self.level1.level2_table_len();
        let position = self.allocate(length)?;
        let table = empty_level2_table(
            self.level1.level2_size(),
            self.header.null_track_format,
            self.level1.endian(),
        );
        self.storage.write_all_at(u64::from(position), &table)?;
        self.level1.set(&mut *self.storage, index, position)?;
        slog::debug!(self.logger, "Created level 2 table"; "index" => index, "position" => position);
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_track() -> Vec<u8> {
        let mut builder = TrackBuilder::new(1, 2);
        builder
            .record(1, b"KEY", b"first")
            .unwrap()
            .record(2, &[], b"second record")
            .unwrap();
        builder.finish()
    }

    #[test]
    fn walk_records() {
        let track = sample_track();
        let all: Vec<_> = records(&track).collect::<Result<_>>().unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].number(), 0);
        assert_eq!(all[0].data, &[0; 8]);
        assert_eq!(all[1].key, b"KEY");
        assert_eq!(all[1].data, b"first");
        assert_eq!(all[2].count.cylinder.get(), 1);
        assert_eq!(all[2].count.head.get(), 2);
        assert_eq!(all[2].offset, 16 + 8 + 3 + 5);
        assert_eq!(&track[track.len() - 8..], &END_OF_TRACK);
    }

    #[test]
    fn find_and_replace() {
        let mut track = sample_track();
        assert!(find_record(&track, 7).unwrap().is_none());
        replace_record(&mut track, 1, b"KEY", b"FIRST").unwrap();
        assert_eq!(find_record(&track, 1).unwrap().unwrap().data, b"FIRST");
        assert_eq!(find_record(&track, 2).unwrap().unwrap().data, b"second record");

        let err = replace_record(&mut track, 2, &[], b"short").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
        let err = replace_record(&mut track, 9, &[], b"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn truncated_tracks() {
        let track = sample_track();
        let without_marker = &track[..track.len() - 8];
        let result: Result<Vec<_>> = records(without_marker).collect();
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Format);

        let cut = &track[..20];
        assert_eq!(find_record(cut, 1).unwrap_err().kind(), ErrorKind::Format);
    }

    #[test]
    fn null_tracks() {
        let empty = null_track(3, 4, null_format::EMPTY).unwrap();
        assert_eq!(empty.len(), 8 + 8 + 8);
        assert_eq!(records(&empty).count(), 1);

        let linux = null_track(3, 4, null_format::LINUX).unwrap();
        let all: Vec<_> = records(&linux).collect::<Result<_>>().unwrap();
        assert_eq!(all.len(), 13);
        for (i, record) in all.iter().enumerate().skip(1) {
            assert_eq!(usize::from(record.number()), i);
            assert_eq!(record.data.len(), 4096);
            assert!(record.data.iter().all(|&b| b == 0));
            assert!(record.key.is_empty());
        }
        assert_eq!(linux.len(), 16 + 12 * (8 + 4096) + 8);

        assert_eq!(
            null_track(0, 0, 1).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }
}
