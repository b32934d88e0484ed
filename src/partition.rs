//! Byte addressed access to a partition
//!
//! A partition is read as the concatenation of the 4KiB data areas of records 1 through 12
//! on each of its tracks, in track order.

use crate::errors::*;
use crate::storage::Storage;
use crate::track::{self, TrackCodec};
use crate::vtoc::Partition;
use repr::{SECTORS_PER_TRACK, SECTOR_SIZE};

/// A position within a partition, split into track, sector record and byte
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
struct Cursor {
    track: u32,
    record: u8,
    offset: usize,
}

impl Cursor {
    fn new(first_track: u32, position: u64) -> Self {
        let sector = position / u64::from(SECTOR_SIZE);
        Self {
            track: first_track + (sector / u64::from(SECTORS_PER_TRACK)) as u32,
            record: (sector % u64::from(SECTORS_PER_TRACK)) as u8 + 1,
            offset: (position % u64::from(SECTOR_SIZE)) as usize,
        }
    }

    fn advance(&mut self) {
        self.offset = 0;
        if u32::from(self.record) == SECTORS_PER_TRACK {
            self.record = 1;
            self.track += 1;
        } else {
            self.record += 1;
        }
    }

    /// Bytes left in the current sector
    fn available(&self) -> usize {
        SECTOR_SIZE as usize - self.offset
    }
}

fn check_range(size: u64, offset: u64, length: u64) -> Result<()> {
    let end = offset.saturating_add(length);
    if offset >= size || end > size {
        return Err(Error::Range { offset, end, size });
    }
    Ok(())
}

fn sector_data<'a>(track_data: &'a [u8], cursor: &Cursor) -> Result<(&'a [u8], &'a [u8])> {
    let record = track::find_record(track_data, cursor.record)?.ok_or_else(|| {
        Error::format(format!(
            "track {} has no sector record {}",
            cursor.track, cursor.record
        ))
    })?;
    if record.data.len() < SECTOR_SIZE as usize {
        return Err(Error::format(format!(
            "sector record {} on track {} holds only {} bytes",
            cursor.record,
            cursor.track,
            record.data.len()
        )));
    }
    Ok((record.key, record.data))
}

pub fn read<S: Storage + ?Sized>(
    codec: &mut TrackCodec<'_, S>,
    partition: &Partition,
    offset: u64,
    length: u32,
) -> Result<Vec<u8>> {
    let geometry = codec.geometry;
    check_range(partition.size(&geometry), offset, u64::from(length))?;

    let mut out = Vec::with_capacity(length as usize);
    let mut cursor = Cursor::new(partition.first_track(&geometry), offset);
    let mut loaded = None;
    let mut track_data = Vec::new();
    while out.len() < length as usize {
        if loaded != Some(cursor.track) {
            track_data = codec.read_track(cursor.track)?;
            loaded = Some(cursor.track);
        }
        let (_, data) = sector_data(&track_data, &cursor)?;
        let take = cursor.available().min(length as usize - out.len());
        out.extend_from_slice(&data[cursor.offset..cursor.offset + take]);
        cursor.advance();
    }
    Ok(out)
}

pub fn write<S: Storage + ?Sized>(
    codec: &mut TrackCodec<'_, S>,
    partition: &Partition,
    offset: u64,
    bytes: &[u8],
) -> Result<()> {
    let geometry = codec.geometry;
    check_range(partition.size(&geometry), offset, bytes.len() as u64)?;

    let mut cursor = Cursor::new(partition.first_track(&geometry), offset);
    let mut loaded = None;
    let mut track_data = Vec::new();
    let mut remaining = bytes;
    while !remaining.is_empty() {
        if loaded != Some(cursor.track) {
            if let Some(track) = loaded {
                codec.write_track(track, &track_data)?;
            }
            track_data = codec.read_track(cursor.track)?;
            loaded = Some(cursor.track);
        }

        let (key, mut sector) = {
            let (key, data) = sector_data(&track_data, &cursor)?;
            (key.to_vec(), data.to_vec())
        };
        let take = cursor.available().min(remaining.len());
        sector[cursor.offset..cursor.offset + take].copy_from_slice(&remaining[..take]);
        track::replace_record(&mut track_data, cursor.record, &key, &sector)?;
        remaining = &remaining[take..];
        cursor.advance();
    }
    if let Some(track) = loaded {
        codec.write_track(track, &track_data)?;
    }
    Ok(())
}
