//! Track addressing: cylinder/head arithmetic and the two table levels locating track images

use crate::errors::*;
use crate::storage;
use positioned_io::{ReadAt, WriteAt};
use repr::header::CompressedHeader;
use repr::level::{Level2Entry, LEVEL1_ENTRY_SIZE, LEVEL1_OFFSET, LEVEL2_ENTRY_SIZE, OTHER_FILE};
use repr::Endian;

/// Largest cylinder or head count a track address can express
pub const MAX_GEOMETRY: u32 = u16::MAX as u32;

/// Cylinder and head counts of a device
///
/// Both counts fit in 16 bits, so the number of any track addressed by a 16-bit
/// cylinder/head pair fits in a `u32`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Geometry {
    /// Tracks per cylinder, never 0
    pub heads: u32,
    pub cylinders: u32,
}

impl Geometry {
    pub fn new(heads: u32, cylinders: u32) -> Result<Self> {
        if heads == 0 {
            return Err(Error::format("device has no heads"));
        }
        if heads > MAX_GEOMETRY || cylinders > MAX_GEOMETRY {
            return Err(Error::format(format!(
                "device geometry of {} cylinders and {} heads is out of range",
                cylinders, heads
            )));
        }
        Ok(Self { heads, cylinders })
    }

    pub fn track_number(&self, cylinder: u16, head: u16) -> u32 {
        u32::from(cylinder) * self.heads + u32::from(head)
    }

    pub fn cylinder_head(&self, track: u32) -> (u32, u32) {
        (track / self.heads, track % self.heads)
    }

    pub fn tracks(&self) -> u32 {
        self.cylinders * self.heads
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Level1Entry {
    /// No level 2 table yet: every track it would cover is a null track
    Unallocated,
    /// Offset of the level 2 table
    Level2(u32),
    /// The level 2 table lives in another file of the device
    OtherFile,
}

impl From<u32> for Level1Entry {
    fn from(raw: u32) -> Self {
        match raw {
            0 => Level1Entry::Unallocated,
            OTHER_FILE => Level1Entry::OtherFile,
            position => Level1Entry::Level2(position),
        }
    }
}

/// The level 1 table, held in memory and written through on every change
#[derive(Debug, Clone)]
pub struct Level1Table {
    entries: Vec<u32>,
    level2_size: u32,
    endian: Endian,
}

impl Level1Table {
    /// Reads the table sized by `header`, which must lie below its `file_size`
    pub fn load<S: ReadAt + ?Sized>(
        storage: &S,
        header: &CompressedHeader,
        endian: Endian,
    ) -> Result<Self> {
        let level2_size = header.level2_size;
        if level2_size == 0 {
            return Err(Error::format("level 2 tables have no entries"));
        }
        let bytes = storage::read_region(
            storage,
            LEVEL1_OFFSET,
            header.level1_size as usize * LEVEL1_ENTRY_SIZE,
            header.file_size,
            "level 1 table",
        )?;
        let entries = bytes
            .chunks_exact(LEVEL1_ENTRY_SIZE)
            .map(|entry| endian.read_u32(entry))
            .collect();
        Ok(Self {
            entries,
            level2_size,
            endian,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn level2_size(&self) -> u32 {
        self.level2_size
    }

    /// Bytes occupied by one level 2 table
    pub fn level2_table_len(&self) -> u32 {
        self.level2_size * LEVEL2_ENTRY_SIZE as u32
    }

    /// Index of the level 1 entry covering `track`
    pub fn index_of(&self, track: u32) -> Result<usize> {
        let index = (track / self.level2_size) as usize;
        if index >= self.entries.len() {
            return Err(Error::format(format!(
                "track {} is beyond the level 1 table ({} entries)",
                track,
                self.entries.len()
            )));
        }
        Ok(index)
    }

    pub fn lookup(&self, track: u32) -> Result<Level1Entry> {
        let index = self.index_of(track)?;
        Ok(self.entries[index].into())
    }

    pub fn set<S: WriteAt + ?Sized>(
        &mut self,
        storage: &mut S,
        index: usize,
        position: u32,
    ) -> Result<()> {
        let entry = self
            .entries
            .get_mut(index)
            .ok_or_else(|| Error::format(format!("level 1 index {} out of range", index)))?;
        let mut bytes = [0; LEVEL1_ENTRY_SIZE];
        self.endian.write_u32(&mut bytes, position);
        storage.write_all_at(LEVEL1_OFFSET + (index * LEVEL1_ENTRY_SIZE) as u64, &bytes)?;
        *entry = position;
        Ok(())
    }

    fn level2_position(&self, table: u32, track: u32) -> u64 {
        u64::from(table) + u64::from(track % self.level2_size) * LEVEL2_ENTRY_SIZE as u64
    }

    pub fn read_level2<S: ReadAt + ?Sized>(
        &self,
        storage: &S,
        table: u32,
        track: u32,
    ) -> Result<Level2Entry> {
        let mut bytes = [0; LEVEL2_ENTRY_SIZE];
        storage.read_exact_at(self.level2_position(table, track), &mut bytes)?;
        Ok(Level2Entry::parse(&bytes, self.endian))
    }

    pub fn write_level2<S: WriteAt + ?Sized>(
        &self,
        storage: &mut S,
        table: u32,
        track: u32,
        entry: Level2Entry,
    ) -> Result<()> {
        let bytes = entry.serialize(self.endian);
        storage.write_all_at(self.level2_position(table, track), &bytes)?;
        Ok(())
    }
}
