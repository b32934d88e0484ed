//! Space allocation inside the image file
//!
//! Requests which cannot be satisfied from the free space directory grow the file.
//! Released regions are appended to the directory as new slots; slots are never merged.
//! All counters live in the compressed header and reach the disk when it is synced.

use crate::config::SlotFit;
use crate::errors::*;
use crate::storage;
use positioned_io::{ReadAt, WriteAt};
use repr::free_space::{self, Slot, SLOT_SIZE, TAG};
use repr::header::CompressedHeader;
use repr::Endian;
use slog::Logger;
use std::convert::TryFrom;

#[derive(Debug)]
pub struct FreeSpace {
    fit: SlotFit,
    endian: Endian,
    directory: Option<Directory>,
    logger: Logger,
}

/// The loaded free space directory
#[derive(Debug)]
struct Directory {
    position: u32,
    /// Slots which fit in the region reserved for the directory
    capacity: usize,
    /// The live slots, `free_space_count` of them
    slots: Vec<Slot>,
}

impl Directory {
    fn load<S: ReadAt + ?Sized>(storage: &S, header: &CompressedHeader, endian: Endian) -> Result<Self> {
        let position = header.free_space_position;
        if position == 0 {
            return Err(Error::allocation("image has no free space directory"));
        }
        let count = header.free_space_count as usize;
        let bytes = storage::read_region(
            storage,
            u64::from(position),
            free_space::Slot::offset(count),
            header.file_size,
            "free space directory",
        )?;
        if bytes[..TAG.len()] != TAG {
            return Err(Error::allocation(format!(
                "no free space directory at {:#x}",
                position
            )));
        }
        let slots: Vec<Slot> = bytes[TAG.len()..]
            .chunks_exact(SLOT_SIZE)
            .filter_map(|chunk| <&[u8; SLOT_SIZE]>::try_from(chunk).ok())
            .map(|chunk| Slot::parse(chunk, endian))
            .collect();
        let own = slots
            .iter()
            .find(|slot| slot.position == position)
            .ok_or_else(|| Error::allocation("free space directory does not describe itself"))?;
        let capacity = free_space::capacity(own.length);
        if capacity < slots.len() {
            return Err(Error::allocation(format!(
                "free space directory holds {} slots but has room for {}",
                slots.len(),
                capacity
            )));
        }
        Ok(Self {
            position,
            capacity,
            slots,
        })
    }

    fn write_slot<S: WriteAt + ?Sized>(
        &self,
        storage: &mut S,
        index: usize,
        endian: Endian,
    ) -> Result<()> {
        let bytes = self.slots[index].serialize(endian);
        let offset = u64::from(self.position) + Slot::offset(index) as u64;
        storage.write_all_at(offset, &bytes)?;
        Ok(())
    }
}

impl FreeSpace {
    pub fn new(fit: SlotFit, endian: Endian, logger: Logger) -> Self {
        Self {
            fit,
            endian,
            directory: None,
            logger,
        }
    }

    fn directory<S: ReadAt + ?Sized>(
        &mut self,
        storage: &S,
        header: &CompressedHeader,
    ) -> Result<&mut Directory> {
        if self.directory.is_none() {
            let directory = Directory::load(storage, header, self.endian)?;
            slog::debug!(self.logger, "Loaded free space directory";
                "position" => directory.position,
                "capacity" => directory.capacity,
                "slots" => directory.slots.len()
            );
            self.directory = Some(directory);
        }
        self.directory
            .as_mut()
            .ok_or_else(|| Error::allocation("free space directory unavailable"))
    }

    /// Returns the position of `length` freshly reserved bytes
    pub fn allocate<S: ReadAt + WriteAt + ?Sized>(
        &mut self,
        storage: &mut S,
        header: &mut CompressedHeader,
        length: u32,
    ) -> Result<u32> {
        if !uses_directory(self.fit, length, header.largest_free_space) {
            let position = header.file_size;
            header.file_size = position.checked_add(length).ok_or_else(|| {
                Error::allocation(format!(
                    "{} bytes at {:#x} exceed the addressable image size",
                    length, position
                ))
            })?;
            header.file_used = header.file_used.saturating_add(length);
            slog::debug!(self.logger, "Allocated at end of file"; "position" => position, "length" => length);
            return Ok(position);
        }

        let fit = self.fit;
        let endian = self.endian;
        let largest = header.largest_free_space;
        let directory = self.directory(storage, header)?;
        let own_position = directory.position;
        let index = directory
            .slots
            .iter()
            .position(|slot| slot.position != own_position && slot_fits(fit, slot.length, length))
            .ok_or_else(|| {
                Error::allocation(format!(
                    "no free space slot holds {} bytes although the largest is recorded as {}",
                    length, largest
                ))
            })?;

        let slot = &mut directory.slots[index];
        let position = slot.position;
        let was_largest = slot.length == largest;
        slot.position += length;
        slot.length -= length;
        let remainder = slot.length;
        directory.write_slot(storage, index, endian)?;

        if was_largest {
            header.largest_free_space = remainder;
        }
        header.total_free_space = header.total_free_space.saturating_sub(length);
        header.file_used = header.file_used.saturating_add(length);
        slog::debug!(self.logger, "Allocated from free space";
            "position" => position,
            "length" => length,
            "slot" => index,
            "remaining" => remainder
        );
        Ok(position)
    }

    /// Returns a region to the free space directory
    pub fn deallocate<S: ReadAt + WriteAt + ?Sized>(
        &mut self,
        storage: &mut S,
        header: &mut CompressedHeader,
        position: u32,
        length: u32,
    ) -> Result<()> {
        let endian = self.endian;
        let directory = self.directory(storage, header)?;
        let index = header.free_space_count as usize;
        if index != directory.slots.len() {
            return Err(Error::allocation(format!(
                "free space count {} disagrees with the {} loaded slots",
                index,
                directory.slots.len()
            )));
        }
        if index >= directory.capacity {
            return Err(Error::allocation(format!(
                "free space directory is full ({} slots)",
                directory.capacity
            )));
        }
        directory.slots.push(Slot { position, length });
        directory.write_slot(storage, index, endian)?;

        header.free_space_count += 1;
        header.total_free_space = header.total_free_space.saturating_add(length);
        header.file_used = header.file_used.saturating_sub(length);
        if length > header.largest_free_space {
            header.largest_free_space = length;
        }
        slog::debug!(self.logger, "Released space"; "position" => position, "length" => length, "slot" => index);
        Ok(())
    }
}

fn uses_directory(fit: SlotFit, length: u32, largest: u32) -> bool {
    match fit {
        SlotFit::Strict => length < largest,
        SlotFit::AllowExact => length <= largest,
    }
}

fn slot_fits(fit: SlotFit, slot: u32, length: u32) -> bool {
    match fit {
        SlotFit::Strict => slot > length,
        SlotFit::AllowExact => slot >= length,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIRECTORY: u32 = 4096;

    /// A file with an empty directory of `capacity` slots at 4096, ending right after it
    fn setup(capacity: u32, endian: Endian) -> (std::fs::File, CompressedHeader) {
        let mut file = tempfile::tempfile().unwrap();
        let length = (TAG.len() + capacity as usize * SLOT_SIZE) as u32;
        let mut bytes = vec![0; length as usize];
        bytes[..8].copy_from_slice(&TAG);
        let own = Slot {
            position: DIRECTORY,
            length,
        };
        bytes[8..16].copy_from_slice(&own.serialize(endian));
        file.write_all_at(u64::from(DIRECTORY), &bytes).unwrap();

        let mut header = CompressedHeader::default();
        header.free_space_position = DIRECTORY;
        header.free_space_count = 1;
        header.file_size = DIRECTORY + length;
        header.file_used = header.file_size;
        (file, header)
    }

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn grows_file_without_free_space() {
        let (mut file, mut header) = setup(4, Endian::Little);
        let end = header.file_size;
        let mut space = FreeSpace::new(SlotFit::Strict, Endian::Little, logger());
        assert_eq!(space.allocate(&mut file, &mut header, 100).unwrap(), end);
        assert_eq!(space.allocate(&mut file, &mut header, 50).unwrap(), end + 100);
        assert_eq!(header.file_size, end + 150);
        assert_eq!(header.file_used, end + 150);
        assert_eq!(header.total_free_space, 0);
    }

    #[test]
    fn reuses_released_space() {
        for &endian in &[Endian::Little, Endian::Big] {
            let (mut file, mut header) = setup(4, endian);
            let mut space = FreeSpace::new(SlotFit::Strict, endian, logger());
            let a = space.allocate(&mut file, &mut header, 300).unwrap();
            let b = space.allocate(&mut file, &mut header, 300).unwrap();
            space.deallocate(&mut file, &mut header, a, 300).unwrap();
            assert_eq!(header.free_space_count, 2);
            assert_eq!(header.total_free_space, 300);
            assert_eq!(header.largest_free_space, 300);

            let size = header.file_size;
            let c = space.allocate(&mut file, &mut header, 200).unwrap();
            assert_eq!(c, a);
            assert_eq!(header.file_size, size);
            assert_eq!(header.largest_free_space, 100);
            assert_eq!(header.total_free_space, 100);

            // The carved slot is persisted
            let reloaded = Directory::load(&file, &header, endian).unwrap();
            assert_eq!(
                reloaded.slots[1],
                Slot {
                    position: a + 200,
                    length: 100
                }
            );
            assert!(c + 200 <= b);
        }
    }

    #[test]
    fn strict_fit_appends_exact_sizes() {
        let (mut file, mut header) = setup(4, Endian::Little);
        let mut space = FreeSpace::new(SlotFit::Strict, Endian::Little, logger());
        let a = space.allocate(&mut file, &mut header, 64).unwrap();
        space.deallocate(&mut file, &mut header, a, 64).unwrap();
        let end = header.file_size;
        assert_eq!(space.allocate(&mut file, &mut header, 64).unwrap(), end);

        let (mut file, mut header) = setup(4, Endian::Little);
        let mut space = FreeSpace::new(SlotFit::AllowExact, Endian::Little, logger());
        let a = space.allocate(&mut file, &mut header, 64).unwrap();
        space.deallocate(&mut file, &mut header, a, 64).unwrap();
        assert_eq!(space.allocate(&mut file, &mut header, 64).unwrap(), a);
        assert_eq!(header.largest_free_space, 0);
    }

    #[test]
    fn full_directory() {
        let (mut file, mut header) = setup(2, Endian::Little);
        let mut space = FreeSpace::new(SlotFit::Strict, Endian::Little, logger());
        let a = space.allocate(&mut file, &mut header, 10).unwrap();
        let b = space.allocate(&mut file, &mut header, 10).unwrap();
        space.deallocate(&mut file, &mut header, a, 10).unwrap();
        let err = space.deallocate(&mut file, &mut header, b, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
    }

    #[test]
    fn missing_directory() {
        let mut file = tempfile::tempfile().unwrap();
        let mut header = CompressedHeader::default();
        header.file_size = 2048;
        let mut space = FreeSpace::new(SlotFit::Strict, Endian::Little, logger());
        let err = space.deallocate(&mut file, &mut header, 1024, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);

        header.file_size = u32::MAX - 4;
        let err = space.allocate(&mut file, &mut header, 10).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Allocation);
    }

    #[test]
    fn directory_within_the_file() {
        let (file, mut header) = setup(4, Endian::Little);
        header.free_space_count = 0x2000_0000;
        let err = Directory::load(&file, &header, Endian::Little).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);

        // The header claims more file than there is
        let (file, mut header) = setup(4, Endian::Little);
        header.free_space_position = header.file_size;
        header.file_size += 64;
        let err = Directory::load(&file, &header, Endian::Little).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    /// Random allocations and releases never hand out overlapping space
    #[test]
    fn churn_keeps_regions_disjoint() {
        for &fit in &[SlotFit::Strict, SlotFit::AllowExact] {
            let (mut file, mut header) = setup(4096, Endian::Little);
            let directory_end = header.file_used;
            let mut space = FreeSpace::new(fit, Endian::Little, logger());
            let mut live: Vec<(u32, u32)> = Vec::new();
            let mut seed = 0x2545_F491u32;
            for step in 0..3000 {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                if live.is_empty() || seed % 2 == 0 {
                    // Some exact repeats so AllowExact finds equal slots
                    let length = if seed % 5 == 0 { 512 } else { 1 + (seed >> 8) % 4000 };
                    let position = space.allocate(&mut file, &mut header, length).unwrap();
                    live.push((position, length));
                } else {
                    let (position, length) = live.swap_remove((seed >> 4) as usize % live.len());
                    space.deallocate(&mut file, &mut header, position, length).unwrap();
                }

                let used: u32 = live.iter().map(|&(_, length)| length).sum();
                assert_eq!(header.file_used, directory_end + used, "step {}", step);

                let mut sorted = live.clone();
                sorted.push((DIRECTORY, directory_end - DIRECTORY));
                sorted.sort_unstable();
                for pair in sorted.windows(2) {
                    assert!(pair[0].0 + pair[0].1 <= pair[1].0, "step {}: {:?}", step, pair);
                }
                let (last, length) = sorted[sorted.len() - 1];
                assert!(last + length <= header.file_size);
            }

            // Free slots account for the free total and stay clear of live regions
            let directory = Directory::load(&file, &header, Endian::Little).unwrap();
            let free: Vec<&Slot> = directory.slots[1..].iter().filter(|slot| slot.length > 0).collect();
            let total: u32 = free.iter().map(|slot| slot.length).sum();
            assert_eq!(total, header.total_free_space);
            for slot in free {
                assert!(live.iter().all(|&(position, length)| {
                    slot.position + slot.length <= position || position + length <= slot.position
                }));
                assert!(slot.position >= directory_end);
            }
        }
    }
}
