//! Locating datasets through the volume label and the VTOC

use crate::address::Geometry;
use crate::errors::*;
use crate::storage::Storage;
use crate::track::{self, TrackCodec};
use bitflags::bitflags;
use chrono::{Datelike, NaiveDate};
use indexmap::IndexMap;
use repr::ebcdic;
use repr::vtoc::{self, Date, Extent, Format1, VolumeLabel};
use slog::Logger;
use std::fmt;

/// Partitions in VTOC order, by name
pub type PartitionTable = IndexMap<String, Partition>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackAddress {
    pub cylinder: u16,
    pub head: u16,
}

impl TrackAddress {
    pub fn new(cylinder: u16, head: u16) -> Self {
        Self { cylinder, head }
    }

    pub fn track(self, geometry: &Geometry) -> u32 {
        geometry.track_number(self.cylinder, self.head)
    }
}

impl fmt::Display for TrackAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.cylinder, self.head)
    }
}

bitflags! {
    pub struct Organization: u16 {
        const INDEXED_SEQUENTIAL = 0x8000;
        const PHYSICAL_SEQUENTIAL = 0x4000;
        const DIRECT = 0x2000;
        const PARTITIONED = 0x0200;
        const UNMOVABLE = 0x0100;
        const VSAM = 0x0008;
    }
}

bitflags! {
    pub struct RecordFormat: u8 {
        const FIXED = 0x80;
        const VARIABLE = 0x40;
        const UNDEFINED = 0xC0;
        const TRACK_OVERFLOW = 0x20;
        const BLOCKED = 0x10;
        const SPANNED = 0x08;
        const ASA_CONTROL = 0x04;
        const MACHINE_CONTROL = 0x02;
    }
}

impl fmt::Display for Organization {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = if self.contains(Organization::VSAM) {
            "VS"
        } else if self.contains(Organization::PARTITIONED) {
            "PO"
        } else if self.contains(Organization::PHYSICAL_SEQUENTIAL) {
            "PS"
        } else if self.contains(Organization::DIRECT) {
            "DA"
        } else if self.contains(Organization::INDEXED_SEQUENTIAL) {
            "IS"
        } else {
            "??"
        };
        f.write_str(name)
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let base = if self.contains(RecordFormat::UNDEFINED) {
            "U"
        } else if self.contains(RecordFormat::FIXED) {
            "F"
        } else if self.contains(RecordFormat::VARIABLE) {
            "V"
        } else {
            "?"
        };
        f.write_str(base)?;
        if self.contains(RecordFormat::BLOCKED) {
            f.write_str("B")?;
        }
        if self.contains(RecordFormat::SPANNED) {
            f.write_str("S")?;
        }
        if self.contains(RecordFormat::ASA_CONTROL) {
            f.write_str("A")?;
        } else if self.contains(RecordFormat::MACHINE_CONTROL) {
            f.write_str("M")?;
        }
        Ok(())
    }
}

/// Descriptive fields of a format 1 DSCB
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attributes {
    pub volser: String,
    pub volume_sequence: u16,
    pub created: Option<NaiveDate>,
    pub expires: Option<NaiveDate>,
    pub organization: Organization,
    pub record_format: RecordFormat,
    pub record_length: u16,
    pub block_size: u16,
    pub key_length: u8,
    pub extent_count: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub name: String,
    /// First track of the first extent
    pub begin: TrackAddress,
    /// Last track of the first extent, inclusive
    pub end: TrackAddress,
    pub attributes: Attributes,
}

impl Partition {
    pub fn first_track(&self, geometry: &Geometry) -> u32 {
        self.begin.track(geometry)
    }

    pub fn last_track(&self, geometry: &Geometry) -> u32 {
        self.end.track(geometry)
    }

    pub fn tracks(&self, geometry: &Geometry) -> u32 {
        self.last_track(geometry) - self.first_track(geometry) + 1
    }

    /// Bytes addressable through the sector records of the partition
    pub fn size(&self, geometry: &Geometry) -> u64 {
        u64::from(self.tracks(geometry))
            * u64::from(repr::SECTORS_PER_TRACK)
            * u64::from(repr::SECTOR_SIZE)
    }
}

pub fn decode_date(date: Date) -> Option<NaiveDate> {
    if date.is_zero() {
        return None;
    }
    NaiveDate::from_yo_opt(1900 + i32::from(date.year), u32::from(date.day.get()))
}

/// Dates outside of 1900..=2155 cannot be represented
pub fn encode_date(date: NaiveDate) -> Option<Date> {
    let year = date.year() - 1900;
    if !(0..=255).contains(&year) {
        return None;
    }
    Some(Date::new(year as u8, date.ordinal() as u16))
}

/// Dataset names are stored blank padded, and sometimes NUL padded
fn decode_name(key: &[u8]) -> String {
    ebcdic::decode(key)
        .trim_matches(|c: char| c <= ' ')
        .to_string()
}

fn checked_extent(extent: &Extent, geometry: &Geometry) -> Result<(TrackAddress, TrackAddress), String> {
    if !extent.is_used() {
        return Err("first extent is unused".to_string());
    }
    let begin = TrackAddress::new(extent.begin_cylinder.get(), extent.begin_head.get());
    let end = TrackAddress::new(extent.end_cylinder.get(), extent.end_head.get());
    let heads = geometry.heads;
    if u32::from(begin.head) >= heads || u32::from(end.head) >= heads {
        return Err(format!("extent {}..{} has heads beyond {}", begin, end, heads));
    }
    if begin.track(geometry) > end.track(geometry) {
        return Err(format!("extent {}..{} ends before it begins", begin, end));
    }
    Ok((begin, end))
}

fn partition_from_dscb(
    key: &[u8],
    dscb: &Format1,
    geometry: &Geometry,
) -> Result<Partition, String> {
    let name = decode_name(key);
    if name.is_empty() {
        return Err("dataset name is blank".to_string());
    }
    let (begin, end) = checked_extent(&dscb.extents[0], geometry)?;
    let attributes = Attributes {
        volser: ebcdic::decode(&dscb.volser).trim_end().to_string(),
        volume_sequence: dscb.volume_sequence.get(),
        created: decode_date(dscb.creation_date),
        expires: decode_date(dscb.expiration_date),
        organization: Organization::from_bits_truncate(dscb.dataset_organization.get()),
        record_format: RecordFormat::from_bits_truncate(dscb.record_format),
        record_length: dscb.logical_record_length.get(),
        block_size: dscb.block_length.get(),
        key_length: dscb.key_length,
        extent_count: dscb.extent_count,
    };
    Ok(Partition {
        name,
        begin,
        end,
        attributes,
    })
}

/// Reads the volume label and every format 1 DSCB on the first VTOC track
pub fn read_partitions<S: Storage + ?Sized>(
    codec: &mut TrackCodec<'_, S>,
    logger: &Logger,
) -> Result<PartitionTable> {
    let geometry = codec.geometry;
    let track0 = codec.read_track(0)?;
    let label_record = track::find_record(&track0, vtoc::VOLUME_LABEL_RECORD)?
        .ok_or_else(|| Error::format("track 0 has no volume label record"))?;
    let label = VolumeLabel::read(label_record.data)
        .ok_or_else(|| Error::format("volume label record is truncated"))?;
    if label.label_id != vtoc::VOLUME_LABEL_ID {
        slog::warn!(logger, "Volume label is not VOL1"; "label" => ebcdic::decode(&label.label_id));
    }

    let vtoc_start = TrackAddress::new(label.vtoc_cylinder.get(), label.vtoc_head.get());
    slog::debug!(logger, "Read volume label";
        "volser" => ebcdic::decode(&label.volser),
        "vtoc" => %vtoc_start,
        "vtoc_record" => label.vtoc_record
    );
    let vtoc_track = codec.read_track(vtoc_start.track(&geometry))?;

    let mut partitions = PartitionTable::new();
    for number in label.vtoc_record..vtoc::MAX_VTOC_RECORD {
        let record = match track::find_record(&vtoc_track, number)? {
            Some(record) => record,
            None => break,
        };
        if record.data.first() != Some(&vtoc::FORMAT1_ID) {
            continue;
        }
        let result = Format1::read(record.data)
            .ok_or_else(|| format!("{} byte DSCB is truncated", record.data.len()))
            .and_then(|dscb| partition_from_dscb(record.key, &dscb, &geometry));
        match result {
            Ok(partition) => {
                slog::debug!(logger, "Found dataset";
                    "name" => &partition.name,
                    "begin" => %partition.begin,
                    "end" => %partition.end
                );
                if let Some(previous) = partitions.insert(partition.name.clone(), partition) {
                    slog::warn!(logger, "Duplicate dataset name, using the later DSCB"; "name" => previous.name);
                }
            }
            Err(reason) => {
                slog::warn!(logger, "Skipping DSCB"; "record" => number, "reason" => reason);
            }
        }
    }
    slog::info!(logger, "Read VTOC"; "partitions" => partitions.len());
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::FromBytes;

    fn geometry() -> Geometry {
        Geometry::new(15, 100).unwrap()
    }

    fn dscb(extent: Extent) -> Format1 {
        let mut dscb = Format1::new_zeroed();
        dscb.format_id = vtoc::FORMAT1_ID;
        dscb.volser = ebcdic::encode_padded("VOL001");
        dscb.creation_date = Date::new(124, 32);
        dscb.dataset_organization.set(0x4000);
        dscb.record_format = 0x90;
        dscb.block_length.set(4096);
        dscb.extent_count = 1;
        dscb.extents[0] = extent;
        dscb
    }

    #[test]
    fn partition_size() {
        let partition = partition_from_dscb(
            &ebcdic::encode_padded::<44>("PART1"),
            &dscb(Extent::new(Extent::DATA, 0, (0, 0), (9, 11))),
            &Geometry::new(12, 10).unwrap(),
        )
        .unwrap();
        assert_eq!(partition.name, "PART1");
        let geometry = Geometry::new(12, 10).unwrap();
        assert_eq!(partition.tracks(&geometry), 120);
        assert_eq!(partition.size(&geometry), 10 * 12 * 12 * 4096);
    }

    #[test]
    fn attributes() {
        let partition = partition_from_dscb(
            &ebcdic::encode_padded::<44>("SYS1.LINUX.ROOT"),
            &dscb(Extent::new(Extent::DATA, 0, (1, 0), (1, 14))),
            &geometry(),
        )
        .unwrap();
        let attributes = &partition.attributes;
        assert_eq!(attributes.volser, "VOL001");
        assert_eq!(attributes.created, NaiveDate::from_ymd_opt(2024, 2, 1));
        assert_eq!(attributes.expires, None);
        assert_eq!(attributes.organization.to_string(), "PS");
        assert_eq!(attributes.record_format.to_string(), "FB");
        assert_eq!(attributes.block_size, 4096);
        assert_eq!(partition.first_track(&geometry()), 15);
        assert_eq!(partition.last_track(&geometry()), 29);
    }

    #[test]
    fn bad_extents() {
        let name = ebcdic::encode_padded::<44>("BAD");
        for extent in &[
            Extent::new(0, 0, (1, 0), (2, 0)),
            Extent::new(Extent::DATA, 0, (2, 0), (1, 0)),
            Extent::new(Extent::DATA, 0, (1, 0), (1, 15)),
        ] {
            assert!(partition_from_dscb(&name, &dscb(*extent), &geometry()).is_err());
        }
        let blank = [ebcdic::SPACE; 44];
        let extent = Extent::new(Extent::DATA, 0, (1, 0), (1, 1));
        assert!(partition_from_dscb(&blank, &dscb(extent), &geometry()).is_err());
    }

    #[test]
    fn dates() {
        let date = NaiveDate::from_ymd_opt(1999, 12, 31).unwrap();
        let encoded = encode_date(date).unwrap();
        assert_eq!(encoded, Date::new(99, 365));
        assert_eq!(decode_date(encoded), Some(date));
        assert_eq!(decode_date(Date::default()), None);
        assert!(encode_date(NaiveDate::from_ymd_opt(1899, 1, 1).unwrap()).is_none());
    }
}
