//! Creating new, empty compressed CKD images

use crate::address::{Geometry, Level1Table};
use crate::alloc::FreeSpace;
use crate::compression::{self, Codecs, Kind};
use crate::config::Config;
use crate::errors::*;
use crate::image::Image;
use crate::storage::Storage;
use crate::track::{TrackBuilder, TrackCodec};
use crate::vtoc::{self, TrackAddress};
use chrono::{NaiveDate, Utc};
use positioned_io::WriteAt;
use repr::device::{self, DeviceHeader};
use repr::free_space::{self, Slot, TAG};
use repr::header::{self, CompressedHeader, Options};
use repr::level::{LEVEL1_ENTRY_SIZE, LEVEL1_OFFSET};
use repr::track::{null_format, MAX_TRACK_SIZE};
use repr::vtoc::{
    Extent, Format1, VolumeLabel, DSCB_DATA_SIZE, FORMAT1_ID, FORMAT4_ID, FORMAT4_KEY,
    VOLUME_LABEL_ID, VOLUME_LABEL_RECORD,
};
use repr::{ebcdic, Endian};
use slog::Logger;
use std::fs::OpenOptions;
use std::path::Path;
use zerocopy::{AsBytes, FromBytes};

/// Tracks per cylinder of a 3390
pub const DEFAULT_HEADS: u32 = 15;
/// Track size of a 3390, rounded up as emulators do
pub const DEFAULT_TRACK_SIZE: u32 = 56832;
pub const DEFAULT_DEVICE_TYPE: u8 = 0x90;
pub const DEFAULT_LEVEL2_SIZE: u32 = 256;
pub const DEFAULT_FREE_SPACE_SLOTS: u32 = 1024;

const IPL1_DATA_SIZE: usize = 24;
const IPL2_DATA_SIZE: usize = 144;

#[derive(Debug, Clone)]
struct Dataset {
    name: String,
    begin: TrackAddress,
    end: TrackAddress,
}

#[derive(Debug)]
pub struct ImageBuilder {
    pub cylinders: u32,
    pub heads: u32,
    pub track_size: u32,
    pub device_type: u8,
    pub volser: String,
    pub endian: Endian,
    pub null_format: u8,
    pub compressor: Kind,
    pub compression_parameter: i16,
    pub level2_size: u32,
    pub free_space_slots: u32,
    /// Track holding the VTOC. Datasets are placed after it
    pub vtoc: TrackAddress,
    pub config: Config,

    creation_date: NaiveDate,
    datasets: Vec<Dataset>,
    logger: Option<Logger>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        ImageBuilder {
            cylinders: 10,
            heads: DEFAULT_HEADS,
            track_size: DEFAULT_TRACK_SIZE,
            device_type: DEFAULT_DEVICE_TYPE,
            volser: "VOL001".to_string(),
            endian: Endian::Little,
            null_format: null_format::LINUX,
            compressor: Kind::default(),
            compression_parameter: -1,
            level2_size: DEFAULT_LEVEL2_SIZE,
            free_space_slots: DEFAULT_FREE_SPACE_SLOTS,
            vtoc: TrackAddress::new(0, 1),
            config: Config::default(),
            creation_date: Utc::now().date_naive(),
            datasets: Vec::new(),
            logger: None,
        }
    }
}

impl ImageBuilder {
    pub fn new(cylinders: u32) -> Self {
        Self {
            cylinders,
            ..Default::default()
        }
    }

    pub fn set_heads(&mut self, heads: u32) -> &mut Self {
        self.heads = heads;
        self
    }

    pub fn set_volser<S: Into<String>>(&mut self, volser: S) -> &mut Self {
        self.volser = volser.into();
        self
    }

    pub fn set_endian(&mut self, endian: Endian) -> &mut Self {
        self.endian = endian;
        self
    }

    pub fn set_null_format(&mut self, format: u8) -> &mut Self {
        self.null_format = format;
        self
    }

    pub fn set_compressor(&mut self, kind: Kind) -> &mut Self {
        self.compressor = kind;
        self
    }

    /// Level for compressed tracks, at most 9
    pub fn set_compression_level(&mut self, level: u8) -> &mut Self {
        self.compression_parameter = i16::from(level.min(9));
        self
    }

    pub fn set_level2_size(&mut self, entries: u32) -> &mut Self {
        self.level2_size = entries;
        self
    }

    pub fn set_free_space_slots(&mut self, slots: u32) -> &mut Self {
        self.free_space_slots = slots;
        self
    }

    pub fn set_creation_date(&mut self, date: NaiveDate) -> &mut Self {
        self.creation_date = date;
        self
    }

    pub fn set_config(&mut self, config: Config) -> &mut Self {
        self.config = config;
        self
    }

    pub fn set_logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = Some(logger);
        self
    }

    /// Adds a dataset occupying the tracks `begin..=end`
    pub fn add_dataset<S: Into<String>>(
        &mut self,
        name: S,
        begin: TrackAddress,
        end: TrackAddress,
    ) -> &mut Self {
        self.datasets.push(Dataset {
            name: name.into(),
            begin,
            end,
        });
        self
    }

    /// Adds a dataset of whole cylinders, directly after the previous dataset
    pub fn add_dataset_cylinders<S: Into<String>>(&mut self, name: S, cylinders: u16) -> &mut Self {
        let first = match self.datasets.last() {
            Some(last) => last.end.cylinder + 1,
            None => self.vtoc.cylinder + 1,
        };
        let last_head = self.heads.saturating_sub(1) as u16;
        let begin = TrackAddress::new(first, 0);
        let end = TrackAddress::new(first + cylinders.saturating_sub(1), last_head);
        self.add_dataset(name, begin, end)
    }

    fn geometry(&self) -> Result<Geometry> {
        Geometry::new(self.heads, self.cylinders)
    }

    fn validate(&self, geometry: &Geometry) -> Result<()> {
        if self.level2_size == 0 {
            return Err(Error::format("level 2 tables need at least one entry"));
        }
        let level1_size = level1_size(geometry.tracks(), self.level2_size);
        let end = LEVEL1_OFFSET
            + level1_size * LEVEL1_ENTRY_SIZE as u64
            + Slot::offset(self.free_space_slots.max(1) as usize) as u64;
        if end > u64::from(u32::MAX) {
            return Err(Error::unsupported(format!(
                "{} cylinders of {} heads in level 2 tables of {} entries",
                self.cylinders, self.heads, self.level2_size
            )));
        }
        if self.track_size == 0 || self.track_size > MAX_TRACK_SIZE {
            return Err(Error::unsupported(format!("tracks of {} bytes", self.track_size)));
        }
        if !self.compressor.supported() {
            return Err(Error::unsupported(format!("{} compression", self.compressor)));
        }
        if self.datasets.len() > usize::from(repr::vtoc::MAX_VTOC_RECORD) - 2 {
            return Err(Error::unsupported(format!("{} datasets", self.datasets.len())));
        }
        let vtoc_track = self.vtoc.track(geometry);
        if vtoc_track == 0 || vtoc_track >= geometry.tracks() {
            return Err(Error::format(format!("VTOC at {} is not usable", self.vtoc)));
        }
        let mut used = vec![(0, 0), (vtoc_track, vtoc_track)];
        for dataset in &self.datasets {
            let begin = dataset.begin.track(geometry);
            let end = dataset.end.track(geometry);
            let heads_ok = u32::from(dataset.begin.head) < self.heads
                && u32::from(dataset.end.head) < self.heads;
            if !heads_ok || begin > end || end >= geometry.tracks() {
                return Err(Error::format(format!(
                    "dataset {} at {}..{} does not fit the device",
                    dataset.name, dataset.begin, dataset.end
                )));
            }
            if let Some(&(b, e)) = used.iter().find(|&&(b, e)| begin <= e && b <= end) {
                return Err(Error::format(format!(
                    "dataset {} overlaps tracks {}..={}",
                    dataset.name, b, e
                )));
            }
            used.push((begin, end));
        }
        Ok(())
    }

    pub fn build_path<P: AsRef<Path>>(self, path: P) -> Result<Image> {
        self._build_path(path.as_ref())
    }

    fn _build_path(mut self, path: &Path) -> Result<Image> {
        let logger = self.logger.take().unwrap_or_else(crate::default_logger);
        let path_str = path.display().to_string();
        self.logger = Some(logger.new(slog::o!("file" => path_str)));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        self.build(file)
    }

    /// Formats `storage`, which should be empty, and opens the result
    pub fn build<S: Storage>(self, mut storage: S) -> Result<Image<S>> {
        let geometry = self.geometry()?;
        self.validate(&geometry)?;
        let logger = self.logger.clone().unwrap_or_else(crate::default_logger);

        let device = self.device_header();
        let mut header = self.compressed_header(&geometry);
        storage.write_all_at(0, &device.serialize())?;
        storage.write_all_at(LEVEL1_OFFSET, &vec![0; header.level1_size as usize * LEVEL1_ENTRY_SIZE])?;
        self.write_free_space_directory(&mut storage, &header)?;
        storage.write_all_at(header::OFFSET, &header.serialize(self.endian))?;

        let mut level1 = Level1Table::load(&storage, &header, self.endian)?;
        let mut free_space = FreeSpace::new(self.config.slot_fit, self.endian, logger.clone());
        let mut codecs = Codecs::new(compression::level_from_parameter(header.compression_parameter));
        {
            let mut codec = TrackCodec {
                storage: &mut storage,
                header: &mut header,
                level1: &mut level1,
                free_space: &mut free_space,
                codecs: &mut codecs,
                geometry,
                track_size: self.track_size as usize,
                logger: &logger,
            };
            codec.write_track(0, &self.volume_label_track()?)?;
            codec.write_track(self.vtoc.track(&geometry), &self.vtoc_track()?)?;
        }
        storage.write_all_at(header::OFFSET, &header.serialize(self.endian))?;
        storage.sync()?;
        slog::info!(logger, "Formatted image";
            "cylinders" => self.cylinders,
            "heads" => self.heads,
            "volser" => &self.volser,
            "datasets" => self.datasets.len()
        );

        Image::with_config(storage, self.config, logger)
    }

    fn device_header(&self) -> DeviceHeader {
        DeviceHeader {
            device_id: device::ID_COMPRESSED,
            heads: self.heads,
            track_size: self.track_size,
            device_type: self.device_type,
            file_sequence: 0,
            highest_cylinder: 0,
            reserved: [0; device::RESERVED_SIZE],
        }
    }

    fn compressed_header(&self, geometry: &Geometry) -> CompressedHeader {
        let level1_size = level1_size(geometry.tracks(), self.level2_size) as u32;
        let mut options = Options::NO_FUDGE;
        if self.endian == Endian::Big {
            options |= Options::BIG_ENDIAN;
        }
        let directory = self.free_space_directory_position(level1_size);
        let end = directory + self.free_space_directory_len();
        CompressedHeader {
            options: options.bits(),
            level1_size,
            level2_size: self.level2_size,
            file_size: end,
            file_used: end,
            free_space_position: directory,
            total_free_space: 0,
            largest_free_space: 0,
            free_space_count: 1,
            cylinders: self.cylinders,
            null_track_format: self.null_format,
            compression: self.compressor.id(),
            compression_parameter: self.compression_parameter,
            ..CompressedHeader::default()
        }
    }

    fn free_space_directory_position(&self, level1_size: u32) -> u32 {
        LEVEL1_OFFSET as u32 + level1_size * LEVEL1_ENTRY_SIZE as u32
    }

    fn free_space_directory_len(&self) -> u32 {
        Slot::offset(self.free_space_slots.max(1) as usize) as u32
    }

    /// The directory starts out with only the slot describing itself
    fn write_free_space_directory<S: Storage>(&self, storage: &mut S, header: &CompressedHeader) -> Result<()> {
        let length = self.free_space_directory_len();
        let mut bytes = vec![0; length as usize];
        bytes[..TAG.len()].copy_from_slice(&TAG);
        let own = Slot {
            position: header.free_space_position,
            length,
        };
        bytes[Slot::offset(0)..Slot::offset(1)].copy_from_slice(&own.serialize(self.endian));
        debug_assert!(free_space::capacity(length) >= 1);
        storage.write_all_at(u64::from(header.free_space_position), &bytes)?;
        Ok(())
    }

    fn volume_label_track(&self) -> Result<Vec<u8>> {
        let mut label = VolumeLabel::new_zeroed();
        label.label_id = VOLUME_LABEL_ID;
        label.volser = ebcdic::encode_padded(&self.volser);
        label.security = 0xC0;
        label.vtoc_cylinder.set(self.vtoc.cylinder);
        label.vtoc_head.set(self.vtoc.head);
        label.vtoc_record = 1;
        label.owner = ebcdic::encode_padded("");

        let mut track = TrackBuilder::new(0, 0);
        track
            .record(1, &ebcdic::encode("IPL1"), &[0; IPL1_DATA_SIZE])?
            .record(2, &ebcdic::encode("IPL2"), &[0; IPL2_DATA_SIZE])?
            .record(VOLUME_LABEL_RECORD, &VOLUME_LABEL_ID, label.as_bytes())?;
        Ok(track.finish())
    }

    fn vtoc_track(&self) -> Result<Vec<u8>> {
        let mut format4 = [0; DSCB_DATA_SIZE];
        format4[0] = FORMAT4_ID;

        let mut track = TrackBuilder::new(self.vtoc.cylinder, self.vtoc.head);
        track.record(1, &FORMAT4_KEY, &format4)?;
        for (i, dataset) in self.datasets.iter().enumerate() {
            let dscb = self.format1(dataset);
            let key: [u8; repr::vtoc::DSCB_KEY_SIZE] = ebcdic::encode_padded(&dataset.name);
            track.record(i as u8 + 2, &key, dscb.as_bytes())?;
        }
        Ok(track.finish())
    }

    fn format1(&self, dataset: &Dataset) -> Format1 {
        let mut dscb = Format1::new_zeroed();
        dscb.format_id = FORMAT1_ID;
        dscb.volser = ebcdic::encode_padded(&self.volser);
        dscb.volume_sequence.set(1);
        dscb.creation_date = vtoc::encode_date(self.creation_date).unwrap_or_default();
        dscb.extent_count = 1;
        dscb.dataset_organization.set(vtoc::Organization::PHYSICAL_SEQUENTIAL.bits());
        dscb.record_format = vtoc::RecordFormat::FIXED.bits();
        dscb.block_length.set(repr::SECTOR_SIZE as u16);
        dscb.logical_record_length.set(repr::SECTOR_SIZE as u16);
        let whole_cylinders = dataset.begin.head == 0 && u32::from(dataset.end.head) + 1 == self.heads;
        let kind = if whole_cylinders {
            Extent::CYLINDER_BOUNDARY
        } else {
            Extent::DATA
        };
        dscb.extents[0] = Extent::new(
            kind,
            0,
            (dataset.begin.cylinder, dataset.begin.head),
            (dataset.end.cylinder, dataset.end.head),
        );
        dscb
    }
}

/// Level 1 entries needed to cover `tracks`
fn level1_size(tracks: u32, level2_size: u32) -> u64 {
    (u64::from(tracks) + u64::from(level2_size) - 1) / u64::from(level2_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn layout() {
        let mut builder = ImageBuilder::new(4);
        builder.set_level2_size(16).set_free_space_slots(8);
        let geometry = builder.geometry().unwrap();
        let header = builder.compressed_header(&geometry);
        assert_eq!(header.level1_size, 4);
        assert_eq!(header.free_space_position, 1024 + 16);
        assert_eq!(header.file_size, 1024 + 16 + 8 + 64);
        assert_eq!(header.free_space_count, 1);
        assert!(header.options().contains(Options::NO_FUDGE));
        assert!(!header.options().contains(Options::BIG_ENDIAN));
    }

    #[test]
    fn dataset_placement() {
        let mut builder = ImageBuilder::new(10);
        builder
            .add_dataset_cylinders("A", 2)
            .add_dataset_cylinders("B", 3);
        let geometry = builder.geometry().unwrap();
        builder.validate(&geometry).unwrap();
        assert_eq!(builder.datasets[0].begin, TrackAddress::new(1, 0));
        assert_eq!(builder.datasets[0].end, TrackAddress::new(2, 14));
        assert_eq!(builder.datasets[1].begin, TrackAddress::new(3, 0));
        assert_eq!(builder.datasets[1].end, TrackAddress::new(5, 14));

        builder.add_dataset_cylinders("C", 5);
        assert!(builder.validate(&geometry).is_err());
    }

    #[test]
    fn overlapping_datasets() {
        let mut builder = ImageBuilder::new(10);
        builder
            .add_dataset("A", TrackAddress::new(1, 0), TrackAddress::new(1, 5))
            .add_dataset("B", TrackAddress::new(1, 5), TrackAddress::new(1, 9));
        let geometry = builder.geometry().unwrap();
        assert_eq!(builder.validate(&geometry).unwrap_err().kind(), ErrorKind::Format);

        let mut builder = ImageBuilder::new(10);
        builder.add_dataset("VTOC", TrackAddress::new(0, 0), TrackAddress::new(0, 3));
        assert!(builder.validate(&geometry).is_err());
    }

    #[test]
    fn builds_and_opens() {
        let mut builder = ImageBuilder::new(5);
        builder
            .set_logger(logger())
            .set_volser("LNX001")
            .set_creation_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .add_dataset_cylinders("LINUX.V0A80.PART0001.NATIVE", 2);
        let image = builder.build(tempfile::tempfile().unwrap()).unwrap();

        let partition = image.partition("LINUX.V0A80.PART0001.NATIVE").unwrap();
        assert_eq!(partition.begin, TrackAddress::new(1, 0));
        assert_eq!(partition.attributes.volser, "LNX001");
        assert_eq!(partition.attributes.created, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(image.partition_size("LINUX.V0A80.PART0001.NATIVE").unwrap(), 30 * 12 * 4096);
        assert_eq!(image.header().free_space_count, 1);
        assert!(image.header().file_size > image.header().free_space_position);
    }

    #[test]
    fn device_limits() {
        let mut builder = ImageBuilder::new(3339);
        builder.set_logger(logger()).set_heads(0x0010_0000);
        let err = builder.build(tempfile::tempfile().unwrap()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);

        // Every track needs a level 1 entry, which overflows the addressable file
        let mut builder = ImageBuilder::new(0xFFFF);
        builder.set_heads(0xFFFF).set_level2_size(1);
        let geometry = builder.geometry().unwrap();
        assert_eq!(builder.validate(&geometry).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut builder = ImageBuilder::new(4);
        builder.track_size = 0x1_0000;
        let geometry = builder.geometry().unwrap();
        assert_eq!(builder.validate(&geometry).unwrap_err().kind(), ErrorKind::Unsupported);

        let mut builder = ImageBuilder::new(4);
        builder.set_compressor(Kind::from_name("bzip2"));
        assert_eq!(builder.validate(&geometry).unwrap_err().kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn uncompressed_images() {
        let mut builder = ImageBuilder::new(3);
        builder
            .set_logger(logger())
            .set_compressor(Kind::from_name("none"))
            .set_compression_level(12)
            .add_dataset_cylinders("RAW", 1);
        let mut image = builder.build(tempfile::tempfile().unwrap()).unwrap();
        assert_eq!(image.header().compression, Kind::None.id());
        assert_eq!(image.header().compression_parameter, 9);

        let used = image.header().file_used;
        image.write("RAW", 4096, b"stored as is").unwrap();
        assert_eq!(image.read("RAW", 4096, 12).unwrap(), b"stored as is");
        // A stored track takes its full raw size
        assert!(image.header().file_used - used > 12 * 4096);
    }
}
