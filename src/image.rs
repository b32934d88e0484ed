use crate::address::{Geometry, Level1Table};
use crate::alloc::FreeSpace;
use crate::compression::{self, Codecs};
use crate::config::{ByteOrderDetection, Config};
use crate::errors::*;
use crate::partition;
use crate::storage::Storage;
use crate::track::TrackCodec;
use crate::vtoc::{self, Partition, PartitionTable};
use positioned_io::{ReadAt, WriteAt};
use repr::device::{self, DeviceHeader};
use repr::header::{self, CompressedHeader, Options};
use repr::track::MAX_TRACK_SIZE;
use repr::Endian;
use slog::Logger;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// An open compressed CKD image
///
/// Header counters changed by writes reach the disk on [`sync`](#method.sync) or
/// [`close`](#method.close). Dropping a modified image syncs it on a best effort basis.
pub struct Image<S: Storage = File> {
    storage: S,
    device: DeviceHeader,
    header: CompressedHeader,
    endian: Endian,
    geometry: Geometry,
    level1: Level1Table,
    free_space: FreeSpace,
    codecs: Codecs,
    partitions: PartitionTable,
    config: Config,
    /// Set after an allocation failure; every later write is refused
    poisoned: bool,
    dirty: bool,
    closed: bool,
    logger: Logger,
}

/// Byte order of the fields following the options byte of the compressed header
pub fn detect_endian(options: u8, detection: ByteOrderDetection) -> Endian {
    let big_endian = Options::BIG_ENDIAN.bits();
    let is_big = match detection {
        ByteOrderDetection::OptionsBit => options & big_endian != 0,
        #[allow(clippy::bad_bit_mask)]
        ByteOrderDetection::LegacyEquality => options & big_endian == 1,
    };
    if is_big {
        Endian::Big
    } else {
        Endian::Little
    }
}

impl Image<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_logger(path, crate::default_logger())
    }

    pub fn open_with_logger<P: AsRef<Path>>(path: P, logger: Logger) -> Result<Self> {
        Self::_open(path.as_ref(), Config::default(), logger)
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config, logger: Logger) -> Result<Self> {
        Self::_open(path.as_ref(), config, logger)
    }

    fn _open(path: &Path, config: Config, logger: Logger) -> Result<Self> {
        let path_str = path.display().to_string();
        let logger = logger.new(slog::o!("file" => path_str));
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::with_config(file, config, logger)
    }
}

impl<S: Storage> Image<S> {
    pub fn new(storage: S) -> Result<Self> {
        Self::with_logger(storage, crate::default_logger())
    }

    pub fn with_logger(storage: S, logger: Logger) -> Result<Self> {
        Self::with_config(storage, Config::default(), logger)
    }

    pub fn with_config(storage: S, config: Config, logger: Logger) -> Result<Self> {
        let mut headers = [0; device::SIZE + header::SIZE];
        storage.read_exact_at(0, &mut headers).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::format("image is shorter than its headers"),
            _ => Error::Io(e),
        })?;

        let device = DeviceHeader::parse(&headers[..device::SIZE])
            .ok_or_else(|| Error::format("device header is truncated"))?;
        if !device.is_compressed() {
            return Err(Error::format(format!(
                "device id {:?} is not a compressed CKD image",
                device.device_id_lossy()
            )));
        }
        let compressed = &headers[device::SIZE..];
        let endian = detect_endian(compressed[3], config.byte_order);
        let header = CompressedHeader::parse(compressed, endian)
            .ok_or_else(|| Error::format("compressed device header is truncated"))?;
        log_headers(&logger, &device, &header, endian);

        let geometry = Geometry::new(device.heads, header.cylinders)?;
        if device.track_size == 0 || device.track_size > MAX_TRACK_SIZE {
            return Err(Error::format(format!(
                "track size of {} bytes is out of range",
                device.track_size
            )));
        }
        let level1 = Level1Table::load(&storage, &header, endian)?;
        let free_space = FreeSpace::new(config.slot_fit, endian, logger.clone());
        let codecs = Codecs::new(compression::level_from_parameter(header.compression_parameter));

        let mut image = Image {
            storage,
            device,
            header,
            endian,
            geometry,
            level1,
            free_space,
            codecs,
            partitions: PartitionTable::new(),
            config,
            poisoned: false,
            dirty: false,
            closed: false,
            logger,
        };
        let logger = image.logger.clone();
        image.partitions = vtoc::read_partitions(&mut image.track_codec(), &logger)?;
        Ok(image)
    }

    fn track_codec(&mut self) -> TrackCodec<'_, S> {
        TrackCodec {
            storage: &mut self.storage,
            header: &mut self.header,
            level1: &mut self.level1,
            free_space: &mut self.free_space,
            codecs: &mut self.codecs,
            geometry: self.geometry,
            track_size: self.device.track_size as usize,
            logger: &self.logger,
        }
    }

    pub fn partitions(&self) -> &PartitionTable {
        &self.partitions
    }

    pub fn partition(&self, name: &str) -> Result<&Partition> {
        self.partitions
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    pub fn partition_size(&self, name: &str) -> Result<u64> {
        Ok(self.partition(name)?.size(&self.geometry))
    }

    pub fn read(&mut self, name: &str, offset: u64, length: u32) -> Result<Vec<u8>> {
        let partition = self.partition(name)?.clone();
        partition::read(&mut self.track_codec(), &partition, offset, length)
    }

    pub fn write(&mut self, name: &str, offset: u64, bytes: &[u8]) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        let partition = self.partition(name)?.clone();
        self.dirty = true;
        let result = partition::write(&mut self.track_codec(), &partition, offset, bytes);
        if let Err(e) = &result {
            if e.kind() == ErrorKind::Allocation {
                slog::error!(self.logger, "Refusing further writes"; "error" => %e, "partition" => name);
                self.poisoned = true;
            }
        }
        result
    }

    /// Reads a whole decompressed track, without its track header
    pub fn read_track(&mut self, track: u32) -> Result<Vec<u8>> {
        self.track_codec().read_track(track)
    }

    /// Writes the compressed header and flushes the storage
    pub fn sync(&mut self) -> Result<()> {
        let bytes = self.header.serialize(self.endian);
        self.storage.write_all_at(header::OFFSET, &bytes)?;
        self.storage.sync()?;
        self.dirty = false;
        slog::debug!(self.logger, "Synced image";
            "file_size" => self.header.file_size,
            "file_used" => self.header.file_used,
            "free_space_count" => self.header.free_space_count
        );
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        let result = self.sync();
        self.closed = true;
        result
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn device_header(&self) -> &DeviceHeader {
        &self.device
    }

    pub fn header(&self) -> &CompressedHeader {
        &self.header
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }
}

impl<S: Storage> Drop for Image<S> {
    fn drop(&mut self) {
        if self.closed || !self.dirty || !self.config.sync_on_drop {
            return;
        }
        if let Err(e) = self.sync() {
            slog::warn!(self.logger, "Unable to sync image on drop"; "error" => %e);
        }
    }
}

impl<S: Storage> std::fmt::Debug for Image<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("device", &self.device)
            .field("header", &self.header)
            .field("endian", &self.endian)
            .field("partitions", &self.partitions.keys().collect::<Vec<_>>())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

fn log_headers(logger: &Logger, device: &DeviceHeader, header: &CompressedHeader, endian: Endian) {
    slog::debug!(logger, "Read device header";
        "device_id" => device.device_id_lossy(),
        "heads" => device.heads,
        "track_size" => device.track_size,
        "device_type" => device.device_type,
        "file_sequence" => device.file_sequence,
        "highest_cylinder" => device.highest_cylinder
    );
    slog::debug!(logger, "Read compressed header";
        "endian" => ?endian,
        "version" => header.version,
        "release" => header.release,
        "mod_level" => header.mod_level,
        "options" => ?header.options(),
        "level1_size" => header.level1_size,
        "level2_size" => header.level2_size,
        "file_size" => header.file_size,
        "file_used" => header.file_used,
        "free_space_position" => header.free_space_position,
        "total_free_space" => header.total_free_space,
        "largest_free_space" => header.largest_free_space,
        "free_space_count" => header.free_space_count,
        "cylinders" => header.cylinders,
        "null_track_format" => header.null_track_format,
        "compression" => header.compression,
        "compression_parameter" => header.compression_parameter
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_order_detection() {
        let options = Options::BIG_ENDIAN.bits() | Options::NO_FUDGE.bits();
        assert_eq!(detect_endian(options, ByteOrderDetection::OptionsBit), Endian::Big);
        assert_eq!(detect_endian(0x01, ByteOrderDetection::OptionsBit), Endian::Little);
        assert_eq!(
            detect_endian(options, ByteOrderDetection::LegacyEquality),
            Endian::Little
        );
    }

    #[test]
    fn rejects_plain_images() {
        let mut file = tempfile::tempfile().unwrap();
        let mut headers = [0u8; 1024];
        headers[..8].copy_from_slice(&device::ID_PLAIN);
        headers[8] = 15;
        file.write_all_at(0, &headers).unwrap();
        let err = Image::new(file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn rejects_short_files() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all_at(0, &device::ID_COMPRESSED).unwrap();
        let err = Image::new(file).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }
}
