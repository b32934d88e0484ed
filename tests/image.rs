use cckd::{Endian, ErrorKind, Image, ImageBuilder, TrackAddress};
use chrono::NaiveDate;
use positioned_io::WriteAt;
use slog::Logger;
use std::fs::{File, OpenOptions};
use std::path::Path;

const PART: &str = "LINUX.V0A80.PART0001.NATIVE";
const TRACK_BYTES: u64 = 12 * 4096;

fn logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

fn builder(cylinders: u32) -> ImageBuilder {
    let mut builder = ImageBuilder::new(cylinders);
    builder
        .set_logger(logger())
        .set_creation_date(NaiveDate::from_ymd_opt(2023, 11, 5).unwrap());
    builder
}

fn image_with(builder: &mut ImageBuilder) -> Image<File> {
    let builder = std::mem::take(builder);
    builder.build(tempfile::tempfile().unwrap()).unwrap()
}

/// Bytes which deflate cannot shrink
fn noise(len: usize, mut seed: u32) -> Vec<u8> {
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            seed as u8
        })
        .collect()
}

#[test]
fn fresh_partitions_read_as_zeroes() {
    let mut builder = builder(4);
    builder.add_dataset_cylinders(PART, 2);
    let mut image = image_with(&mut builder);

    assert_eq!(image.partitions().len(), 1);
    let size = image.partition_size(PART).unwrap();
    assert_eq!(size, 30 * TRACK_BYTES);
    let data = image.read(PART, size - 8192, 8192).unwrap();
    assert!(data.iter().all(|&b| b == 0));
}

#[test]
fn partition_size_follows_the_extent() {
    let mut builder = builder(12);
    builder
        .set_heads(12)
        .add_dataset("PART1", TrackAddress::new(1, 0), TrackAddress::new(10, 11));
    let image = image_with(&mut builder);
    assert_eq!(image.partition_size("PART1").unwrap(), 10 * 12 * 12 * 4096);

    let partition = image.partition("PART1").unwrap();
    assert_eq!(partition.tracks(&image.geometry()), 120);
    assert_eq!(partition.attributes.volser, "VOL001");
    assert_eq!(partition.attributes.created, NaiveDate::from_ymd_opt(2023, 11, 5));
}

#[test]
fn write_then_read() {
    let mut builder = builder(4);
    builder
        .add_dataset_cylinders("FIRST", 1)
        .add_dataset_cylinders("SECOND", 1);
    let mut image = image_with(&mut builder);

    // Crosses sector and track boundaries, starting and ending mid sector
    let offset = TRACK_BYTES - 100;
    let payload = noise(3 * 4096 + 7, 0x1234_5678);
    image.write("FIRST", offset, &payload).unwrap();
    assert_eq!(image.read("FIRST", offset, payload.len() as u32).unwrap(), payload);

    // Neighbouring bytes and the other dataset are untouched
    let before = image.read("FIRST", offset - 10, 10).unwrap();
    assert_eq!(before, vec![0; 10]);
    let after = image.read("FIRST", offset + payload.len() as u64, 10).unwrap();
    assert_eq!(after, vec![0; 10]);
    let other = image.read("SECOND", 0, 2 * TRACK_BYTES as u32).unwrap();
    assert!(other.iter().all(|&b| b == 0));

    image.write("FIRST", offset + 50, b"patched").unwrap();
    let data = image.read("FIRST", offset, 64).unwrap();
    assert_eq!(&data[..50], &payload[..50]);
    assert_eq!(&data[50..57], b"patched");
    assert_eq!(&data[57..], &payload[57..64]);
}

#[test]
fn errors_for_unknown_names_and_ranges() {
    let mut builder = builder(3);
    builder.add_dataset_cylinders(PART, 1);
    let mut image = image_with(&mut builder);
    let size = image.partition_size(PART).unwrap();

    assert_eq!(image.partition_size("NOPE").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(image.read("NOPE", 0, 1).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(image.read(PART, size, 1).unwrap_err().kind(), ErrorKind::Range);
    assert_eq!(image.read(PART, size - 1, 2).unwrap_err().kind(), ErrorKind::Range);
    assert_eq!(
        image.write(PART, size - 4, &[1; 8]).unwrap_err().kind(),
        ErrorKind::Range
    );
    assert!(!image.is_poisoned());
    assert_eq!(image.read(PART, size - 1, 1).unwrap(), vec![0]);
}

#[test]
fn released_space_is_reused() {
    let mut builder = builder(4);
    builder.add_dataset_cylinders(PART, 2);
    let mut image = image_with(&mut builder);

    // Half noise, half zeroes, then all noise: the track outgrows its region and moves
    let mut half = noise(6 * 4096, 7);
    half.resize(TRACK_BYTES as usize, 0);
    image.write(PART, 0, &half).unwrap();
    let grown = noise(TRACK_BYTES as usize, 99);
    image.write(PART, 0, &grown).unwrap();

    let header = *image.header();
    assert_eq!(header.free_space_count, 2);
    assert!(header.total_free_space > 0);
    assert_eq!(header.largest_free_space, header.total_free_space);

    // A mostly empty track compresses well below the released region
    image.write(PART, 5 * TRACK_BYTES, b"small").unwrap();
    let after = *image.header();
    assert_eq!(after.file_size, header.file_size);
    assert!(after.total_free_space < header.total_free_space);
    assert_eq!(after.free_space_count, 2);

    assert_eq!(image.read(PART, 0, TRACK_BYTES as u32).unwrap(), grown);
    assert_eq!(image.read(PART, 5 * TRACK_BYTES, 5).unwrap(), b"small");
}

#[test]
fn full_directory_poisons_the_image() {
    let mut builder = builder(3);
    builder.set_free_space_slots(1).add_dataset_cylinders(PART, 1);
    let mut image = image_with(&mut builder);

    image.write(PART, 0, b"tiny").unwrap();
    let err = image.write(PART, 0, &noise(TRACK_BYTES as usize, 3)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    assert!(image.is_poisoned());

    let err = image.write(PART, TRACK_BYTES, b"later").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);
    // The failed write never replaced the stored track
    assert_eq!(image.read(PART, 0, 4).unwrap(), b"tiny");
}

#[test]
fn big_endian_images() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.cckd");
    let mut builder = builder(3);
    builder.set_endian(Endian::Big).add_dataset_cylinders(PART, 1);
    let mut image = builder.build_path(&path).unwrap();
    assert_eq!(image.endian(), Endian::Big);
    image.write(PART, 4096, b"big endian").unwrap();
    image.close().unwrap();

    let mut image = Image::open_with_logger(&path, logger()).unwrap();
    assert_eq!(image.endian(), Endian::Big);
    assert_eq!(image.read(PART, 4096, 10).unwrap(), b"big endian");
}

#[test]
fn changes_persist_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.cckd");
    let mut builder = builder(5);
    builder
        .add_dataset_cylinders("A", 1)
        .add_dataset_cylinders("B", 2);
    let mut image = builder.build_path(&path).unwrap();
    let payload = noise(20_000, 42);
    image.write("B", 123_456, &payload).unwrap();
    let header = *image.header();
    image.close().unwrap();

    let mut image = Image::open_with_logger(&path, logger()).unwrap();
    assert_eq!(*image.header(), header);
    let names: Vec<_> = image.partitions().keys().cloned().collect();
    assert_eq!(names, ["A", "B"]);
    assert_eq!(image.read("B", 123_456, payload.len() as u32).unwrap(), payload);
}

#[test]
fn dropping_syncs_the_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dropped.cckd");
    let mut builder = builder(3);
    builder.add_dataset_cylinders(PART, 1);
    let mut image = builder.build_path(&path).unwrap();
    image.write(PART, 0, &noise(10_000, 5)).unwrap();
    let file_size = image.header().file_size;
    drop(image);

    let image = Image::open_with_logger(&path, logger()).unwrap();
    assert_eq!(image.header().file_size, file_size);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), u64::from(file_size));
}

#[test]
fn empty_null_tracks_have_no_sectors() {
    let mut builder = builder(3);
    builder
        .set_null_format(0)
        .add_dataset_cylinders(PART, 1);
    let mut image = image_with(&mut builder);
    assert_eq!(image.read(PART, 0, 16).unwrap_err().kind(), ErrorKind::Format);

    let first = image.partition(PART).unwrap().first_track(&image.geometry());
    let track = image.read_track(first).unwrap();
    // R0 and the end marker
    assert_eq!(track.len(), 8 + 8 + 8);
}

/// Copies the image at `path`, overwrites `bytes` at `offset` of the copy and opens it
fn open_patched(path: &Path, offset: u64, bytes: &[u8]) -> cckd::Result<Image> {
    let patched = path.with_extension("patched");
    std::fs::copy(path, &patched).unwrap();
    let mut file = OpenOptions::new().write(true).open(&patched).unwrap();
    file.write_all_at(offset, bytes).unwrap();
    drop(file);
    Image::open_with_logger(&patched, logger())
}

#[test]
fn corrupt_headers_are_format_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("disk.cckd");
    let mut builder = builder(3);
    builder.add_dataset_cylinders(PART, 1);
    let image = builder.build_path(&path).unwrap();
    let header = *image.header();
    image.close().unwrap();
    Image::open_with_logger(&path, logger()).unwrap();

    let patches: [(&str, u64, u32); 5] = [
        ("heads", 8, 0x0010_0000),
        ("track size", 12, 0x4000_0000),
        ("level 1 entries", 512 + 4, 0x4000_0000),
        ("cylinders", 512 + 40, 0x0010_0000),
        // Track images lie past the directory, beyond this end of file
        ("file size", 512 + 12, header.free_space_position),
    ];
    for &(field, offset, value) in &patches {
        match open_patched(&path, offset, &value.to_le_bytes()) {
            Err(e) => assert_eq!(e.kind(), ErrorKind::Format, "{}: {}", field, e),
            Ok(_) => panic!("opened an image with a corrupt {}", field),
        }
    }
}
