use flate2::{FlushCompress, FlushDecompress};
use std::io;

/// Zlib streams (deflate with the two byte zlib header and adler32 trailer)
#[derive(Debug)]
pub struct Zlib {
    level: u32,
    decompressor: flate2::Decompress,
    compressor: flate2::Compress,
}

impl Default for Zlib {
    fn default() -> Self {
        Self::with_level(super::DEFAULT_LEVEL)
    }
}

impl Zlib {
    pub fn with_level(level: u32) -> Self {
        let level = level.min(9);
        Self {
            level,
            decompressor: flate2::Decompress::new(true),
            compressor: flate2::Compress::new(flate2::Compression::new(level), true),
        }
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    fn decompressor(&mut self) -> &mut flate2::Decompress {
        let decompressor = &mut self.decompressor;
        decompressor.reset(true);
        decompressor
    }

    fn compressor(&mut self) -> &mut flate2::Compress {
        let compressor = &mut self.compressor;
        compressor.reset();
        compressor
    }
}

impl super::Compressor for Zlib {
    fn compress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        let compressor = self.compressor();
        loop {
            let in_offset = min_mem(compressor.total_in(), src.len());
            let input = &src[in_offset..];

            let out_offset = min_mem(compressor.total_out(), dst.len());
            let output = &mut dst[out_offset..];
            if output.is_empty() {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }

            let status = compressor.compress(input, output, FlushCompress::Finish)?;
            match status {
                flate2::Status::Ok => continue,
                flate2::Status::BufError => return Err(io::ErrorKind::UnexpectedEof.into()),
                flate2::Status::StreamEnd => break,
            }
        }
        Ok(compressor.total_out() as usize)
    }
}

impl super::Decompressor for Zlib {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> io::Result<usize> {
        let decompressor = self.decompressor();
        loop {
            let in_offset = min_mem(decompressor.total_in(), src.len());
            let input = &src[in_offset..];

            let out_offset = min_mem(decompressor.total_out(), dst.len());
            let output = &mut dst[out_offset..];

            let status = decompressor
                .decompress(input, output, FlushDecompress::Finish)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            match status {
                flate2::Status::Ok => continue,
                flate2::Status::BufError => return Err(io::ErrorKind::UnexpectedEof.into()),
                flate2::Status::StreamEnd => break,
            }
        }
        Ok(decompressor.total_out() as usize)
    }
}

fn min_mem(file_size: u64, mem_size: usize) -> usize {
    if file_size < mem_size as u64 {
        file_size as usize
    } else {
        mem_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{Compressor, Decompressor};

    #[test]
    fn track_sized_input() {
        let mut zlib = Zlib::with_level(9);
        let src = vec![0u8; 49_272];
        let mut compressed = vec![0; src.len()];
        let size = zlib.compress(&src, &mut compressed).unwrap();
        assert!(size < 1024);
        assert_eq!(&compressed[..2], &[0x78, 0xDA]);

        let mut out = vec![0xAA; src.len()];
        assert_eq!(zlib.decompress(&compressed[..size], &mut out).unwrap(), src.len());
        assert_eq!(out, src);
    }

    #[test]
    fn output_too_small() {
        let mut zlib = Zlib::default();
        let src = b"abcdefghijklmnopqrstuvwxyz0123456789";
        let mut compressed = [0; 64];
        let size = zlib.compress(src, &mut compressed).unwrap();
        let mut out = [0; 10];
        let err = zlib.decompress(&compressed[..size], &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn corrupt_input() {
        let mut zlib = Zlib::default();
        let mut out = [0; 64];
        let err = zlib.decompress(&[0x12, 0x34, 0x56, 0x78], &mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
