//! Small, stateless primitives the archive codecs build on: zlib in both
//! directions, CRC32, and the path normalization BIG uses for its keys.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::io::invalid_data;

/// Inflates `data` with zlib, expecting exactly `expected_len` output bytes.
/// Returns an error if the inflated length disagrees (spec.md's "Integrity
/// violation" category): the source treats this mismatch as an assertion,
/// but a library surfaces it as a normal failure instead of aborting.
pub fn zlib_decompress(data: &[u8], expected_len: usize) -> io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    decoder.read_to_end(&mut out)?;
    if out.len() != expected_len {
        return Err(invalid_data(format!(
            "zlib inflate produced {} bytes, expected {}",
            out.len(),
            expected_len
        )));
    }
    Ok(out)
}

/// Deflates `data` at the best-compression level, returning an owned buffer
/// shrunk to the actual compressed length.
pub fn zlib_compress(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}

/// CRC32 (IEEE) over arbitrary bytes.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Normalizes a BIG archive path the way the source does: backslashes to
/// forward slashes, then lowercased, so lookups are case- and
/// separator-insensitive.
pub fn normalize_big_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_roundtrip() {
        let original = b"hello world! hello world! hello world!";
        let compressed = zlib_compress(original).unwrap();
        let decompressed = zlib_decompress(&compressed, original.len()).unwrap();
        assert_eq!(decompressed, original);
    }

    #[test]
    fn zlib_decompress_rejects_length_mismatch() {
        let compressed = zlib_compress(b"abc").unwrap();
        assert!(zlib_decompress(&compressed, 999).is_err());
    }

    #[test]
    fn crc32_is_stable() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn normalize_big_path_folds_case_and_separators() {
        assert_eq!(
            normalize_big_path(r"Data\Scripts\A.lua"),
            "data/scripts/a.lua"
        );
    }
}
