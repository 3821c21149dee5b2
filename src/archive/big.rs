//! BIG family (`BIGF`/`BIG4`): a flat archive indexed by normalized path,
//! each entry a contiguous uncompressed byte range. See spec.md §4.2.

use std::collections::BTreeMap;
use std::io;

use tracing::{debug, instrument};

use crate::codec::normalize_big_path;
use crate::io::{invalid_data, ByteCursor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BigVariant {
    BigF,
    Big4,
}

/// A single BIG entry: a contiguous, uncompressed byte range in the backing
/// file. Keyed by normalized path; immutable in this core.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BigEntry {
    pub offset: u32,
    pub size: u32,
}

/// Parser/accessor for the BIG family. Holds the whole file image so that
/// `get_binary` can be served without re-opening a file handle.
pub struct BigArchive {
    variant: BigVariant,
    entries: BTreeMap<String, BigEntry>,
    image: Vec<u8>,
}

impl BigArchive {
    #[instrument(skip(image), fields(len = image.len()))]
    pub fn load(image: Vec<u8>) -> io::Result<Self> {
        if image.len() < 16 {
            return Err(invalid_data("BIG image too small for header"));
        }

        let variant = match &image[0..4] {
            b"BIGF" => BigVariant::BigF,
            b"BIG4" => BigVariant::Big4,
            other => {
                return Err(invalid_data(format!(
                    "unrecognized BIG magic {:?}",
                    other
                )))
            }
        };

        // totalSize is little-endian and otherwise unused by this core;
        // everything past it in the BIG header/entries is big-endian.
        let mut le_cursor = ByteCursor::new(&image, false);
        le_cursor.seek(4)?;
        let _total_size = le_cursor.read_u32()?;

        let mut cursor = ByteCursor::new(&image, true);
        cursor.seek(8)?;
        let num_entries = cursor.read_u32()?;
        let _first_offset = cursor.read_u32()?;

        let mut entries = BTreeMap::new();
        for _ in 0..num_entries {
            let offset = cursor.read_u32()?;
            let size = cursor.read_u32()?;
            let raw_name = cursor.read_cstring()?;
            let name = normalize_big_path(&raw_name);
            entries.insert(name, BigEntry { offset, size });
        }

        debug!(entries = entries.len(), ?variant, "loaded BIG archive");

        Ok(BigArchive {
            variant,
            entries,
            image,
        })
    }

    pub fn variant(&self) -> BigVariant {
        self.variant
    }

    /// Stable iteration order (ascending normalized path).
    pub fn list_entries(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Missing entries are an empty sentinel, not an error (spec.md §4.2).
    pub fn get_info(&self, path: &str) -> BigEntry {
        let key = normalize_big_path(path);
        self.entries.get(&key).copied().unwrap_or_default()
    }

    pub fn get_binary(&self, path: &str) -> (Vec<u8>, u32) {
        let key = normalize_big_path(path);
        match self.entries.get(&key) {
            Some(entry) => {
                let start = entry.offset as usize;
                let end = start + entry.size as usize;
                let bytes = self
                    .image
                    .get(start..end)
                    .map(|b| b.to_vec())
                    .unwrap_or_default();
                (bytes, entry.size)
            }
            None => (Vec::new(), 0),
        }
    }

    /// Convenience read helper grounded in `libbndl::Bundle::GetText`: the
    /// entry's bytes decoded as UTF-8 (lossily), or an empty string on a
    /// lookup miss.
    pub fn get_text(&self, path: &str) -> String {
        let (bytes, _) = self.get_binary(path);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ByteCursorWriter;

    fn build_big(entries: &[(&str, &[u8])]) -> Vec<u8> {
        // Build payload region first so we know offsets up front.
        let header_and_index_len_estimate = 16
            + entries
                .iter()
                .map(|(name, _)| 8 + name.len() + 1)
                .sum::<usize>();

        let mut payload_offset = header_and_index_len_estimate as u32;
        let mut laid_out = Vec::new();
        for (name, data) in entries {
            laid_out.push((*name, *data, payload_offset));
            payload_offset += data.len() as u32;
        }

        let mut w = ByteCursorWriter::new(true);
        w.write_bytes(b"BIGF");
        // totalSize is little-endian and ignored by the reader under test.
        let mut le = ByteCursorWriter::new(false);
        le.write_u32(payload_offset);
        w.write_bytes(&le.into_bytes());
        w.write_u32(laid_out.len() as u32);
        w.write_u32(0); // firstOffset, ignored on read

        for (name, data, offset) in &laid_out {
            w.write_u32(*offset);
            w.write_u32(data.len() as u32);
            w.write_string(name);
        }

        let mut bytes = w.into_bytes();
        for (_, data, offset) in &laid_out {
            let start = *offset as usize;
            if bytes.len() < start + data.len() {
                bytes.resize(start + data.len(), 0);
            }
            bytes[start..start + data.len()].copy_from_slice(data);
        }
        bytes
    }

    #[test]
    fn loads_and_normalizes_paths() {
        let image = build_big(&[(r"Data\Scripts\A.lua", b"print(42)")]);
        let archive = BigArchive::load(image).unwrap();

        assert_eq!(archive.variant(), BigVariant::BigF);
        assert_eq!(archive.list_entries(), vec!["data/scripts/a.lua"]);

        let (bytes, size) = archive.get_binary("data/scripts/a.lua");
        assert_eq!(size, 9);
        assert_eq!(bytes, b"print(42)");
    }

    #[test]
    fn get_info_matches_get_binary_size() {
        let image = build_big(&[("a.txt", b"hello")]);
        let archive = BigArchive::load(image).unwrap();

        let info = archive.get_info("A.TXT");
        let (bytes, size) = archive.get_binary("a.txt");
        assert_eq!(info.size, size);
        assert_eq!(bytes.len(), info.size as usize);
    }

    #[test]
    fn missing_entry_is_empty_not_error() {
        let image = build_big(&[("a.txt", b"hello")]);
        let archive = BigArchive::load(image).unwrap();

        assert_eq!(archive.get_info("nope"), BigEntry::default());
        let (bytes, size) = archive.get_binary("nope");
        assert!(bytes.is_empty());
        assert_eq!(size, 0);
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut image = build_big(&[("a.txt", b"hi")]);
        image[0..4].copy_from_slice(b"NOPE");
        assert!(BigArchive::load(image).is_err());
    }

    #[test]
    fn get_text_decodes_utf8() {
        let image = build_big(&[("greeting.txt", b"hi there")]);
        let archive = BigArchive::load(image).unwrap();
        assert_eq!(archive.get_text("greeting.txt"), "hi there");
        assert_eq!(archive.get_text("missing"), "");
    }
}
