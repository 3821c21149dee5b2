//! BND2 family: a structured bundle indexed by 32-bit file IDs, where each
//! logical asset is split across three parallel data blocks, each optionally
//! zlib-compressed, with an XML resource-string-table and per-asset
//! metadata. See spec.md §4.3–§4.6.

mod rst;

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};

use bitflags::bitflags;
use tracing::{debug, instrument, warn};

use crate::codec::{zlib_compress, zlib_decompress};
use crate::io::{invalid_data, unsupported, ByteCursor, ByteCursorWriter, Fixup};

pub use rst::{ResourceStringEntry, ResourceStringTable};

/// Bytes through the `flags` field (spec.md §9, open question 4); the header
/// is padded out to this length before the RST/ID block region begins.
pub const HEADER_LENGTH: usize = 48;

/// Low 28 bits of an on-disk `uncompressedSize` field are the effective
/// length; the high nibble is an alignment hint opaque to this library.
pub const SIZE_MASK: u32 = 0x0FFF_FFFF;
const HINT_MASK: u32 = 0xF000_0000;

const ID_BLOCK_ALIGN: usize = 16;
const DATA_BLOCK_ALIGN: usize = 0x80;

/// PC is the only platform this library writes, and the only one whose
/// sentinel value is pinned down here: 0. Non-PC platforms are recorded
/// verbatim and imply big-endian (spec.md §3), but this library only reads
/// them; see DESIGN.md for how the file's endianness is actually recovered
/// without relying on this value.
const PLATFORM_PC: u32 = 0;

bitflags! {
    pub struct Bnd2Flags: u32 {
        const HAS_RESOURCE_STRING_TABLE = 0b0000_0001;
        const COMPRESSED = 0b0000_0010;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Pc,
    NonPc(u32),
}

impl Platform {
    fn from_u32(raw: u32) -> Self {
        if raw == PLATFORM_PC {
            Platform::Pc
        } else {
            Platform::NonPc(raw)
        }
    }

    pub fn is_big_endian(self) -> bool {
        !matches!(self, Platform::Pc)
    }
}

/// Opaque enum-valued file type tag. spec.md does not enumerate concrete
/// values, so this is a thin newtype rather than a closed Rust enum; see
/// DESIGN.md.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileType(pub u32);

#[derive(Debug, Clone, Default)]
pub struct EntryInfo {
    pub checksum: u32,
    pub name: String,
    pub type_name: String,
    pub file_type: FileType,
    pub pointers_offset: u32,
    pub number_of_pointers: u16,
}

/// One of the three parallel data blocks (main/graphics/physical memory)
/// backing an entry. `data` holds the on-disk bytes (possibly zlib
/// compressed); `uncompressed_size` retains the high-nibble alignment hint.
#[derive(Debug, Clone, Default)]
pub struct Bnd2Block {
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub data: Option<Vec<u8>>,
}

impl Bnd2Block {
    pub fn effective_len(&self) -> u32 {
        self.uncompressed_size & SIZE_MASK
    }

    pub fn alignment_hint(&self) -> u8 {
        ((self.uncompressed_size & HINT_MASK) >> 28) as u8
    }
}

#[derive(Debug, Clone)]
pub struct Bnd2Entry {
    pub file_id: u32,
    pub info: EntryInfo,
    pub blocks: [Bnd2Block; 3],
}

/// Decompressed payload triple returned by `get_binary`/accepted by
/// `replace_entry`. A `None` block means absent (zero effective size).
#[derive(Debug, Clone, Default)]
pub struct EntryData {
    pub blocks: [Option<Vec<u8>>; 3],
    pub pointers_offset: u32,
    pub number_of_pointers: u16,
}

pub struct Bnd2Archive {
    platform: Platform,
    flags: Bnd2Flags,
    id_block_offset: u32,
    file_block_offsets: [u32; 3],
    entries: BTreeMap<u32, Bnd2Entry>,
}

/// Reads the raw version field with both candidate byte orders and keeps
/// whichever one yields the required constant 2 -- the header's own
/// endianness conditional field (`platform`) can't bootstrap itself, but the
/// version field is a fixed known value, so it doubles as the probe.
fn detect_endianness(image: &[u8]) -> io::Result<bool> {
    if image.len() < HEADER_LENGTH {
        return Err(invalid_data("bnd2 image is smaller than the header"));
    }
    let version_bytes: [u8; 4] = image[4..8].try_into().unwrap();
    if u32::from_le_bytes(version_bytes) == 2 {
        return Ok(false);
    }
    if u32::from_be_bytes(version_bytes) == 2 {
        return Ok(true);
    }
    Err(invalid_data("unsupported bundle version (expected 2)"))
}

impl Bnd2Archive {
    #[instrument(skip(image), fields(len = image.len()))]
    pub fn load(image: &[u8]) -> io::Result<Self> {
        if image.len() < 4 || &image[0..4] != b"bnd2" {
            if image.len() >= 4 && &image[0..4] == b"BNDL" {
                return Err(unsupported(
                    "BNDL bundles are a detected-but-refused legacy header",
                ));
            }
            return Err(invalid_data("not a BND2 image (bad magic)"));
        }

        let big_endian = detect_endianness(image)?;
        let mut header = ByteCursor::new(image, big_endian);
        header.seek(4)?;
        let version = header.read_u32()?;
        if version != 2 {
            return Err(invalid_data("unsupported bundle version (expected 2)"));
        }

        let platform = Platform::from_u32(header.read_u32()?);
        let rst_offset = header.read_u32()?;
        let num_entries = header.read_u32()?;
        let id_block_offset = header.read_u32()?;
        let mut file_block_offsets = [0u32; 3];
        for slot in file_block_offsets.iter_mut() {
            *slot = header.read_u32()?;
        }
        let flags_bits = header.read_u32()?;
        // Only HasResourceStringTable/Compressed are modeled (spec.md §3
        // flags their exact bit positions as unconfirmed and implies more
        // may exist); unknown bits are kept out of `flags` rather than
        // rejecting the load, since spec.md §7 never lists them as a
        // format-rejection reason.
        let flags = Bnd2Flags::from_bits_truncate(flags_bits);

        debug!(?platform, num_entries, big_endian, "parsed bnd2 header");

        let rst_map: HashMap<u32, ResourceStringEntry> =
            if flags.contains(Bnd2Flags::HAS_RESOURCE_STRING_TABLE) {
                let mut rst_cursor = ByteCursor::new(image, big_endian);
                rst_cursor.seek(rst_offset as usize)?;
                let xml = rst_cursor.read_xml_string()?;
                ResourceStringTable::parse(&xml)?.resources.into_iter().collect()
            } else {
                HashMap::new()
            };

        let mut entries: BTreeMap<u32, Bnd2Entry> = BTreeMap::new();
        let mut id_cursor = ByteCursor::new(image, big_endian);
        id_cursor.seek(id_block_offset as usize)?;
        for _ in 0..num_entries {
            let file_id = (id_cursor.read_u64()? & 0xFFFF_FFFF) as u32;
            if file_id == 0 {
                return Err(invalid_data("bnd2 entry has file ID 0"));
            }
            let checksum = (id_cursor.read_u64()? & 0xFFFF_FFFF) as u32;

            let mut uncompressed_sizes = [0u32; 3];
            for slot in uncompressed_sizes.iter_mut() {
                *slot = id_cursor.read_u32()?;
            }
            let mut compressed_sizes = [0u32; 3];
            for slot in compressed_sizes.iter_mut() {
                *slot = id_cursor.read_u32()?;
            }
            let mut relative_offsets = [0u32; 3];
            for slot in relative_offsets.iter_mut() {
                *slot = id_cursor.read_u32()?;
            }

            let pointers_offset = id_cursor.read_u32()?;
            let file_type = FileType(id_cursor.read_u32()?);
            let number_of_pointers = id_cursor.read_u16()?;
            id_cursor.read_u16()?; // 2 bytes of padding

            let mut blocks: [Bnd2Block; 3] = Default::default();
            for j in 0..3 {
                let read_size = if flags.contains(Bnd2Flags::COMPRESSED) {
                    compressed_sizes[j]
                } else {
                    uncompressed_sizes[j] & SIZE_MASK
                };

                let data = if read_size > 0 {
                    let mut block_cursor = ByteCursor::new(image, big_endian);
                    block_cursor
                        .seek(file_block_offsets[j] as usize + relative_offsets[j] as usize)?;
                    Some(block_cursor.read_bytes(read_size as usize)?.to_vec())
                } else {
                    None
                };

                blocks[j] = Bnd2Block {
                    uncompressed_size: uncompressed_sizes[j],
                    compressed_size: compressed_sizes[j],
                    data,
                };
            }

            entries.insert(
                file_id,
                Bnd2Entry {
                    file_id,
                    info: EntryInfo {
                        checksum,
                        name: String::new(),
                        type_name: String::new(),
                        file_type,
                        pointers_offset,
                        number_of_pointers,
                    },
                    blocks,
                },
            );
        }

        for (file_id, entry) in entries.iter_mut() {
            if let Some(rst_entry) = rst_map.get(file_id) {
                entry.info.name = rst_entry.name.clone();
                entry.info.type_name = rst_entry.type_name.clone();
            }
        }

        Ok(Bnd2Archive {
            platform,
            flags,
            id_block_offset,
            file_block_offsets,
            entries,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn flags(&self) -> Bnd2Flags {
        self.flags
    }

    /// Stable, ascending-fileID iteration order.
    pub fn list_entries(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn list_entries_by_file_type(&self) -> BTreeMap<FileType, Vec<u32>> {
        let mut by_type: BTreeMap<FileType, Vec<u32>> = BTreeMap::new();
        for (file_id, entry) in &self.entries {
            by_type.entry(entry.info.file_type).or_default().push(*file_id);
        }
        by_type
    }

    pub fn get_info(&self, file_id: u32) -> Option<EntryInfo> {
        self.entries.get(&file_id).map(|e| e.info.clone())
    }

    /// Decompresses a single block's payload. `None` covers both a missing
    /// entry and an absent/empty block; a zlib length mismatch is an
    /// integrity violation and surfaces as `Err` (spec.md §7).
    pub fn get_binary_block(&self, file_id: u32, block: usize) -> io::Result<Option<Vec<u8>>> {
        let entry = match self.entries.get(&file_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let block = &entry.blocks[block];
        let raw = match &block.data {
            Some(raw) => raw,
            None => return Ok(None),
        };

        let effective_len = block.effective_len() as usize;
        if self.flags.contains(Bnd2Flags::COMPRESSED) {
            Ok(Some(zlib_decompress(raw, effective_len)?))
        } else {
            Ok(Some(raw.get(..effective_len).unwrap_or(raw).to_vec()))
        }
    }

    pub fn get_binary(&self, file_id: u32) -> io::Result<Option<EntryData>> {
        let entry = match self.entries.get(&file_id) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let mut blocks: [Option<Vec<u8>>; 3] = Default::default();
        for (i, slot) in blocks.iter_mut().enumerate() {
            *slot = self.get_binary_block(file_id, i)?;
        }

        Ok(Some(EntryData {
            blocks,
            pointers_offset: entry.info.pointers_offset,
            number_of_pointers: entry.info.number_of_pointers,
        }))
    }

    /// Replaces the payload of an existing entry. Returns `false` (not an
    /// error) when `file_id` is unknown or a deflate pass fails; entries are
    /// staged into locals first so a failure never leaves a half-written
    /// block (spec.md §4.5, §5).
    #[instrument(skip(self, data))]
    pub fn replace_entry(&mut self, file_id: u32, data: EntryData) -> bool {
        let entry = match self.entries.get(&file_id) {
            Some(entry) => entry,
            None => return false,
        };

        let mut staged: [Bnd2Block; 3] = Default::default();
        for i in 0..3 {
            let hint = entry.blocks[i].uncompressed_size & HINT_MASK;
            staged[i] = match &data.blocks[i] {
                None => Bnd2Block::default(),
                Some(bytes) if bytes.is_empty() => Bnd2Block::default(),
                Some(bytes) if self.flags.contains(Bnd2Flags::COMPRESSED) => {
                    let compressed = match zlib_compress(bytes) {
                        Ok(compressed) => compressed,
                        Err(err) => {
                            warn!(file_id, block = i, %err, "deflate failed, entry left untouched");
                            return false;
                        }
                    };
                    Bnd2Block {
                        uncompressed_size: bytes.len() as u32 | hint,
                        compressed_size: compressed.len() as u32,
                        data: Some(compressed),
                    }
                }
                Some(bytes) => Bnd2Block {
                    uncompressed_size: bytes.len() as u32 | hint,
                    compressed_size: 0,
                    data: Some(bytes.clone()),
                },
            };
        }

        let entry = self.entries.get_mut(&file_id).unwrap();
        entry.blocks = staged;
        entry.info.pointers_offset = data.pointers_offset;
        entry.info.number_of_pointers = data.number_of_pointers;
        true
    }

    /// Serializes the archive to a little-endian byte buffer (spec.md §4.6).
    /// Save is PC-only; BIG/BNDL archives never reach this type.
    #[instrument(skip(self))]
    pub fn serialize(&self) -> io::Result<Vec<u8>> {
        let mut w = ByteCursorWriter::new(false);

        w.write_bytes(b"bnd2");
        w.write_u32(2);
        w.write_u32(PLATFORM_PC);
        let rst_offset_fixup = w.remember_position();
        w.write_u32(self.entries.len() as u32);
        let id_block_offset_fixup = w.remember_position();
        let file_block_fixups = [
            w.remember_position(),
            w.remember_position(),
            w.remember_position(),
        ];
        w.write_u32(self.flags.bits());
        w.align(ID_BLOCK_ALIGN);
        debug_assert_eq!(w.tell(), HEADER_LENGTH);

        w.patch_u32_at(rst_offset_fixup, w.tell() as u32);
        if self.flags.contains(Bnd2Flags::HAS_RESOURCE_STRING_TABLE) {
            let xml = ResourceStringTable::encode(
                self.entries
                    .iter()
                    .map(|(id, e)| (*id, e.info.type_name.as_str(), e.info.name.as_str())),
            )?;
            w.write_string(&xml);
            w.align(ID_BLOCK_ALIGN);
        }

        w.patch_u32_at(id_block_offset_fixup, w.tell() as u32);
        let mut block_offset_fixups: Vec<[Fixup; 3]> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            w.write_u64(entry.file_id as u64);
            w.write_u64(entry.info.checksum as u64);
            for block in &entry.blocks {
                w.write_u32(block.uncompressed_size);
            }
            for block in &entry.blocks {
                w.write_u32(block.compressed_size);
            }
            let fixups = [
                w.remember_position(),
                w.remember_position(),
                w.remember_position(),
            ];
            w.write_u32(entry.info.pointers_offset);
            w.write_u32(entry.info.file_type.0);
            w.write_u16(entry.info.number_of_pointers);
            w.write_u16(0);
            block_offset_fixups.push(fixups);
        }

        let order: Vec<u32> = self.entries.keys().copied().collect();
        for (i, fixup) in file_block_fixups.into_iter().enumerate() {
            // Aligning before every block (not just "between" blocks 0/1)
            // both matches the reference "align 128 between blocks" rule
            // and keeps fileBlockOffsets[0] 128-aligned too -- see
            // DESIGN.md's resolution of spec.md §9's open question 2.
            w.align(DATA_BLOCK_ALIGN);
            let block_start = w.tell();
            w.patch_u32_at(fixup, block_start as u32);

            let n = order.len();
            for (idx, file_id) in order.iter().enumerate() {
                let entry = &self.entries[file_id];
                let block = &entry.blocks[i];
                let read_size = if self.flags.contains(Bnd2Flags::COMPRESSED) {
                    block.compressed_size
                } else {
                    block.uncompressed_size & SIZE_MASK
                };

                if read_size == 0 {
                    continue;
                }

                let relative_offset = w.tell() - block_start;
                w.patch_u32_at(block_offset_fixups[idx][i], relative_offset as u32);
                let data = block.data.as_deref().unwrap_or(&[]);
                w.write_bytes(&data[..read_size as usize]);

                let is_last = idx == n - 1;
                if i != 0 && !is_last {
                    w.align(DATA_BLOCK_ALIGN);
                } else {
                    w.align(ID_BLOCK_ALIGN);
                }
            }
        }

        Ok(w.into_bytes())
    }

    pub fn save_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let bytes = self.serialize()?;
        writer.write_all(&bytes)
    }

    pub fn id_block_offset(&self) -> u32 {
        self.id_block_offset
    }

    pub fn file_block_offsets(&self) -> [u32; 3] {
        self.file_block_offsets
    }
}
