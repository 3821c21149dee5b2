//! A discriminated container switching on magic, exposing a uniform query
//! surface and locking (spec.md §4.7, §5).

use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::instrument;

use crate::archive::{BigArchive, Bnd2Archive};
use crate::io::{invalid_data, unsupported};

/// Uniform entry key across both container families: a path for BIG, a
/// fileID for BND2 (spec.md §6.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKey {
    Path(String),
    FileId(u32),
}

enum ArchiveKind {
    Big(BigArchive),
    Bnd2(Bnd2Archive),
    Unknown,
}

/// Owns a mutex and one of {BigArchive, Bnd2Archive, Unknown}. Every public
/// operation acquires the mutex for its entire duration; there is no
/// reader/writer distinction (spec.md §5).
pub struct ArchiveFacade {
    inner: Mutex<ArchiveKind>,
}

impl Default for ArchiveFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveFacade {
    pub fn new() -> Self {
        ArchiveFacade {
            inner: Mutex::new(ArchiveKind::Unknown),
        }
    }

    /// Inspects the magic and dispatches to the right parser. A second
    /// `load` replaces prior state entirely (spec.md §3 "Lifecycles").
    #[instrument(skip(self, image), fields(len = image.len()))]
    pub fn load(&self, image: Vec<u8>) -> io::Result<()> {
        if image.len() < 4 {
            return Err(invalid_data("image too small to contain a magic"));
        }

        let kind = match &image[0..4] {
            b"BIGF" | b"BIG4" => ArchiveKind::Big(BigArchive::load(image)?),
            b"bnd2" => ArchiveKind::Bnd2(Bnd2Archive::load(&image)?),
            b"BNDL" => return Err(unsupported("BNDL bundles are detected but not supported")),
            other => return Err(invalid_data(format!("unrecognized archive magic {:?}", other))),
        };

        *self.inner.lock().unwrap() = kind;
        Ok(())
    }

    pub fn load_from_path(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let image = std::fs::read(path)?;
        self.load(image)
    }

    /// BND2 only; BIG and an empty facade report `ErrorKind::Unsupported`
    /// (spec.md §7 "Unsupported operation").
    pub fn save(&self) -> io::Result<Vec<u8>> {
        match &*self.inner.lock().unwrap() {
            ArchiveKind::Bnd2(archive) => archive.serialize(),
            ArchiveKind::Big(_) => Err(unsupported("BIG archives cannot be saved")),
            ArchiveKind::Unknown => Err(unsupported("no archive is loaded")),
        }
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let bytes = self.save()?;
        std::fs::write(path, bytes)
    }

    /// Ordered list of keys; empty if nothing is loaded (spec.md §6.4).
    pub fn list_entries(&self) -> Vec<EntryKey> {
        match &*self.inner.lock().unwrap() {
            ArchiveKind::Big(archive) => archive.list_entries().into_iter().map(EntryKey::Path).collect(),
            ArchiveKind::Bnd2(archive) => archive.list_entries().into_iter().map(EntryKey::FileId).collect(),
            ArchiveKind::Unknown => Vec::new(),
        }
    }

    /// Runs `f` against the loaded `BigArchive` while holding the mutex.
    /// `None` if no BIG archive is loaded.
    pub fn with_big<R>(&self, f: impl FnOnce(&BigArchive) -> R) -> Option<R> {
        match &*self.inner.lock().unwrap() {
            ArchiveKind::Big(archive) => Some(f(archive)),
            _ => None,
        }
    }

    /// Runs `f` against the loaded `Bnd2Archive` while holding the mutex.
    /// `None` if no BND2 archive is loaded.
    pub fn with_bnd2<R>(&self, f: impl FnOnce(&Bnd2Archive) -> R) -> Option<R> {
        match &*self.inner.lock().unwrap() {
            ArchiveKind::Bnd2(archive) => Some(f(archive)),
            _ => None,
        }
    }

    /// Exclusive variant of `with_bnd2`, for `replace_entry`-style mutation.
    pub fn with_bnd2_mut<R>(&self, f: impl FnOnce(&mut Bnd2Archive) -> R) -> Option<R> {
        match &mut *self.inner.lock().unwrap() {
            ArchiveKind::Bnd2(archive) => Some(f(archive)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Bnd2Flags;
    use crate::io::ByteCursorWriter;

    fn minimal_bnd2(file_id: u32, payload: &[u8]) -> Vec<u8> {
        let mut w = ByteCursorWriter::new(false);
        w.write_bytes(b"bnd2");
        w.write_u32(2);
        w.write_u32(0);
        let rst_fixup = w.remember_position();
        w.write_u32(1);
        let id_block_fixup = w.remember_position();
        let file_block_fixups = [
            w.remember_position(),
            w.remember_position(),
            w.remember_position(),
        ];
        w.write_u32(Bnd2Flags::empty().bits());
        w.align(16);
        w.patch_u32_at(rst_fixup, 0);

        let id_block_pos = w.tell();
        w.patch_u32_at(id_block_fixup, id_block_pos as u32);
        w.write_u64(file_id as u64);
        w.write_u64(0);
        w.write_u32(payload.len() as u32);
        w.write_u32(0);
        w.write_u32(0);
        w.write_u32(0);
        w.write_u32(0);
        w.write_u32(0);
        let offset_fixups = [
            w.remember_position(),
            w.remember_position(),
            w.remember_position(),
        ];
        w.write_u32(0);
        w.write_u32(0);
        w.write_u16(0);
        w.write_u16(0);

        w.align(16);
        let block_start = w.tell();
        w.patch_u32_at(file_block_fixups[0], block_start as u32);
        w.patch_u32_at(offset_fixups[0], 0);
        w.write_bytes(payload);
        w.patch_u32_at(file_block_fixups[1], w.tell() as u32);
        w.patch_u32_at(file_block_fixups[2], w.tell() as u32);

        w.into_bytes()
    }

    #[test]
    fn dispatches_bnd2_by_magic() {
        let facade = ArchiveFacade::new();
        facade.load(minimal_bnd2(1, b"payload")).unwrap();

        assert_eq!(facade.list_entries(), vec![EntryKey::FileId(1)]);
        let bytes = facade
            .with_bnd2(|a| a.get_binary_block(1, 0).unwrap().unwrap())
            .unwrap();
        assert_eq!(bytes, b"payload");
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let facade = ArchiveFacade::new();
        assert!(facade.load(b"xxxx".to_vec()).is_err());
    }

    #[test]
    fn bndl_is_rejected_as_unsupported() {
        let facade = ArchiveFacade::new();
        let err = facade.load(b"BNDL".to_vec()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }

    #[test]
    fn saving_without_a_loaded_archive_is_unsupported() {
        let facade = ArchiveFacade::new();
        let err = facade.save().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Unsupported);
    }
}
