#[deny(unused_must_use)]
pub mod archive;
pub use archive::*;

pub mod codec;
pub use codec::{crc32, normalize_big_path, zlib_compress, zlib_decompress};

pub mod facade;
pub use facade::{ArchiveFacade, EntryKey};

mod io;
pub use io::{ByteCursor, ByteCursorWriter, Fixup};
