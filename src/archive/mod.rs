pub mod big;
pub mod bnd2;

pub use big::{BigArchive, BigEntry, BigVariant};
pub use bnd2::{
    Bnd2Archive, Bnd2Block, Bnd2Entry, Bnd2Flags, EntryData, EntryInfo, FileType, Platform,
    ResourceStringEntry, ResourceStringTable,
};
