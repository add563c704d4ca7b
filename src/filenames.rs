//! Filename scheme inside the database directory.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileType {
    /// Advisory single-writer lock file.
    Lock,
    /// Pointer to the live manifest.
    Current,
    /// Framed record log of version edits.
    Manifest,
    /// Write-ahead log.
    Log,
    /// Sorted table.
    Table,
}

pub(crate) fn db_filename(dir: &Path, file_type: FileType, file_num: u64) -> PathBuf {
    match file_type {
        FileType::Lock => dir.join("LOCK"),
        FileType::Current => dir.join("CURRENT"),
        FileType::Manifest => dir.join(manifest_name(file_num)),
        FileType::Log => dir.join(format!("{file_num:06}.log")),
        FileType::Table => dir.join(format!("{file_num:06}.ldb")),
    }
}

/// `MANIFEST-NNNNNN`: exactly the form stored in `CURRENT`.
pub(crate) fn manifest_name(file_num: u64) -> String {
    format!("MANIFEST-{file_num:06}")
}
