//! Durable log of version edits, plus the `CURRENT` pointer file.
//!
//! Each record in the manifest is one encoded [`VersionEdit`], a
//! self-delimiting stream of tagged fields:
//!
//! - tag 4: `varint(new_seq)`
//! - tag 6: `varint(level) | varint(file_num)` (removed file)
//! - tag 7: `varint(level) | varint(file_num) | varint(size)
//!   | varint(len) min_ikey | varint(len) max_ikey` (added file)

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use bytes::Bytes;

use crate::filenames::{db_filename, manifest_name, FileType};
use crate::internal_key::IKeyComparator;
use crate::record::{RecordReader, RecordWriter};
use crate::varint::{put_uvarint, take_uvarint, VarintError};
use crate::version::{DeletedFile, FileMeta, VersionEdit, VersionSet, NUM_LEVELS};

const TAG_LAST_SEQUENCE: u64 = 4;
const TAG_DELETED_FILE: u64 = 6;
const TAG_NEW_FILE: u64 = 7;

/// First manifest number of a fresh database.
const INITIAL_MANIFEST_NUM: u64 = 2;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest corrupt: {0}")]
    Corrupt(&'static str),
}

impl From<VarintError> for ManifestError {
    fn from(_: VarintError) -> Self {
        ManifestError::Corrupt("malformed varint")
    }
}

pub fn encode_edit(edit: &VersionEdit) -> Vec<u8> {
    let mut buf = Vec::new();
    if edit.new_seq != 0 {
        put_uvarint(&mut buf, TAG_LAST_SEQUENCE);
        put_uvarint(&mut buf, edit.new_seq);
    }
    for removed in &edit.removes {
        put_uvarint(&mut buf, TAG_DELETED_FILE);
        put_uvarint(&mut buf, removed.level as u64);
        put_uvarint(&mut buf, removed.file_num);
    }
    for added in &edit.adds {
        put_uvarint(&mut buf, TAG_NEW_FILE);
        put_uvarint(&mut buf, added.level as u64);
        put_uvarint(&mut buf, added.file_num);
        put_uvarint(&mut buf, added.size_bytes);
        put_uvarint(&mut buf, added.min_ikey.len() as u64);
        buf.extend_from_slice(&added.min_ikey);
        put_uvarint(&mut buf, added.max_ikey.len() as u64);
        buf.extend_from_slice(&added.max_ikey);
    }
    buf
}

pub fn decode_edit(data: &[u8]) -> Result<VersionEdit, ManifestError> {
    let mut edit = VersionEdit::default();
    let mut pos = 0usize;
    while pos < data.len() {
        let (tag, n) = take_uvarint(&data[pos..])?;
        pos += n;
        match tag {
            TAG_LAST_SEQUENCE => {
                let (seq, n) = take_uvarint(&data[pos..])?;
                pos += n;
                edit.new_seq = seq;
            }
            TAG_DELETED_FILE => {
                let (level, n) = take_uvarint(&data[pos..])?;
                pos += n;
                let (file_num, n) = take_uvarint(&data[pos..])?;
                pos += n;
                edit.removes.push(DeletedFile {
                    level: decode_level(level)?,
                    file_num,
                });
            }
            TAG_NEW_FILE => {
                let (level, n) = take_uvarint(&data[pos..])?;
                pos += n;
                let (file_num, n) = take_uvarint(&data[pos..])?;
                pos += n;
                let (size_bytes, n) = take_uvarint(&data[pos..])?;
                pos += n;
                let (min_ikey, used) = take_key(&data[pos..])?;
                pos += used;
                let (max_ikey, used) = take_key(&data[pos..])?;
                pos += used;
                edit.adds.push(FileMeta {
                    file_num,
                    level: decode_level(level)?,
                    min_ikey,
                    max_ikey,
                    size_bytes,
                    // Not carried on the wire; boundary-key sequence numbers
                    // stand in during recovery.
                    last_seq: 0,
                });
            }
            _ => return Err(ManifestError::Corrupt("unexpected tag")),
        }
    }
    Ok(edit)
}

fn decode_level(level: u64) -> Result<usize, ManifestError> {
    if level as usize >= NUM_LEVELS {
        return Err(ManifestError::Corrupt("level out of range"));
    }
    Ok(level as usize)
}

fn take_key(data: &[u8]) -> Result<(Bytes, usize), ManifestError> {
    let (len, n) = take_uvarint(data)?;
    let len = len as usize;
    if data.len() < n + len {
        return Err(ManifestError::Corrupt("truncated key"));
    }
    Ok((Bytes::copy_from_slice(&data[n..n + len]), n + len))
}

/// Append handle on the live manifest.
#[derive(Debug)]
pub struct Manifest {
    file_num: u64,
    writer: RecordWriter<File>,
    fsync: bool,
}

impl Manifest {
    /// Runs the open protocol against `dir`.
    ///
    /// A fresh directory gets `MANIFEST-000002` and a `CURRENT` pointing at
    /// it. An existing directory has its manifest replayed into a
    /// [`VersionSet`], then a successor manifest is started whose first
    /// record re-states the live file set, and `CURRENT` is atomically
    /// repointed.
    pub fn open(
        dir: &Path,
        icmp: IKeyComparator,
        fsync: bool,
    ) -> Result<(Self, VersionSet), ManifestError> {
        let current_path = db_filename(dir, FileType::Current, 0);
        if !current_path.exists() {
            let manifest = Self::create(dir, INITIAL_MANIFEST_NUM, fsync)?;
            set_current(dir, INITIAL_MANIFEST_NUM)?;
            tracing::info!(dir = %dir.display(), manifest = manifest.file_num, "initialised manifest");
            return Ok((manifest, VersionSet::new(icmp)));
        }

        let file_num = read_current(dir)?;
        let mut versions = VersionSet::new(icmp);
        let mut reader = RecordReader::new(File::open(db_filename(
            dir,
            FileType::Manifest,
            file_num,
        ))?);
        let mut edits = 0usize;
        while let Some(record) = reader.read_record()? {
            versions.apply(&decode_edit(&record)?);
            edits += 1;
        }

        let mut manifest = Self::create(dir, file_num + 1, fsync)?;
        manifest.append(&versions.as_version_edit())?;
        // The add-everything edit carries no sequence; restate it so the
        // counter survives an open/close cycle with no writes in between.
        if versions.seq() != 0 {
            manifest.append(&VersionEdit {
                new_seq: versions.seq(),
                ..Default::default()
            })?;
        }
        set_current(dir, file_num + 1)?;
        tracing::info!(
            dir = %dir.display(),
            replayed = edits,
            manifest = manifest.file_num,
            "recovered version set, rolled manifest"
        );
        Ok((manifest, versions))
    }

    /// Appends one edit as a single record and makes it durable.
    pub fn append(&mut self, edit: &VersionEdit) -> Result<(), ManifestError> {
        self.writer.write_record(&encode_edit(edit))?;
        self.writer.flush()?;
        if self.fsync {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    pub fn file_num(&self) -> u64 {
        self.file_num
    }

    fn create(dir: &Path, file_num: u64, fsync: bool) -> Result<Self, ManifestError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(db_filename(dir, FileType::Manifest, file_num))?;
        Ok(Self {
            file_num,
            writer: RecordWriter::new(file),
            fsync,
        })
    }
}

/// Atomically repoints `CURRENT` at `MANIFEST-<file_num>`.
fn set_current(dir: &Path, file_num: u64) -> Result<(), ManifestError> {
    let tmp = dir.join("CURRENT.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(manifest_name(file_num).as_bytes())?;
    file.sync_data()?;
    drop(file);
    fs::rename(&tmp, db_filename(dir, FileType::Current, 0))?;
    File::open(dir)?.sync_all()?;
    Ok(())
}

fn read_current(dir: &Path) -> Result<u64, ManifestError> {
    let content = fs::read_to_string(db_filename(dir, FileType::Current, 0))?;
    let name = content.trim_end().trim_start_matches("./");
    let digits = name
        .strip_prefix("MANIFEST-")
        .ok_or(ManifestError::Corrupt("CURRENT does not name a manifest"))?;
    if digits.len() != 6 {
        return Err(ManifestError::Corrupt("CURRENT manifest number malformed"));
    }
    digits
        .parse::<u64>()
        .map_err(|_| ManifestError::Corrupt("CURRENT manifest number malformed"))
}
