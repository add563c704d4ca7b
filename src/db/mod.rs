//! Database facade: routes reads and writes, owns the memtable, the version
//! set, the manifest, the write-ahead log, and the directory lock.

mod lock;
mod options;

use std::path::{Path, PathBuf};

use anyhow::Context;
use bytes::Bytes;

use crate::filenames::{db_filename, FileType};
use crate::internal_key::{IKeyComparator, InternalKey, KeyKind, MAX_SEQNO};
use crate::memtable::MemTable;
use crate::sst::{SstBuilder, SstReader};
use crate::version::manifest::Manifest;
use crate::version::{FileMeta, Version, VersionEdit, VersionSet, NUM_LEVELS};
use crate::wal::WalWriter;

pub use lock::{FileLock, LockError};
pub use options::DbOptions;

pub type Value = Bytes;

/// A single-writer database handle.
///
/// Callers serialise access: mutation takes `&mut self`, and a synchronous
/// memtable flush runs inline with the write that crosses the size
/// threshold. Reads observe the version current when they start.
#[derive(Debug)]
pub struct Db {
    dir: PathBuf,
    options: DbOptions,
    icmp: IKeyComparator,
    _lock: FileLock,
    mem: MemTable,
    versions: VersionSet,
    manifest: Manifest,
    wal: WalWriter,
    seq_num: u64,
    next_file_num: u64,
}

impl Db {
    /// Opens (creating if needed) the database in `dir`. Fails with
    /// [`LockError::Held`] if another process has the directory.
    pub fn open(dir: impl AsRef<Path>, options: DbOptions) -> anyhow::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).with_context(|| format!("create dir {dir:?}"))?;

        let lock = FileLock::acquire(db_filename(&dir, FileType::Lock, 0))?;
        let icmp = IKeyComparator::new(options.comparator.clone());

        let (manifest, versions) =
            Manifest::open(&dir, icmp.clone(), options.fsync_writes).context("open manifest")?;

        // The manifest's first record carries no sequence, so raise the
        // counter to anything observable in live file boundary keys.
        let seq_num = versions.seq().max(versions.max_boundary_seqno());
        let next_file_num = versions.max_file_num().map_or(0, |n| n + 1);

        let wal = WalWriter::create(&db_filename(&dir, FileType::Log, 0))
            .context("create write-ahead log")?;

        tracing::info!(
            dir = %dir.display(),
            seq = seq_num,
            files = versions.current().live_files().count(),
            "opened database"
        );

        Ok(Self {
            dir,
            options,
            icmp,
            _lock: lock,
            mem: MemTable::new(),
            versions,
            manifest,
            wal,
            seq_num,
            next_file_num,
        })
    }

    /// Point read. `Ok(None)` covers both a missing key and a tombstone.
    pub fn get(&self, key: impl AsRef<[u8]>) -> anyhow::Result<Option<Value>> {
        let key = key.as_ref();
        let lookup = InternalKey::new(Bytes::copy_from_slice(key), MAX_SEQNO, KeyKind::Set);

        if let Some(found) = self.mem.get(&lookup) {
            return Ok(found);
        }

        let version = self.versions.current();
        let encoded = lookup.encode();

        // Level 0 files may overlap; newest file wins, so walk them in
        // reverse file-number order.
        for file in version.files(0).iter().rev() {
            if !Version::file_straddles(file, key, self.icmp.user_cmp()) {
                continue;
            }
            if let Some(found) = self.table_get(file, &encoded)? {
                return Ok(found);
            }
        }

        // Levels below are disjoint and sorted by smallest key.
        for level in 1..NUM_LEVELS {
            for file in version.files(level) {
                let past = self
                    .icmp
                    .user_cmp()
                    .compare(key, crate::internal_key::user_key(&file.min_ikey))
                    == std::cmp::Ordering::Less;
                if past {
                    break;
                }
                if !Version::file_straddles(file, key, self.icmp.user_cmp()) {
                    continue;
                }
                if let Some(found) = self.table_get(file, &encoded)? {
                    return Ok(found);
                }
            }
        }

        Ok(None)
    }

    /// Writes a key/value pair, flushing the memtable first if this write
    /// would push it past the configured threshold.
    pub fn set(&mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> anyhow::Result<()> {
        self.write(KeyKind::Set, key.into(), value.into())
    }

    /// Writes a tombstone for `key`.
    pub fn delete(&mut self, key: impl Into<Bytes>) -> anyhow::Result<()> {
        self.write(KeyKind::Del, key.into(), Bytes::new())
    }

    /// Flushes outstanding state and releases the directory lock. Every step
    /// runs; the first error encountered is returned.
    pub fn close(mut self) -> anyhow::Result<()> {
        let mut first_err = None;
        if let Err(e) = self.flush_memtable().context("flush memtable at close") {
            first_err.get_or_insert(e);
        }
        if let Err(e) = self.wal.flush() {
            first_err.get_or_insert(anyhow::Error::new(e).context("flush write-ahead log"));
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    fn write(&mut self, kind: KeyKind, key: Bytes, value: Bytes) -> anyhow::Result<()> {
        if self.mem.approximate_bytes() as usize + value.len() > self.options.max_memory_size {
            self.flush_memtable().context("flush memtable")?;
        }

        self.seq_num += 1;
        self.wal
            .append(kind, self.seq_num, &key, &value)
            .context("append write-ahead log")?;
        self.mem.put(InternalKey::new(key, self.seq_num, kind), value);
        Ok(())
    }

    /// Writes the memtable out as a level-0 table, registers it through the
    /// manifest, and starts a fresh memtable.
    ///
    /// On failure the memtable is left intact and no version references the
    /// partial file; the write that triggered the flush reports the error
    /// and may be retried.
    fn flush_memtable(&mut self) -> anyhow::Result<()> {
        if self.mem.is_empty() {
            return Ok(());
        }

        let file_num = self.next_file_num;
        self.next_file_num += 1;
        let path = db_filename(&self.dir, FileType::Table, file_num);

        let mut builder = SstBuilder::create(
            &path,
            self.icmp.clone(),
            self.options.block_size,
            self.options.block_restart_interval,
            self.options.compression,
        )
        .with_context(|| format!("create table {}", path.display()))?;
        for (key, value) in self.mem.iter() {
            builder.add(&key.encode(), &value)?;
        }
        let props = builder
            .finish()
            .with_context(|| format!("finish table {}", path.display()))?;

        let edit = VersionEdit {
            new_seq: self.seq_num,
            adds: vec![FileMeta {
                file_num,
                level: 0,
                min_ikey: props.min_ikey,
                max_ikey: props.max_ikey,
                size_bytes: props.file_size,
                last_seq: self.seq_num,
            }],
            removes: Vec::new(),
        };
        // The record must be durable before the new version becomes
        // current; a failure here leaves the table file as an orphan for a
        // later open to collect.
        self.manifest.append(&edit).context("append manifest")?;
        self.versions.apply(&edit);

        tracing::info!(
            file_num,
            entries = props.entries,
            bytes = props.file_size,
            "flushed memtable to level 0"
        );
        self.mem = MemTable::new();
        Ok(())
    }

    fn table_get(&self, file: &FileMeta, lookup: &[u8]) -> anyhow::Result<Option<Option<Value>>> {
        let path = db_filename(&self.dir, FileType::Table, file.file_num);
        let reader = SstReader::open(&path, self.icmp.clone())
            .with_context(|| format!("open table {}", path.display()))?;
        Ok(reader.get_ikey(lookup)?)
    }
}
