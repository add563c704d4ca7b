//! Table writer.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::internal_key::{self, Comparator, IKeyComparator};
use crate::sst::block::BlockBuilder;
use crate::sst::{BlockHandle, SstError, FOOTER_LEN, MAGIC, NO_COMPRESSION, SNAPPY_COMPRESSION};

const DATA_RESTART_INTERVAL: usize = 16;
const INDEX_RESTART_INTERVAL: usize = 1;

/// Summary of a finished table, fed into the version edit that registers it.
#[derive(Debug, Clone)]
pub struct SstProperties {
    pub min_ikey: Bytes,
    pub max_ikey: Bytes,
    pub file_size: u64,
    pub entries: u64,
    pub max_seqno: u64,
}

/// Streams sorted entries into an immutable table file.
///
/// The file is assembled under a temporary name and renamed into place by
/// [`finish`](Self::finish), with the parent directory synced, so a crashed
/// or abandoned build never leaves a live table path behind.
pub struct SstBuilder {
    file: BufWriter<File>,
    path_tmp: PathBuf,
    path_final: PathBuf,
    offset: u64,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    /// Index entry for the last closed data block; written out after that
    /// block is closed and before the next block's first key is seen.
    pending: Option<(Vec<u8>, BlockHandle)>,

    icmp: IKeyComparator,
    block_size: usize,
    compression: bool,
    compress_buf: Vec<u8>,

    first_key: Option<Bytes>,
    last_key: Vec<u8>,
    entries: u64,
    max_seqno: u64,
}

impl SstBuilder {
    pub fn create(
        path: impl AsRef<Path>,
        icmp: IKeyComparator,
        block_size: usize,
        restart_interval: usize,
        compression: bool,
    ) -> Result<Self, SstError> {
        let path_final = path.as_ref().to_path_buf();
        let path_tmp = path_final.with_extension("tmp");
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&path_tmp)?;
        Ok(Self {
            file: BufWriter::new(file),
            path_tmp,
            path_final,
            offset: 0,
            data_block: BlockBuilder::new(restart_interval.max(1)),
            index_block: BlockBuilder::new(INDEX_RESTART_INTERVAL),
            pending: None,
            icmp,
            block_size: block_size.max(1),
            compression,
            compress_buf: Vec::new(),
            first_key: None,
            last_key: Vec::new(),
            entries: 0,
            max_seqno: 0,
        })
    }

    /// Convenience constructor with the stock data-block parameters.
    pub fn with_defaults(path: impl AsRef<Path>, icmp: IKeyComparator) -> Result<Self, SstError> {
        Self::create(path, icmp, 4096, DATA_RESTART_INTERVAL, true)
    }

    /// Appends one entry. Keys must be strictly increasing in internal-key
    /// order.
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<(), SstError> {
        if self.entries > 0
            && self.icmp.compare(key, &self.last_key) != std::cmp::Ordering::Greater
        {
            return Err(SstError::InvariantViolation(
                "keys must be added in increasing order",
            ));
        }

        if self.first_key.is_none() {
            self.first_key = Some(Bytes::copy_from_slice(key));
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.max_seqno = self.max_seqno.max(internal_key::seqno(key));
        self.entries += 1;

        self.data_block.add(key, value);
        if self.data_block.estimated_size() >= self.block_size {
            self.finish_data_block()?;
        }
        Ok(())
    }

    /// Closes the table: flushes the open data block, writes the meta-index
    /// and index blocks and the footer, syncs, and renames the file into
    /// place.
    pub fn finish(mut self) -> Result<SstProperties, SstError> {
        self.finish_data_block()?;

        // Meta-index block; carries no entries yet.
        let meta = self.data_block.finish();
        let meta_handle = self.write_block(&meta)?;

        self.write_pending_index_entry();
        let index = self.index_block.finish();
        let index_handle = self.write_block(&index)?;

        let mut footer = Vec::with_capacity(FOOTER_LEN + MAGIC.len());
        meta_handle.encode_into(&mut footer);
        index_handle.encode_into(&mut footer);
        footer.resize(FOOTER_LEN, 0);
        footer.extend_from_slice(&MAGIC);
        self.file.write_all(&footer)?;
        self.offset += footer.len() as u64;

        self.file.flush()?;
        let file = self
            .file
            .into_inner()
            .map_err(|e| SstError::Io(e.into_error()))?;
        file.sync_data()?;
        drop(file);

        fs::rename(&self.path_tmp, &self.path_final)?;
        sync_parent_dir(&self.path_final)?;

        Ok(SstProperties {
            min_ikey: self.first_key.unwrap_or_default(),
            max_ikey: Bytes::copy_from_slice(&self.last_key),
            file_size: self.offset,
            entries: self.entries,
            max_seqno: self.max_seqno,
        })
    }

    fn finish_data_block(&mut self) -> Result<(), SstError> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        self.write_pending_index_entry();
        let block = self.data_block.finish();
        let handle = self.write_block(&block)?;
        self.pending = Some((self.last_key.clone(), handle));
        self.data_block.reset();
        Ok(())
    }

    fn write_pending_index_entry(&mut self) {
        if let Some((key, handle)) = self.pending.take() {
            let mut encoded = Vec::with_capacity(20);
            handle.encode_into(&mut encoded);
            self.index_block.add(&key, &encoded);
        }
    }

    fn write_block(&mut self, block: &[u8]) -> Result<BlockHandle, SstError> {
        let offset = self.offset;

        let mut compression = NO_COMPRESSION;
        let mut payload = block;
        if self.compression {
            self.compress_buf = snap::raw::Encoder::new()
                .compress_vec(block)
                .map_err(|_| SstError::Corrupt("snappy compression failed"))?;
            // Keep the compressed form only when it saves at least 1/8th.
            if self.compress_buf.len() < block.len() - block.len() / 8 {
                payload = &self.compress_buf;
                compression = SNAPPY_COMPRESSION;
            }
        }

        let crc = crc32c::crc32c_append(crc32c::crc32c(payload), &[compression]);
        self.file.write_all(payload)?;
        self.file.write_all(&[compression])?;
        self.file.write_all(&crc.to_le_bytes())?;
        self.offset += (payload.len() + 1 + 4) as u64;

        Ok(BlockHandle {
            offset,
            size: payload.len() as u64,
        })
    }
}

fn sync_parent_dir(path: &Path) -> Result<(), SstError> {
    let parent = path
        .parent()
        .ok_or(SstError::Corrupt("table path has no parent directory"))?;
    File::open(parent)?.sync_all()?;
    Ok(())
}
