//! Sorted-table (SST) format: reader side and shared layout.
//!
//! File layout, bottom to top:
//!
//! ```text
//! [data block 0][trailer] ... [data block n-1][trailer]
//! [meta-index block][trailer]
//! [index block][trailer]
//! [footer: metaindex handle | index handle | padding to 40][magic(8)]
//! ```
//!
//! Each block trailer is five bytes: a compression type byte and a
//! little-endian crc32c over `payload || compression_byte`. Index entries
//! map the last key of a data block to its [`BlockHandle`].

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;

use crate::internal_key::{self, Comparator, IKeyComparator, InternalKey, KeyKind};
use crate::varint::{put_uvarint, take_uvarint, VarintError};

pub(crate) mod block;
mod builder;
mod iter;

pub use builder::{SstBuilder, SstProperties};
pub use iter::SstIter;

pub(crate) const MAGIC: [u8; 8] = [0x57, 0xfb, 0x80, 0x8b, 0x24, 0x75, 0x47, 0xdb];
pub(crate) const BLOCK_TRAILER_LEN: usize = 5;
pub(crate) const FOOTER_LEN: usize = 40;

pub(crate) const NO_COMPRESSION: u8 = 0;
pub(crate) const SNAPPY_COMPRESSION: u8 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SstError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table corrupt: {0}")]
    Corrupt(&'static str),

    #[error("invariant violation: {0}")]
    InvariantViolation(&'static str),
}

impl From<VarintError> for SstError {
    fn from(_: VarintError) -> Self {
        SstError::Corrupt("malformed varint")
    }
}

/// Pointer to a block inside the table file. `size` excludes the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        put_uvarint(buf, self.offset);
        put_uvarint(buf, self.size);
    }

    pub(crate) fn decode(input: &[u8]) -> Result<(Self, usize), SstError> {
        let (offset, n) = take_uvarint(input)?;
        let (size, m) = take_uvarint(&input[n..])?;
        Ok((Self { offset, size }, n + m))
    }
}

/// Immutable reader over one table file.
///
/// The index block is verified and pinned at open; data blocks are read,
/// verified, and decompressed on demand at each seek. The reader holds no
/// block cache and is safe to share once constructed.
pub struct SstReader {
    path: PathBuf,
    mmap: Mmap,
    index_block: Bytes,
    icmp: IKeyComparator,
    cmp: Arc<dyn Comparator>,
}

impl SstReader {
    pub fn open(path: impl AsRef<Path>, icmp: IKeyComparator) -> Result<Self, SstError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < FOOTER_LEN + MAGIC.len() {
            return Err(SstError::Corrupt("table too small"));
        }
        if mmap[mmap.len() - MAGIC.len()..] != MAGIC {
            return Err(SstError::Corrupt("bad magic"));
        }

        let footer = &mmap[mmap.len() - MAGIC.len() - FOOTER_LEN..mmap.len() - MAGIC.len()];
        let (meta_handle, n) = BlockHandle::decode(footer)?;
        let (index_handle, _) = BlockHandle::decode(&footer[n..])?;

        let cmp: Arc<dyn Comparator> = Arc::new(icmp.clone());
        let index_block = read_block_at(&mmap, index_handle)?;
        // The meta-index carries no entries yet; reading it still validates
        // the handle and checksum.
        read_block_at(&mmap, meta_handle)?;

        Ok(Self {
            path,
            mmap,
            index_block,
            icmp,
            cmp,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Two-level iterator over the whole table.
    pub fn iter(&self) -> Result<SstIter<'_>, SstError> {
        SstIter::new(self)
    }

    /// Point lookup with the visibility rule for internal keys.
    ///
    /// Returns:
    /// - `None` if no entry for the user key is at or after `lookup`
    /// - `Some(None)` if the newest such entry is a tombstone
    /// - `Some(Some(value))` if it is a value
    pub fn get_ikey(&self, lookup: &[u8]) -> Result<Option<Option<Bytes>>, SstError> {
        let mut iter = self.iter()?;
        if !iter.seek(lookup)? {
            return Ok(None);
        }
        let found = InternalKey::decode(iter.key())
            .map_err(|_| SstError::Corrupt("undecodable internal key"))?;
        if self
            .icmp
            .user_cmp()
            .compare(&found.user_key, internal_key::user_key(lookup))
            != std::cmp::Ordering::Equal
        {
            return Ok(None);
        }
        Ok(Some(match found.kind {
            KeyKind::Set => Some(Bytes::copy_from_slice(iter.value())),
            KeyKind::Del => None,
        }))
    }

    pub(crate) fn index_block(&self) -> Bytes {
        self.index_block.clone()
    }

    pub(crate) fn comparator(&self) -> Arc<dyn Comparator> {
        self.cmp.clone()
    }

    pub(crate) fn read_block(&self, handle: BlockHandle) -> Result<Bytes, SstError> {
        read_block_at(&self.mmap, handle)
    }
}

/// Reads, checksum-verifies, and decompresses one block.
fn read_block_at(mmap: &Mmap, handle: BlockHandle) -> Result<Bytes, SstError> {
    let start = handle.offset as usize;
    let end = start
        .checked_add(handle.size as usize)
        .and_then(|e| e.checked_add(BLOCK_TRAILER_LEN))
        .ok_or(SstError::Corrupt("block handle overflow"))?;
    if end > mmap.len() {
        return Err(SstError::Corrupt("block handle out of bounds"));
    }

    let payload = &mmap[start..start + handle.size as usize];
    let compression = mmap[start + handle.size as usize];
    let stored =
        u32::from_le_bytes(mmap[end - 4..end].try_into().unwrap());
    let computed = crc32c::crc32c_append(crc32c::crc32c(payload), &[compression]);
    if computed != stored {
        return Err(SstError::Corrupt("block checksum mismatch"));
    }

    match compression {
        NO_COMPRESSION => Ok(Bytes::copy_from_slice(payload)),
        SNAPPY_COMPRESSION => {
            let decoded = snap::raw::Decoder::new()
                .decompress_vec(payload)
                .map_err(|_| SstError::Corrupt("snappy decompression failed"))?;
            Ok(Bytes::from(decoded))
        }
        _ => Err(SstError::Corrupt("unknown compression type")),
    }
}
