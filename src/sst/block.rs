//! Block encoding: prefix-compressed entries with restart points.
//!
//! ```text
//! entry:   varint(shared) | varint(non_shared) | varint(value_len)
//!          | key[shared..] | value
//! trailer: u32_le restart_offset * num_restarts | u32_le num_restarts
//! ```
//!
//! Every `restart_interval` entries the key is stored in full
//! (`shared == 0`) and its offset recorded in the restart array, which is
//! the entry point for binary search.

use std::cmp::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::internal_key::Comparator;
use crate::sst::SstError;
use crate::varint::{put_uvarint, take_uvarint};

pub(crate) struct BlockBuilder {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    restart_interval: usize,
    counter: usize,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buf: Vec::new(),
            restarts: vec![0],
            restart_interval: restart_interval.max(1),
            counter: 0,
            last_key: Vec::new(),
        }
    }

    /// Appends an entry. Keys must arrive in increasing order; the caller
    /// enforces that.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        let mut shared = 0;
        if self.counter < self.restart_interval {
            let max = key.len().min(self.last_key.len());
            while shared < max && key[shared] == self.last_key[shared] {
                shared += 1;
            }
        } else {
            self.restarts.push(self.buf.len() as u32);
            self.counter = 0;
        }

        put_uvarint(&mut self.buf, shared as u64);
        put_uvarint(&mut self.buf, (key.len() - shared) as u64);
        put_uvarint(&mut self.buf, value.len() as u64);
        self.buf.extend_from_slice(&key[shared..]);
        self.buf.extend_from_slice(value);

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.counter += 1;
    }

    /// Appends the restart array and returns the finished block, leaving the
    /// builder ready for [`reset`](Self::reset).
    pub fn finish(&mut self) -> Vec<u8> {
        for restart in &self.restarts {
            self.buf.extend_from_slice(&restart.to_le_bytes());
        }
        let count = self.restarts.len() as u32;
        self.buf.extend_from_slice(&count.to_le_bytes());
        std::mem::take(&mut self.buf)
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.last_key.clear();
        self.counter = 0;
    }

    /// Size the block would occupy if finished now.
    pub fn estimated_size(&self) -> usize {
        self.buf.len() + 4 * (self.restarts.len() + 1)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Iterator over one decoded block. Owns the (possibly decompressed) block
/// bytes so its lifetime is independent of where they came from.
pub(crate) struct BlockIter {
    data: Bytes,
    restart_offset: usize,
    num_restarts: usize,
    cmp: Arc<dyn Comparator>,
    offset: usize,
    key: Vec<u8>,
    value: Bytes,
}

impl BlockIter {
    pub fn new(block: Bytes, cmp: Arc<dyn Comparator>) -> Result<Self, SstError> {
        if block.len() < 4 {
            return Err(SstError::Corrupt("block too small for restart count"));
        }
        let num_restarts =
            u32::from_le_bytes(block[block.len() - 4..].try_into().unwrap()) as usize;
        let restart_offset = (block.len() - 4)
            .checked_sub(4 * num_restarts)
            .ok_or(SstError::Corrupt("restart array larger than block"))?;
        Ok(Self {
            data: block,
            restart_offset,
            num_restarts,
            cmp,
            offset: 0,
            key: Vec::new(),
            value: Bytes::new(),
        })
    }

    /// Advances to the next entry. Returns `false` at end of block, after
    /// which `key` and `value` are empty.
    pub fn next(&mut self) -> Result<bool, SstError> {
        if self.offset >= self.restart_offset {
            self.key.clear();
            self.value = Bytes::new();
            return Ok(false);
        }

        let (shared, non_shared, value_len, mut pos) = self.decode_entry(self.offset)?;
        if shared > self.key.len() {
            return Err(SstError::Corrupt("shared prefix longer than previous key"));
        }
        let end = pos
            .checked_add(non_shared)
            .and_then(|p| p.checked_add(value_len))
            .ok_or(SstError::Corrupt("entry length overflow"))?;
        if end > self.restart_offset {
            return Err(SstError::Corrupt("entry overruns restart array"));
        }

        self.key.truncate(shared);
        self.key.extend_from_slice(&self.data[pos..pos + non_shared]);
        pos += non_shared;
        self.value = self.data.slice(pos..pos + value_len);
        self.offset = end;
        Ok(true)
    }

    /// Positions the iterator at the first entry whose key is `>= target`.
    /// Returns `false` if no such entry exists.
    pub fn seek(&mut self, target: &[u8]) -> Result<bool, SstError> {
        if self.restart_offset == 0 {
            return Ok(false);
        }

        // Greatest restart whose (fully stored) key is <= target; linear scan
        // from there.
        let mut lo = 0usize;
        let mut hi = self.num_restarts;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key = self.restart_key(mid)?;
            if self.cmp.compare(key, target) == Ordering::Greater {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        let restart = lo.saturating_sub(1);

        self.offset = self.restart_point(restart)? as usize;
        self.key.clear();
        while self.next()? {
            if self.cmp.compare(&self.key, target) != Ordering::Less {
                return Ok(true);
            }
        }
        Ok(false)
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    fn restart_point(&self, index: usize) -> Result<u32, SstError> {
        let at = self.restart_offset + 4 * index;
        let offset = u32::from_le_bytes(self.data[at..at + 4].try_into().unwrap());
        if offset as usize >= self.restart_offset && self.restart_offset > 0 {
            return Err(SstError::Corrupt("restart point past entry data"));
        }
        Ok(offset)
    }

    /// Key stored in full at a restart point.
    fn restart_key(&self, index: usize) -> Result<&[u8], SstError> {
        let offset = self.restart_point(index)? as usize;
        let (shared, non_shared, _, pos) = self.decode_entry(offset)?;
        if shared != 0 {
            return Err(SstError::Corrupt("restart entry shares a prefix"));
        }
        if pos + non_shared > self.restart_offset {
            return Err(SstError::Corrupt("entry overruns restart array"));
        }
        Ok(&self.data[pos..pos + non_shared])
    }

    fn decode_entry(&self, offset: usize) -> Result<(usize, usize, usize, usize), SstError> {
        let region = &self.data[..self.restart_offset];
        let mut pos = offset;
        let (shared, n) = take_uvarint(&region[pos..])?;
        pos += n;
        let (non_shared, n) = take_uvarint(&region[pos..])?;
        pos += n;
        let (value_len, n) = take_uvarint(&region[pos..])?;
        pos += n;
        Ok((shared as usize, non_shared as usize, value_len as usize, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_key::{BytewiseComparator, IKeyComparator, InternalKey, KeyKind};

    fn ikey(user_key: &str, seqno: u64) -> Vec<u8> {
        InternalKey::new(Bytes::from(user_key.to_string()), seqno, KeyKind::Set)
            .encode()
            .to_vec()
    }

    fn icmp() -> Arc<dyn Comparator> {
        Arc::new(IKeyComparator::new(Arc::new(BytewiseComparator)))
    }

    fn build(entries: &[(Vec<u8>, Vec<u8>)], restart_interval: usize) -> Bytes {
        let mut builder = BlockBuilder::new(restart_interval);
        for (k, v) in entries {
            builder.add(k, v);
        }
        Bytes::from(builder.finish())
    }

    fn sample_entries(n: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
        (0..n)
            .map(|i| {
                (
                    ikey(&format!("key{i:04}"), 1),
                    format!("value{i}").into_bytes(),
                )
            })
            .collect()
    }

    #[test]
    fn iterates_all_entries_in_order() {
        let entries = sample_entries(50);
        let mut iter = BlockIter::new(build(&entries, 16), icmp()).unwrap();
        for (k, v) in &entries {
            assert!(iter.next().unwrap());
            assert_eq!(iter.key(), &k[..]);
            assert_eq!(iter.value(), &v[..]);
        }
        assert!(!iter.next().unwrap());
        assert!(iter.key().is_empty());
        assert!(iter.value().is_empty());
    }

    #[test]
    fn prefix_compression_shrinks_shared_keys() {
        let entries = sample_entries(50);
        let raw: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
        let block = build(&entries, 16);
        assert!(block.len() < raw + 4 * 6);
    }

    #[test]
    fn seek_lands_on_present_keys() {
        let entries = sample_entries(100);
        let mut iter = BlockIter::new(build(&entries, 16), icmp()).unwrap();
        for (k, v) in &entries {
            assert!(iter.seek(k).unwrap());
            assert_eq!(iter.key(), &k[..]);
            assert_eq!(iter.value(), &v[..]);
        }
    }

    #[test]
    fn seek_absent_key_lands_on_next_greater() {
        let entries = vec![
            (ikey("b", 1), b"1".to_vec()),
            (ikey("d", 1), b"2".to_vec()),
            (ikey("f", 1), b"3".to_vec()),
        ];
        let mut iter = BlockIter::new(build(&entries, 16), icmp()).unwrap();

        assert!(iter.seek(&ikey("a", 1)).unwrap());
        assert_eq!(iter.key(), &entries[0].0[..]);

        assert!(iter.seek(&ikey("c", 1)).unwrap());
        assert_eq!(iter.key(), &entries[1].0[..]);

        assert!(!iter.seek(&ikey("g", 1)).unwrap());
    }

    #[test]
    fn seek_with_restart_interval_one() {
        // The index block layout: every entry is a restart.
        let entries = sample_entries(10);
        let mut iter = BlockIter::new(build(&entries, 1), icmp()).unwrap();
        for (k, _) in &entries {
            assert!(iter.seek(k).unwrap());
            assert_eq!(iter.key(), &k[..]);
        }
    }

    #[test]
    fn empty_block_yields_nothing() {
        let mut builder = BlockBuilder::new(16);
        let block = Bytes::from(builder.finish());
        let mut iter = BlockIter::new(block, icmp()).unwrap();
        assert!(!iter.next().unwrap());
        assert!(!iter.seek(&ikey("a", 1)).unwrap());
    }

    #[test]
    fn corrupt_restart_count_is_rejected() {
        let entries = sample_entries(4);
        let mut block = build(&entries, 16).to_vec();
        let at = block.len() - 4;
        block[at..].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            BlockIter::new(Bytes::from(block), icmp()),
            Err(SstError::Corrupt(_))
        ));
    }

    #[test]
    fn truncated_entry_is_corrupt() {
        let entries = sample_entries(4);
        let block = build(&entries, 16);
        // Rebuild the block with a restart array pointing into a shortened
        // entry region.
        let cut = 5;
        let mut bad = block[..block.len() - 8 - cut].to_vec();
        bad.extend_from_slice(&0u32.to_le_bytes());
        bad.extend_from_slice(&1u32.to_le_bytes());
        let mut iter = BlockIter::new(Bytes::from(bad), icmp()).unwrap();
        let mut result = Ok(true);
        while matches!(result, Ok(true)) {
            result = iter.next();
        }
        assert!(matches!(result, Err(SstError::Corrupt(_))));
    }
}
