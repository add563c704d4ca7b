//! In-memory write buffer: an ordered map over internal keys.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::internal_key::{InternalKey, KeyKind};

/// The mutable buffer in front of the on-disk levels.
///
/// Entries are keyed by [`InternalKey`], so the map orders them by
/// `(user_key ASC, seqno DESC)` and the newest version of a user key is the
/// first entry at or after a max-seqno lookup key. Tombstones are ordinary
/// entries with [`KeyKind::Del`]; they are kept (and flushed) so they shadow
/// older versions living in the levels below.
#[derive(Debug, Default)]
pub struct MemTable {
    map: SkipMap<InternalKey, Bytes>,
    approximate_bytes: AtomicU64,
}

impl MemTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the entry with exactly this internal key.
    /// Keys and values are owned; callers keep their buffers.
    pub fn put(&self, key: InternalKey, value: impl Into<Bytes>) {
        let value = value.into();
        let bytes = (key.encoded_len() + value.len()) as u64;
        self.map.insert(key, value);
        self.approximate_bytes
            .fetch_add(bytes, AtomicOrdering::Relaxed);
    }

    /// Records a tombstone for `user_key` at `seqno`.
    pub fn delete(&self, user_key: impl Into<Bytes>, seqno: u64) {
        self.put(InternalKey::new(user_key, seqno, KeyKind::Del), Bytes::new());
    }

    /// Looks up the newest entry visible at `lookup` (a max-seqno key for
    /// latest-wins reads).
    ///
    /// Returns:
    /// - `None` if the user key is not present
    /// - `Some(None)` if the newest entry is a tombstone
    /// - `Some(Some(value))` if the newest entry is a value
    pub fn get(&self, lookup: &InternalKey) -> Option<Option<Bytes>> {
        let entry = self.map.lower_bound(Bound::Included(lookup))?;
        let found = entry.key();
        if found.user_key != lookup.user_key {
            return None;
        }
        match found.kind {
            KeyKind::Set => Some(Some(entry.value().clone())),
            KeyKind::Del => Some(None),
        }
    }

    /// Running estimate of bytes held: the sum of encoded key and value
    /// lengths.
    pub fn approximate_bytes(&self) -> u64 {
        self.approximate_bytes.load(AtomicOrdering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Forward iteration in internal-key order. Tombstones are yielded; they
    /// must outlive the flush that persists them.
    pub fn iter(&self) -> impl Iterator<Item = (InternalKey, Bytes)> + '_ {
        self.map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_key::{IKEY_TRAILER_LEN, MAX_SEQNO};

    fn lookup(user_key: &'static [u8]) -> InternalKey {
        InternalKey::new(user_key, MAX_SEQNO, KeyKind::Set)
    }

    #[test]
    fn put_then_get() {
        let mem = MemTable::new();
        mem.put(InternalKey::new(&b"key"[..], 1, KeyKind::Set), &b"value"[..]);
        assert_eq!(
            mem.get(&lookup(b"key")),
            Some(Some(Bytes::from_static(b"value")))
        );
        assert_eq!(mem.get(&lookup(b"missing")), None);
    }

    #[test]
    fn newest_seqno_wins() {
        let mem = MemTable::new();
        mem.put(InternalKey::new(&b"key"[..], 1, KeyKind::Set), &b"old"[..]);
        mem.put(InternalKey::new(&b"key"[..], 2, KeyKind::Set), &b"new"[..]);
        assert_eq!(
            mem.get(&lookup(b"key")),
            Some(Some(Bytes::from_static(b"new")))
        );
    }

    #[test]
    fn tombstone_shadows_older_set() {
        let mem = MemTable::new();
        mem.put(InternalKey::new(&b"key"[..], 1, KeyKind::Set), &b"value"[..]);
        mem.delete(&b"key"[..], 2);
        // Found-as-tombstone: the caller must not consult the levels below.
        assert_eq!(mem.get(&lookup(b"key")), Some(None));

        mem.put(InternalKey::new(&b"key"[..], 3, KeyKind::Set), &b"back"[..]);
        assert_eq!(
            mem.get(&lookup(b"key")),
            Some(Some(Bytes::from_static(b"back")))
        );
    }

    #[test]
    fn same_internal_key_overwrites_in_place() {
        let mem = MemTable::new();
        mem.put(InternalKey::new(&b"key"[..], 5, KeyKind::Set), &b"a"[..]);
        mem.put(InternalKey::new(&b"key"[..], 5, KeyKind::Set), &b"b"[..]);
        assert_eq!(mem.len(), 1);
        assert_eq!(
            mem.get(&lookup(b"key")),
            Some(Some(Bytes::from_static(b"b")))
        );
    }

    #[test]
    fn iterator_yields_ikey_order_with_tombstones() {
        let mem = MemTable::new();
        mem.put(InternalKey::new(&b"b"[..], 2, KeyKind::Set), &b"2"[..]);
        mem.put(InternalKey::new(&b"a"[..], 1, KeyKind::Set), &b"1"[..]);
        mem.delete(&b"a"[..], 3);
        mem.put(InternalKey::new(&b"c"[..], 4, KeyKind::Set), &b"4"[..]);

        let keys: Vec<(Bytes, u64, KeyKind)> = mem
            .iter()
            .map(|(k, _)| (k.user_key.clone(), k.seqno, k.kind))
            .collect();
        assert_eq!(
            keys,
            vec![
                (Bytes::from_static(b"a"), 3, KeyKind::Del),
                (Bytes::from_static(b"a"), 1, KeyKind::Set),
                (Bytes::from_static(b"b"), 2, KeyKind::Set),
                (Bytes::from_static(b"c"), 4, KeyKind::Set),
            ]
        );
    }

    #[test]
    fn approximate_bytes_tracks_inserts() {
        let mem = MemTable::new();
        assert_eq!(mem.approximate_bytes(), 0);
        mem.put(InternalKey::new(&b"key"[..], 1, KeyKind::Set), &b"value"[..]);
        assert_eq!(mem.approximate_bytes(), (3 + IKEY_TRAILER_LEN + 5) as u64);
    }
}
