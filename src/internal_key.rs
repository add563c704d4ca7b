//! Internal key format and ordering.
//!
//! Every entry in the engine is keyed by an internal key: the user key
//! followed by an 8-byte trailer holding a one-byte kind and a 56-bit
//! sequence number (little-endian). Internal keys order by
//! `(user_key ASC, seqno DESC)`, so the newest version of a user key sorts
//! first among entries sharing that key. The kind byte does not participate
//! in ordering; sequence numbers are unique per write.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// Length of the kind + sequence trailer.
pub const IKEY_TRAILER_LEN: usize = 8;

/// Largest sequence number the 56-bit trailer can carry. Lookups use this
/// so the smallest internal key at or after the lookup key is the newest
/// version of that user key.
pub const MAX_SEQNO: u64 = (1 << 56) - 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("internal key shorter than its trailer")]
    Truncated,

    #[error("unknown key kind: {0}")]
    UnknownKind(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KeyKind {
    /// A tombstone shadowing older versions of the user key.
    Del = 0,
    /// A point key/value.
    Set = 1,
}

impl KeyKind {
    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        match value {
            0 => Ok(Self::Del),
            1 => Ok(Self::Set),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }

    pub fn is_tombstone(self) -> bool {
        matches!(self, Self::Del)
    }
}

/// Internal key `(user_key, seqno, kind)`.
#[derive(Debug, Clone)]
pub struct InternalKey {
    pub user_key: Bytes,
    pub seqno: u64,
    pub kind: KeyKind,
}

impl InternalKey {
    pub fn new(user_key: impl Into<Bytes>, seqno: u64, kind: KeyKind) -> Self {
        Self {
            user_key: user_key.into(),
            seqno,
            kind,
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.user_key.len() + IKEY_TRAILER_LEN
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.user_key.as_ref());
        buf.push(self.kind as u8);
        let seq = self.seqno & MAX_SEQNO;
        buf.extend_from_slice(&seq.to_le_bytes()[..7]);
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        Bytes::from(buf)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DecodeError> {
        if raw.len() < IKEY_TRAILER_LEN {
            return Err(DecodeError::Truncated);
        }
        let split = raw.len() - IKEY_TRAILER_LEN;
        let kind = KeyKind::from_u8(raw[split])?;
        Ok(Self {
            user_key: Bytes::copy_from_slice(&raw[..split]),
            seqno: seqno(raw),
            kind,
        })
    }
}

impl PartialEq for InternalKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for InternalKey {}

impl PartialOrd for InternalKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InternalKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.user_key.cmp(&other.user_key) {
            Ordering::Equal => other.seqno.cmp(&self.seqno),
            other => other,
        }
    }
}

/// User-key portion of an encoded internal key.
pub fn user_key(raw: &[u8]) -> &[u8] {
    &raw[..raw.len().saturating_sub(IKEY_TRAILER_LEN)]
}

/// Sequence number of an encoded internal key. A key too short to carry a
/// trailer reads as sequence zero so comparisons stay total.
pub fn seqno(raw: &[u8]) -> u64 {
    if raw.len() < IKEY_TRAILER_LEN {
        return 0;
    }
    let trailer = &raw[raw.len() - 7..];
    let mut seq = [0u8; 8];
    seq[..7].copy_from_slice(trailer);
    u64::from_le_bytes(seq)
}

/// Ordering over user keys, supplied at database open.
pub trait Comparator: fmt::Debug + Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// The default comparator: plain lexicographic byte order.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Comparator over encoded internal keys, wrapping a user comparator.
#[derive(Debug, Clone)]
pub struct IKeyComparator {
    user_cmp: Arc<dyn Comparator>,
}

impl IKeyComparator {
    pub fn new(user_cmp: Arc<dyn Comparator>) -> Self {
        Self { user_cmp }
    }

    pub fn user_cmp(&self) -> &dyn Comparator {
        self.user_cmp.as_ref()
    }
}

impl Comparator for IKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user_cmp.compare(user_key(a), user_key(b)) {
            Ordering::Equal => seqno(b).cmp(&seqno(a)),
            other => other,
        }
    }
}
