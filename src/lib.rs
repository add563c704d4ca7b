//! `shaledb` is a log-structured merge-tree (LSM) based key-value store.
//!
//! Keys and values are arbitrary byte strings. Writes land in an in-memory
//! ordered buffer and are flushed as immutable sorted tables into a tiered
//! on-disk layout; deletes are tombstones. Internal entries are ordered by
//! `(user_key ASC, seqno DESC)`, table metadata is versioned through a
//! manifest pointed at by `CURRENT`, and every on-disk frame carries a
//! crc32c.
//!
//! The handle is single-writer: callers serialise access, and the memtable
//! flush runs inline with the write that crosses the size threshold.

pub mod db;
pub(crate) mod filenames;
pub mod internal_key;
pub mod memtable;
pub mod record;
pub mod sst;
pub mod varint;
pub mod version;
pub mod wal;

pub use db::{Db, DbOptions, LockError, Value};
pub use internal_key::{BytewiseComparator, Comparator};
