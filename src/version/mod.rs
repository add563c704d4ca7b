//! Version catalog: which table files are live, per level.
//!
//! A [`Version`] is an immutable snapshot of per-level file membership. A
//! [`VersionEdit`] is a delta (files added, files removed, a new last
//! sequence number). The [`VersionSet`] applies edits, publishing a fresh
//! `Version` behind an `Arc`; readers clone the `Arc` and keep older
//! versions alive for exactly as long as they hold them.

pub mod manifest;

use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;

use crate::internal_key::{self, Comparator, IKeyComparator};

/// Number of on-disk levels.
pub const NUM_LEVELS: usize = 7;

/// Metadata for one live table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub file_num: u64,
    pub level: usize,
    /// Smallest internal key in the file, encoded.
    pub min_ikey: Bytes,
    /// Largest internal key in the file, encoded.
    pub max_ikey: Bytes,
    pub size_bytes: u64,
    pub last_seq: u64,
}

/// A file scheduled for removal by an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletedFile {
    pub level: usize,
    pub file_num: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    /// New last sequence number; zero means "carry the previous one".
    pub new_seq: u64,
    pub adds: Vec<FileMeta>,
    pub removes: Vec<DeletedFile>,
}

#[derive(Debug)]
pub struct Version {
    seq: u64,
    files: [Vec<FileMeta>; NUM_LEVELS],
}

impl Version {
    fn empty() -> Self {
        Self {
            seq: 0,
            files: std::array::from_fn(|_| Vec::new()),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Files at `level`. Level 0 is ordered by file number ascending (newer
    /// files last); levels 1 and up by smallest key ascending.
    pub fn files(&self, level: usize) -> &[FileMeta] {
        &self.files[level]
    }

    pub fn live_files(&self) -> impl Iterator<Item = &FileMeta> {
        self.files.iter().flatten()
    }

    /// Produces the version that results from applying `edit`: per level, a
    /// set difference against the removals, then the additions, then a
    /// re-sort.
    pub fn apply(&self, edit: &VersionEdit, icmp: &IKeyComparator) -> Version {
        let mut next = Version {
            seq: if edit.new_seq != 0 { edit.new_seq } else { self.seq },
            files: std::array::from_fn(|_| Vec::new()),
        };

        for level in 0..NUM_LEVELS {
            let deleted: HashSet<u64> = edit
                .removes
                .iter()
                .filter(|d| d.level == level)
                .map(|d| d.file_num)
                .collect();

            let files = &mut next.files[level];
            files.extend(
                self.files[level]
                    .iter()
                    .filter(|f| !deleted.contains(&f.file_num))
                    .cloned(),
            );
            files.extend(edit.adds.iter().filter(|f| f.level == level).cloned());

            if level == 0 {
                files.sort_by_key(|f| f.file_num);
            } else {
                files.sort_by(|a, b| icmp.compare(&a.min_ikey, &b.min_ikey));
            }
        }
        next
    }

    /// Whether `user_key` falls inside the file's key range.
    pub fn file_straddles(file: &FileMeta, user_key: &[u8], cmp: &dyn Comparator) -> bool {
        cmp.compare(user_key, internal_key::user_key(&file.min_ikey)) != std::cmp::Ordering::Less
            && cmp.compare(user_key, internal_key::user_key(&file.max_ikey))
                != std::cmp::Ordering::Greater
    }
}

/// Owner of the current [`Version`] and the comparator the levels are
/// sorted by.
///
/// Superseded versions stay alive only while an outstanding reader holds the
/// `Arc` it cloned from [`current`](Self::current); there is no separate
/// chain to maintain.
#[derive(Debug)]
pub struct VersionSet {
    current: Arc<Version>,
    icmp: IKeyComparator,
}

impl VersionSet {
    pub fn new(icmp: IKeyComparator) -> Self {
        Self {
            current: Arc::new(Version::empty()),
            icmp,
        }
    }

    pub fn current(&self) -> Arc<Version> {
        self.current.clone()
    }

    pub fn seq(&self) -> u64 {
        self.current.seq
    }

    /// Applies an edit and publishes the resulting version.
    pub fn apply(&mut self, edit: &VersionEdit) {
        self.current = Arc::new(self.current.apply(edit, &self.icmp));
    }

    /// The current version expressed as a single "add everything" edit, used
    /// as the first record of a fresh manifest.
    pub fn as_version_edit(&self) -> VersionEdit {
        VersionEdit {
            new_seq: 0,
            adds: self.current.live_files().cloned().collect(),
            removes: Vec::new(),
        }
    }

    /// Highest file number referenced by any live file.
    pub fn max_file_num(&self) -> Option<u64> {
        self.current.live_files().map(|f| f.file_num).max()
    }

    /// Highest sequence number observable in live file boundary keys. Used
    /// to harden sequence seeding at open against manifests whose first
    /// record carries no sequence.
    pub fn max_boundary_seqno(&self) -> u64 {
        self.current
            .live_files()
            .map(|f| {
                internal_key::seqno(&f.min_ikey).max(internal_key::seqno(&f.max_ikey))
            })
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal_key::{BytewiseComparator, InternalKey, KeyKind};
    use std::sync::Arc as StdArc;

    fn icmp() -> IKeyComparator {
        IKeyComparator::new(StdArc::new(BytewiseComparator))
    }

    fn ikey(user_key: &str, seqno: u64) -> Bytes {
        InternalKey::new(Bytes::from(user_key.to_string()), seqno, KeyKind::Set).encode()
    }

    fn file(level: usize, file_num: u64, min: &str, max: &str) -> FileMeta {
        FileMeta {
            file_num,
            level,
            min_ikey: ikey(min, 1),
            max_ikey: ikey(max, 1),
            size_bytes: 100,
            last_seq: 1,
        }
    }

    #[test]
    fn apply_adds_and_removes_per_level() {
        let mut set = VersionSet::new(icmp());
        set.apply(&VersionEdit {
            new_seq: 10,
            adds: vec![file(1, 123, "test", "testMax"), file(2, 12, "a", "z")],
            removes: vec![],
        });
        assert_eq!(set.current().files(1).len(), 1);
        assert_eq!(set.current().files(2).len(), 1);

        set.apply(&VersionEdit {
            new_seq: 0,
            adds: vec![],
            removes: vec![DeletedFile {
                level: 1,
                file_num: 123,
            }],
        });
        let version = set.current();
        assert!(version.files(1).is_empty());
        assert_eq!(version.files(2)[0].file_num, 12);
    }

    #[test]
    fn zero_seq_carries_previous() {
        let mut set = VersionSet::new(icmp());
        set.apply(&VersionEdit {
            new_seq: 42,
            ..Default::default()
        });
        set.apply(&VersionEdit::default());
        assert_eq!(set.seq(), 42);
    }

    #[test]
    fn level_zero_sorts_by_file_num() {
        let mut set = VersionSet::new(icmp());
        set.apply(&VersionEdit {
            new_seq: 1,
            adds: vec![file(0, 7, "m", "z"), file(0, 3, "a", "n")],
            removes: vec![],
        });
        let version = set.current();
        let nums: Vec<u64> = version.files(0).iter().map(|f| f.file_num).collect();
        assert_eq!(nums, vec![3, 7]);
    }

    #[test]
    fn upper_levels_sort_by_min_key() {
        let mut set = VersionSet::new(icmp());
        set.apply(&VersionEdit {
            new_seq: 1,
            adds: vec![file(1, 9, "m", "p"), file(1, 4, "a", "c")],
            removes: vec![],
        });
        let version = set.current();
        let nums: Vec<u64> = version.files(1).iter().map(|f| f.file_num).collect();
        assert_eq!(nums, vec![4, 9]);
    }

    #[test]
    fn old_versions_survive_while_referenced() {
        let mut set = VersionSet::new(icmp());
        set.apply(&VersionEdit {
            new_seq: 1,
            adds: vec![file(0, 1, "a", "b")],
            removes: vec![],
        });
        let pinned = set.current();
        set.apply(&VersionEdit {
            new_seq: 2,
            adds: vec![],
            removes: vec![DeletedFile {
                level: 0,
                file_num: 1,
            }],
        });
        assert_eq!(pinned.files(0).len(), 1);
        assert!(set.current().files(0).is_empty());
    }

    #[test]
    fn as_version_edit_lists_all_live_files() {
        let mut set = VersionSet::new(icmp());
        set.apply(&VersionEdit {
            new_seq: 5,
            adds: vec![file(0, 1, "a", "b"), file(3, 2, "c", "d")],
            removes: vec![],
        });
        let edit = set.as_version_edit();
        assert_eq!(edit.new_seq, 0);
        assert_eq!(edit.adds.len(), 2);
        assert!(edit.removes.is_empty());
    }
}
