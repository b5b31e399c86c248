use crate::scan::ScanEntry;
use crate::{ContentHash, FileVersion};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

/// Classified changes between a scan and the index's latest state.
#[derive(Debug, Default)]
pub struct Changeset {
    /// Present on disk, unknown to the index. Needs hash + upload.
    pub added: Vec<ScanEntry>,
    /// Content changed: needs upload (if the blob is new to the store).
    pub content: Vec<ScanEntry>,
    /// Only metadata changed: new row reusing the previous hash.
    pub metadata: Vec<(ScanEntry, ContentHash)>,
    /// Known to the index, gone from disk: tombstone rows.
    pub deleted: Vec<FileVersion>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.content.is_empty()
            && self.metadata.is_empty()
            && self.deleted.is_empty()
    }
}

/// Compare a scan against the latest-known state.
///
/// `(size, mtime, mode, owner, group)` equality is the fast path: a file
/// matching on all five is untouched and is neither rehashed nor
/// re-recorded. Any difference forces a rehash, because an mtime change
/// alone (including a rewind) does not prove the content changed, and a
/// content change is only real when the hash moved.
pub fn diff(
    scanned: BTreeMap<PathBuf, ScanEntry>,
    mut state: BTreeMap<PathBuf, FileVersion>,
) -> Changeset {
    let mut changes = Changeset::default();

    for (path, entry) in scanned {
        let Some(known) = state.remove(&path) else {
            changes.added.push(entry);
            continue;
        };

        if !metadata_matches(&entry, &known) {
            let hash = match ContentHash::of_file(&entry.path) {
                Ok(hash) => hash,
                Err(err) => {
                    warn!(path = %entry.path.display(), error = %err, "cannot hash changed file, skipping");
                    continue;
                }
            };
            if known.hash == Some(hash) {
                changes.metadata.push((entry, hash));
            } else {
                changes.content.push(entry);
            }
        }
    }

    // Whatever the scan did not visit was deleted since its last version.
    changes.deleted = state.into_values().collect();
    changes
}

fn metadata_matches(entry: &ScanEntry, known: &FileVersion) -> bool {
    entry.size == known.size
        && entry.mtime == known.mtime
        && entry.mode == known.mode
        && entry.owner == known.owner
        && entry.group == known.group
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn entry_for(path: &PathBuf) -> ScanEntry {
        ScanEntry::from_metadata(path.clone(), &fs::metadata(path).unwrap())
    }

    fn known_from(entry: &ScanEntry, content: &[u8], run_id: i64) -> FileVersion {
        FileVersion {
            run_id,
            path: entry.path.clone(),
            size: entry.size,
            mtime: entry.mtime,
            mode: entry.mode,
            owner: entry.owner.clone(),
            group: entry.group.clone(),
            hash: Some(ContentHash::of(content)),
        }
    }

    #[test]
    fn unknown_paths_are_added() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.txt");
        fs::write(&path, "new").unwrap();

        let scanned = BTreeMap::from([(path.clone(), entry_for(&path))]);
        let changes = diff(scanned, BTreeMap::new());

        assert_eq!(changes.added.len(), 1);
        assert!(changes.content.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn identical_metadata_produces_no_change() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("same.txt");
        fs::write(&path, "same").unwrap();

        let entry = entry_for(&path);
        let known = known_from(&entry, b"same", 1);

        let changes = diff(
            BTreeMap::from([(path.clone(), entry)]),
            BTreeMap::from([(path, known)]),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn mtime_change_with_same_content_is_metadata_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("touched.txt");
        fs::write(&path, "stable").unwrap();

        let entry = entry_for(&path);
        let mut known = known_from(&entry, b"stable", 1);
        known.mtime -= 100;

        let changes = diff(
            BTreeMap::from([(path.clone(), entry)]),
            BTreeMap::from([(path, known)]),
        );
        assert_eq!(changes.metadata.len(), 1);
        assert!(changes.content.is_empty());
        assert_eq!(changes.metadata[0].1, ContentHash::of(b"stable"));
    }

    #[test]
    fn rewritten_content_is_detected_via_rehash() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("edited.txt");
        fs::write(&path, "world").unwrap();

        let entry = entry_for(&path);
        // Previous version recorded different content with a different mtime.
        let mut known = known_from(&entry, b"hello", 1);
        known.mtime -= 5;

        let changes = diff(
            BTreeMap::from([(path.clone(), entry)]),
            BTreeMap::from([(path, known)]),
        );
        assert_eq!(changes.content.len(), 1);
        assert!(changes.metadata.is_empty());
    }

    #[test]
    fn owner_change_alone_forces_rehash_but_no_upload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chowned.txt");
        fs::write(&path, "owned").unwrap();

        let entry = entry_for(&path);
        let mut known = known_from(&entry, b"owned", 1);
        known.owner = "somebody-else".into();

        let changes = diff(
            BTreeMap::from([(path.clone(), entry)]),
            BTreeMap::from([(path, known)]),
        );
        assert_eq!(changes.metadata.len(), 1);
    }

    #[test]
    fn missing_paths_become_deletions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");
        fs::write(&path, "bye").unwrap();
        let entry = entry_for(&path);
        let known = known_from(&entry, b"bye", 1);
        fs::remove_file(&path).unwrap();

        let changes = diff(BTreeMap::new(), BTreeMap::from([(path.clone(), known)]));
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.deleted[0].path, path);
    }
}
