use crate::{Pattern, Result};
use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Metadata for one regular file observed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
    pub owner: String,
    pub group: String,
}

impl ScanEntry {
    #[cfg(unix)]
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            size: metadata.len(),
            mtime: metadata.mtime(),
            mode: metadata.mode(),
            owner: crate::principal::user_name(metadata.uid()),
            group: crate::principal::group_name(metadata.gid()),
            path,
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Self {
            size: metadata.len(),
            mtime,
            mode: 0o644,
            owner: "0".to_string(),
            group: "0".to_string(),
            path,
        }
    }
}

/// Walks the configured include roots, applying the exclude filters.
pub struct Scanner {
    includes: Vec<PathBuf>,
    excludes: Vec<Pattern>,
}

impl Scanner {
    pub fn new(includes: Vec<PathBuf>, excludes: Vec<Pattern>) -> Self {
        Self { includes, excludes }
    }

    /// Enumerate every regular file under the include roots, in
    /// lexicographic path order. Entries under an excluded prefix are not
    /// descended into; unreadable or non-regular entries are logged and
    /// skipped.
    pub fn scan(&self) -> Result<BTreeMap<PathBuf, ScanEntry>> {
        let mut entries = BTreeMap::new();

        for root in &self.includes {
            if !root.exists() {
                warn!(path = %root.display(), "include path does not exist, skipping");
                continue;
            }
            self.scan_root(root, &mut entries);
        }

        Ok(entries)
    }

    fn scan_root(&self, root: &Path, entries: &mut BTreeMap<PathBuf, ScanEntry>) {
        let mut walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        while let Some(entry) = walker.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "cannot read directory entry, skipping");
                    continue;
                }
            };
            let path = entry.path();

            if self.is_excluded(path) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_dir() {
                continue;
            }

            // Symlinks are recorded by path but never traversed: a link to
            // a regular file is archived as that content, anything else is
            // skipped.
            let metadata = if entry.file_type().is_symlink() {
                match std::fs::metadata(path) {
                    Ok(metadata) if metadata.is_file() => metadata,
                    Ok(_) => {
                        warn!(path = %path.display(), "symlink does not point at a regular file, skipping");
                        continue;
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "broken symlink, skipping");
                        continue;
                    }
                }
            } else if entry.file_type().is_file() {
                match entry.metadata() {
                    Ok(metadata) => metadata,
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "cannot stat file, skipping");
                        continue;
                    }
                }
            } else {
                warn!(path = %path.display(), "not a regular file, skipping");
                continue;
            };

            entries.insert(
                path.to_path_buf(),
                ScanEntry::from_metadata(path.to_path_buf(), &metadata),
            );
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.excludes.iter().any(|pattern| pattern.matches(path))
    }
}
