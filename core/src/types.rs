use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Hashing reads source files in 64K blocks.
const HASH_BLOCK_SIZE: usize = 64 * 1024;

/// SHA-256 of a file's plaintext, lowercase hex. Doubles as the blob name
/// in the object store and as the identity key for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Streamed hash of a file on disk.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_BLOCK_SIZE];
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for ContentHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut array = [0u8; 32];
        array.copy_from_slice(&bytes);
        Ok(Self(array))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One observation of a path, as persisted in the index. `hash` of `None`
/// is the deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVersion {
    pub run_id: i64,
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
    pub owner: String,
    pub group: String,
    pub hash: Option<ContentHash>,
}

impl FileVersion {
    pub fn is_deleted(&self) -> bool {
        self.hash.is_none()
    }

    /// Permission bits rendered in the usual ten-character form, eg
    /// `-rwxr-xr-x`.
    pub fn mode_display(&self) -> String {
        let mut out = String::with_capacity(10);
        out.push('-');
        let perms = self.mode & 0o777;
        for shift in [6u32, 3, 0] {
            let bits = (perms >> shift) & 0o7;
            out.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            out.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            out.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        out
    }

    pub fn size_display(&self) -> String {
        let mut size = self.size as f64;
        for unit in ["", "K", "M", "G"] {
            if size < 1024.0 {
                return format!("{:.0}{}", size, unit);
            }
            size /= 1024.0;
        }
        format!("{:.0}T", size)
    }
}

/// A version row waiting for its run id, buffered by the archiver until
/// the commit transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVersion {
    pub path: PathBuf,
    pub size: u64,
    pub mtime: i64,
    pub mode: u32,
    pub owner: String,
    pub group: String,
    pub hash: Option<ContentHash>,
}

impl NewVersion {
    /// Deletion marker carrying the last-known metadata of the path.
    pub fn deletion_of(previous: &FileVersion) -> Self {
        Self {
            path: previous.path.clone(),
            size: previous.size,
            mtime: previous.mtime,
            mode: previous.mode,
            owner: previous.owner.clone(),
            group: previous.group.clone(),
            hash: None,
        }
    }
}

/// Counters recorded with each archive run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub files_added: u64,
    pub files_changed: u64,
    pub files_removed: u64,
    pub bytes_uploaded: u64,
}

/// One successful invocation of the archive command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveRun {
    pub id: i64,
    pub ts: i64,
    pub summary: RunSummary,
}
