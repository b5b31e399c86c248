use crate::crypto::SALT_LEN;
use crate::{ArchiveRun, ContentHash, Error, FileVersion, NewVersion, Pattern, Result, RunSummary};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

const SCHEMA_VERSION: u32 = 1;

const META_KEY_SCHEMA_VERSION: &str = "schema_version";
const META_KEY_ENVELOPE_VERSION: &str = "envelope_version";
const META_KEY_ENVELOPE_SALT: &str = "envelope_salt";

/// Lock mode for an index session. `archive` and `restore` take the
/// exclusive lock; `ls` shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    Exclusive,
}

/// The local index database: every archive run and every file version,
/// in one transactional SQLite file guarded by an advisory lock.
pub struct Index {
    conn: Connection,
    _lock: File,
}

impl Index {
    /// Create a fresh index with its schema and repository salt. Fails if
    /// the database file already exists.
    pub fn create(path: &Path, envelope_salt: &[u8; SALT_LEN]) -> Result<Self> {
        if path.exists() {
            return Err(Error::IndexExists {
                path: path.display().to_string(),
            });
        }

        let lock = acquire_lock(path, Access::Exclusive)?;
        let conn = open_connection(path, Access::Exclusive)?;
        conn.execute_batch(
            r#"
            CREATE TABLE meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE archive_runs (
                id INTEGER PRIMARY KEY,
                ts INTEGER NOT NULL,
                summary TEXT NOT NULL
            );
            CREATE TABLE file_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                -- Checked at commit time: version rows are inserted before
                -- the run row they reference.
                run_id INTEGER NOT NULL REFERENCES archive_runs(id)
                    DEFERRABLE INITIALLY DEFERRED,
                path TEXT NOT NULL,
                size INTEGER NOT NULL,
                mtime INTEGER NOT NULL,
                mode INTEGER NOT NULL,
                owner TEXT NOT NULL,
                "group" TEXT NOT NULL,
                hash TEXT
            );
            CREATE INDEX file_versions_by_path ON file_versions(path, run_id);
            "#,
        )?;

        let mut meta = conn.prepare("INSERT INTO meta(key, value) VALUES (?1, ?2)")?;
        meta.execute(params![META_KEY_SCHEMA_VERSION, SCHEMA_VERSION.to_string()])?;
        meta.execute(params![
            META_KEY_ENVELOPE_VERSION,
            crate::crypto::ENVELOPE_VERSION.to_string()
        ])?;
        meta.execute(params![META_KEY_ENVELOPE_SALT, hex::encode(envelope_salt)])?;
        drop(meta);

        debug!(path = %path.display(), "index created");
        Ok(Self { conn, _lock: lock })
    }

    pub fn open(path: &Path, access: Access) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::IndexNotFound {
                path: path.display().to_string(),
            });
        }

        let lock = acquire_lock(path, access)?;
        let conn = open_connection(path, access)?;

        let index = Self { conn, _lock: lock };
        index.verify()?;
        Ok(index)
    }

    /// Confirm this is a readable serac index: expected tables present,
    /// schema version supported, repository salt recorded.
    pub fn verify(&self) -> Result<()> {
        let tables: Vec<String> = self
            .conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name IN ('meta', 'archive_runs', 'file_versions')",
            )?
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        if tables.len() != 3 {
            return Err(Error::Index(
                "database is missing serac tables; not an index or not initialized".to_string(),
            ));
        }

        let schema = self.meta_value(META_KEY_SCHEMA_VERSION)?;
        if schema.as_deref() != Some("1") {
            return Err(Error::Index(format!(
                "unsupported index schema version: {}",
                schema.unwrap_or_else(|| "missing".to_string())
            )));
        }

        self.envelope_salt()?;
        Ok(())
    }

    pub fn envelope_salt(&self) -> Result<[u8; SALT_LEN]> {
        let hex_salt = self
            .meta_value(META_KEY_ENVELOPE_SALT)?
            .ok_or_else(|| Error::Index("repository salt missing from index".to_string()))?;
        let bytes = hex::decode(&hex_salt)
            .map_err(|e| Error::Index(format!("corrupt repository salt: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| Error::Index("corrupt repository salt: wrong length".to_string()))
    }

    pub fn last_run(&self) -> Result<Option<ArchiveRun>> {
        self.conn
            .query_row(
                "SELECT id, ts, summary FROM archive_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?
            .map(|(id, ts, summary)| {
                Ok(ArchiveRun {
                    id,
                    ts,
                    summary: serde_json::from_str(&summary)?,
                })
            })
            .transpose()
    }

    /// The newest non-deleted version of every path, keyed by path. This
    /// is the baseline the differ compares a scan against.
    pub fn latest_state(&self) -> Result<BTreeMap<PathBuf, FileVersion>> {
        let versions = self.visible_versions(i64::MAX)?;
        Ok(versions
            .into_iter()
            .map(|version| (version.path.clone(), version))
            .collect())
    }

    /// Reconstruction: the set of versions visible at `timestamp`,
    /// optionally narrowed by a path pattern, in lexicographic path order.
    pub fn state_at(&self, timestamp: i64, pattern: Option<&Pattern>) -> Result<Vec<FileVersion>> {
        let cutoff: Option<i64> = self.conn.query_row(
            "SELECT MAX(id) FROM archive_runs WHERE ts <= ?1",
            [timestamp],
            |row| row.get(0),
        )?;
        let Some(cutoff) = cutoff else {
            return Ok(Vec::new());
        };

        let mut versions = self.visible_versions(cutoff)?;
        if let Some(pattern) = pattern {
            versions.retain(|version| pattern.matches(&version.path));
        }
        Ok(versions)
    }

    /// Record one archive run: all version rows, then the run row last,
    /// in a single immediate transaction. Returns the committed run.
    ///
    /// Run timestamps must strictly increase across ids, so a wall clock
    /// that rewound between runs is clamped to the previous run's
    /// timestamp plus one.
    pub fn commit_run(
        &mut self,
        started_ts: i64,
        rows: &[NewVersion],
        summary: &RunSummary,
    ) -> Result<ArchiveRun> {
        let summary_json = serde_json::to_string(summary)?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let last: Option<(i64, i64)> = tx
            .query_row(
                "SELECT id, ts FROM archive_runs ORDER BY id DESC LIMIT 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (last_id, last_ts) = last.unwrap_or((0, i64::MIN));
        let run_id = last_id + 1;
        let ts = started_ts.max(last_ts + 1);

        {
            let mut insert = tx.prepare(
                r#"INSERT INTO file_versions
                   (run_id, path, size, mtime, mode, owner, "group", hash)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            )?;
            for row in rows {
                insert.execute(params![
                    run_id,
                    row.path.to_string_lossy().into_owned(),
                    row.size as i64,
                    row.mtime,
                    row.mode,
                    row.owner,
                    row.group,
                    row.hash.map(|hash| hash.to_hex()),
                ])?;
            }
        }

        tx.execute(
            "INSERT INTO archive_runs(id, ts, summary) VALUES (?1, ?2, ?3)",
            params![run_id, ts, summary_json],
        )?;
        tx.commit()?;

        debug!(run_id, rows = rows.len(), "archive run committed");
        Ok(ArchiveRun {
            id: run_id,
            ts,
            summary: summary.clone(),
        })
    }

    fn visible_versions(&self, cutoff_run: i64) -> Result<Vec<FileVersion>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT v.run_id, v.path, v.size, v.mtime, v.mode, v.owner, v."group", v.hash
               FROM file_versions v
               JOIN (
                   SELECT path, MAX(run_id) AS run_id
                   FROM file_versions
                   WHERE run_id <= ?1
                   GROUP BY path
               ) newest ON newest.path = v.path AND newest.run_id = v.run_id
               WHERE v.hash IS NOT NULL
               ORDER BY v.path"#,
        )?;
        let versions = stmt
            .query_map([cutoff_run], row_to_version)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(versions)
    }

    fn meta_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }
}

fn row_to_version(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileVersion> {
    let hash: Option<String> = row.get(7)?;
    let hash = hash
        .map(|hex_hash| {
            ContentHash::from_str(&hex_hash).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    7,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;

    Ok(FileVersion {
        run_id: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        size: row.get::<_, i64>(2)? as u64,
        mtime: row.get(3)?,
        mode: row.get(4)?,
        owner: row.get(5)?,
        group: row.get(6)?,
        hash,
    })
}

fn open_connection(path: &Path, access: Access) -> Result<Connection> {
    let conn = Connection::open(path)?;
    // WAL is a persistent database property; switching it is a write, so
    // only writer connections set it. Readers pick it up from the file.
    if access == Access::Exclusive {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(conn)
}

fn acquire_lock(index_path: &Path, access: Access) -> Result<File> {
    let mut lock_path = index_path.as_os_str().to_os_string();
    lock_path.push(".lock");

    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)?;

    let locked = match access {
        Access::Exclusive => fs4::FileExt::try_lock_exclusive(&file),
        Access::ReadOnly => fs4::FileExt::try_lock_shared(&file),
    };
    locked.map_err(|_| {
        Error::LockConflict(format!(
            "index {} is in use by another serac process",
            index_path.display()
        ))
    })?;
    Ok(file)
}

/// Wall-clock seconds since the epoch, UTC.
pub fn now_ts() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn version_row(path: &str, hash: Option<&str>) -> NewVersion {
        NewVersion {
            path: PathBuf::from(path),
            size: 5,
            mtime: 1_700_000_000,
            mode: 0o100644,
            owner: "root".into(),
            group: "root".into(),
            hash: hash.map(|content| ContentHash::of(content.as_bytes())),
        }
    }

    fn scratch_index() -> (TempDir, Index) {
        let dir = TempDir::new().unwrap();
        let index = Index::create(&dir.path().join("index.db"), &[3u8; SALT_LEN]).unwrap();
        (dir, index)
    }

    #[test]
    fn create_refuses_existing_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        let first = Index::create(&path, &[0u8; SALT_LEN]).unwrap();
        drop(first);
        assert!(matches!(
            Index::create(&path, &[0u8; SALT_LEN]),
            Err(Error::IndexExists { .. })
        ));
    }

    #[test]
    fn open_requires_existing_database() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Index::open(&dir.path().join("missing.db"), Access::ReadOnly),
            Err(Error::IndexNotFound { .. })
        ));
    }

    #[test]
    fn salt_roundtrips_through_meta() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        let salt = [0xAB; SALT_LEN];
        drop(Index::create(&path, &salt).unwrap());

        let index = Index::open(&path, Access::ReadOnly).unwrap();
        assert_eq!(index.envelope_salt().unwrap(), salt);
    }

    #[test]
    fn exclusive_lock_conflicts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        let held = Index::create(&path, &[0u8; SALT_LEN]).unwrap();

        assert!(matches!(
            Index::open(&path, Access::Exclusive),
            Err(Error::LockConflict(_))
        ));
        drop(held);
        Index::open(&path, Access::Exclusive).unwrap();
    }

    #[test]
    fn shared_locks_coexist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.db");
        drop(Index::create(&path, &[0u8; SALT_LEN]).unwrap());

        let _a = Index::open(&path, Access::ReadOnly).unwrap();
        let _b = Index::open(&path, Access::ReadOnly).unwrap();
    }

    #[test]
    fn commit_then_reconstruct() {
        let (_dir, mut index) = scratch_index();

        let run = index
            .commit_run(
                1_000,
                &[version_row("/src/a.txt", Some("hello")), version_row("/src/b.txt", Some("hello"))],
                &RunSummary {
                    files_added: 2,
                    bytes_uploaded: 10,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(run.id, 1);
        assert_eq!(run.ts, 1_000);

        let state = index.state_at(1_000, None).unwrap();
        assert_eq!(state.len(), 2);
        assert_eq!(state[0].path, PathBuf::from("/src/a.txt"));
        assert_eq!(state[1].path, PathBuf::from("/src/b.txt"));

        let reloaded = index.last_run().unwrap().unwrap();
        assert_eq!(reloaded.summary.files_added, 2);
    }

    #[test]
    fn reconstruction_respects_run_cutoff() {
        let (_dir, mut index) = scratch_index();

        index
            .commit_run(100, &[version_row("/f", Some("v1"))], &RunSummary::default())
            .unwrap();
        index
            .commit_run(200, &[version_row("/f", Some("v2"))], &RunSummary::default())
            .unwrap();

        // Before the first run: nothing existed yet.
        assert!(index.state_at(99, None).unwrap().is_empty());

        // Between runs: the earlier run's content is visible.
        let mid = index.state_at(150, None).unwrap();
        assert_eq!(mid[0].hash, Some(ContentHash::of(b"v1")));

        let now = index.state_at(200, None).unwrap();
        assert_eq!(now[0].hash, Some(ContentHash::of(b"v2")));
    }

    #[test]
    fn deletion_markers_hide_paths() {
        let (_dir, mut index) = scratch_index();

        index
            .commit_run(100, &[version_row("/f", Some("v1"))], &RunSummary::default())
            .unwrap();
        index
            .commit_run(200, &[version_row("/f", None)], &RunSummary::default())
            .unwrap();

        assert_eq!(index.state_at(150, None).unwrap().len(), 1);
        assert!(index.state_at(200, None).unwrap().is_empty());
        assert!(index.latest_state().unwrap().is_empty());
    }

    #[test]
    fn pattern_narrows_reconstruction() {
        let (_dir, mut index) = scratch_index();
        index
            .commit_run(
                100,
                &[
                    version_row("/src/a.txt", Some("a")),
                    version_row("/src/sub/b.txt", Some("b")),
                    version_row("/other/c.txt", Some("c")),
                ],
                &RunSummary::default(),
            )
            .unwrap();

        let pattern = Pattern::new("/src").unwrap();
        let state = index.state_at(100, Some(&pattern)).unwrap();
        assert_eq!(state.len(), 2);

        let none = index
            .state_at(100, Some(&Pattern::new("/nowhere").unwrap()))
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn run_timestamps_strictly_increase() {
        let (_dir, mut index) = scratch_index();

        let first = index.commit_run(500, &[], &RunSummary::default()).unwrap();
        // Wall clock rewound; the committed timestamp must still advance.
        let second = index.commit_run(400, &[], &RunSummary::default()).unwrap();
        assert_eq!(first.ts, 500);
        assert_eq!(second.ts, 501);
        assert_eq!(second.id, 2);
    }
}
