use crate::crypto::Envelope;
use crate::index::Index;
use crate::store::{ObjectStore, Retrieval};
use crate::{ContentHash, Error, FileVersion, Pattern, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Per-path results of a restore invocation. Per-file failures and cold
/// retrievals do not stop the run; the caller turns a non-empty `failed`
/// or `pending` list into a partial-success exit.
#[derive(Debug, Default)]
pub struct RestoreOutcome {
    pub restored: Vec<PathBuf>,
    /// Destination already held the exact content; nothing was fetched.
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, Error)>,
    /// Blobs frozen in cold storage; a thaw was requested for each.
    pub pending: Vec<PathBuf>,
}

impl RestoreOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }
}

/// Materialize the state visible at `timestamp` under `destination`.
///
/// Each file lands at `destination/<original absolute path>`. Metadata is
/// reapplied from the version row; owner and group are resolved by name
/// on this system and silently become the invoking user when that is all
/// the process can do.
pub async fn restore(
    index: &Index,
    store: Arc<dyn ObjectStore>,
    envelope: &Envelope,
    timestamp: i64,
    pattern: Option<&Pattern>,
    destination: &Path,
) -> Result<RestoreOutcome> {
    let versions = index.state_at(timestamp, pattern)?;
    let mut outcome = RestoreOutcome::default();

    for version in versions {
        let target = target_path(destination, &version.path);

        match restore_file(&*store, envelope, &version, &target).await {
            Ok(FileResult::Restored) => outcome.restored.push(version.path),
            Ok(FileResult::Skipped) => outcome.skipped.push(version.path),
            Ok(FileResult::Pending) => outcome.pending.push(version.path),
            Err(err @ Error::ObjectMissing { .. }) => {
                // A hole in the archive is not a per-file condition: the
                // index promised this object exists.
                error!(path = %version.path.display(), error = %err, "archived object missing");
                return Err(err);
            }
            Err(err) => {
                warn!(path = %version.path.display(), error = %err, "restore failed");
                outcome.failed.push((version.path, err));
            }
        }
    }

    Ok(outcome)
}

enum FileResult {
    Restored,
    Skipped,
    Pending,
}

async fn restore_file(
    store: &dyn ObjectStore,
    envelope: &Envelope,
    version: &FileVersion,
    target: &Path,
) -> Result<FileResult> {
    let hash = version.hash.ok_or_else(|| {
        Error::Index(format!(
            "deleted version reached the restorer for {}",
            version.path.display()
        ))
    })?;
    let name = hash.to_hex();

    if target.is_file() && ContentHash::of_file(target)? == hash {
        debug!(path = %target.display(), "destination already current, skipping fetch");
        return Ok(FileResult::Skipped);
    }

    if let Retrieval::Pending(handle) = store.request_retrieval(&name).await? {
        warn!(path = %version.path.display(), handle, "object is in cold storage, retrieval requested");
        return Ok(FileResult::Pending);
    }

    let sealed = store.get(&name).await?;
    let plain = envelope.decrypt(&sealed)?;
    if ContentHash::of(&plain) != hash {
        return Err(Error::Integrity(format!(
            "decrypted content does not match recorded hash {name}"
        )));
    }

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(target, &plain).await?;

    apply_metadata(version, target);
    debug!(path = %target.display(), bytes = plain.len(), "restored");
    Ok(FileResult::Restored)
}

/// `destination/<original path>`, with the original path made relative.
fn target_path(destination: &Path, original: &Path) -> PathBuf {
    let relative = original
        .strip_prefix("/")
        .unwrap_or(original);
    destination.join(relative)
}

#[cfg(unix)]
fn apply_metadata(version: &FileVersion, target: &Path) {
    use crate::principal;
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = std::fs::set_permissions(target, Permissions::from_mode(version.mode)) {
        warn!(path = %target.display(), error = %err, "cannot set permissions");
    }

    let uid = principal::uid_for(&version.owner);
    let gid = principal::gid_for(&version.group);
    if uid.is_none() || gid.is_none() {
        warn!(
            path = %target.display(),
            owner = %version.owner,
            group = %version.group,
            "owner or group unknown on this system, keeping the invoking user"
        );
    }
    let chown = nix::unistd::chown(
        target,
        uid.map(nix::unistd::Uid::from_raw),
        gid.map(nix::unistd::Gid::from_raw),
    );
    if let Err(err) = chown {
        warn!(path = %target.display(), error = %err, "cannot change ownership");
    }

    let tv = nix::sys::time::TimeVal::new(version.mtime, 0);
    if let Err(err) = nix::sys::stat::utimes(target, &tv, &tv) {
        warn!(path = %target.display(), error = %err, "cannot set modification time");
    }
}

#[cfg(not(unix))]
fn apply_metadata(_version: &FileVersion, _target: &Path) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::archive::{archive, DEFAULT_WORKERS};
    use crate::crypto::SALT_LEN;
    use crate::index::now_ts;
    use crate::scan::Scanner;
    use crate::store::testing::MemoryStore;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        source: PathBuf,
        destination: PathBuf,
        index: Index,
        store: Arc<MemoryStore>,
        envelope: Arc<Envelope>,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let source = dir.path().join("src");
            let destination = dir.path().join("dst");
            fs::create_dir_all(&source).unwrap();
            let index = Index::create(&dir.path().join("index.db"), &[2u8; SALT_LEN]).unwrap();
            Self {
                source,
                destination,
                index,
                store: Arc::new(MemoryStore::new()),
                envelope: Arc::new(Envelope::new("restore tests", [2u8; SALT_LEN]).unwrap()),
                _dir: dir,
            }
        }

        async fn archive(&mut self) {
            let scanner = Scanner::new(vec![self.source.clone()], vec![]);
            archive(
                &scanner,
                &mut self.index,
                Arc::clone(&self.store) as Arc<dyn ObjectStore>,
                Arc::clone(&self.envelope),
                DEFAULT_WORKERS,
            )
            .await
            .unwrap();
        }

        async fn restore(&self, ts: i64, pattern: Option<&Pattern>) -> RestoreOutcome {
            restore(
                &self.index,
                Arc::clone(&self.store) as Arc<dyn ObjectStore>,
                &self.envelope,
                ts,
                pattern,
                &self.destination,
            )
            .await
            .unwrap()
        }

        fn restored_path(&self, original: &Path) -> PathBuf {
            target_path(&self.destination, original)
        }
    }

    #[tokio::test]
    async fn roundtrip_restores_bytes_mode_and_mtime() {
        let mut fx = Fixture::new();
        let file = fx.source.join("a.txt");
        fs::write(&file, "hello").unwrap();
        let tv = nix::sys::time::TimeVal::new(1_700_000_000, 0);
        nix::sys::stat::utimes(&file, &tv, &tv).unwrap();
        fx.archive().await;

        let outcome = fx.restore(now_ts(), None).await;
        assert!(outcome.is_clean());
        assert_eq!(outcome.restored.len(), 1);

        let target = fx.restored_path(&file);
        assert_eq!(fs::read(&target).unwrap(), b"hello");

        let source_meta = fs::metadata(&file).unwrap();
        let target_meta = fs::metadata(&target).unwrap();
        assert_eq!(target_meta.mode() & 0o777, source_meta.mode() & 0o777);
        assert_eq!(target_meta.mtime(), 1_700_000_000);
        assert_eq!(target_meta.uid(), source_meta.uid());
    }

    #[tokio::test]
    async fn point_in_time_restore_returns_old_content() {
        let mut fx = Fixture::new();
        let file = fx.source.join("a.txt");
        fs::write(&file, "hello").unwrap();
        fx.archive().await;
        let first_ts = fx.index.last_run().unwrap().unwrap().ts;

        fs::write(&file, "world, but longer").unwrap();
        fx.archive().await;

        let outcome = fx.restore(first_ts, None).await;
        assert_eq!(outcome.restored.len(), 1);
        assert_eq!(fs::read(fx.restored_path(&file)).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn deleted_files_are_not_restored() {
        let mut fx = Fixture::new();
        fs::write(fx.source.join("keep.txt"), "keep").unwrap();
        fs::write(fx.source.join("gone.txt"), "gone").unwrap();
        fx.archive().await;

        fs::remove_file(fx.source.join("gone.txt")).unwrap();
        fx.archive().await;

        let outcome = fx.restore(now_ts() + 10, None).await;
        assert_eq!(outcome.restored.len(), 1);
        assert!(!fx.restored_path(&fx.source.join("gone.txt")).exists());
    }

    #[tokio::test]
    async fn pattern_limits_and_empty_match_is_ok() {
        let mut fx = Fixture::new();
        fs::write(fx.source.join("a.txt"), "a").unwrap();
        fs::write(fx.source.join("b.txt"), "b").unwrap();
        fx.archive().await;

        let only_a = Pattern::new(&fx.source.join("a.txt").to_string_lossy()).unwrap();
        let outcome = fx.restore(now_ts() + 10, Some(&only_a)).await;
        assert_eq!(outcome.restored.len(), 1);
        assert!(!fx.restored_path(&fx.source.join("b.txt")).exists());

        let nothing = Pattern::new("/no/such/path").unwrap();
        let outcome = fx.restore(now_ts() + 10, Some(&nothing)).await;
        assert!(outcome.is_clean());
        assert!(outcome.restored.is_empty());
    }

    #[tokio::test]
    async fn existing_identical_destination_skips_the_fetch() {
        let mut fx = Fixture::new();
        let file = fx.source.join("a.txt");
        fs::write(&file, "cached").unwrap();
        fx.archive().await;

        let target = fx.restored_path(&file);
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::write(&target, "cached").unwrap();

        let outcome = fx.restore(now_ts() + 10, None).await;
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.restored.is_empty());
    }

    #[tokio::test]
    async fn tampered_blob_fails_that_file_and_continues() {
        let mut fx = Fixture::new();
        fs::write(fx.source.join("bad.txt"), "tampered content").unwrap();
        fs::write(fx.source.join("good.txt"), "intact content").unwrap();
        fx.archive().await;

        let bad_name = ContentHash::of(b"tampered content").to_hex();
        fx.store.corrupt(&bad_name, 400);

        let outcome = fx.restore(now_ts() + 10, None).await;
        assert_eq!(outcome.restored, vec![fx.source.join("good.txt")]);
        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(outcome.failed[0].1, Error::Integrity(_)));
        assert!(!fx.restored_path(&fx.source.join("bad.txt")).exists());
    }

    #[tokio::test]
    async fn missing_object_aborts_the_run() {
        let mut fx = Fixture::new();
        fs::write(fx.source.join("a.txt"), "vanishing").unwrap();
        fx.archive().await;

        fx.store
            .objects
            .lock()
            .unwrap()
            .remove(&ContentHash::of(b"vanishing").to_hex());

        let result = restore(
            &fx.index,
            Arc::clone(&fx.store) as Arc<dyn ObjectStore>,
            &fx.envelope,
            now_ts() + 10,
            None,
            &fx.destination,
        )
        .await;
        assert!(matches!(result, Err(Error::ObjectMissing { .. })));
    }

    #[tokio::test]
    async fn cold_objects_are_reported_pending() {
        let mut fx = Fixture::new();
        fs::write(fx.source.join("frozen.txt"), "glacial").unwrap();
        fx.archive().await;

        // Same objects, but now behind a cold store that must thaw first.
        let cold = Arc::new(MemoryStore::frozen());
        *cold.objects.lock().unwrap() = fx.store.objects.lock().unwrap().clone();

        let outcome = restore(
            &fx.index,
            cold as Arc<dyn ObjectStore>,
            &fx.envelope,
            now_ts() + 10,
            None,
            &fx.destination,
        )
        .await
        .unwrap();

        assert_eq!(outcome.pending, vec![fx.source.join("frozen.txt")]);
        assert!(outcome.restored.is_empty());
        assert!(!outcome.is_clean());
    }

    #[tokio::test]
    async fn restore_before_first_run_is_empty() {
        let mut fx = Fixture::new();
        fs::write(fx.source.join("a.txt"), "later").unwrap();
        fx.archive().await;
        let first_ts = fx.index.last_run().unwrap().unwrap().ts;

        let outcome = fx.restore(first_ts - 10, None).await;
        assert!(outcome.restored.is_empty());
        assert!(outcome.is_clean());
    }

}
