use crate::crypto::Envelope;
use crate::diff::diff;
use crate::index::{now_ts, Index};
use crate::scan::{ScanEntry, Scanner};
use crate::store::{ObjectStore, PutOutcome};
use crate::{ArchiveRun, ContentHash, Error, NewVersion, Result, RunSummary};
use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Bounded parallelism for reading, hashing and uploading blobs.
pub const DEFAULT_WORKERS: usize = 4;

/// Result of one archive invocation.
#[derive(Debug, Clone)]
pub struct ArchiveOutcome {
    pub run: ArchiveRun,
    /// Objects actually written to the store this run (dedup hits and
    /// blobs already present are not counted).
    pub blobs_stored: u64,
}

#[derive(Clone, Copy, PartialEq)]
enum Origin {
    Added,
    Rewritten,
}

/// Scan the sources, upload every new blob, and record the run.
///
/// Uploads overlap on a worker pool; all index rows are buffered on the
/// coordinator and written in one transaction with the run row last, so
/// an interrupted invocation leaves the index untouched and any
/// already-uploaded blobs simply dedupe into the next run.
pub async fn archive(
    scanner: &Scanner,
    index: &mut Index,
    store: Arc<dyn ObjectStore>,
    envelope: Arc<Envelope>,
    workers: usize,
) -> Result<ArchiveOutcome> {
    let started = now_ts();

    let scanned = scanner.scan()?;
    let state = index.latest_state()?;
    debug!(scanned = scanned.len(), known = state.len(), "scan complete");

    let changes = diff(scanned, state);

    let mut summary = RunSummary::default();
    let mut rows: Vec<NewVersion> = Vec::new();
    let mut blobs_stored = 0u64;

    // Hash-dedup within the run is shared across workers: the first
    // worker to claim a hash uploads it, later holders of identical
    // content only record their row.
    let claimed: Arc<Mutex<HashSet<ContentHash>>> = Arc::new(Mutex::new(HashSet::new()));
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut uploads: JoinSet<Result<Option<(NewVersion, Origin, u64, bool)>>> = JoinSet::new();

    let queue = changes
        .added
        .into_iter()
        .map(|entry| (entry, Origin::Added))
        .chain(
            changes
                .content
                .into_iter()
                .map(|entry| (entry, Origin::Rewritten)),
        );
    for (entry, origin) in queue {
        let store = Arc::clone(&store);
        let envelope = Arc::clone(&envelope);
        let claimed = Arc::clone(&claimed);
        let permits = Arc::clone(&permits);

        uploads.spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|e| Error::Store(e.to_string()))?;
            upload_one(&*store, &envelope, &claimed, entry, origin).await
        });
    }

    while let Some(joined) = uploads.join_next().await {
        let result = joined.map_err(|e| Error::Store(format!("upload worker failed: {e}")))??;
        let Some((row, origin, bytes, stored)) = result else {
            continue;
        };
        match origin {
            Origin::Added => summary.files_added += 1,
            Origin::Rewritten => summary.files_changed += 1,
        }
        summary.bytes_uploaded += bytes;
        if stored {
            blobs_stored += 1;
        }
        rows.push(row);
    }

    for (entry, hash) in changes.metadata {
        summary.files_changed += 1;
        rows.push(to_version(entry, hash));
    }
    for previous in &changes.deleted {
        summary.files_removed += 1;
        rows.push(NewVersion::deletion_of(previous));
    }

    let run = index.commit_run(started, &rows, &summary)?;
    info!(
        run_id = run.id,
        added = summary.files_added,
        changed = summary.files_changed,
        removed = summary.files_removed,
        bytes_uploaded = summary.bytes_uploaded,
        "archive run committed"
    );

    Ok(ArchiveOutcome { run, blobs_stored })
}

/// Read, hash, encrypt and (when nobody else has it) upload one file.
/// Returns `None` when the file vanished or turned unreadable after the
/// scan; that is a per-file warning, not a run failure.
async fn upload_one(
    store: &dyn ObjectStore,
    envelope: &Envelope,
    claimed: &Mutex<HashSet<ContentHash>>,
    entry: ScanEntry,
    origin: Origin,
) -> Result<Option<(NewVersion, Origin, u64, bool)>> {
    let data = match tokio::fs::read(&entry.path).await {
        Ok(data) => data,
        Err(err) => {
            warn!(path = %entry.path.display(), error = %err, "file unreadable at upload time, skipping");
            return Ok(None);
        }
    };

    // The authoritative content identity is the hash of the bytes being
    // uploaded, not of whatever the differ saw earlier.
    let hash = ContentHash::of(&data);
    let name = hash.to_hex();

    let mut bytes_uploaded = 0u64;
    let mut stored = false;

    let first_claim = claimed.lock().await.insert(hash);
    if first_claim && !store.exists(&name).await? {
        let sealed = envelope.encrypt(&data)?;
        let sealed_len = sealed.len() as u64;
        if store.put(&name, Bytes::from(sealed)).await? == PutOutcome::Stored {
            bytes_uploaded = sealed_len;
            stored = true;
            debug!(object = %name, bytes = sealed_len, "blob uploaded");
        }
    }

    Ok(Some((to_version(entry, hash), origin, bytes_uploaded, stored)))
}

fn to_version(entry: ScanEntry, hash: ContentHash) -> NewVersion {
    NewVersion {
        path: entry.path,
        size: entry.size,
        mtime: entry.mtime,
        mode: entry.mode,
        owner: entry.owner,
        group: entry.group,
        hash: Some(hash),
    }
}
