use async_trait::async_trait;
use bytes::Bytes;
use serac_core::store::{object_key, PutOutcome, Retrieval};
use serac_core::{Error, ObjectStore, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Object store rooted at a local directory. Blobs live at
/// `<base>/<first two hex chars>/<full hash>`.
pub struct LocalStore {
    base_path: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.base_path.join(object_key(name))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn check(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            Error::Store(format!(
                "storage path {} is not writable: {}",
                self.base_path.display(),
                e
            ))
        })?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.blob_path(name).is_file())
    }

    async fn put(&self, name: &str, data: Bytes) -> Result<PutOutcome> {
        let path = self.blob_path(name);
        if path.is_file() {
            return Ok(PutOutcome::AlreadyExists);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-then-rename so a crashed put never leaves a torn blob
        // under its final name.
        let staging = path.with_extension("partial");
        fs::write(&staging, &data)
            .await
            .map_err(|e| Error::Store(format!("failed to write {}: {}", name, e)))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|e| Error::Store(format!("failed to finalize {}: {}", name, e)))?;

        debug!(object = name, bytes = data.len(), "stored");
        Ok(PutOutcome::Stored)
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        let path = self.blob_path(name);
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::ObjectMissing {
                name: name.to_string(),
            }),
            Err(e) => Err(Error::Store(format!("failed to read {}: {}", name, e))),
        }
    }

    async fn request_retrieval(&self, _name: &str) -> Result<Retrieval> {
        // Local disk is always warm.
        Ok(Retrieval::Ready)
    }
}
