use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Outcome of a `put`: either the object was written, or an object with
/// the same content-derived name was already durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    AlreadyExists,
}

/// Availability of an object in a cold-capable store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retrieval {
    /// The object can be fetched right now.
    Ready,
    /// The object is thawing; the handle describes the pending request.
    Pending(String),
}

/// Object store consumed by the archiver and restorer. Names are the
/// lowercase hex SHA-256 of the object's plaintext; `put` is idempotent
/// because a name fully determines its content.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Connectivity probe used by the `test` subcommand.
    async fn check(&self) -> Result<()>;

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn put(&self, name: &str, data: Bytes) -> Result<PutOutcome>;

    /// Fails with `Error::ObjectMissing` when the name is unknown.
    async fn get(&self, name: &str) -> Result<Bytes>;

    /// For cold backends, begin or report on an asynchronous thaw. Warm
    /// backends always answer `Ready`.
    async fn request_retrieval(&self, name: &str) -> Result<Retrieval>;
}

/// Storage key for a blob name: objects are fanned out under the first two
/// hex characters, `ab/abcdef...`.
pub fn object_key(name: &str) -> String {
    format!("{}/{}", &name[..2.min(name.len())], name)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::Error;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store for engine tests; counts writes so dedup behavior
    /// can be asserted.
    #[derive(Default)]
    pub struct MemoryStore {
        pub objects: Mutex<HashMap<String, Bytes>>,
        pub puts: AtomicUsize,
        pub cold: bool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn frozen() -> Self {
            Self {
                cold: true,
                ..Self::default()
            }
        }

        pub fn object_count(&self) -> usize {
            self.objects.lock().unwrap().len()
        }

        pub fn put_count(&self) -> usize {
            self.puts.load(Ordering::SeqCst)
        }

        pub fn corrupt(&self, name: &str, bit: usize) {
            let mut objects = self.objects.lock().unwrap();
            let data = objects.get(name).unwrap();
            let mut bytes = data.to_vec();
            bytes[bit / 8] ^= 1 << (bit % 8);
            objects.insert(name.to_string(), Bytes::from(bytes));
        }
    }

    #[async_trait]
    impl ObjectStore for MemoryStore {
        async fn check(&self) -> Result<()> {
            Ok(())
        }

        async fn exists(&self, name: &str) -> Result<bool> {
            Ok(self.objects.lock().unwrap().contains_key(name))
        }

        async fn put(&self, name: &str, data: Bytes) -> Result<PutOutcome> {
            let mut objects = self.objects.lock().unwrap();
            if objects.contains_key(name) {
                return Ok(PutOutcome::AlreadyExists);
            }
            self.puts.fetch_add(1, Ordering::SeqCst);
            objects.insert(name.to_string(), data);
            Ok(PutOutcome::Stored)
        }

        async fn get(&self, name: &str) -> Result<Bytes> {
            self.objects
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| Error::ObjectMissing {
                    name: name.to_string(),
                })
        }

        async fn request_retrieval(&self, name: &str) -> Result<Retrieval> {
            if self.cold {
                Ok(Retrieval::Pending(format!("thaw:{name}")))
            } else {
                Ok(Retrieval::Ready)
            }
        }
    }
}
