use crate::retry::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{GlacierJobParameters, RestoreRequest, StorageClass, Tier};
use aws_sdk_s3::Client;
use bytes::Bytes;
use serac_core::store::{object_key, PutOutcome, Retrieval};
use serac_core::{Error, ObjectStore, Result};
use tracing::{debug, info};

/// Days a thawed Glacier object stays fetchable.
const RESTORE_DAYS: i32 = 1;

#[derive(Debug, Clone)]
pub struct S3Config {
    pub key: String,
    pub secret: String,
    pub bucket: String,
    /// Key prefix within the bucket.
    pub path: String,
}

/// Object store on S3, including Glacier-class cold objects. Blobs live
/// at `<path>/<first two hex chars>/<full hash>` within the bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
    retry_config: RetryConfig,
}

impl S3Store {
    pub async fn connect(config: S3Config) -> Result<Self> {
        let credentials = Credentials::new(&config.key, &config.secret, None, None, "serac-config");
        let aws = aws_config::defaults(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .load()
            .await;

        Ok(Self {
            client: Client::new(&aws),
            bucket: config.bucket,
            prefix: config.path,
            retry_config: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    fn full_key(&self, name: &str) -> String {
        let key = object_key(name);
        if self.prefix.is_empty() {
            key
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }

    async fn start_thaw(&self, key: &str) -> Result<()> {
        let job = GlacierJobParameters::builder()
            .tier(Tier::Standard)
            .build()
            .map_err(|e| Error::Store(e.to_string()))?;
        let request = RestoreRequest::builder()
            .days(RESTORE_DAYS)
            .glacier_job_parameters(job)
            .build();

        self.client
            .restore_object()
            .bucket(&self.bucket)
            .key(key)
            .restore_request(request)
            .send()
            .await
            .map_err(|e| Error::Store(format!("failed to request retrieval of {}: {}", key, e)))?;

        info!(key, days = RESTORE_DAYS, "Glacier retrieval requested");
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn check(&self) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| Error::Store(format!("bucket {} not accessible: {}", self.bucket, e)))?;
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(name))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Ok(false)
                } else {
                    Err(Error::Store(format!(
                        "failed to check existence of {}: {}",
                        name, err
                    )))
                }
            }
        }
    }

    async fn put(&self, name: &str, data: Bytes) -> Result<PutOutcome> {
        if self.exists(name).await? {
            return Ok(PutOutcome::AlreadyExists);
        }

        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = self.full_key(name);
        let byte_count = data.len();

        retry_with_backoff(&self.retry_config, "s3_put", || {
            let body = ByteStream::from(data.clone());
            let client = client.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            async move {
                client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| Error::Store(format!("failed to write {}: {}", key, e)))?;
                Ok::<(), Error>(())
            }
        })
        .await?;

        debug!(object = name, bytes = byte_count, "stored");
        Ok(PutOutcome::Stored)
    }

    async fn get(&self, name: &str) -> Result<Bytes> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = self.full_key(name);
        let object_name = name.to_string();

        retry_with_backoff(&self.retry_config, "s3_get", || {
            let client = client.clone();
            let bucket = bucket.clone();
            let key = key.clone();
            let object_name = object_name.clone();
            async move {
                let response = client
                    .get_object()
                    .bucket(&bucket)
                    .key(&key)
                    .send()
                    .await
                    .map_err(|err| {
                        if err
                            .as_service_error()
                            .map(|e| e.is_no_such_key())
                            .unwrap_or(false)
                        {
                            Error::ObjectMissing { name: object_name }
                        } else {
                            Error::Store(format!("failed to read {}: {}", key, err))
                        }
                    })?;

                let data = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| Error::Store(format!("failed to read body of {}: {}", key, e)))?;
                Ok(data.into_bytes())
            }
        })
        .await
    }

    async fn request_retrieval(&self, name: &str) -> Result<Retrieval> {
        let key = self.full_key(name);
        let head = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_not_found())
                    .unwrap_or(false)
                {
                    Error::ObjectMissing {
                        name: name.to_string(),
                    }
                } else {
                    Error::Store(format!("failed to stat {}: {}", key, err))
                }
            })?;

        match head.storage_class() {
            Some(StorageClass::Glacier) | Some(StorageClass::DeepArchive) => {
                match head.restore() {
                    // Frozen and no thaw in flight yet
                    None => {
                        self.start_thaw(&key).await?;
                        Ok(Retrieval::Pending("retrieval requested".to_string()))
                    }
                    Some(state) if state.contains(r#"ongoing-request="true""#) => {
                        Ok(Retrieval::Pending("retrieval in progress".to_string()))
                    }
                    Some(state) if state.contains(r#"ongoing-request="false""#) => {
                        Ok(Retrieval::Ready)
                    }
                    Some(state) => Err(Error::Store(format!(
                        "unknown restore state for {}: {}",
                        key, state
                    ))),
                }
            }
            _ => Ok(Retrieval::Ready),
        }
    }
}
