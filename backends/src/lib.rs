pub mod local;
pub mod retry;
pub mod s3;

pub use local::LocalStore;
pub use retry::{retry_with_backoff, RetryConfig, Retryable};
pub use s3::{S3Config, S3Store};
