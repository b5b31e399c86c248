use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Index database not found at {path}")]
    IndexNotFound { path: String },

    #[error("Index database already exists at {path}")]
    IndexExists { path: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Object {name} not found in store")]
    ObjectMissing { name: String },

    #[error("Encryption error: {0}")]
    Crypto(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Scan error: {0}")]
    Scan(String),

    #[error("Lock conflict: {0}")]
    LockConflict(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Index(err.to_string())
    }
}

impl Error {
    /// Process exit code for this error class: 1 for user errors, 2 for
    /// runtime errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) | Error::IndexNotFound { .. } | Error::IndexExists { .. } => 1,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
