use std::path::PathBuf;

use thiserror::Error;

use crate::storage::StoreError;

/// Why a single capture-time attempt did not produce a timestamp.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("tag `{0}` not present")]
    MissingTag(String),
    #[error("value `{value}` does not match `{format}`")]
    Unparsable { value: String, format: &'static str },
    #[error("embedded metadata unreadable: {0}")]
    Exif(#[from] exif::Error),
    #[error("metadata probe unavailable: {0}")]
    ProbeUnavailable(String),
    #[error("metadata probe failed: {0}")]
    ProbeFailed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run-level failures. Only these stop a sync before per-file decisions begin.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("failed to list bucket `{bucket}`: {source}")]
    NamespaceListing {
        bucket: String,
        #[source]
        source: StoreError,
    },
    #[error("no bucket configured: pass --bucket, set SHOEBOX_BUCKET, or enable the terraform lookup")]
    MissingBucket,
    #[error("source root does not exist or is not a directory: {0}")]
    MissingRoot(PathBuf),
    #[error("config invalid: {0}")]
    InvalidConfig(String),
}
