//! Remote object-storage collaborators.
//!
//! The sync engine only needs two things from a bucket: a paginated key
//! listing and a single-object upload that carries the storage tier.
//! `AwsCliStore` drives the `aws` CLI; `S3Store` talks to any
//! S3-compatible endpoint through `aws-sdk-s3`.

pub mod aws_cli;
pub mod s3;
pub mod s3_sdk;
#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

pub use aws_cli::AwsCliStore;
pub use s3::S3Store;

pub const KNOWN_STORAGE_CLASSES: &[&str] = &[
    "STANDARD",
    "REDUCED_REDUNDANCY",
    "STANDARD_IA",
    "ONEZONE_IA",
    "INTELLIGENT_TIERING",
    "GLACIER",
    "GLACIER_IR",
    "DEEP_ARCHIVE",
];

pub const DEFAULT_STORAGE_CLASS: &str = "DEEP_ARCHIVE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageClass(String);

impl StorageClass {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StorageClass {
    fn default() -> Self {
        Self(DEFAULT_STORAGE_CLASS.to_string())
    }
}

impl FromStr for StorageClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_uppercase().replace('-', "_");
        if KNOWN_STORAGE_CLASSES.contains(&normalized.as_str()) {
            Ok(Self(normalized))
        } else {
            Err(format!(
                "unknown storage class `{raw}`; use one of {}",
                KNOWN_STORAGE_CLASSES.join(", ")
            ))
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One page of a bucket listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("`{command}` exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),
    #[error("HTTP {status} from {url}: {body}")]
    Http { status: u16, url: String, body: String },
    #[error("transport error: {message}")]
    Transport { message: String, retryable: bool },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

const TRANSIENT_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "connection reset",
    "connection was closed",
    "could not connect",
    "slowdown",
    "slow down",
    "internalerror",
    "serviceunavailable",
    "requesttimeout",
    "throttl",
];

impl StoreError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 408 || *status == 429 || *status >= 500,
            Self::Transport { retryable, .. } => *retryable,
            Self::Command { stderr, .. } => {
                let lower = stderr.to_ascii_lowercase();
                TRANSIENT_MARKERS.iter().any(|marker| lower.contains(marker))
            }
            Self::ToolUnavailable(_) | Self::Malformed(_) | Self::Io(_) => false,
        }
    }
}

pub trait ObjectStore {
    /// Short backend name for reports.
    fn backend(&self) -> &'static str;

    fn list_page(
        &self,
        bucket: &str,
        continuation: Option<&str>,
        page_size: u32,
    ) -> Result<ListPage, StoreError>;

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        storage_class: &StorageClass,
    ) -> Result<(), StoreError>;
}
