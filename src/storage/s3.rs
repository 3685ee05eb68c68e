//! Direct S3 backend.
//!
//! `S3Store` owns the upload strategy (single `PutObject` below the
//! multipart threshold, `CreateMultipartUpload` + parts above it) and
//! delegates each wire call to an [`S3Calls`] implementation. The real one
//! is [`SdkCalls`](super::s3_sdk::SdkCalls).

use std::fs;
use std::path::Path;

use super::s3_sdk::{S3Options, SdkCalls};
use super::{ListPage, ObjectStore, StorageClass, StoreError};

/// Files above this size go through multipart upload.
pub const MULTIPART_THRESHOLD: u64 = 500 * 1024 * 1024;
pub const MULTIPART_PART_SIZE: u64 = 100 * 1024 * 1024;
/// S3 caps a multipart upload at 10,000 parts.
const MAX_PARTS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    pub number: i32,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPartTag {
    pub number: i32,
    pub e_tag: String,
}

/// Splits `size` bytes into numbered parts of `part_size`, growing the part
/// size when the file would need more than 10,000 parts.
pub fn plan_parts(size: u64, part_size: u64) -> Vec<PartRange> {
    let mut part_size = part_size.max(1);
    if size.div_ceil(part_size) > MAX_PARTS {
        part_size = size.div_ceil(MAX_PARTS);
    }
    let mut parts = Vec::new();
    let mut offset = 0;
    let mut number = 1;
    while offset < size {
        let length = part_size.min(size - offset);
        parts.push(PartRange {
            number,
            offset,
            length,
        });
        offset += length;
        number += 1;
    }
    parts
}

/// The S3 operations the store needs, one blocking call each.
pub trait S3Calls {
    fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage, StoreError>;

    fn put_single(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        storage_class: &StorageClass,
    ) -> Result<(), StoreError>;

    /// Returns the upload id.
    fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        storage_class: &StorageClass,
    ) -> Result<String, StoreError>;

    /// Returns the part's ETag.
    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        local_path: &Path,
        part: PartRange,
    ) -> Result<String, StoreError>;

    fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartTag],
    ) -> Result<(), StoreError>;

    fn abort_multipart(&self, bucket: &str, key: &str, upload_id: &str)
    -> Result<(), StoreError>;
}

pub struct S3Store<C: S3Calls = SdkCalls> {
    calls: C,
    multipart_threshold: u64,
    part_size: u64,
}

impl S3Store<SdkCalls> {
    pub fn connect(options: &S3Options) -> Result<Self, StoreError> {
        Ok(Self::with_calls(SdkCalls::connect(options)?))
    }
}

impl<C: S3Calls> S3Store<C> {
    pub fn with_calls(calls: C) -> Self {
        Self {
            calls,
            multipart_threshold: MULTIPART_THRESHOLD,
            part_size: MULTIPART_PART_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_multipart(mut self, threshold: u64, part_size: u64) -> Self {
        self.multipart_threshold = threshold;
        self.part_size = part_size;
        self
    }

    fn put_multipart(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        size: u64,
        storage_class: &StorageClass,
    ) -> Result<(), StoreError> {
        let upload_id = self.calls.create_multipart(bucket, key, storage_class)?;
        let parts = plan_parts(size, self.part_size);
        tracing::debug!(key, upload_id = %upload_id, parts = parts.len(), "multipart upload started");

        let mut completed = Vec::with_capacity(parts.len());
        for part in parts {
            match self
                .calls
                .upload_part(bucket, key, &upload_id, local_path, part)
            {
                Ok(e_tag) => completed.push(CompletedPartTag {
                    number: part.number,
                    e_tag,
                }),
                Err(err) => {
                    self.abort(bucket, key, &upload_id);
                    return Err(err);
                }
            }
        }

        if let Err(err) = self
            .calls
            .complete_multipart(bucket, key, &upload_id, &completed)
        {
            self.abort(bucket, key, &upload_id);
            return Err(err);
        }
        Ok(())
    }

    fn abort(&self, bucket: &str, key: &str, upload_id: &str) {
        if let Err(err) = self.calls.abort_multipart(bucket, key, upload_id) {
            tracing::warn!(key, upload_id, error = %err, "failed to abort multipart upload");
        }
    }
}

impl<C: S3Calls> ObjectStore for S3Store<C> {
    fn backend(&self) -> &'static str {
        "s3"
    }

    fn list_page(
        &self,
        bucket: &str,
        continuation: Option<&str>,
        page_size: u32,
    ) -> Result<ListPage, StoreError> {
        let max_keys = i32::try_from(page_size).unwrap_or(i32::MAX);
        self.calls.list_objects(bucket, continuation, max_keys)
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        storage_class: &StorageClass,
    ) -> Result<(), StoreError> {
        let size = fs::metadata(local_path)?.len();
        if size > self.multipart_threshold {
            self.put_multipart(bucket, key, local_path, size, storage_class)
        } else {
            self.calls.put_single(bucket, key, local_path, storage_class)
        }
    }
}
