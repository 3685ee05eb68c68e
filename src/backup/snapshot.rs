use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::backup::warn::{self, WarnEvent};
use crate::error::BackupError;
use crate::storage::{ObjectStore, StoreError};

/// Keys present in the bucket when the run started, plus keys uploaded since.
#[derive(Debug, Clone, Default)]
pub struct RemoteSnapshot {
    keys: HashSet<String>,
}

impl RemoteSnapshot {
    #[cfg(test)]
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Returns `false` when the key was already present.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SnapshotStats {
    pub pages: usize,
    pub cache_written: bool,
}

/// Operator-facing mirror of the listing; write failures disable it without failing the run.
struct ListingCache {
    writer: Option<BufWriter<File>>,
    path: String,
}

impl ListingCache {
    fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self {
                writer: None,
                path: String::new(),
            };
        };
        let display = path.display().to_string();
        let opened = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| File::create(path));
        match opened {
            Ok(file) => Self {
                writer: Some(BufWriter::new(file)),
                path: display,
            },
            Err(err) => {
                Self::warn_failed(&display, &err.to_string());
                Self {
                    writer: None,
                    path: display,
                }
            }
        }
    }

    fn warn_failed(path: &str, err: &str) {
        warn::emit(WarnEvent {
            code: "LISTING_CACHE_WRITE_FAILED",
            stage: "snapshot",
            path,
            reason: "bucket-listing-mirror-disabled",
            err,
        });
    }

    fn append(&mut self, keys: &[String]) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = keys
            .iter()
            .try_for_each(|key| writeln!(writer, "{key}"))
            .and_then(|_| writer.flush());
        if let Err(err) = result {
            Self::warn_failed(&self.path, &err.to_string());
            self.writer = None;
        }
    }

    fn is_healthy(&self) -> bool {
        self.writer.is_some()
    }
}

/// List the whole bucket, page by page, into a snapshot.
///
/// A failing listing aborts: skip decisions are meaningless without the full
/// namespace. The cache file at `cache_path` is truncated first and then
/// appended per page.
pub fn build_snapshot(
    store: &dyn ObjectStore,
    bucket: &str,
    page_size: u32,
    cache_path: Option<&Path>,
) -> Result<(RemoteSnapshot, SnapshotStats), BackupError> {
    let listing_error = |source: StoreError| BackupError::NamespaceListing {
        bucket: bucket.to_string(),
        source,
    };

    let mut cache = ListingCache::open(cache_path);
    let mut snapshot = RemoteSnapshot::default();
    let mut stats = SnapshotStats::default();
    let mut seen_tokens: HashSet<String> = HashSet::new();
    let mut token: Option<String> = None;

    loop {
        let page = store
            .list_page(bucket, token.as_deref(), page_size)
            .map_err(listing_error)?;
        stats.pages += 1;
        cache.append(&page.keys);
        for key in page.keys {
            snapshot.insert(key);
        }
        tracing::debug!(bucket, page = stats.pages, keys = snapshot.len(), "listed page");

        match page.next_token {
            Some(next) => {
                if !seen_tokens.insert(next.clone()) {
                    return Err(listing_error(StoreError::Malformed(format!(
                        "continuation token repeated after {} pages",
                        stats.pages
                    ))));
                }
                token = Some(next);
            }
            None => break,
        }
    }

    stats.cache_written = cache.is_healthy();
    tracing::info!(bucket, keys = snapshot.len(), pages = stats.pages, "found existing files in bucket");
    Ok((snapshot, stats))
}
