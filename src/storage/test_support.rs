use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use super::{ListPage, ObjectStore, StorageClass, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PutCall {
    pub bucket: String,
    pub key: String,
    pub local_path: PathBuf,
    pub storage_class: String,
}

/// In-memory bucket. Listing pages follow sorted key order.
#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    keys: RefCell<BTreeSet<String>>,
    puts: RefCell<Vec<PutCall>>,
    listing_error: RefCell<Option<String>>,
    /// Failures to return, per file name, before a put succeeds. `u32::MAX` never succeeds.
    put_failures: RefCell<HashMap<String, (u32, bool)>>,
}

impl FakeStore {
    pub(crate) fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::default();
        store
            .keys
            .borrow_mut()
            .extend(keys.into_iter().map(Into::into));
        store
    }

    pub(crate) fn fail_listing(&self, message: &str) {
        *self.listing_error.borrow_mut() = Some(message.to_string());
    }

    /// Every put of `filename` fails with a permanent error.
    pub(crate) fn fail_uploads_of(&self, filename: &str) {
        self.put_failures
            .borrow_mut()
            .insert(filename.to_string(), (u32::MAX, false));
    }

    /// The first `times` puts of `filename` fail with a transient error.
    pub(crate) fn flake_uploads_of(&self, filename: &str, times: u32) {
        self.put_failures
            .borrow_mut()
            .insert(filename.to_string(), (times, true));
    }

    pub(crate) fn puts(&self) -> Vec<PutCall> {
        self.puts.borrow().clone()
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.keys.borrow().contains(key)
    }
}

impl ObjectStore for FakeStore {
    fn backend(&self) -> &'static str {
        "fake"
    }

    fn list_page(
        &self,
        _bucket: &str,
        continuation: Option<&str>,
        page_size: u32,
    ) -> Result<ListPage, StoreError> {
        if let Some(message) = self.listing_error.borrow().as_ref() {
            return Err(StoreError::Command {
                command: "list".to_string(),
                status: "exit status: 254".to_string(),
                stderr: message.clone(),
            });
        }
        let keys = self.keys.borrow();
        let start: usize = continuation.and_then(|t| t.parse().ok()).unwrap_or(0);
        let page: Vec<String> = keys
            .iter()
            .skip(start)
            .take(page_size as usize)
            .cloned()
            .collect();
        let end = start + page.len();
        Ok(ListPage {
            keys: page,
            next_token: (end < keys.len()).then(|| end.to_string()),
        })
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        storage_class: &StorageClass,
    ) -> Result<(), StoreError> {
        self.puts.borrow_mut().push(PutCall {
            bucket: bucket.to_string(),
            key: key.to_string(),
            local_path: local_path.to_path_buf(),
            storage_class: storage_class.to_string(),
        });

        let filename = local_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if let Some((remaining, transient)) = self.put_failures.borrow_mut().get_mut(&filename)
            && *remaining > 0
        {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            return Err(if *transient {
                StoreError::Http {
                    status: 503,
                    url: format!("fake://{bucket}/{key}"),
                    body: "SlowDown".to_string(),
                }
            } else {
                StoreError::Http {
                    status: 403,
                    url: format!("fake://{bucket}/{key}"),
                    body: "AccessDenied".to_string(),
                }
            });
        }

        self.keys.borrow_mut().insert(key.to_string());
        Ok(())
    }
}
