use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::backup::util::one_line;

/// Append-only audit trail of upload outcomes. Nothing here is read back by a sync.
#[derive(Debug, Clone)]
pub struct OutcomeRecorder {
    success_log: PathBuf,
    failure_log: PathBuf,
}

fn append_line(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.write_all(format!("{line}\n").as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    file.flush()?;
    file.sync_data()
        .with_context(|| format!("failed to sync {}", path.display()))?;
    Ok(())
}

impl OutcomeRecorder {
    pub fn new(success_log: impl Into<PathBuf>, failure_log: impl Into<PathBuf>) -> Self {
        Self {
            success_log: success_log.into(),
            failure_log: failure_log.into(),
        }
    }

    pub fn success_log(&self) -> &Path {
        &self.success_log
    }

    pub fn failure_log(&self) -> &Path {
        &self.failure_log
    }

    pub fn record_success(&self, key: &str) -> Result<()> {
        append_line(&self.success_log, key)
    }

    pub fn record_failure(&self, path: &Path, error: &str) -> Result<()> {
        append_line(
            &self.failure_log,
            &format!("{} | {}", path.display(), one_line(error)),
        )
    }
}
