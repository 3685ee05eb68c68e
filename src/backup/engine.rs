use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::backup::capture::MetadataExtractor;
use crate::backup::key::KeyLayout;
use crate::backup::media::LocalFileRecord;
use crate::backup::outcome::OutcomeRecorder;
use crate::backup::snapshot::RemoteSnapshot;
use crate::backup::util::format_bytes;
use crate::backup::warn::{self, WarnEvent};
use crate::storage::{ObjectStore, StorageClass, StoreError};

/// Bounded retry for uploads that fail with a transient error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based): doubling, capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub uploaded_count: u64,
    pub skipped_count: u64,
    pub failed_count: u64,
    pub uploaded_bytes: u64,
    pub planned_count: u64,
    pub planned_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRemote,
    ClaimedThisRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Skipped(SkipReason),
    Planned,
    Uploaded { attempts: u32 },
    Failed { error: String, attempts: u32 },
}

/// Statistics plus the per-file outcome, in enumeration order.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub stats: RunStatistics,
    pub outcomes: Vec<FileOutcome>,
}

impl RunReport {
    pub fn claimed_this_run(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Skipped(SkipReason::ClaimedThisRun)))
            .count()
    }

    pub fn retried_uploads(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Uploaded { attempts } if *attempts > 1))
            .count()
    }
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub bucket: String,
    pub storage_class: StorageClass,
    pub layout: KeyLayout,
    pub retry: RetryPolicy,
    pub dry_run: bool,
    /// Print one progress line per file on stdout.
    pub echo_progress: bool,
}

struct UploadFailure {
    error: StoreError,
    attempts: u32,
}

/// Sequential pass over the enumerated files.
pub struct SyncEngine<'a> {
    store: &'a dyn ObjectStore,
    extractor: &'a MetadataExtractor,
    recorder: &'a OutcomeRecorder,
    settings: SyncSettings,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        extractor: &'a MetadataExtractor,
        recorder: &'a OutcomeRecorder,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            extractor,
            recorder,
            settings,
        }
    }

    pub fn run(&self, files: &[LocalFileRecord], snapshot: &mut RemoteSnapshot) -> RunReport {
        let total = files.len();
        let total_bytes: u64 = files.iter().map(|f| f.size).sum();
        let mut stats = RunStatistics::default();
        let mut outcomes = Vec::with_capacity(total);
        let mut claimed: HashSet<String> = HashSet::new();

        tracing::info!(
            files = total,
            total_bytes,
            bucket = %self.settings.bucket,
            dry_run = self.settings.dry_run,
            "starting sync pass"
        );

        for (idx, file) in files.iter().enumerate() {
            let position = Position {
                index: idx + 1,
                total,
                total_bytes,
            };
            outcomes.push(self.process(position, file, snapshot, &mut claimed, &mut stats));
        }

        tracing::info!(
            uploaded = stats.uploaded_count,
            uploaded_bytes = stats.uploaded_bytes,
            skipped = stats.skipped_count,
            failed = stats.failed_count,
            planned = stats.planned_count,
            "Backup completed - Uploaded: {} ({}), Skipped: {}, Failed: {}",
            stats.uploaded_count,
            format_bytes(stats.uploaded_bytes),
            stats.skipped_count,
            stats.failed_count
        );
        RunReport { stats, outcomes }
    }

    fn progress(&self, position: Position, verb: &str, key: &str, file: &LocalFileRecord, stats: &RunStatistics) {
        if !self.settings.echo_progress {
            return;
        }
        println!(
            "[{}/{}] {verb} {key} ({}) - uploaded so far: {} of {}",
            position.index,
            position.total,
            format_bytes(file.size),
            format_bytes(stats.uploaded_bytes),
            format_bytes(position.total_bytes),
        );
    }

    fn process(
        &self,
        position: Position,
        file: &LocalFileRecord,
        snapshot: &mut RemoteSnapshot,
        claimed: &mut HashSet<String>,
        stats: &mut RunStatistics,
    ) -> FileOutcome {
        let captured = self.extractor.extract(file);
        let key = self.settings.layout.derive(&captured.at, &file.filename);
        tracing::debug!(
            path = %file.path.display(),
            category = %file.category,
            provenance = %captured.provenance,
            key = %key,
            "derived key"
        );

        if snapshot.contains(&key) {
            stats.skipped_count += 1;
            let reason = if claimed.contains(&key) {
                SkipReason::ClaimedThisRun
            } else {
                SkipReason::AlreadyRemote
            };
            self.progress(position, "Skipping", &key, file, stats);
            match reason {
                SkipReason::AlreadyRemote => {
                    tracing::info!(path = %file.path.display(), key = %key, "Skipping duplicate file")
                }
                SkipReason::ClaimedThisRun => tracing::warn!(
                    path = %file.path.display(),
                    key = %key,
                    "Skipping file whose key was already taken by an earlier file in this run"
                ),
            }
            return FileOutcome::Skipped(reason);
        }

        if self.settings.dry_run {
            stats.planned_count += 1;
            stats.planned_bytes += file.size;
            self.progress(position, "Would upload", &key, file, stats);
            claimed.insert(key.clone());
            snapshot.insert(key);
            return FileOutcome::Planned;
        }

        self.progress(position, "Uploading", &key, file, stats);
        match self.upload_with_retry(&key, file) {
            Ok(attempts) => {
                stats.uploaded_count += 1;
                stats.uploaded_bytes += file.size;
                tracing::info!(path = %file.path.display(), key = %key, attempts, "uploaded");
                if let Err(err) = self.recorder.record_success(&key) {
                    self.outcome_log_failed(self.recorder.success_log().display().to_string(), &err);
                }
                claimed.insert(key.clone());
                snapshot.insert(key);
                FileOutcome::Uploaded { attempts }
            }
            Err(failure) => {
                stats.failed_count += 1;
                let error = failure.error.to_string();
                tracing::error!(
                    path = %file.path.display(),
                    key = %key,
                    attempts = failure.attempts,
                    "Error uploading: {error}"
                );
                if let Err(err) = self.recorder.record_failure(&file.path, &error) {
                    self.outcome_log_failed(self.recorder.failure_log().display().to_string(), &err);
                }
                FileOutcome::Failed {
                    error,
                    attempts: failure.attempts,
                }
            }
        }
    }

    fn upload_with_retry(&self, key: &str, file: &LocalFileRecord) -> Result<u32, UploadFailure> {
        let retry = self.settings.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.put_object(
                &self.settings.bucket,
                key,
                &file.path,
                &self.settings.storage_class,
            ) {
                Ok(()) => return Ok(attempt),
                Err(error) if error.is_transient() && attempt < max_attempts => {
                    let delay = retry.delay_after(attempt);
                    tracing::warn!(
                        path = %file.path.display(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient upload failure, retrying: {error}"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(error) => return Err(UploadFailure { error, attempts: attempt }),
            }
        }
    }

    fn outcome_log_failed(&self, log_path: String, err: &anyhow::Error) {
        warn::emit(WarnEvent {
            code: "OUTCOME_LOG_WRITE_FAILED",
            stage: "record",
            path: &log_path,
            reason: "outcome-entry-not-persisted",
            err: &format!("{err:#}"),
        });
    }
}

#[derive(Debug, Clone, Copy)]
struct Position {
    index: usize,
    total: usize,
    total_bytes: u64,
}

/// End-of-run lines for the operator.
pub fn summary_lines(stats: &RunStatistics, dry_run: bool) -> Vec<String> {
    let mut lines = Vec::new();
    if dry_run {
        lines.push(format!(
            "dry run: {} files ({}) would be uploaded",
            stats.planned_count,
            format_bytes(stats.planned_bytes)
        ));
    } else if stats.uploaded_count == 0 {
        lines.push("nothing uploaded: zero files needed uploading".to_string());
    }
    if stats.failed_count > 0 {
        lines.push(format!("total files failed: {}", stats.failed_count));
    }
    lines.push(format!(
        "total files uploaded: {}, size of backed up files: {}",
        stats.uploaded_count,
        format_bytes(stats.uploaded_bytes)
    ));
    lines.push(format!(
        "total files skipped (already in bucket): {}",
        stats.skipped_count
    ));
    lines
}
