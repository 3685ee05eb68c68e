use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::backup::audit::{self, RunSummary};
use crate::backup::bucket::resolve_bucket;
use crate::backup::config::{self, BackupConfig};
use crate::backup::engine::{FileOutcome, RetryPolicy, SyncEngine, SyncSettings, summary_lines};
use crate::backup::key::KeyLayout;
use crate::backup::media::enumerate;
use crate::backup::outcome::OutcomeRecorder;
use crate::backup::paths::{BackupPaths, resolve_paths};
use crate::backup::snapshot::build_snapshot;
use crate::backup::util::{format_bytes, now_epoch_secs, one_line};
use crate::backup::warn::{self, WarnEvent};
use crate::commands::{CommandReport, build_extractor, build_store};
use crate::error::BackupError;
use crate::storage::StorageClass;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub root: Option<PathBuf>,
    pub bucket: Option<String>,
    pub storage_class: Option<String>,
    pub backend: Option<String>,
    pub dry_run: bool,
    /// Suppress per-file progress lines on stdout.
    pub quiet: bool,
}

fn apply_flags(cfg: &mut BackupConfig, opts: &SyncOptions) -> Result<()> {
    if let Some(class) = &opts.storage_class {
        cfg.remote.storage_class = class.clone();
    }
    if let Some(backend) = &opts.backend {
        cfg.remote.backend = backend.clone();
    }
    if let Some(root) = &opts.root {
        cfg.source.root = Some(root.display().to_string());
    }
    config::validate(cfg).map_err(|err| BackupError::InvalidConfig(format!("{err:#}")))?;
    Ok(())
}

fn retry_policy(cfg: &BackupConfig) -> RetryPolicy {
    RetryPolicy {
        max_attempts: cfg.upload.max_attempts,
        base_delay: Duration::from_millis(cfg.upload.backoff_base_ms),
        max_delay: Duration::from_millis(cfg.upload.backoff_max_ms),
    }
}

fn record_run(paths: &BackupPaths, summary: RunSummary, report: &mut CommandReport) {
    let result = audit::finish(summary).and_then(|summary| audit::append_run(paths, &summary));
    if let Err(err) = result {
        warn::emit(WarnEvent {
            code: "RUN_AUDIT_WRITE_FAILED",
            stage: "audit",
            path: &paths.run_audit.display().to_string(),
            reason: "run-summary-not-recorded",
            err: &format!("{err:#}"),
        });
        report.detail("run_audit=write_failed");
    }
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut cfg = config::load_config()?;
    apply_flags(&mut cfg, opts)?;
    let mut report = CommandReport::new("sync");

    let root = cfg
        .source
        .root
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| {
            BackupError::InvalidConfig(
                "no source root: pass --root, set SHOEBOX_ROOT, or set source.root".to_string(),
            )
        })?;
    let storage_class: StorageClass = cfg
        .remote
        .storage_class
        .parse()
        .map_err(BackupError::InvalidConfig)?;
    let bucket = resolve_bucket(opts.bucket.as_deref(), &cfg)?;
    let started = now_epoch_secs()?;

    tracing::info!(
        bucket = %bucket.name,
        bucket_source = %bucket.source,
        backend = %cfg.remote.backend,
        root = %root.display(),
        "sync starting"
    );
    report.detail(format!("bucket={} (source={})", bucket.name, bucket.source));
    report.detail(format!("storage_class={storage_class}"));
    report.detail(format!("root={}", root.display()));

    let store = build_store(&cfg).context("failed to prepare remote store")?;
    let (mut snapshot, listing) = build_snapshot(
        store.as_ref(),
        &bucket.name,
        cfg.remote.page_size,
        Some(&paths.bucket_listing),
    )?;
    let remote_keys = snapshot.len();
    if snapshot.is_empty() {
        tracing::info!(bucket = %bucket.name, "bucket is empty; every local file will be uploaded");
    }
    report.detail(format!(
        "remote_keys={remote_keys} pages={} listing_cache={}",
        listing.pages,
        if listing.cache_written {
            paths.bucket_listing.display().to_string()
        } else {
            "unavailable".to_string()
        }
    ));

    let local = enumerate(&root, cfg.source.follow_links)?;
    report.detail(format!(
        "local_files={} local_bytes={}",
        local.files.len(),
        format_bytes(local.total_bytes)
    ));
    if local.unreadable > 0 {
        report.detail(format!("unreadable_entries={}", local.unreadable));
    }

    let (extractor, _) = build_extractor(&cfg);
    let recorder = OutcomeRecorder::new(&paths.success_log, &paths.failure_log);
    let layout = KeyLayout::new(&cfg.remote.key_prefix);
    report.detail(format!("key_prefix={}", layout.prefix()));
    let settings = SyncSettings {
        bucket: bucket.name.clone(),
        storage_class: storage_class.clone(),
        layout,
        retry: retry_policy(&cfg),
        dry_run: opts.dry_run,
        echo_progress: !opts.quiet,
    };
    let engine = SyncEngine::new(store.as_ref(), &extractor, &recorder, settings);
    let outcome = engine.run(&local.files, &mut snapshot);
    let stats = outcome.stats;

    for line in summary_lines(&stats, opts.dry_run) {
        tracing::info!("{line}");
        report.detail(line);
    }
    if outcome.claimed_this_run() > 0 {
        report.detail(format!(
            "duplicate_keys_this_run={}",
            outcome.claimed_this_run()
        ));
    }
    if outcome.retried_uploads() > 0 {
        report.detail(format!("retried_uploads={}", outcome.retried_uploads()));
    }
    for (file, result) in local.files.iter().zip(&outcome.outcomes) {
        if let FileOutcome::Failed { error, attempts } = result {
            report.detail(format!(
                "failed {} after {attempts} attempt(s): {}",
                file.path.display(),
                one_line(error)
            ));
        }
    }
    if stats.failed_count > 0 {
        report.issue(format!(
            "{} files failed to upload; see {}",
            stats.failed_count,
            paths.failure_log.display()
        ));
    }

    record_run(
        &paths,
        RunSummary {
            started_epoch_secs: started,
            finished_epoch_secs: started,
            bucket: bucket.name,
            bucket_source: bucket.source.to_string(),
            storage_class: storage_class.to_string(),
            backend: store.backend().to_string(),
            dry_run: opts.dry_run,
            local_files: local.files.len(),
            remote_keys,
            stats,
        },
        &mut report,
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_and_revalidate() {
        let mut cfg = BackupConfig::default();
        let opts = SyncOptions {
            storage_class: Some("glacier-ir".to_string()),
            backend: Some("s3".to_string()),
            root: Some(PathBuf::from("/media/phone")),
            ..SyncOptions::default()
        };
        apply_flags(&mut cfg, &opts).expect("valid flags");
        assert_eq!(cfg.remote.storage_class, "glacier-ir");
        assert_eq!(cfg.remote.backend, "s3");
        assert_eq!(cfg.source.root.as_deref(), Some("/media/phone"));

        let bad = SyncOptions {
            storage_class: Some("FROZEN".to_string()),
            ..SyncOptions::default()
        };
        assert!(apply_flags(&mut BackupConfig::default(), &bad).is_err());
    }

    #[test]
    fn retry_policy_follows_upload_section() {
        let mut cfg = BackupConfig::default();
        cfg.upload.max_attempts = 5;
        cfg.upload.backoff_base_ms = 10;
        cfg.upload.backoff_max_ms = 40;
        let policy = retry_policy(&cfg);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.delay_after(1), Duration::from_millis(10));
        assert_eq!(policy.delay_after(5), Duration::from_millis(40));
    }
}
