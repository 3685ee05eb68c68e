use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;

use crate::backup::engine::RunStatistics;
use crate::backup::paths::BackupPaths;
use crate::backup::util::now_epoch_secs;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_epoch_secs: u64,
    pub finished_epoch_secs: u64,
    pub bucket: String,
    pub bucket_source: String,
    pub storage_class: String,
    pub backend: String,
    pub dry_run: bool,
    pub local_files: usize,
    pub remote_keys: usize,
    #[serde(flatten)]
    pub stats: RunStatistics,
}

/// Appends one JSON line per completed run to `runs.jsonl`.
pub fn append_run(paths: &BackupPaths, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = paths.run_audit.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let line = format!("{}\n", serde_json::to_string(summary)?);
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&paths.run_audit)
        .with_context(|| format!("failed to open {}", paths.run_audit.display()))?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

pub fn finish(mut summary: RunSummary) -> Result<RunSummary> {
    summary.finished_epoch_secs = now_epoch_secs()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn runs_are_appended_as_json_lines() {
        let tmp = tempdir().expect("tempdir");
        let paths = BackupPaths::under(tmp.path());
        let summary = RunSummary {
            started_epoch_secs: 10,
            finished_epoch_secs: 20,
            bucket: "photos".to_string(),
            bucket_source: "flag".to_string(),
            storage_class: "DEEP_ARCHIVE".to_string(),
            backend: "aws-cli".to_string(),
            dry_run: false,
            local_files: 3,
            remote_keys: 1,
            stats: RunStatistics {
                uploaded_count: 2,
                skipped_count: 1,
                uploaded_bytes: 2048,
                ..RunStatistics::default()
            },
        };
        append_run(&paths, &summary).expect("append");
        append_run(&paths, &summary).expect("append");

        let raw = fs::read_to_string(&paths.run_audit).expect("read");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
        assert_eq!(parsed["bucket"], "photos");
        assert_eq!(parsed["uploaded_count"], 2);
        assert_eq!(parsed["uploaded_bytes"], 2048);
    }

    #[test]
    fn finish_stamps_the_end_time() {
        let summary = RunSummary {
            started_epoch_secs: 1,
            finished_epoch_secs: 0,
            bucket: "photos".to_string(),
            bucket_source: "fallback".to_string(),
            storage_class: "DEEP_ARCHIVE".to_string(),
            backend: "s3".to_string(),
            dry_run: true,
            local_files: 0,
            remote_keys: 0,
            stats: RunStatistics::default(),
        };
        let finished = finish(summary).expect("finish");
        assert!(finished.finished_epoch_secs >= 1);
    }
}
