use anyhow::Result;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BackupPaths {
    pub shoebox_home: PathBuf,
    pub logs_dir: PathBuf,
    pub process_log: PathBuf,
    pub bucket_listing: PathBuf,
    pub success_log: PathBuf,
    pub failure_log: PathBuf,
    pub run_audit: PathBuf,
}

fn required_home_dir() -> Result<PathBuf> {
    if let Some(home) = dirs::home_dir() {
        return Ok(home);
    }
    Err(anyhow::anyhow!("HOME directory could not be resolved"))
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

impl BackupPaths {
    /// Default layout under `shoebox_home`, ignoring per-file env overrides.
    pub fn under(shoebox_home: &Path) -> Self {
        let logs_dir = shoebox_home.join("logs");
        Self {
            shoebox_home: shoebox_home.to_path_buf(),
            process_log: logs_dir.join("backup.log"),
            bucket_listing: logs_dir.join("currentfilesinbucket.log"),
            success_log: logs_dir.join("successful-uploads.log"),
            failure_log: logs_dir.join("failed-uploads.log"),
            run_audit: logs_dir.join("runs.jsonl"),
            logs_dir,
        }
    }
}

pub fn resolve_paths() -> Result<BackupPaths> {
    let home = required_home_dir()?;
    let shoebox_home = env_or_default_path("SHOEBOX_HOME", home.join(".shoebox"));
    let defaults = BackupPaths::under(&shoebox_home);

    let logs_dir = env_or_default_path("SHOEBOX_LOGS_DIR", defaults.logs_dir);
    let process_log = env_or_default_path("SHOEBOX_PROCESS_LOG", logs_dir.join("backup.log"));
    let bucket_listing = env_or_default_path(
        "SHOEBOX_BUCKET_LISTING_FILE",
        logs_dir.join("currentfilesinbucket.log"),
    );
    let success_log =
        env_or_default_path("SHOEBOX_SUCCESS_LOG", logs_dir.join("successful-uploads.log"));
    let failure_log =
        env_or_default_path("SHOEBOX_FAILURE_LOG", logs_dir.join("failed-uploads.log"));
    let run_audit = env_or_default_path("SHOEBOX_RUN_AUDIT", logs_dir.join("runs.jsonl"));

    Ok(BackupPaths {
        shoebox_home,
        logs_dir,
        process_log,
        bucket_listing,
        success_log,
        failure_log,
        run_audit,
    })
}
