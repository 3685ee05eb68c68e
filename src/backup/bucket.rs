use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::backup::config::BackupConfig;
use crate::backup::util::run_command_with_optional_timeout;
use crate::error::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketSource {
    Flag,
    Terraform,
    Fallback,
}

impl BucketSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Terraform => "terraform",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for BucketSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedBucket {
    pub name: String,
    pub source: BucketSource,
}

pub fn resolve_terraform_bin() -> Option<PathBuf> {
    if let Ok(custom) = env::var("SHOEBOX_TERRAFORM_BIN") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() && Path::new(trimmed).exists() {
            return Some(PathBuf::from(trimmed));
        }
    }
    which::which("terraform").ok()
}

/// `terraform output -raw <name>` in the configured directory; `None` on any failure.
pub fn terraform_output(bin: &Path, dir: &Path, output_name: &str, timeout_secs: u64) -> Option<String> {
    let mut cmd = Command::new(bin);
    cmd.current_dir(dir).args(["output", "-raw", output_name]);
    let timeout = (timeout_secs > 0).then_some(timeout_secs);
    let output = match run_command_with_optional_timeout(&mut cmd, timeout) {
        Ok(output) => output,
        Err(err) => {
            tracing::debug!(error = %format!("{err:#}"), "terraform output failed to run");
            return None;
        }
    };
    if !output.status.success() {
        tracing::debug!(
            status = %output.status,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "terraform output returned an error"
        );
        return None;
    }
    let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!name.is_empty() && !name.contains(char::is_whitespace)).then_some(name)
}

/// CLI flag, then the terraform output, then the configured fallback.
pub fn resolve_bucket(
    flag: Option<&str>,
    cfg: &BackupConfig,
) -> Result<ResolvedBucket, BackupError> {
    if let Some(name) = flag.map(str::trim).filter(|name| !name.is_empty()) {
        return Ok(ResolvedBucket {
            name: name.to_string(),
            source: BucketSource::Flag,
        });
    }

    if cfg.bucket_lookup.enabled
        && let Some(bin) = resolve_terraform_bin()
        && let Some(name) = terraform_output(
            &bin,
            Path::new(&cfg.bucket_lookup.dir),
            &cfg.bucket_lookup.output,
            cfg.bucket_lookup.timeout_secs,
        )
    {
        return Ok(ResolvedBucket {
            name,
            source: BucketSource::Terraform,
        });
    }

    match cfg
        .remote
        .fallback_bucket
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
    {
        Some(name) => Ok(ResolvedBucket {
            name: name.to_string(),
            source: BucketSource::Fallback,
        }),
        None => Err(BackupError::MissingBucket),
    }
}
