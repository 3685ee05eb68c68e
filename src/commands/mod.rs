pub mod inspect;
pub mod status;
pub mod sync;

use anyhow::{Result, anyhow};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backup::capture::{FfprobeProber, MetadataExtractor};
use crate::backup::config::{BACKEND_AWS_CLI, BACKEND_S3, BackupConfig};
use crate::storage::aws_cli::AwsCliOptions;
use crate::storage::s3_sdk::S3Options;
use crate::storage::{AwsCliStore, ObjectStore, S3Store};

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

/// Explicit tool path from the environment, if set.
pub fn configured_bin(var: &str) -> Option<PathBuf> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(PathBuf::from(v.trim())),
        _ => None,
    }
}

pub fn build_extractor(cfg: &BackupConfig) -> (MetadataExtractor, Option<PathBuf>) {
    let configured = configured_bin("SHOEBOX_FFPROBE_BIN");
    let timeout = (cfg.probe.timeout_secs > 0).then_some(cfg.probe.timeout_secs);
    let prober = FfprobeProber::new(configured.as_deref(), timeout);
    let resolved = prober.bin().map(Path::to_path_buf);
    (MetadataExtractor::new(Box::new(prober)), resolved)
}

pub fn aws_cli_options(cfg: &BackupConfig) -> AwsCliOptions {
    AwsCliOptions {
        profile: cfg.remote.profile.clone(),
        region: cfg.remote.region.clone(),
        endpoint: cfg.remote.endpoint.clone(),
    }
}

pub fn s3_options(cfg: &BackupConfig) -> S3Options {
    S3Options {
        region: cfg.remote.region.clone(),
        profile: cfg.remote.profile.clone(),
        endpoint: cfg.remote.endpoint.clone(),
        request_timeout: (cfg.remote.request_timeout_secs > 0)
            .then(|| Duration::from_secs(cfg.remote.request_timeout_secs)),
    }
}

pub fn build_store(cfg: &BackupConfig) -> Result<Box<dyn ObjectStore>> {
    match cfg.remote.backend.as_str() {
        BACKEND_AWS_CLI => {
            let store = AwsCliStore::new(
                configured_bin("SHOEBOX_AWS_BIN").as_deref(),
                aws_cli_options(cfg),
            )?;
            Ok(Box::new(store))
        }
        BACKEND_S3 => Ok(Box::new(S3Store::connect(&s3_options(cfg))?)),
        other => Err(anyhow!("unknown remote backend `{other}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_passes_through_only_when_configured() {
        let mut cfg = BackupConfig::default();
        assert!(aws_cli_options(&cfg).region.is_none());
        assert!(s3_options(&cfg).region.is_none());

        cfg.remote.region = Some("ap-southeast-2".to_string());
        cfg.remote.request_timeout_secs = 20;
        assert_eq!(aws_cli_options(&cfg).region.as_deref(), Some("ap-southeast-2"));
        let s3 = s3_options(&cfg);
        assert_eq!(s3.region.as_deref(), Some("ap-southeast-2"));
        assert_eq!(s3.request_timeout, Some(Duration::from_secs(20)));
    }
}
