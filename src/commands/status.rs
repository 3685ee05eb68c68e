use anyhow::Result;
use std::env;

use crate::backup::bucket::{resolve_bucket, resolve_terraform_bin};
use crate::backup::config::{self, BACKEND_AWS_CLI};
use crate::backup::paths::resolve_paths;
use crate::commands::{CommandReport, build_extractor, configured_bin};
use crate::storage::aws_cli::resolve_aws_bin;

mod allowlist {
    include!(concat!(env!("OUT_DIR"), "/shoebox_env_allowlist.rs"));
}

const ENV_PREFIX: &str = "SHOEBOX_";

/// `SHOEBOX_*` names in `vars` that nothing in this build reads.
pub fn unknown_env_keys<I>(vars: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut unknown: Vec<String> = vars
        .into_iter()
        .filter(|key| key.starts_with(ENV_PREFIX))
        .filter(|key| !allowlist::GENERATED_SHOEBOX_ENV_ALLOWLIST.contains(&key.as_str()))
        .collect();
    unknown.sort();
    unknown
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = CommandReport::new("status");

    report.detail(format!("build_id={}", env!("BUILD_UUID")));
    report.detail(format!("shoebox_home={}", paths.shoebox_home.display()));
    report.detail(format!("process_log={}", paths.process_log.display()));
    report.detail(format!("bucket_listing={}", paths.bucket_listing.display()));
    report.detail(format!("success_log={}", paths.success_log.display()));
    report.detail(format!("failure_log={}", paths.failure_log.display()));
    report.detail(format!("run_audit={}", paths.run_audit.display()));

    match config::resolve_config_path() {
        Some(path) if path.exists() => report.detail(format!("config={}", path.display())),
        Some(path) => report.detail(format!("config={} (absent, using defaults)", path.display())),
        None => report.detail("config=unresolved (using defaults)"),
    }

    for key in unknown_env_keys(env::vars().map(|(key, _)| key)) {
        report.issue(format!("unknown environment variable {key}"));
    }

    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            report.issue(format!("config invalid: {err:#}"));
            return Ok(report);
        }
    };

    report.detail(format!("backend={}", cfg.remote.backend));
    report.detail(format!("storage_class={}", cfg.remote.storage_class));
    report.detail(format!("key_prefix={}", cfg.remote.key_prefix));
    report.detail(format!(
        "region={}",
        cfg.remote.region.as_deref().unwrap_or("default (aws profile)")
    ));
    report.detail(format!(
        "source_root={}",
        cfg.source.root.as_deref().unwrap_or("unset")
    ));
    report.detail(format!(
        "upload_retry=attempts:{} base_ms:{} max_ms:{}",
        cfg.upload.max_attempts, cfg.upload.backoff_base_ms, cfg.upload.backoff_max_ms
    ));

    match resolve_bucket(None, &cfg) {
        Ok(bucket) => report.detail(format!("bucket={} (source={})", bucket.name, bucket.source)),
        Err(err) => report.issue(err.to_string()),
    }

    match resolve_aws_bin(configured_bin("SHOEBOX_AWS_BIN").as_deref()) {
        Ok(bin) => report.detail(format!("tool.aws={}", bin.display())),
        Err(err) if cfg.remote.backend == BACKEND_AWS_CLI => report.issue(err.to_string()),
        Err(_) => report.detail("tool.aws=missing"),
    }
    match build_extractor(&cfg).1 {
        Some(bin) => report.detail(format!("tool.ffprobe={}", bin.display())),
        None => report.detail("tool.ffprobe=missing (videos fall back to mtime)"),
    }
    match resolve_terraform_bin() {
        Some(bin) => report.detail(format!("tool.terraform={}", bin.display())),
        None => report.detail("tool.terraform=missing"),
    }

    Ok(report)
}
