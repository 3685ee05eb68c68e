use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::backup::key::DEFAULT_KEY_PREFIX;
use crate::storage::{DEFAULT_STORAGE_CLASS, StorageClass};

pub const BACKEND_AWS_CLI: &str = "aws-cli";
pub const BACKEND_S3: &str = "s3";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SourceConfig {
    pub root: Option<String>,
    pub follow_links: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Used when neither `--bucket` nor the terraform lookup yields a bucket.
    pub fallback_bucket: Option<String>,
    pub backend: String,
    pub storage_class: String,
    pub key_prefix: String,
    /// Unset leaves the region to the AWS profile and environment.
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
    pub page_size: u32,
    pub request_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            fallback_bucket: None,
            backend: BACKEND_AWS_CLI.to_string(),
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            region: None,
            endpoint: None,
            profile: None,
            page_size: 1000,
            request_timeout_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BucketLookupConfig {
    pub enabled: bool,
    pub dir: String,
    pub output: String,
    pub timeout_secs: u64,
}

impl Default for BucketLookupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: ".".to_string(),
            output: "bucket_name".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub timeout_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackupConfig {
    pub source: SourceConfig,
    pub remote: RemoteConfig,
    pub bucket_lookup: BucketLookupConfig,
    pub upload: UploadConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialBackupConfig {
    source: Option<SourceConfig>,
    remote: Option<RemoteConfig>,
    bucket_lookup: Option<BucketLookupConfig>,
    upload: Option<UploadConfig>,
    probe: Option<ProbeConfig>,
}

fn env_or_u64(var: &str, fallback: u64) -> u64 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u64>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_u32(var: &str, fallback: u32) -> u32 {
    match env::var(var) {
        Ok(v) => v.trim().parse::<u32>().ok().unwrap_or(fallback),
        Err(_) => fallback,
    }
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => {
            let trimmed = v.trim();
            match trimmed {
                "1" | "true" | "TRUE" | "yes" | "on" => true,
                "0" | "false" | "FALSE" | "no" | "off" => false,
                _ => fallback,
            }
        }
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn env_or_optional(var: &str, fallback: Option<String>) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => fallback,
    }
}

pub fn validate(cfg: &BackupConfig) -> Result<()> {
    cfg.remote
        .storage_class
        .parse::<StorageClass>()
        .map_err(|err| anyhow!("invalid storage class: {err}"))?;
    if cfg.remote.backend != BACKEND_AWS_CLI && cfg.remote.backend != BACKEND_S3 {
        return Err(anyhow!(
            "invalid remote backend `{}`: use `{BACKEND_AWS_CLI}` or `{BACKEND_S3}`",
            cfg.remote.backend
        ));
    }
    let prefix = cfg.remote.key_prefix.trim();
    if prefix.is_empty() || prefix.starts_with('/') || prefix.ends_with('/') {
        return Err(anyhow!(
            "invalid key prefix `{}`: must be non-empty without leading or trailing `/`",
            cfg.remote.key_prefix
        ));
    }
    if !(1..=1000).contains(&cfg.remote.page_size) {
        return Err(anyhow!("invalid listing page size: require 1..=1000"));
    }
    if cfg.upload.max_attempts == 0 {
        return Err(anyhow!("invalid upload max attempts: must be >= 1"));
    }
    if cfg.upload.backoff_max_ms < cfg.upload.backoff_base_ms {
        return Err(anyhow!(
            "invalid upload backoff: max delay must be >= base delay"
        ));
    }
    if cfg.bucket_lookup.enabled && cfg.bucket_lookup.output.trim().is_empty() {
        return Err(anyhow!("invalid bucket lookup output name: cannot be empty"));
    }
    Ok(())
}

pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(custom) = env::var("SHOEBOX_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(home) = env::var("SHOEBOX_HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed).join("shoebox.toml"));
        }
    }

    let home = dirs::home_dir()?;
    Some(home.join(".shoebox").join("shoebox.toml"))
}

fn merge_toml(base: &mut BackupConfig, raw: &str) -> Result<()> {
    let parsed: PartialBackupConfig = toml::from_str(raw)?;
    if let Some(source) = parsed.source {
        base.source = source;
    }
    if let Some(remote) = parsed.remote {
        base.remote = remote;
    }
    if let Some(bucket_lookup) = parsed.bucket_lookup {
        base.bucket_lookup = bucket_lookup;
    }
    if let Some(upload) = parsed.upload {
        base.upload = upload;
    }
    if let Some(probe) = parsed.probe {
        base.probe = probe;
    }
    Ok(())
}

fn merge_file_config(base: &mut BackupConfig) -> Result<()> {
    let Some(path) = resolve_config_path() else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    merge_toml(base, &raw)
        .map_err(|err| anyhow!("failed to parse shoebox config {}: {err}", path.display()))
}

fn apply_env(cfg: &mut BackupConfig) {
    cfg.source.root = env_or_optional("SHOEBOX_ROOT", cfg.source.root.take());
    cfg.source.follow_links = env_or_bool("SHOEBOX_FOLLOW_LINKS", cfg.source.follow_links);

    cfg.remote.fallback_bucket =
        env_or_optional("SHOEBOX_BUCKET", cfg.remote.fallback_bucket.take());
    cfg.remote.backend = env_or_string("SHOEBOX_BACKEND", &cfg.remote.backend);
    cfg.remote.storage_class = env_or_string("SHOEBOX_STORAGE_CLASS", &cfg.remote.storage_class);
    cfg.remote.key_prefix = env_or_string("SHOEBOX_KEY_PREFIX", &cfg.remote.key_prefix);
    cfg.remote.region = env_or_optional("SHOEBOX_REGION", cfg.remote.region.take());
    cfg.remote.endpoint = env_or_optional("SHOEBOX_ENDPOINT", cfg.remote.endpoint.take());
    cfg.remote.profile = env_or_optional("SHOEBOX_AWS_PROFILE", cfg.remote.profile.take());
    cfg.remote.page_size = env_or_u32("SHOEBOX_LIST_PAGE_SIZE", cfg.remote.page_size);
    cfg.remote.request_timeout_secs = env_or_u64(
        "SHOEBOX_REQUEST_TIMEOUT_SECS",
        cfg.remote.request_timeout_secs,
    );

    cfg.bucket_lookup.enabled =
        env_or_bool("SHOEBOX_TERRAFORM_LOOKUP", cfg.bucket_lookup.enabled);
    cfg.bucket_lookup.dir = env_or_string("SHOEBOX_TERRAFORM_DIR", &cfg.bucket_lookup.dir);
    cfg.bucket_lookup.output =
        env_or_string("SHOEBOX_TERRAFORM_OUTPUT", &cfg.bucket_lookup.output);

    cfg.upload.max_attempts = env_or_u32("SHOEBOX_UPLOAD_MAX_ATTEMPTS", cfg.upload.max_attempts);
    cfg.upload.backoff_base_ms =
        env_or_u64("SHOEBOX_UPLOAD_BACKOFF_MS", cfg.upload.backoff_base_ms);
    cfg.upload.backoff_max_ms =
        env_or_u64("SHOEBOX_UPLOAD_BACKOFF_MAX_MS", cfg.upload.backoff_max_ms);

    cfg.probe.timeout_secs = env_or_u64("SHOEBOX_PROBE_TIMEOUT_SECS", cfg.probe.timeout_secs);
}

pub fn load_config() -> Result<BackupConfig> {
    let mut cfg = BackupConfig::default();
    merge_file_config(&mut cfg)?;
    apply_env(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}
