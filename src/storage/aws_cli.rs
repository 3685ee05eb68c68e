use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde::Deserialize;

use super::{ListPage, ObjectStore, StorageClass, StoreError};

#[derive(Debug, Clone, Default)]
pub struct AwsCliOptions {
    pub profile: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AwsCliStore {
    bin: PathBuf,
    options: AwsCliOptions,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "PascalCase", default)]
struct ListObjectsOutput {
    contents: Vec<ListedObject>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListedObject {
    key: String,
}

pub fn resolve_aws_bin(configured: Option<&Path>) -> Result<PathBuf, StoreError> {
    if let Some(bin) = configured
        && bin.exists()
    {
        return Ok(bin.to_path_buf());
    }
    which::which("aws")
        .map_err(|err| StoreError::ToolUnavailable(format!("aws CLI not found in SHOEBOX_AWS_BIN or PATH: {err}")))
}

fn parse_list_output(stdout: &[u8]) -> Result<ListPage, StoreError> {
    let raw = String::from_utf8_lossy(stdout);
    if raw.trim().is_empty() {
        // `aws s3api list-objects-v2` prints nothing for an empty bucket.
        return Ok(ListPage::default());
    }
    let parsed: ListObjectsOutput = serde_json::from_str(raw.trim())
        .map_err(|err| StoreError::Malformed(format!("list-objects-v2 output: {err}")))?;
    Ok(ListPage {
        keys: parsed.contents.into_iter().map(|obj| obj.key).collect(),
        next_token: parsed.next_token.filter(|t| !t.is_empty()),
    })
}

impl AwsCliStore {
    pub fn new(configured_bin: Option<&Path>, options: AwsCliOptions) -> Result<Self, StoreError> {
        Ok(Self {
            bin: resolve_aws_bin(configured_bin)?,
            options,
        })
    }

    fn global_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(profile) = &self.options.profile {
            args.push("--profile".into());
            args.push(profile.into());
        }
        if let Some(region) = &self.options.region {
            args.push("--region".into());
            args.push(region.into());
        }
        if let Some(endpoint) = &self.options.endpoint {
            args.push("--endpoint-url".into());
            args.push(endpoint.into());
        }
        args
    }

    fn run(&self, label: &str, args: Vec<OsString>) -> Result<Output, StoreError> {
        let output = Command::new(&self.bin)
            .args(args)
            .args(self.global_args())
            .env("AWS_PAGER", "")
            .output()
            .map_err(|err| {
                StoreError::ToolUnavailable(format!("failed to run `{}`: {err}", self.bin.display()))
            })?;
        if output.status.success() {
            return Ok(output);
        }
        Err(StoreError::Command {
            command: format!("aws {label}"),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl ObjectStore for AwsCliStore {
    fn backend(&self) -> &'static str {
        "aws-cli"
    }

    fn list_page(
        &self,
        bucket: &str,
        continuation: Option<&str>,
        page_size: u32,
    ) -> Result<ListPage, StoreError> {
        let mut args: Vec<OsString> = vec![
            "s3api".into(),
            "list-objects-v2".into(),
            "--bucket".into(),
            bucket.into(),
            "--output".into(),
            "json".into(),
            "--max-items".into(),
            page_size.to_string().into(),
        ];
        if let Some(token) = continuation {
            args.push("--starting-token".into());
            args.push(token.into());
        }
        let output = self.run("s3api list-objects-v2", args)?;
        parse_list_output(&output.stdout)
    }

    fn put_object(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        storage_class: &StorageClass,
    ) -> Result<(), StoreError> {
        let args: Vec<OsString> = vec![
            "s3".into(),
            "cp".into(),
            local_path.as_os_str().to_owned(),
            format!("s3://{bucket}/{key}").into(),
            "--storage-class".into(),
            storage_class.as_str().into(),
            "--only-show-errors".into(),
            "--no-progress".into(),
        ];
        self.run("s3 cp", args)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn fake_aws(dir: &Path, script: &str) -> PathBuf {
        let bin = dir.join("aws");
        fs::write(&bin, script).expect("write fake aws");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&bin).expect("metadata").permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&bin, perms).expect("chmod");
        }
        bin
    }

    #[test]
    fn region_flag_only_when_configured() {
        let store = AwsCliStore {
            bin: PathBuf::from("aws"),
            options: AwsCliOptions::default(),
        };
        assert!(store.global_args().is_empty());

        let store = AwsCliStore {
            bin: PathBuf::from("aws"),
            options: AwsCliOptions {
                region: Some("eu-west-2".to_string()),
                ..AwsCliOptions::default()
            },
        };
        let args: Vec<String> = store
            .global_args()
            .iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        assert_eq!(args, vec!["--region", "eu-west-2"]);
    }

    #[cfg(unix)]
    #[test]
    fn listing_runs_with_pager_disabled() {
        let tmp = tempdir().expect("tempdir");
        let bin = fake_aws(
            tmp.path(),
            r#"#!/usr/bin/env bash
echo "{\"Contents\":[{\"Key\":\"pager=${AWS_PAGER-unset}\"}]}"
"#,
        );
        let store = AwsCliStore::new(Some(&bin), AwsCliOptions::default()).expect("store");

        let page = store.list_page("photos", None, 10).expect("page");

        assert_eq!(page.keys, vec!["pager=".to_string()]);
    }

    #[test]
    fn empty_output_is_an_empty_page() {
        let page = parse_list_output(b"  \n").expect("empty page");
        assert!(page.keys.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn parses_keys_and_next_token() {
        let raw = br#"{
            "Contents": [
                {"Key": "ios/2024/03/2024-03-07_14-05-09_IMG_0012.JPG", "Size": 10},
                {"Key": "ios/2024/03/2024-03-07_14-05-10_IMG_0013.JPG", "Size": 11}
            ],
            "NextToken": "eyJDb250aW51YXRpb25Ub2tlbiI6IG51bGx9"
        }"#;
        let page = parse_list_output(raw).expect("page");
        assert_eq!(page.keys.len(), 2);
        assert_eq!(page.keys[0], "ios/2024/03/2024-03-07_14-05-09_IMG_0012.JPG");
        assert_eq!(
            page.next_token.as_deref(),
            Some("eyJDb250aW51YXRpb25Ub2tlbiI6IG51bGx9")
        );
    }

    #[test]
    fn bucket_without_contents_parses() {
        let page = parse_list_output(br#"{"RequestCharged": null}"#).expect("page");
        assert!(page.keys.is_empty());
    }

    #[test]
    fn garbage_output_is_malformed() {
        assert!(parse_list_output(b"not json").is_err());
    }
}
