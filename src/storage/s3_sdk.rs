use std::path::Path;
use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, StorageClass as S3StorageClass};
use tokio::runtime::Runtime;

use super::s3::{CompletedPartTag, PartRange, S3Calls};
use super::{ListPage, StorageClass, StoreError};

#[derive(Debug, Clone, Default)]
pub struct S3Options {
    /// Falls back to the SDK's region chain (`AWS_REGION`, profile) when unset.
    pub region: Option<String>,
    pub profile: Option<String>,
    /// S3-compatible endpoint; switches to path-style addressing.
    pub endpoint: Option<String>,
    pub request_timeout: Option<Duration>,
}

/// `aws-sdk-s3` client driven by a private current-thread runtime so the
/// store stays blocking.
pub struct SdkCalls {
    runtime: Runtime,
    client: Client,
}

impl SdkCalls {
    pub fn connect(options: &S3Options) -> Result<Self, StoreError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = runtime.block_on(client_from_options(options));
        Ok(Self { runtime, client })
    }
}

async fn client_from_options(options: &S3Options) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = &options.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(profile) = &options.profile {
        loader = loader.profile_name(profile);
    }
    if let Some(timeout) = options.request_timeout {
        loader = loader.timeout_config(
            TimeoutConfig::builder()
                .operation_attempt_timeout(timeout)
                .build(),
        );
    }
    let shared = loader.load().await;

    let mut builder = aws_sdk_s3::config::Builder::from(&shared);
    if let Some(url) = &options.endpoint {
        builder = builder.endpoint_url(url).force_path_style(true);
    }
    Client::from_conf(builder.build())
}

/// Maps an SDK failure onto `StoreError`, keeping the HTTP status when S3
/// answered and marking only timeouts and I/O dispatch failures retryable.
fn from_sdk<E>(operation: &str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let detail = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::TimeoutError(_) => {
            return StoreError::Transport {
                message: format!("{operation}: {detail}"),
                retryable: true,
            };
        }
        SdkError::DispatchFailure(failure) => {
            return StoreError::Transport {
                message: format!("{operation}: {detail}"),
                retryable: failure.is_timeout() || failure.is_io(),
            };
        }
        _ => {}
    }
    match err.raw_response() {
        Some(raw) => StoreError::Http {
            status: raw.status().as_u16(),
            url: operation.to_string(),
            body: match (err.code(), err.message()) {
                (Some(code), Some(message)) => format!("{code}: {message}"),
                (Some(code), None) => code.to_string(),
                _ => detail,
            },
        },
        None => StoreError::Malformed(format!("{operation}: {detail}")),
    }
}

fn body_error(path: &Path, err: impl std::fmt::Display) -> StoreError {
    StoreError::Io(std::io::Error::other(format!(
        "failed to read {}: {err}",
        path.display()
    )))
}

impl S3Calls for SdkCalls {
    fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<&str>,
        max_keys: i32,
    ) -> Result<ListPage, StoreError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .list_objects_v2()
                    .bucket(bucket)
                    .max_keys(max_keys)
                    .set_continuation_token(continuation.map(str::to_string))
                    .send(),
            )
            .map_err(|err| from_sdk("ListObjectsV2", err))?;

        let keys = output
            .contents()
            .iter()
            .filter_map(|object| object.key())
            .map(str::to_string)
            .collect();
        let next_token = if output.is_truncated().unwrap_or(false) {
            output
                .next_continuation_token()
                .filter(|token| !token.is_empty())
                .map(str::to_string)
        } else {
            None
        };
        Ok(ListPage { keys, next_token })
    }

    fn put_single(
        &self,
        bucket: &str,
        key: &str,
        local_path: &Path,
        storage_class: &StorageClass,
    ) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            let body = ByteStream::from_path(local_path)
                .await
                .map_err(|err| body_error(local_path, err))?;
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .storage_class(S3StorageClass::from(storage_class.as_str()))
                .body(body)
                .send()
                .await
                .map_err(|err| from_sdk("PutObject", err))?;
            Ok(())
        })
    }

    fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
        storage_class: &StorageClass,
    ) -> Result<String, StoreError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .create_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .storage_class(S3StorageClass::from(storage_class.as_str()))
                    .send(),
            )
            .map_err(|err| from_sdk("CreateMultipartUpload", err))?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StoreError::Malformed("CreateMultipartUpload: no upload id".to_string()))
    }

    fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        local_path: &Path,
        part: PartRange,
    ) -> Result<String, StoreError> {
        self.runtime.block_on(async {
            let body = ByteStream::read_from()
                .path(local_path)
                .offset(part.offset)
                .length(Length::Exact(part.length))
                .build()
                .await
                .map_err(|err| body_error(local_path, err))?;
            let output = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part.number)
                .body(body)
                .send()
                .await
                .map_err(|err| from_sdk("UploadPart", err))?;
            Ok(output.e_tag().unwrap_or_default().to_string())
        })
    }

    fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPartTag],
    ) -> Result<(), StoreError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        CompletedPart::builder()
                            .e_tag(&part.e_tag)
                            .part_number(part.number)
                            .build()
                    })
                    .collect(),
            ))
            .build();
        self.runtime
            .block_on(
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .multipart_upload(completed)
                    .send(),
            )
            .map_err(|err| from_sdk("CompleteMultipartUpload", err))?;
        Ok(())
    }

    fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                self.client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .send(),
            )
            .map_err(|err| from_sdk("AbortMultipartUpload", err))?;
        Ok(())
    }
}
