use crate::config::S3Config;
use crate::object_store::{ObjectStore, StorageError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// S3-backed object store. The client is cheap to clone and safe to share
/// between concurrent uploads.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: S3Client,
    multipart_threshold_bytes: u64,
    part_size_bytes: u64,
}

impl S3ObjectStore {
    /// Create a new S3 object store from ambient AWS credentials
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Self::from_client(client, config)
    }

    /// Wrap an already configured client
    pub fn from_client(client: S3Client, config: &S3Config) -> Self {
        Self {
            client,
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
        }
    }

    /// Single-request upload for files under the multipart threshold
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let stream = ByteStream::from_path(body)
            .await
            .map_err(|e| body_error(body, e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(stream)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| upload_error(bucket, key, e))?;

        Ok(())
    }

    /// Multipart upload streamed part by part from disk
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        content_type: &str,
        size_bytes: u64,
    ) -> Result<(), StorageError> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| upload_error(bucket, key, e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| StorageError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "no upload ID in response".to_string(),
                transient: false,
            })?
            .to_string();

        match self
            .upload_parts(bucket, key, body, &upload_id, size_bytes)
            .await
        {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .map_err(|e| upload_error(bucket, key, e))?;

                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        bucket,
                        key,
                        upload_id = %upload_id,
                        error = %DisplayErrorContext(&abort_err),
                        "Failed to abort multipart upload"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        upload_id: &str,
        size_bytes: u64,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        let mut completed_parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1;

        while offset < size_bytes {
            let length = self.part_size_bytes.min(size_bytes - offset);
            let stream = ByteStream::read_from()
                .path(body)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| body_error(body, e))?;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(stream)
                .send()
                .await
                .map_err(|e| upload_error(bucket, key, e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );

            debug!(part_number, offset, length, "Uploaded part");
            offset += length;
            part_number += 1;
        }

        Ok(completed_parts)
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, body, content_type))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let size_bytes = tokio::fs::metadata(body)
            .await
            .map_err(|source| StorageError::Body {
                path: body.to_path_buf(),
                source,
            })?
            .len();

        if size_bytes > self.multipart_threshold_bytes {
            self.multipart_upload(bucket, key, body, content_type, size_bytes)
                .await?;
        } else {
            self.simple_upload(bucket, key, body, content_type).await?;
        }

        info!(size_bytes, "Object uploaded");
        Ok(())
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StorageError> {
        let presign_error = |message: String| StorageError::Presign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        let presigning_config = PresigningConfig::expires_in(ttl)
            .map_err(|e| presign_error(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(|e| presign_error(DisplayErrorContext(&e).to_string()))?;

        Ok(presigned.uri().to_string())
    }
}

/// Network-level failures and 5xx responses may succeed on retry
fn is_transient<E>(err: &SdkError<E, HttpResponse>) -> bool {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => true,
        SdkError::ServiceError(e) => e.raw().status().is_server_error(),
        _ => false,
    }
}

fn upload_error<E>(bucket: &str, key: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Upload {
        bucket: bucket.to_string(),
        key: key.to_string(),
        transient: is_transient(&err),
        message: DisplayErrorContext(&err).to_string(),
    }
}

fn body_error(body: &Path, err: impl std::error::Error + Send + Sync + 'static) -> StorageError {
    StorageError::Body {
        path: body.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::Other, err),
    }
}
