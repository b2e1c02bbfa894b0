//! Object storage gateway.
//!
//! [`ObjectStore`] is the seam between the pipeline and durable storage. The S3
//! implementation lives in `s3_store`; [`InMemoryObjectStore`] backs tests and
//! dry runs, and [`RetryingObjectStore`] adds bounded retry on transient failures.

use crate::config::RetryConfig;
use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Errors that can occur during object storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to upload {bucket}/{key}: {message}")]
    Upload {
        bucket: String,
        key: String,
        message: String,
        transient: bool,
    },

    #[error("Failed to presign {bucket}/{key}: {message}")]
    Presign {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("Failed to read upload body {path}: {source}")]
    Body {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StorageError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Upload { transient: true, .. })
    }
}

/// Durable object storage, shared by all concurrent uploads
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload the file at `body` under `bucket`/`key`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Time-limited GET URL for `bucket`/`key`
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StorageError>;
}

/// Record of a completed put
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecord {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub size_bytes: usize,
}

/// Process-local object store
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<(String, String), Vec<u8>>>,
    puts: Mutex<Vec<PutRecord>>,
    attempts: Mutex<usize>,
    scripted_failures: Mutex<VecDeque<bool>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` puts; `transient` controls whether they may be retried
    pub fn fail_next_puts(&self, count: usize, transient: bool) {
        let mut failures = self.scripted_failures.lock();
        failures.extend(std::iter::repeat(transient).take(count));
    }

    /// Successful puts in order
    pub fn puts(&self) -> Vec<PutRecord> {
        self.puts.lock().clone()
    }

    /// Put attempts including failed ones
    pub fn put_attempts(&self) -> usize {
        *self.attempts.lock()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        *self.attempts.lock() += 1;

        let scripted = self.scripted_failures.lock().pop_front();
        if let Some(transient) = scripted {
            return Err(StorageError::Upload {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: "injected failure".to_string(),
                transient,
            });
        }

        let data = tokio::fs::read(body).await.map_err(|source| StorageError::Body {
            path: body.to_path_buf(),
            source,
        })?;

        self.puts.lock().push(PutRecord {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            size_bytes: data.len(),
        });
        self.objects
            .write()
            .insert((bucket.to_string(), key.to_string()), data);

        Ok(())
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!(
            "memory://{bucket}/{key}?X-Amz-Expires={}",
            ttl.as_secs()
        ))
    }
}

/// Retries transient put failures with exponential backoff. Presigning is
/// local computation and is passed straight through.
pub struct RetryingObjectStore<S> {
    inner: S,
    policy: RetryConfig,
}

impl<S: ObjectStore> RetryingObjectStore<S> {
    pub fn new(inner: S, policy: RetryConfig) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for RetryingObjectStore<S> {
    #[instrument(skip(self, body, content_type))]
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: &Path,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.policy.initial_interval())
            .with_max_interval(self.policy.max_interval())
            .with_max_elapsed_time(None)
            .build();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.inner.put_object(bucket, key, body, content_type).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(attempt, "Upload succeeded after retry");
                    }
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = backoff
                        .next_backoff()
                        .unwrap_or_else(|| self.policy.max_interval());
                    warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Transient upload failure, retrying"
                    );
                    metrics::counter!("clipstore.put.retries").increment(1);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String, StorageError> {
        self.inner.presign_get(bucket, key, ttl).await
    }
}
