use crate::assets::MediaAsset;
use crate::error::{Error, Result};
use crate::locator::Locator;
use crate::object_store::{ObjectStore, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Time-limited retrieval URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues presigned GET URLs for stored videos
#[derive(Clone)]
pub struct UrlSigner {
    store: Arc<dyn ObjectStore>,
    ttl: Duration,
}

impl UrlSigner {
    pub fn new(store: Arc<dyn ObjectStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Presign `locator` for `ttl`
    #[instrument(skip(self), fields(bucket = %locator.bucket, key = %locator.key))]
    pub async fn sign(&self, locator: &Locator, ttl: Duration) -> Result<SignedUrl> {
        let expires_in = chrono::Duration::from_std(ttl).map_err(|_| StorageError::Presign {
            bucket: locator.bucket.clone(),
            key: locator.key.clone(),
            message: format!("expiry {ttl:?} is out of range"),
        })?;
        let expires_at = Utc::now() + expires_in;

        let url = self
            .store
            .presign_get(&locator.bucket, &locator.key, ttl)
            .await?;

        debug!(expires_at = %expires_at, "Presigned URL generated");
        Ok(SignedUrl { url, expires_at })
    }

    /// Replace the stored locator on `asset` with a URL signed for the default
    /// TTL. Assets without an upload are returned untouched.
    pub async fn sign_asset(&self, mut asset: MediaAsset) -> Result<MediaAsset> {
        let Some(locator) = asset.locator()? else {
            return Ok(asset);
        };

        let signed = self.sign(&locator, self.ttl).await?;
        asset.video_url = Some(signed.url);
        Ok(asset)
    }
}
