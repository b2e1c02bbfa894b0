use crate::error::{Error, Result};
use crate::locator::Locator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Video asset metadata as held by the metadata store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    /// Unique asset ID
    pub id: Uuid,
    /// Owning user
    pub user_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub thumbnail_url: Option<String>,
    /// Stored locator (`bucket,key`) or, on read paths, a signed URL
    pub video_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MediaAsset {
    pub fn new(user_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            title: title.into(),
            description: String::new(),
            thumbnail_url: None,
            video_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Decode the persisted video location, if any
    pub fn locator(&self) -> Result<Option<Locator>> {
        Locator::decode_optional(self.video_url.as_deref())
    }
}

/// Metadata persistence collaborator
#[async_trait]
pub trait AssetRepository: Send + Sync {
    async fn create_asset(&self, asset: MediaAsset) -> Result<MediaAsset>;

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>>;

    /// Replace the stored record; fails if the asset does not exist
    async fn update_asset(&self, asset: &MediaAsset) -> Result<()>;
}

/// Process-local asset repository
#[derive(Debug, Default)]
pub struct InMemoryAssetRepository {
    assets: RwLock<HashMap<Uuid, MediaAsset>>,
}

impl InMemoryAssetRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetRepository for InMemoryAssetRepository {
    async fn create_asset(&self, asset: MediaAsset) -> Result<MediaAsset> {
        let mut assets = self.assets.write();
        if assets.contains_key(&asset.id) {
            return Err(Error::Persistence(format!("asset {} already exists", asset.id)));
        }
        assets.insert(asset.id, asset.clone());
        Ok(asset)
    }

    async fn get_asset(&self, id: Uuid) -> Result<Option<MediaAsset>> {
        Ok(self.assets.read().get(&id).cloned())
    }

    #[instrument(skip(self, asset), fields(asset_id = %asset.id))]
    async fn update_asset(&self, asset: &MediaAsset) -> Result<()> {
        let mut assets = self.assets.write();
        let stored = assets
            .get_mut(&asset.id)
            .ok_or_else(|| Error::Persistence(format!("asset {} does not exist", asset.id)))?;

        *stored = MediaAsset {
            updated_at: Utc::now(),
            ..asset.clone()
        };
        debug!("Asset updated");
        Ok(())
    }
}
