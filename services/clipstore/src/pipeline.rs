//! Upload orchestration: stage, classify, optimize, derive key, store, persist.
//!
//! Each run is fail-fast. Staged files belong to the run and are released on
//! every exit path. The object upload is the commit point; a metadata failure
//! after it leaves an orphaned object, which is logged and counted.

use crate::assets::{AssetRepository, MediaAsset};
use crate::classifier::AspectClassifier;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::keys::{KeyDeriver, OsRandom, RandomSource};
use crate::locator::Locator;
use crate::media_tools::MediaTools;
use crate::object_store::ObjectStore;
use crate::optimizer::StreamOptimizer;
use crate::signer::UrlSigner;
use crate::staging::StagingArea;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// The only accepted upload media type
pub const VIDEO_CONTENT_TYPE: &str = "video/mp4";

/// One inbound video upload
pub struct UploadRequest<R> {
    pub asset_id: Uuid,
    /// Authenticated caller
    pub user_id: Uuid,
    /// Declared media type, parameters allowed
    pub content_type: String,
    pub reader: R,
}

pub struct VideoPipeline {
    staging: StagingArea,
    classifier: AspectClassifier,
    optimizer: StreamOptimizer,
    keys: KeyDeriver<Box<dyn RandomSource>>,
    store: Arc<dyn ObjectStore>,
    assets: Arc<dyn AssetRepository>,
    signer: UrlSigner,
    bucket: String,
}

impl VideoPipeline {
    pub fn new(
        config: &Config,
        tools: Arc<dyn MediaTools>,
        store: Arc<dyn ObjectStore>,
        assets: Arc<dyn AssetRepository>,
    ) -> Self {
        Self {
            staging: StagingArea::new(config.staging_dir(), config.media.max_upload_bytes),
            classifier: AspectClassifier::new(tools.clone(), config.classification),
            optimizer: StreamOptimizer::new(tools),
            keys: KeyDeriver::with_source(Box::new(OsRandom)),
            signer: UrlSigner::new(store.clone(), config.presigned_url_expiry()),
            store,
            assets,
            bucket: config.s3.bucket.clone(),
        }
    }

    /// Replace the key randomness source
    pub fn with_random_source(mut self, random: impl RandomSource + 'static) -> Self {
        self.keys = KeyDeriver::with_source(Box::new(random));
        self
    }

    /// Process and store a video for an existing asset, returning the asset
    /// with a signed playback URL.
    pub async fn upload_video<R>(
        &self,
        request: UploadRequest<R>,
        cancel: &CancellationToken,
    ) -> Result<MediaAsset>
    where
        R: AsyncRead + Unpin + Send,
    {
        let run_id = Uuid::new_v4();
        let result = self.run_upload(run_id, request, cancel).await;

        match &result {
            Ok(_) => metrics::counter!("clipstore.uploads.succeeded").increment(1),
            Err(e) => {
                metrics::counter!("clipstore.uploads.failed", "reason" => e.kind()).increment(1);
                warn!(run_id = %run_id, error = %e, reason = e.kind(), "Upload failed");
            }
        }

        result
    }

    #[instrument(
        skip(self, request, cancel),
        fields(run_id = %run_id, asset_id = %request.asset_id, user_id = %request.user_id)
    )]
    async fn run_upload<R>(
        &self,
        run_id: Uuid,
        request: UploadRequest<R>,
        cancel: &CancellationToken,
    ) -> Result<MediaAsset>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_content_type(&request.content_type)?;

        let mut asset = self
            .assets
            .get_asset(request.asset_id)
            .await?
            .ok_or(Error::NotFound(request.asset_id))?;

        if asset.user_id != request.user_id {
            return Err(Error::Forbidden {
                asset_id: asset.id,
                user_id: request.user_id,
            });
        }

        let input = timed("stage", self.staging.stage(run_id, request.reader)).await?;
        let classification =
            timed("classify", self.classifier.classify(input.path(), cancel)).await?;
        let optimized = timed("optimize", self.optimizer.optimize(&input, cancel)).await?;
        if let Err(e) = input.release() {
            debug!(error = %e, "Upload input not released, continuing");
        }

        let key = self.keys.derive_key(Some(classification));
        timed("upload", async {
            self.store
                .put_object(&self.bucket, &key, optimized.path(), VIDEO_CONTENT_TYPE)
                .await
                .map_err(Error::from)
        })
        .await?;
        if let Err(e) = optimized.release() {
            debug!(error = %e, "Remuxed output not released, continuing");
        }

        let locator = Locator::new(self.bucket.as_str(), key);
        asset.video_url = Some(locator.encode());

        if let Err(e) = self.assets.update_asset(&asset).await {
            metrics::counter!("clipstore.objects.orphaned").increment(1);
            error!(
                bucket = %locator.bucket,
                key = %locator.key,
                error = %e,
                "Object stored but asset update failed, object is orphaned"
            );
            return Err(match e {
                Error::Persistence(_) => e,
                other => Error::Persistence(other.to_string()),
            });
        }

        info!(
            classification = %classification,
            bucket = %locator.bucket,
            key = %locator.key,
            "Video stored"
        );

        self.signer.sign_asset(asset).await
    }
}

/// Accept `video/mp4` with any parameters
pub fn validate_content_type(raw: &str) -> Result<()> {
    let parsed: mime::Mime = raw
        .parse()
        .map_err(|e| Error::Validation(format!("invalid content type {raw:?}: {e}")))?;

    if !parsed.essence_str().eq_ignore_ascii_case(VIDEO_CONTENT_TYPE) {
        return Err(Error::Validation(format!(
            "unsupported content type {:?}, expected {VIDEO_CONTENT_TYPE}",
            parsed.essence_str()
        )));
    }
    Ok(())
}

async fn timed<T, F>(stage: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let started = Instant::now();
    let result = fut.await;
    metrics::histogram!("clipstore.stage.duration_seconds", "stage" => stage)
        .record(started.elapsed().as_secs_f64());
    result
}
