use clipstore::config::{ClassificationConfig, MediaConfig, RetryConfig, S3Config, ServiceConfig};
use clipstore::media_tools::FakeProbe;
use clipstore::{
    AssetRepository, Config, Error, FakeMediaTools, InMemoryAssetRepository, InMemoryObjectStore,
    Locator, MediaAsset, RandomSource, RetryingObjectStore, UploadRequest, VideoPipeline,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const BODY: &[u8] = b"\x00\x00\x00\x18ftypmp42 mdat moov";

struct Harness {
    staging: TempDir,
    tools: Arc<FakeMediaTools>,
    store: Arc<InMemoryObjectStore>,
    assets: Arc<InMemoryAssetRepository>,
    pipeline: VideoPipeline,
    owner: Uuid,
    asset: MediaAsset,
}

fn config(staging_dir: &Path) -> Config {
    Config {
        service: ServiceConfig::default(),
        s3: S3Config {
            bucket: "bucket1".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
            force_path_style: false,
            presigned_url_expiry_secs: 60,
            multipart_threshold_bytes: 64 * 1024 * 1024,
            part_size_bytes: 16 * 1024 * 1024,
        },
        media: MediaConfig {
            staging_dir: Some(staging_dir.to_path_buf()),
            max_upload_bytes: 1024,
            ..MediaConfig::default()
        },
        classification: ClassificationConfig::default(),
        retry: RetryConfig {
            max_attempts: 1,
            initial_interval_ms: 1,
            max_interval_ms: 1,
        },
    }
}

async fn harness(tools: FakeMediaTools) -> Harness {
    let staging = tempfile::tempdir().unwrap();
    let tools = Arc::new(tools);
    let store = Arc::new(InMemoryObjectStore::new());
    let assets = Arc::new(InMemoryAssetRepository::new());

    let owner = Uuid::new_v4();
    let asset = assets
        .create_asset(MediaAsset::new(owner, "launch clip"))
        .await
        .unwrap();

    let pipeline = VideoPipeline::new(
        &config(staging.path()),
        tools.clone(),
        store.clone(),
        assets.clone(),
    );

    Harness {
        staging,
        tools,
        store,
        assets,
        pipeline,
        owner,
        asset,
    }
}

impl Harness {
    fn request(&self, content_type: &str, body: &'static [u8]) -> UploadRequest<&'static [u8]> {
        UploadRequest {
            asset_id: self.asset.id,
            user_id: self.owner,
            content_type: content_type.to_string(),
            reader: body,
        }
    }

    async fn upload(&self) -> clipstore::Result<MediaAsset> {
        self.pipeline
            .upload_video(self.request("video/mp4", BODY), &CancellationToken::new())
            .await
    }

    fn staged_files(&self) -> Vec<String> {
        std::fs::read_dir(self.staging.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    async fn stored_asset(&self) -> MediaAsset {
        self.assets.get_asset(self.asset.id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn wide_upload_is_stored_and_signed() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;

    let returned = h.upload().await.unwrap();

    let puts = h.store.puts();
    assert_eq!(puts.len(), 1);
    assert_eq!(puts[0].bucket, "bucket1");
    assert!(puts[0].key.starts_with("wide/"));
    assert!(puts[0].key.ends_with(".mp4"));
    assert_eq!(puts[0].content_type, "video/mp4");
    assert_eq!(h.store.object("bucket1", &puts[0].key).unwrap(), BODY);

    // The repository holds the locator, the caller gets a signed URL
    let stored = h.stored_asset().await;
    assert_eq!(
        stored.locator().unwrap(),
        Some(Locator::new("bucket1", puts[0].key.clone()))
    );
    let url = returned.video_url.unwrap();
    assert!(!url.is_empty());
    assert!(url.contains(&puts[0].key));
    assert!(url.contains("X-Amz-Expires=60"));

    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn classification_selects_key_prefix() {
    for (width, height, prefix) in [(1080, 1920, "tall/"), (1000, 1000, "other/")] {
        let h = harness(FakeMediaTools::with_dimensions(width, height)).await;
        h.upload().await.unwrap();

        let puts = h.store.puts();
        assert_eq!(puts.len(), 1);
        assert!(puts[0].key.starts_with(prefix), "{width}x{height} -> {}", puts[0].key);
    }
}

#[tokio::test]
async fn injected_randomness_determines_key() {
    struct Zeros;
    impl RandomSource for Zeros {
        fn fill(&self, dest: &mut [u8]) {
            dest.fill(0);
        }
    }

    let mut h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;
    h.pipeline = VideoPipeline::new(
        &config(h.staging.path()),
        h.tools.clone(),
        h.store.clone(),
        h.assets.clone(),
    )
    .with_random_source(Zeros);

    h.upload().await.unwrap();

    let expected = format!("wide/{}.mp4", "A".repeat(43));
    assert_eq!(h.store.puts()[0].key, expected);
}

#[tokio::test]
async fn wrong_content_type_is_rejected_before_staging() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;

    let err = h
        .pipeline
        .upload_video(h.request("image/png", BODY), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.tools.probe_calls(), 0);
    assert!(h.store.puts().is_empty());
    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn unknown_asset_is_not_found() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;
    let missing = Uuid::new_v4();

    let err = h
        .pipeline
        .upload_video(
            UploadRequest {
                asset_id: missing,
                ..h.request("video/mp4", BODY)
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(id) if id == missing));
    assert!(h.store.puts().is_empty());
}

#[tokio::test]
async fn non_owner_is_forbidden() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;

    let err = h
        .pipeline
        .upload_video(
            UploadRequest {
                user_id: Uuid::new_v4(),
                ..h.request("video/mp4", BODY)
            },
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Forbidden { .. }));
    assert_eq!(h.tools.probe_calls(), 0);
    assert_eq!(h.stored_asset().await.video_url, None);
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;
    static OVERSIZED: [u8; 2048] = [7; 2048];

    let err = h
        .pipeline
        .upload_video(h.request("video/mp4", &OVERSIZED), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(h.tools.probe_calls(), 0);
    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn probe_failure_stops_the_run() {
    let h = harness(FakeMediaTools::with_probe(FakeProbe::Fail(
        "moov atom not found".to_string(),
    )))
    .await;

    let err = h.upload().await.unwrap_err();

    assert!(matches!(err, Error::UpstreamTool { .. }));
    assert!(h.tools.remux_outputs().is_empty());
    assert!(h.store.puts().is_empty());
    assert_eq!(h.stored_asset().await.video_url, None);
    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn unusable_probe_output_stops_the_run() {
    let h = harness(FakeMediaTools::with_probe(FakeProbe::Raw(
        br#"{"streams":[]}"#.to_vec(),
    )))
    .await;

    let err = h.upload().await.unwrap_err();

    assert!(matches!(err, Error::UpstreamTool { .. }));
    assert!(h.store.puts().is_empty());
    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn remux_failure_discards_partial_output() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080).failing_remux("exit status 1")).await;

    let err = h.upload().await.unwrap_err();

    assert!(matches!(err, Error::UpstreamTool { .. }));
    assert_eq!(h.tools.remux_outputs().len(), 1);
    assert!(h.store.puts().is_empty());
    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn storage_failure_leaves_asset_untouched() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;
    h.store.fail_next_puts(1, false);

    let err = h.upload().await.unwrap_err();

    assert!(matches!(err, Error::Storage(_)));
    assert_eq!(h.stored_asset().await.video_url, None);
    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn transient_storage_failure_is_retried() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;
    let retrying = Arc::new(RetryingObjectStore::new(
        InMemoryObjectStore::new(),
        RetryConfig {
            max_attempts: 3,
            initial_interval_ms: 1,
            max_interval_ms: 2,
        },
    ));
    retrying.inner().fail_next_puts(2, true);

    let pipeline = VideoPipeline::new(
        &config(h.staging.path()),
        h.tools.clone(),
        retrying.clone(),
        h.assets.clone(),
    );
    pipeline
        .upload_video(h.request("video/mp4", BODY), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(retrying.inner().put_attempts(), 3);
    assert_eq!(retrying.inner().puts().len(), 1);
    assert!(h.staged_files().is_empty());
}

#[tokio::test]
async fn cancelled_run_stores_nothing() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .pipeline
        .upload_video(h.request("video/mp4", BODY), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::UpstreamTool { .. }));
    assert!(h.store.puts().is_empty());
    assert!(h.staged_files().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_do_not_collide() {
    let h = harness(FakeMediaTools::with_dimensions(1920, 1080)).await;
    let pipeline = Arc::new(VideoPipeline::new(
        &config(h.staging.path()),
        h.tools.clone(),
        h.store.clone(),
        h.assets.clone(),
    ));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let asset = h
            .assets
            .create_asset(MediaAsset::new(h.owner, "batch"))
            .await
            .unwrap();
        let pipeline = pipeline.clone();
        let owner = h.owner;

        handles.push(tokio::spawn(async move {
            pipeline
                .upload_video(
                    UploadRequest {
                        asset_id: asset.id,
                        user_id: owner,
                        content_type: "video/mp4".to_string(),
                        reader: BODY,
                    },
                    &CancellationToken::new(),
                )
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let mut keys: Vec<_> = h.store.puts().into_iter().map(|p| p.key).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 8);
    assert!(h.staged_files().is_empty());
}
