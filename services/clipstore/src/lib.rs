//! Video upload processing and storage addressing.
//!
//! An upload is staged to disk, classified by aspect ratio with ffprobe,
//! remuxed for faststart playback with ffmpeg and stored in object storage
//! under a key derived from its classification. Stored assets carry a
//! `bucket,key` locator that is turned into a presigned URL on every read.

pub mod assets;
pub mod classifier;
pub mod config;
pub mod error;
pub mod keys;
pub mod locator;
pub mod media_tools;
pub mod object_store;
pub mod optimizer;
pub mod pipeline;
pub mod s3_store;
pub mod signer;
pub mod staging;

pub use assets::{AssetRepository, InMemoryAssetRepository, MediaAsset};
pub use classifier::{classify_dimensions, AspectClassifier, Classification};
pub use config::Config;
pub use error::{Error, Result};
pub use keys::{KeyDeriver, RandomSource};
pub use locator::Locator;
pub use media_tools::{FakeMediaTools, FfmpegTools, MediaTools};
pub use object_store::{InMemoryObjectStore, ObjectStore, RetryingObjectStore, StorageError};
pub use pipeline::{UploadRequest, VideoPipeline};
pub use s3_store::S3ObjectStore;
pub use signer::{SignedUrl, UrlSigner};
pub use staging::{StagedFile, StagingArea};
