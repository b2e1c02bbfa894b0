//! Transient on-disk staging for uploads and tool outputs.
//!
//! Every staged file is named after the pipeline run that produced it and is
//! removed when its [`StagedFile`] is released or dropped, on success and error
//! paths alike.

use crate::error::{Error, Result};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const STAGE_PREFIX: &str = "clipstore-upload";

/// Directory that holds staged files for in-flight uploads
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    max_bytes: u64,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    /// Copy `reader` into a fresh file named after `run_id`.
    ///
    /// Fails with a validation error once more than the configured ceiling has
    /// been read; the partial file is removed before returning.
    #[instrument(skip(self, reader), fields(dir = %self.dir.display()))]
    pub async fn stage<R>(&self, run_id: Uuid, reader: R) -> Result<StagedFile>
    where
        R: AsyncRead + Unpin + Send,
    {
        let named = tempfile::Builder::new()
            .prefix(&format!("{STAGE_PREFIX}-{run_id}-"))
            .suffix(".mp4")
            .tempfile_in(&self.dir)?;
        let (file, path) = named.into_parts();
        let staged = StagedFile { path, run_id };

        let mut file = tokio::fs::File::from_std(file);
        let mut limited = reader.take(self.max_bytes.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file).await?;

        if written > self.max_bytes {
            return Err(Error::Validation(format!(
                "upload exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        file.flush().await?;
        drop(file);

        debug!(
            path = %staged.path().display(),
            size_bytes = written,
            "Upload staged"
        );

        Ok(staged)
    }
}

/// An exclusively owned transient file, deleted on release or drop
#[derive(Debug)]
pub struct StagedFile {
    path: TempPath,
    run_id: Uuid,
}

impl StagedFile {
    /// Take ownership of a path produced by an external tool. The path does not
    /// have to exist yet.
    pub fn adopt(run_id: Uuid, path: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self {
            path: TempPath::try_from_path(path.into())?,
            run_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn len(&self) -> io::Result<u64> {
        Ok(tokio::fs::metadata(self.path()).await?.len())
    }

    /// Delete the file now. A file that never materialized counts as released.
    pub fn release(self) -> io::Result<()> {
        let path = self.path.display().to_string();
        match self.path.close() {
            Ok(()) => {
                debug!(path = %path, "Staged file released");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to release staged file");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[tokio::test]
    async fn test_stage_writes_contents_under_run_name() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path(), 1024);
        let run_id = Uuid::new_v4();

        let staged = area.stage(run_id, &b"moov mdat"[..]).await.unwrap();

        let name = staged.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.contains(&run_id.to_string()));
        assert!(name.ends_with(".mp4"));
        assert_eq!(std::fs::read(staged.path()).unwrap(), b"moov mdat");
        assert_eq!(staged.len().await.unwrap(), 9);

        staged.release().unwrap();
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_runs_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path(), 1024);

        let a = area.stage(Uuid::new_v4(), &b"a"[..]).await.unwrap();
        let b = area.stage(Uuid::new_v4(), &b"b"[..]).await.unwrap();

        assert_ne!(a.path(), b.path());
        assert_eq!(entries(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path(), 4);

        let err = area.stage(Uuid::new_v4(), &b"too large"[..]).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_upload_at_exact_limit_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path(), 4);

        let staged = area.stage(Uuid::new_v4(), &b"four"[..]).await.unwrap();
        assert_eq!(staged.len().await.unwrap(), 4);
    }

    #[test]
    fn test_drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.mp4.processing");
        std::fs::write(&path, b"x").unwrap();

        let staged = StagedFile::adopt(Uuid::new_v4(), &path).unwrap();
        drop(staged);

        assert!(!path.exists());
    }

    #[test]
    fn test_release_of_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let staged = StagedFile::adopt(Uuid::new_v4(), dir.path().join("never-written")).unwrap();
        assert!(staged.release().is_ok());
    }

    #[test]
    fn test_release_deletes_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4.processing");
        std::fs::write(&path, b"remuxed").unwrap();

        let staged = StagedFile::adopt(Uuid::new_v4(), &path).unwrap();
        assert_eq!(staged.path(), path.as_path());
        staged.release().unwrap();

        assert!(!path.exists());
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn test_adopted_relative_path_is_made_absolute() {
        let staged = StagedFile::adopt(Uuid::new_v4(), "relative-output.mp4").unwrap();
        assert!(staged.path().is_absolute());
        assert!(staged.release().is_ok());
    }
}
