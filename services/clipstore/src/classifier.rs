//! Aspect ratio classification from probe output.

use crate::config::ClassificationConfig;
use crate::error::{Error, Result};
use crate::media_tools::{MediaTools, PROBE_TOOL};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Geometry bucket of an uploaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Landscape, roughly 16:9
    Wide,
    /// Portrait, roughly 9:16
    Tall,
    Other,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Wide => "wide",
            Classification::Tall => "tall",
            Classification::Other => "other",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subset of ffprobe's `-show_streams` JSON
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl ProbeOutput {
    /// First video stream; when no stream is tagged with a codec type at all,
    /// the first stream.
    fn select_stream(&self) -> Option<&ProbeStream> {
        if self.streams.iter().all(|s| s.codec_type.is_none()) {
            return self.streams.first();
        }
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }
}

/// Map stream dimensions onto a classification.
///
/// Both ranges are exclusive. Zero dimensions are rejected rather than
/// producing an infinite or NaN ratio.
pub fn classify_dimensions(
    width: u32,
    height: u32,
    thresholds: &ClassificationConfig,
) -> Result<Classification> {
    if width == 0 || height == 0 {
        return Err(Error::upstream(
            PROBE_TOOL,
            format!("invalid stream dimensions {width}x{height}"),
        ));
    }

    let ratio = f64::from(width) / f64::from(height);
    let classification = if ratio > thresholds.wide_min && ratio < thresholds.wide_max {
        Classification::Wide
    } else if ratio > thresholds.tall_min && ratio < thresholds.tall_max {
        Classification::Tall
    } else {
        Classification::Other
    };

    Ok(classification)
}

/// Parse raw probe JSON and classify the selected stream
pub fn classify_probe_output(raw: &[u8], thresholds: &ClassificationConfig) -> Result<Classification> {
    let output: ProbeOutput = serde_json::from_slice(raw)
        .map_err(|e| Error::upstream(PROBE_TOOL, format!("malformed output: {e}")))?;

    if output.streams.is_empty() {
        return Err(Error::upstream(PROBE_TOOL, "no streams reported"));
    }

    let stream = output
        .select_stream()
        .ok_or_else(|| Error::upstream(PROBE_TOOL, "no video stream reported"))?;

    match (stream.width, stream.height) {
        (Some(width), Some(height)) => classify_dimensions(width, height, thresholds),
        _ => Err(Error::upstream(PROBE_TOOL, "stream has no dimensions")),
    }
}

/// Runs the probe against a staged file and classifies the result
pub struct AspectClassifier {
    tools: Arc<dyn MediaTools>,
    thresholds: ClassificationConfig,
}

impl AspectClassifier {
    pub fn new(tools: Arc<dyn MediaTools>, thresholds: ClassificationConfig) -> Self {
        Self { tools, thresholds }
    }

    #[instrument(skip(self, cancel), fields(path = %path.display()))]
    pub async fn classify(&self, path: &Path, cancel: &CancellationToken) -> Result<Classification> {
        let raw = self.tools.probe_streams(path, cancel).await?;
        let classification = classify_probe_output(&raw, &self.thresholds)?;
        debug!(classification = %classification, "Video classified");
        Ok(classification)
    }
}
