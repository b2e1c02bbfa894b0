use crate::error::Result;
use crate::media_tools::MediaTools;
use crate::staging::StagedFile;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Suffix appended to the input path to name the remuxed output
pub const OUTPUT_SUFFIX: &str = ".processing";

/// Rewrites staged uploads for progressive playback
pub struct StreamOptimizer {
    tools: Arc<dyn MediaTools>,
}

impl StreamOptimizer {
    pub fn new(tools: Arc<dyn MediaTools>) -> Self {
        Self { tools }
    }

    /// Remux `input` into a new staged file next to it.
    ///
    /// The output is owned before the tool starts so a partial file left by a
    /// failed remux is removed on the error path. The input stays with the caller.
    #[instrument(skip(self, input, cancel), fields(run_id = %input.run_id()))]
    pub async fn optimize(&self, input: &StagedFile, cancel: &CancellationToken) -> Result<StagedFile> {
        let output = StagedFile::adopt(input.run_id(), output_path_for(input))?;

        self.tools
            .remux_faststart(input.path(), output.path(), cancel)
            .await?;

        debug!(output = %output.path().display(), "Faststart remux complete");
        Ok(output)
    }
}

fn output_path_for(input: &StagedFile) -> PathBuf {
    let mut name = OsString::from(input.path().as_os_str());
    name.push(OUTPUT_SUFFIX);
    PathBuf::from(name)
}
