//! External border/pad post-processing hook.
//!
//! When enabled, covers whose aspect does not match the target box are not
//! resized in-process. Instead a user-supplied shell script pads the native
//! rendition out to the full box (typically with an edge-replicated border)
//! and writes the `p{id}-WxH.jpg` variant itself:
//!
//! ```text
//! bash <script> -T <W>x<H> <native.jpg> <output.jpg>
//! ```
//!
//! The script runs synchronously with no timeout. A configured but missing
//! script is an error for the comic being processed, never a silent
//! fallback to the built-in resizer.

use super::backend::BackendError;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostProcessHook {
    script: PathBuf,
}

impl PostProcessHook {
    pub fn new(script: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
        }
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    /// Pad `native` into a `width`×`height` box written to `output`.
    pub fn run(
        &self,
        native: &Path,
        output: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), BackendError> {
        if !self.script.is_file() {
            return Err(BackendError::HookMissing(self.script.clone()));
        }

        debug!(script = %self.script.display(), output = %output.display(), "running post-process hook");
        let status = Command::new("bash")
            .arg(&self.script)
            .arg("-T")
            .arg(format!("{}x{}", width, height))
            .arg(native)
            .arg(output)
            .status()?;

        if !status.success() {
            return Err(BackendError::HookFailed(format!(
                "{} exited with {}",
                self.script.display(),
                status
            )));
        }
        if !output.exists() {
            return Err(BackendError::HookFailed(format!(
                "{} did not write {}",
                self.script.display(),
                output.display()
            )));
        }
        Ok(())
    }
}
