//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the two operations the pipeline needs
//! from a backend: identify and thumbnail. Both work on the encoded cover
//! bytes read straight out of the archive; nothing is unpacked to disk first.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend).

use super::params::ThumbnailParams;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
    #[error("Post-process script not found: {0}")]
    HookMissing(PathBuf),
    #[error("Post-process script failed: {0}")]
    HookFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn as_tuple(self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Trait for image processing backends.
///
/// `Sync` so one backend can be shared by every worker in the pool.
pub trait ImageBackend: Sync {
    /// Get image dimensions from encoded bytes.
    fn identify(&self, source: &[u8]) -> Result<Dimensions, BackendError>;

    /// Decode, normalize, resize and write one thumbnail.
    ///
    /// Returns the dimensions of the written file.
    fn thumbnail(&self, source: &[u8], params: &ThumbnailParams)
    -> Result<Dimensions, BackendError>;
}
