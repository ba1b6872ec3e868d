//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between [`operations`](super::operations) (which applies the
//! resize policy) and the [`backend`](super::backend) (which does the pixel
//! work), so tests can swap in a mock backend without touching the policy.
//!
//! ## Types
//!
//! - [`Quality`] — JPEG quality (1–100, default 85). Clamped on construction.
//! - [`ResizeMode`] — Exact box or aspect-preserving fit.
//! - [`ThumbnailParams`] — Output path, target box, mode, rotation, quality.

use std::path::PathBuf;

/// Quality setting for JPEG encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(pub u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(85)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// Stretch to exactly the target box.
    Exact,
    /// Fit inside the target box, preserving aspect.
    Fit,
}

/// Parameters for one cover thumbnail.
#[derive(Debug, Clone, PartialEq)]
pub struct ThumbnailParams {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub mode: ResizeMode,
    /// Turn the page 90° counter-clockwise before resizing.
    pub rotate: bool,
    pub quality: Quality,
}
