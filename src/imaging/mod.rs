//! Cover image processing — decode, normalize, resize, JPEG out.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `image::ImageReader::into_dimensions` |
//! | **Flatten** | alpha composited onto black, palette → RGB |
//! | **Rotate** | `image::imageops::rotate270` (landscape spreads) |
//! | **Exact resize** | `resize_exact` with Lanczos3 |
//! | **Bounding-box thumbnail** | `resize` with Lanczos3, never upscales |
//! | **Encode** | `image::codecs::jpeg::JpegEncoder` |
//! | **Border hook** | external `bash` script, see [`hook`] |
//!
//! The module is split into:
//! - **Calculations**: Pure functions for the resize policy (unit testable)
//! - **Parameters**: Data structures describing one thumbnail operation
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: [`render_cover`], combining the policy with a backend and the hook

pub mod backend;
mod calculations;
pub mod hook;
pub mod operations;
mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend};
pub use calculations::{fit_within, is_exact_fit, needs_rotation};
pub use hook::PostProcessHook;
pub use operations::{CoverTargets, RenderedCover, ThumbnailConfig, plan_thumbnail, render_cover};
pub use params::{Quality, ResizeMode, ThumbnailParams};
pub use rust_backend::RustBackend;
