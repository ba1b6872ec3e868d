//! Pure Rust image processing backend.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, GIF) | `image::load_from_memory` |
//! | Identify | `image::ImageReader::into_dimensions` (header only) |
//! | Rotate | `image::imageops::rotate270` |
//! | Resize | `resize_exact` / `resize` with `Lanczos3` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder::new_with_quality` |

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::fit_within;
use super::params::{ResizeMode, ThumbnailParams};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(source: &[u8]) -> Result<DynamicImage, BackendError> {
    image::load_from_memory(source)
        .map_err(|e| BackendError::ProcessingFailed(format!("Failed to decode cover: {}", e)))
}

/// Flatten to opaque RGB.
///
/// Transparent pixels are composited onto black; palette and grayscale
/// images are expanded to RGB so the JPEG encoder always sees one layout.
fn flatten(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.into_rgb8();
    }

    let rgba = img.into_rgba8();
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let [r, g, b, a] = rgba.get_pixel(x, y).0;
        let blend = |c: u8| ((c as u16 * a as u16 + 127) / 255) as u8;
        Rgb([blend(r), blend(g), blend(b)])
    })
}

/// Encode and save as JPEG.
fn save_jpeg(img: &RgbImage, path: &Path, quality: u32) -> Result<(), BackendError> {
    let file = std::fs::File::create(path).map_err(BackendError::Io)?;
    let writer = std::io::BufWriter::new(file);
    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(writer, quality as u8);
    img.write_with_encoder(encoder)
        .map_err(|e| BackendError::ProcessingFailed(format!("JPEG encode failed: {}", e)))
}

impl ImageBackend for RustBackend {
    fn identify(&self, source: &[u8]) -> Result<Dimensions, BackendError> {
        let (width, height) = ImageReader::new(Cursor::new(source))
            .with_guessed_format()?
            .into_dimensions()
            .map_err(|e| {
                BackendError::ProcessingFailed(format!("Failed to read dimensions: {}", e))
            })?;
        Ok(Dimensions { width, height })
    }

    fn thumbnail(
        &self,
        source: &[u8],
        params: &ThumbnailParams,
    ) -> Result<Dimensions, BackendError> {
        let mut img = flatten(decode(source)?);

        if params.rotate {
            img = image::imageops::rotate270(&img);
        }

        let resized = match params.mode {
            ResizeMode::Exact => image::imageops::resize(
                &img,
                params.width,
                params.height,
                FilterType::Lanczos3,
            ),
            ResizeMode::Fit => {
                let (w, h) = fit_within(img.dimensions(), (params.width, params.height));
                if (w, h) == img.dimensions() {
                    img
                } else {
                    image::imageops::resize(&img, w, h, FilterType::Lanczos3)
                }
            }
        };

        save_jpeg(&resized, &params.output, params.quality.value())?;
        Ok(Dimensions {
            width: resized.width(),
            height: resized.height(),
        })
    }
}
