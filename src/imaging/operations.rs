//! High-level image operations.
//!
//! [`render_cover`] turns the cover bytes of one comic into its cached
//! renditions: the native copy plus one fitted thumbnail. The resize policy
//! is decided here from [`calculations`](super::calculations); pixels are
//! left to the backend or the post-process hook.

use super::backend::{BackendError, Dimensions, ImageBackend};
use super::calculations::{is_exact_fit, needs_rotation};
use super::hook::PostProcessHook;
use super::params::{Quality, ResizeMode, ThumbnailParams};
use std::path::{Path, PathBuf};

/// Result type for image operations.
pub type Result<T> = std::result::Result<T, BackendError>;

/// Configuration for thumbnail generation.
#[derive(Debug, Clone)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub tolerance_px: u32,
    pub rotate_threshold: f64,
    pub quality: Quality,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: 300,
            height: 400,
            tolerance_px: 6,
            rotate_threshold: 1.15,
            quality: Quality::default(),
        }
    }
}

/// Where the renditions of one comic go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverTargets {
    /// Verbatim copy of the cover bytes.
    pub native: PathBuf,
    /// Built-in thumbnail output.
    pub thumbnail: PathBuf,
    /// Post-processed variant written by the hook.
    pub processed: PathBuf,
}

/// What [`render_cover`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedCover {
    /// Dimensions of the cover as stored in the archive.
    pub source: Dimensions,
    pub mode: ResizeMode,
    pub rotated: bool,
    /// The thumbnail callers should serve.
    pub path: PathBuf,
}

/// Plan a thumbnail operation without executing it.
///
/// Exactness is judged on the source as stored; rotation applies afterwards.
pub fn plan_thumbnail(
    source: Dimensions,
    output_path: &Path,
    config: &ThumbnailConfig,
) -> ThumbnailParams {
    let target = (config.width, config.height);
    let mode = if is_exact_fit(source.as_tuple(), target, config.tolerance_px) {
        ResizeMode::Exact
    } else {
        ResizeMode::Fit
    };

    ThumbnailParams {
        output: output_path.to_path_buf(),
        width: config.width,
        height: config.height,
        mode,
        rotate: needs_rotation(source.as_tuple(), config.rotate_threshold),
        quality: config.quality,
    }
}

/// Write the native rendition and the thumbnail for one cover.
///
/// With a hook, non-exact covers are handed to the script (which reads the
/// native rendition) and the processed path is returned; exact covers and
/// every cover without a hook go through the backend.
pub fn render_cover(
    backend: &impl ImageBackend,
    hook: Option<&PostProcessHook>,
    cover: &[u8],
    targets: &CoverTargets,
    config: &ThumbnailConfig,
) -> Result<RenderedCover> {
    std::fs::write(&targets.native, cover)?;

    let source = backend.identify(cover)?;
    let params = plan_thumbnail(source, &targets.thumbnail, config);

    let path = match hook {
        Some(hook) if params.mode == ResizeMode::Fit => {
            hook.run(&targets.native, &targets.processed, params.width, params.height)?;
            targets.processed.clone()
        }
        _ => {
            backend.thumbnail(cover, &params)?;
            params.output.clone()
        }
    };

    Ok(RenderedCover {
        source,
        mode: params.mode,
        rotated: params.rotate,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use tempfile::TempDir;

    fn targets(dir: &Path) -> CoverTargets {
        CoverTargets {
            native: dir.join("7-native.jpg"),
            thumbnail: dir.join("7-300x400.jpg"),
            processed: dir.join("p7-300x400.jpg"),
        }
    }

    #[test]
    fn plan_portrait_near_target_is_exact() {
        let params = plan_thumbnail(
            Dimensions {
                width: 1500,
                height: 2000,
            },
            Path::new("/thumb.jpg"),
            &ThumbnailConfig::default(),
        );

        assert_eq!(params.mode, ResizeMode::Exact);
        assert!(!params.rotate);
        assert_eq!((params.width, params.height), (300, 400));
    }

    #[test]
    fn plan_landscape_rotates_and_fits() {
        let params = plan_thumbnail(
            Dimensions {
                width: 3000,
                height: 2000,
            },
            Path::new("/thumb.jpg"),
            &ThumbnailConfig::default(),
        );

        assert_eq!(params.mode, ResizeMode::Fit);
        assert!(params.rotate);
    }

    #[test]
    fn plan_respects_configured_tolerance() {
        let config = ThumbnailConfig {
            tolerance_px: 40,
            ..ThumbnailConfig::default()
        };
        // 2:3 → 267 wide at 400 high, 33 px off
        let params = plan_thumbnail(
            Dimensions {
                width: 1600,
                height: 2400,
            },
            Path::new("/thumb.jpg"),
            &config,
        );
        assert_eq!(params.mode, ResizeMode::Exact);
    }

    #[test]
    fn render_writes_native_and_calls_backend() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 1500,
            height: 2000,
        }]);
        let t = targets(tmp.path());

        let rendered =
            render_cover(&backend, None, b"jpeg-bytes", &t, &ThumbnailConfig::default()).unwrap();

        assert_eq!(std::fs::read(&t.native).unwrap(), b"jpeg-bytes");
        assert_eq!(rendered.path, t.thumbnail);
        assert_eq!(rendered.mode, ResizeMode::Exact);

        let ops = backend.get_operations();
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], RecordedOp::Identify(10)));
        assert!(matches!(
            &ops[1],
            RecordedOp::Thumbnail { output, mode: ResizeMode::Exact, rotate: false, .. }
                if output.ends_with("7-300x400.jpg")
        ));
    }

    #[test]
    fn render_exact_cover_skips_hook() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 600,
            height: 800,
        }]);
        // Missing script: would fail if it were consulted.
        let hook = PostProcessHook::new(tmp.path().join("absent.sh"));

        let rendered = render_cover(
            &backend,
            Some(&hook),
            b"x",
            &targets(tmp.path()),
            &ThumbnailConfig::default(),
        )
        .unwrap();
        assert_eq!(rendered.mode, ResizeMode::Exact);
    }

    #[test]
    fn render_fit_cover_with_missing_hook_fails() {
        let tmp = TempDir::new().unwrap();
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 1600,
            height: 2400,
        }]);
        let hook = PostProcessHook::new(tmp.path().join("absent.sh"));

        let result = render_cover(
            &backend,
            Some(&hook),
            b"x",
            &targets(tmp.path()),
            &ThumbnailConfig::default(),
        );
        assert!(matches!(result, Err(BackendError::HookMissing(_))));
        // The backend never resized.
        assert_eq!(backend.get_operations().len(), 1);
    }

    #[test]
    fn render_fit_cover_uses_hook_output() {
        let tmp = TempDir::new().unwrap();
        let script = tmp.path().join("pad.sh");
        std::fs::write(&script, "cp \"$3\" \"$4\"\n").unwrap();
        let backend = MockBackend::with_dimensions(vec![Dimensions {
            width: 1600,
            height: 2400,
        }]);
        let t = targets(tmp.path());

        let rendered = render_cover(
            &backend,
            Some(&PostProcessHook::new(&script)),
            b"native",
            &t,
            &ThumbnailConfig::default(),
        )
        .unwrap();

        assert_eq!(rendered.path, t.processed);
        assert_eq!(std::fs::read(&t.processed).unwrap(), b"native");
    }
}
