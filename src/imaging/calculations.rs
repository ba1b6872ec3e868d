//! Pure calculation functions for the cover resize policy.
//!
//! All functions here are pure and testable without any I/O or images.

/// Does the source aspect match the target box closely enough for an exact resize?
///
/// Scales the source to the target height and compares the resulting width
/// to the target width. Within `tolerance_px` the few pixels of distortion are
/// invisible, so the cover is stretched to fill the box exactly.
///
/// # Examples
/// ```
/// # use panelvault::imaging::is_exact_fit;
/// // 1988x2650 scan into 300x400: 0.750 * 400 = 300 → exact
/// assert!(is_exact_fit((1988, 2650), (300, 400), 6));
///
/// // 1600x2400 (2:3) into 300x400: 267 wide, 33 px off → fit instead
/// assert!(!is_exact_fit((1600, 2400), (300, 400), 6));
/// ```
pub fn is_exact_fit(source: (u32, u32), target: (u32, u32), tolerance_px: u32) -> bool {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;
    if src_h == 0 || tgt_h == 0 {
        return false;
    }

    let scaled_w = (src_w as f64 / src_h as f64 * tgt_h as f64).round() as i64;
    (scaled_w - tgt_w as i64).unsigned_abs() < tolerance_px as u64
}

/// Is the source a landscape page (double spread) that should be turned upright?
pub fn needs_rotation(source: (u32, u32), threshold: f64) -> bool {
    let (w, h) = source;
    h > 0 && w as f64 / h as f64 > threshold
}

/// Dimensions after an aspect-preserving fit inside `target`.
///
/// Never enlarges: a source already inside the box keeps its size. Each
/// side is at least 1px.
pub fn fit_within(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    if src_w <= tgt_w && src_h <= tgt_h {
        return source;
    }

    let scale = (tgt_w as f64 / src_w as f64).min(tgt_h as f64 / src_h as f64);
    let w = ((src_w as f64 * scale).round() as u32).clamp(1, tgt_w);
    let h = ((src_h as f64 * scale).round() as u32).clamp(1, tgt_h);
    (w, h)
}
