//! Image patch matching and search.
//!
//! Locates the best placement of a small grayscale patch inside a larger
//! reference image by exhaustive search, scoring every offset with the
//! cosine similarity between the flattened pixel-intensity vectors. The
//! score is magnitude-invariant: a uniformly brightness-scaled but
//! otherwise identical patch still scores 1.0, and a pair of zero-energy
//! (flat black) inputs is defined to score 1.0 rather than dividing by
//! zero.
//!
//! [`NaiveMatcher`] is the unoptimized reference implementation and the
//! ground truth for all others; [`FastMatcher`] (squared-cosine scoring,
//! direct buffer indexing) and [`ParallelMatcher`] (row-parallel via
//! rayon) must agree with it within a small numeric tolerance and are
//! drop-in substitutes.

use image::GrayImage;

mod fast;
mod naive;
mod parallel;

pub use fast::FastMatcher;
pub use naive::NaiveMatcher;
pub use parallel::ParallelMatcher;

/// Best placement of a patch inside a reference image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    /// Horizontal offset of the patch in reference image coordinates.
    pub x: u32,
    /// Vertical offset of the patch in reference image coordinates.
    pub y: u32,
    /// Cosine similarity at the best offset, in [0, 1].
    pub score: f64,
}

/// Exhaustive patch search capability.
///
/// Implementations are interchangeable; each must return the same offset
/// as [`NaiveMatcher`] and a score within 1e-6 of it.
pub trait Matcher {
    /// Search for the offset of `pat` inside `img` maximizing cosine
    /// similarity.
    ///
    /// Panics if the patch is larger than the image in either dimension;
    /// the caller guarantees that the patch fits the search window.
    fn search(&self, img: &GrayImage, pat: &GrayImage) -> MatchResult;
}

pub(crate) fn assert_patch_fits(img: &GrayImage, pat: &GrayImage) {
    assert!(
        pat.width() <= img.width() && pat.height() <= img.height(),
        "patch ({}x{}) does not fit in image ({}x{})",
        pat.width(),
        pat.height(),
        img.width(),
        img.height()
    );
}

/// Cosine similarity between `pat` and the same-size window of `img`
/// placed at `(x, y)`, in [0, 1].
pub fn score_at(img: &GrayImage, pat: &GrayImage, x: u32, y: u32) -> f64 {
    assert!(
        x + pat.width() <= img.width() && y + pat.height() <= img.height(),
        "patch not fully contained in image"
    );

    let mut dot = 0u64;
    let mut abs_i2 = 0u64;
    let mut abs_p2 = 0u64;

    for v in 0..pat.height() {
        for u in 0..pat.width() {
            let px_i = img.get_pixel(x + u, y + v).0[0] as u64;
            let px_p = pat.get_pixel(u, v).0[0] as u64;

            dot += px_i * px_p;
            abs_i2 += px_i * px_i;
            abs_p2 += px_p * px_p;
        }
    }

    let abs2 = abs_i2 as f64 * abs_p2 as f64;
    if abs2 == 0.0 {
        return 1.0;
    }
    dot as f64 / abs2.sqrt()
}
