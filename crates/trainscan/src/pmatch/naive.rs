//! Reference scan implementation, kept unoptimized on purpose: it is the
//! ground truth the other backends are validated against.

use image::GrayImage;

use super::{assert_patch_fits, score_at, MatchResult, Matcher};

/// Triple-nested-loop exhaustive search. Correct and slow.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveMatcher;

impl Matcher for NaiveMatcher {
    fn search(&self, img: &GrayImage, pat: &GrayImage) -> MatchResult {
        assert_patch_fits(img, pat);

        let mut best = MatchResult {
            x: 0,
            y: 0,
            score: f64::MIN,
        };

        for y in 0..=img.height() - pat.height() {
            for x in 0..=img.width() - pat.width() {
                let score = score_at(img, pat, x, y);
                if score > best.score {
                    best = MatchResult { x, y, score };
                }
            }
        }

        best
    }
}
