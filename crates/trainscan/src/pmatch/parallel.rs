//! Row-parallel search backend.
//!
//! Splits the search rectangle by row across the rayon thread pool; each
//! row is scanned with the same squared-cosine kernel as
//! [`super::FastMatcher`]. Ties are resolved toward the smallest `(y, x)`
//! so the result is deterministic and identical to the sequential
//! backends.

use image::GrayImage;
use rayon::prelude::*;

use super::fast::cos2_at;
use super::{assert_patch_fits, MatchResult, Matcher};

/// Multi-core exhaustive search. Drop-in substitute for the scalar
/// backends; worthwhile for large search windows only.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParallelMatcher;

impl Matcher for ParallelMatcher {
    fn search(&self, img: &GrayImage, pat: &GrayImage) -> MatchResult {
        assert_patch_fits(img, pat);

        let (iw, ih) = (img.width() as usize, img.height() as usize);
        let (pw, ph) = (pat.width() as usize, pat.height() as usize);
        let ibuf = img.as_raw();
        let pbuf = pat.as_raw();

        let best = (0..=ih - ph)
            .into_par_iter()
            .map(|y| {
                let mut row_best = (f64::MIN, 0usize);
                for x in 0..=iw - pw {
                    let cos2 = cos2_at(ibuf, iw, pbuf, pw, ph, x, y);
                    if cos2 > row_best.0 {
                        row_best = (cos2, x);
                    }
                }
                (row_best.0, y, row_best.1)
            })
            .reduce(
                || (f64::MIN, usize::MAX, usize::MAX),
                |a, b| {
                    // Higher score wins; on an exact tie, the smaller (y, x)
                    // wins, matching the sequential scan order.
                    if b.0 > a.0 || (b.0 == a.0 && (b.1, b.2) < (a.1, a.2)) {
                        b
                    } else {
                        a
                    }
                },
            );

        MatchResult {
            x: best.2 as u32,
            y: best.1 as u32,
            score: best.0.sqrt(),
        }
    }
}
