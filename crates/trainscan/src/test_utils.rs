//! Synthetic image generators shared across tests.

use image::{GrayImage, Luma, Rgba, RgbaImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub(crate) fn noise_gray(w: u32, h: u32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    GrayImage::from_fn(w, h, |_, _| Luma([rng.gen()]))
}

pub(crate) fn noise_rgba(w: u32, h: u32, seed: u64) -> RgbaImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbaImage::from_fn(w, h, |_, _| {
        Rgba([rng.gen(), rng.gen(), rng.gen(), 255])
    })
}

/// Smooth gaussian bump centered in the image. Its autocorrelation
/// decays strictly with horizontal shift, unlike white noise, whose
/// shifted self-similarity is essentially flat.
pub(crate) fn smooth_gray(w: u32, h: u32) -> GrayImage {
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let (sx, sy) = (w as f64 / 16.0, h as f64 / 8.0);
    GrayImage::from_fn(w, h, |x, y| {
        let dx = (x as f64 - cx) / sx;
        let dy = (y as f64 - cy) / sy;
        Luma([(255.0 * (-0.5 * (dx * dx + dy * dy)).exp()) as u8])
    })
}
