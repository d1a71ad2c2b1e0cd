//! Frame contrast measurement.
//!
//! Near-black or textureless frames make the cosine-similarity matcher
//! unreliable: a flat patch correlates highly with everything, which
//! produces spurious high scores. The detector measures each incoming
//! frame and skips it when the channel-averaged mean or mean absolute
//! deviation falls below its threshold.
//!
//! Means are computed in integer arithmetic (deviation relative to the
//! truncated integer mean), then scaled to [0, 1].

use image::RgbaImage;

/// Per-channel pixel mean and mean absolute deviation of an RGBA image,
/// both scaled to [0, 1]. The alpha channel is ignored.
pub fn rgba_stats(img: &RgbaImage) -> ([f64; 3], [f64; 3]) {
    let count = (img.width() as u64) * (img.height() as u64);
    assert!(count > 0, "cannot measure an empty image");

    let mut sum = [0u64; 3];
    for px in img.pixels() {
        for c in 0..3 {
            sum[c] += px.0[c] as u64;
        }
    }
    let mean_px = [sum[0] / count, sum[1] / count, sum[2] / count];

    let mut dev = [0u64; 3];
    for px in img.pixels() {
        for c in 0..3 {
            dev[c] += (px.0[c] as u64).abs_diff(mean_px[c]);
        }
    }

    let scale = |v: u64| v as f64 / 255.0;
    (
        [
            scale(mean_px[0]),
            scale(mean_px[1]),
            scale(mean_px[2]),
        ],
        [
            scale(dev[0]) / count as f64,
            scale(dev[1]) / count as f64,
            scale(dev[2]) / count as f64,
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgba;

    #[test]
    fn uniform_frame_has_zero_deviation() {
        let img = RgbaImage::from_pixel(16, 16, Rgba([100, 100, 100, 255]));
        let (mean, dev) = rgba_stats(&img);
        for c in 0..3 {
            assert_relative_eq!(mean[c], 100.0 / 255.0);
            assert_relative_eq!(dev[c], 0.0);
        }
    }

    #[test]
    fn black_frame_measures_zero() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let (mean, dev) = rgba_stats(&img);
        assert_eq!(mean, [0.0; 3]);
        assert_eq!(dev, [0.0; 3]);
    }

    #[test]
    fn alpha_is_ignored() {
        let opaque = RgbaImage::from_pixel(8, 8, Rgba([50, 100, 150, 255]));
        let transparent = RgbaImage::from_pixel(8, 8, Rgba([50, 100, 150, 0]));
        assert_eq!(rgba_stats(&opaque), rgba_stats(&transparent));
    }

    #[test]
    fn checkerboard_stats() {
        // Alternating 0/200 pixels: integer mean 100, deviation 100.
        let img = RgbaImage::from_fn(16, 16, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([200, 200, 200, 255])
            }
        });
        let (mean, dev) = rgba_stats(&img);
        for c in 0..3 {
            assert_relative_eq!(mean[c], 100.0 / 255.0);
            assert_relative_eq!(dev[c], 100.0 / 255.0);
        }
    }

    #[test]
    fn per_channel_values_are_independent() {
        let img = RgbaImage::from_fn(4, 4, |x, _| {
            if x % 2 == 0 {
                Rgba([0, 10, 255, 255])
            } else {
                Rgba([200, 10, 255, 255])
            }
        });
        let (mean, dev) = rgba_stats(&img);
        assert_relative_eq!(mean[0], 100.0 / 255.0);
        assert_relative_eq!(mean[1], 10.0 / 255.0);
        assert_relative_eq!(mean[2], 1.0);
        assert_relative_eq!(dev[0], 100.0 / 255.0);
        assert_relative_eq!(dev[1], 0.0);
        assert_relative_eq!(dev[2], 0.0);
    }
}
