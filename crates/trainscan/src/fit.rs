//! Robust constant-acceleration motion fit.
//!
//! Raw per-frame displacement estimates are noisy, quantized to whole
//! pixels, and occasionally plain wrong (transient occlusion, match on a
//! repeating structure). Fitting the velocity model `v(t) = v0 + a*t`
//! with RANSAC tolerates a bounded fraction of such outliers and yields a
//! smoothed offset for every frame, plus the kinematic estimates the
//! measurements are derived from.

use nalgebra::{Matrix2, Vector2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Parameters of the velocity model: `v0` and `a`.
pub(crate) const MODEL_N_PARAMS: usize = 2;

const RANSAC_MAX_ITERS: usize = 25;
const RANSAC_SEED: u64 = 0;
/// Inlier threshold as a fraction of the maximum plausible speed.
const INLIER_THRESHOLD_FRACTION: f64 = 0.05;

/// The sequence could not be fit; it carries no usable train.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FitError {
    TooFewSamples { needed: usize, got: usize },
    InsufficientInliers { needed: usize, found: usize },
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewSamples { needed, got } => {
                write!(f, "too few samples to fit: need {}, got {}", needed, got)
            }
            Self::InsufficientInliers { needed, found } => {
                write!(
                    f,
                    "no consensus reached: need {} inliers, best iteration had {}",
                    needed, found
                )
            }
        }
    }
}

impl std::error::Error for FitError {}

/// Result of fitting the velocity model to one sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Smoothed per-frame offsets, px. Same length as the input.
    pub dx: Vec<i64>,
    /// Total signed displacement over the sequence, px.
    pub total_px: f64,
    /// Velocity at the sequence start timestamp, px/s.
    pub v0: f64,
    /// Acceleration, px/s^2.
    pub accel: f64,
}

/// Fit the velocity model to per-frame offsets `dx` with timestamps `ts`
/// (seconds, strictly increasing; `start_ts` is the timestamp of the
/// frame preceding the first sample).
///
/// `max_speed_px_s` bounds the plausible speed and scales the RANSAC
/// inlier threshold. The fit is deterministic (fixed seed).
///
/// Panics if `dx` and `ts` differ in length or timestamps do not
/// increase; both indicate a broken producer, not bad data.
pub fn fit_dx(
    dx: &[i64],
    ts: &[f64],
    start_ts: f64,
    max_speed_px_s: f64,
) -> Result<FitResult, FitError> {
    assert_eq!(dx.len(), ts.len(), "dx and ts must have the same length");

    let n = dx.len();
    let min_samples = (MODEL_N_PARAMS + 1) * 3;
    if n < min_samples {
        return Err(FitError::TooFewSamples {
            needed: min_samples,
            got: n,
        });
    }

    // Convert to (time since sequence start, velocity) samples.
    let mut t = Vec::with_capacity(n);
    let mut v = Vec::with_capacity(n);
    let mut prev_ts = start_ts;
    for i in 0..n {
        let dt = ts[i] - prev_ts;
        assert!(dt > 0.0, "timestamps must be strictly increasing");
        t.push(ts[i] - start_ts);
        v.push(dx[i] as f64 / dt);
        prev_ts = ts[i];
    }

    let threshold = INLIER_THRESHOLD_FRACTION * max_speed_px_s;
    let min_inliers = n / 2;
    let mut rng = StdRng::seed_from_u64(RANSAC_SEED);

    let mut best: Option<(f64, f64)> = None;
    let mut best_residual = f64::INFINITY;
    let mut most_inliers = 0usize;

    for _ in 0..RANSAC_MAX_ITERS {
        // Draw a minimal sample of distinct indices.
        let mut indices = [0usize; MODEL_N_PARAMS + 1];
        let mut attempts = 0;
        loop {
            for idx in &mut indices {
                *idx = rng.gen_range(0..n);
            }
            let mut distinct = true;
            for i in 0..indices.len() {
                for j in (i + 1)..indices.len() {
                    if indices[i] == indices[j] {
                        distinct = false;
                    }
                }
            }
            if distinct {
                break;
            }
            attempts += 1;
            if attempts > 100 {
                break;
            }
        }

        let t_s: Vec<f64> = indices.iter().map(|&i| t[i]).collect();
        let v_s: Vec<f64> = indices.iter().map(|&i| v[i]).collect();
        let Some((v0, a)) = lsq_line(&t_s, &v_s) else {
            continue;
        };

        let inliers: Vec<usize> = (0..n)
            .filter(|&i| (v0 + a * t[i] - v[i]).abs() < threshold)
            .collect();
        most_inliers = most_inliers.max(inliers.len());
        if inliers.len() < min_inliers {
            continue;
        }

        // Refit on the consensus set.
        let t_in: Vec<f64> = inliers.iter().map(|&i| t[i]).collect();
        let v_in: Vec<f64> = inliers.iter().map(|&i| v[i]).collect();
        let Some((v0, a)) = lsq_line(&t_in, &v_in) else {
            continue;
        };

        // Total residual over all samples; comparing inlier-only sums
        // would favor models with fewer inliers.
        let residual: f64 = (0..n).map(|i| (v0 + a * t[i] - v[i]).abs()).sum();
        if residual < best_residual {
            best_residual = residual;
            best = Some((v0, a));
        }
    }

    let Some((v0, a)) = best else {
        return Err(FitError::InsufficientInliers {
            needed: min_inliers,
            found: most_inliers,
        });
    };

    // Regenerate integer offsets by differencing the rounded cumulative
    // integral, so the rounded per-frame sum tracks the continuous model
    // exactly. Rounding each frame independently would drift the
    // panorama width.
    let pos = |t: f64| v0 * t + 0.5 * a * t * t;
    let mut dx_fit = Vec::with_capacity(n);
    let mut x_sum = 0i64; // pos(0) == 0
    for &ti in &t {
        let x = pos(ti).round() as i64;
        dx_fit.push(x - x_sum);
        x_sum = x;
    }

    let duration = t[n - 1];
    Ok(FitResult {
        dx: dx_fit,
        total_px: pos(duration),
        v0,
        accel: a,
    })
}

/// Least-squares line fit `v = v0 + a*t` via the 2x2 normal equations.
fn lsq_line(t: &[f64], v: &[f64]) -> Option<(f64, f64)> {
    let n = t.len() as f64;
    let st: f64 = t.iter().sum();
    let stt: f64 = t.iter().map(|x| x * x).sum();
    let sv: f64 = v.iter().sum();
    let stv: f64 = t.iter().zip(v).map(|(a, b)| a * b).sum();

    let m = Matrix2::new(n, st, st, stt);
    let b = Vector2::new(sv, stv);
    let sol = m.lu().solve(&b)?;
    if !sol[0].is_finite() || !sol[1].is_finite() {
        return None;
    }
    Some((sol[0], sol[1]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Offsets sampled from `v(t) = v0 + a*t` at a 1 s frame period, so
    /// every dx is exactly representable as an integer.
    fn exact_samples(v0: i64, a: i64, n: usize) -> (Vec<i64>, Vec<f64>) {
        let mut dx = Vec::with_capacity(n);
        let mut ts = Vec::with_capacity(n);
        for i in 0..n {
            let t = (i + 1) as f64;
            dx.push(v0 + a * (i as i64 + 1));
            ts.push(t);
        }
        (dx, ts)
    }

    #[test]
    fn recovers_exact_model() {
        let (dx, ts) = exact_samples(200, 5, 20);
        let fit = fit_dx(&dx, &ts, 0.0, 2000.0).unwrap();

        assert_relative_eq!(fit.v0, 200.0, epsilon = 1e-6);
        assert_relative_eq!(fit.accel, 5.0, epsilon = 1e-6);
        assert_eq!(fit.dx.len(), dx.len());
        let total: i64 = fit.dx.iter().sum();
        assert_relative_eq!(fit.total_px, total as f64, epsilon = 0.5);
    }

    #[test]
    fn tolerates_outliers() {
        let (mut dx, ts) = exact_samples(200, 5, 20);
        // 30% of the samples dropped to zero, as transient occlusion or a
        // mismatch would produce.
        for i in [1usize, 4, 7, 11, 14, 18] {
            dx[i] = 0;
        }

        let fit = fit_dx(&dx, &ts, 0.0, 1000.0).unwrap();
        assert_relative_eq!(fit.v0, 200.0, epsilon = 1e-6);
        assert_relative_eq!(fit.accel, 5.0, epsilon = 1e-6);
    }

    #[test]
    fn fails_below_minimum_sample_count() {
        let (dx, ts) = exact_samples(100, 0, 8);
        assert_eq!(
            fit_dx(&dx, &ts, 0.0, 1000.0),
            Err(FitError::TooFewSamples { needed: 9, got: 8 })
        );
    }

    #[test]
    fn fails_without_consensus() {
        // Alternating extreme velocities; no line captures half of them
        // within the (tiny) inlier threshold.
        let n = 12;
        let dx: Vec<i64> = (0..n).map(|i| if i % 2 == 0 { 1000 } else { -1000 }).collect();
        let ts: Vec<f64> = (0..n).map(|i| (i + 1) as f64).collect();

        match fit_dx(&dx, &ts, 0.0, 1.0) {
            Err(FitError::InsufficientInliers { needed, .. }) => assert_eq!(needed, 6),
            other => panic!("expected InsufficientInliers, got {:?}", other),
        }
    }

    #[test]
    fn rounded_offsets_track_the_integral() {
        // Fractional model: independent rounding would accumulate drift.
        let n = 30;
        let period = 1.0 / 30.0;
        let (v0, a) = (310.4, 20.9);
        let mut dx = Vec::new();
        let mut ts = Vec::new();
        let pos = |t: f64| v0 * t + 0.5 * a * t * t;
        let mut prev_x = 0i64;
        for i in 0..n {
            let t = (i + 1) as f64 * period;
            let x = pos(t).round() as i64;
            dx.push(x - prev_x);
            prev_x = x;
            ts.push(t);
        }

        let fit = fit_dx(&dx, &ts, 0.0, 1000.0).unwrap();

        let mut sum = 0i64;
        for (i, &d) in fit.dx.iter().enumerate() {
            sum += d;
            let t = (i + 1) as f64 * period;
            let model_pos = fit.v0 * t + 0.5 * fit.accel * t * t;
            assert!(
                (sum as f64 - model_pos).abs() <= 0.5 + 1e-9,
                "cumulative offset drifted at frame {}: {} vs {}",
                i,
                sum,
                model_pos
            );
        }
    }

    #[test]
    fn fit_is_deterministic() {
        let (mut dx, ts) = exact_samples(150, -2, 15);
        dx[3] = 0;
        dx[9] = 0;
        let a = fit_dx(&dx, &ts, 0.0, 1000.0).unwrap();
        let b = fit_dx(&dx, &ts, 0.0, 1000.0).unwrap();
        assert_eq!(a, b);
    }
}
