//! Panorama assembly and train measurement.
//!
//! Takes a finalized frame sequence, smooths its offsets through the
//! robust fit, composites the frames into a single wide image and derives
//! the physical measurements. Sequences that cannot be fit or fail the
//! configured plausibility bounds are discarded with a
//! [`DiscardReason`]; violated producer invariants panic.

use std::time::Duration;

use image::{imageops, Delay, Frame, RgbaImage};
use serde::Serialize;

use crate::config::Config;
use crate::fit::{fit_dx, FitError};

/// Allocation cap for the stitched canvas, bytes. Guards against a
/// runaway width from a corrupted fit.
const MAX_CANVAS_BYTES: u64 = 50 * 1024 * 1024;

/// Buffered run of frames believed to belong to one train crossing.
///
/// The three vectors always have the same length, all frames share the
/// same dimensions, and `dx[0]` is never zero. `start_ts` is the
/// timestamp of the frame *preceding* `frames[0]`; it cannot default to
/// zero because zero is a valid timestamp.
#[derive(Default)]
pub(crate) struct Sequence {
    pub(crate) start_ts: Option<f64>,
    pub(crate) frames: Vec<RgbaImage>,
    /// `dx[i]` is the pixel offset between `frames[i-1]` and `frames[i]`.
    pub(crate) dx: Vec<i64>,
    pub(crate) ts: Vec<f64>,
}

impl Sequence {
    pub(crate) fn record(&mut self, prev_ts: f64, frame: RgbaImage, dx: i64, ts: f64) {
        if self.start_ts.is_none() {
            self.start_ts = Some(prev_ts);
        }
        self.frames.push(frame);
        self.dx.push(dx);
        self.ts.push(ts);
    }

    pub(crate) fn len(&self) -> usize {
        self.dx.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.dx.is_empty()
    }

    fn trim_trailing_zeros(&mut self) {
        while self.dx.last() == Some(&0) {
            self.dx.pop();
            self.ts.pop();
            self.frames.pop();
        }
    }
}

/// Travel direction of a train through the camera view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Left => f.write_str("left"),
            Self::Right => f.write_str("right"),
        }
    }
}

/// Why a finalized sequence produced no train. Non-fatal: the detector
/// resets and keeps running.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum DiscardReason {
    Fit(FitError),
    TooShort { length_px: f64, min_length_px: f64 },
    TooSlow { speed_px_s: f64, min_speed_px_s: f64 },
    TooShortToStitch { frames: usize },
    InconsistentDirection,
    CanvasTooLarge { width: u64, height: u32 },
}

impl DiscardReason {
    /// Stable code for logs and counters.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Fit(_) => "unable_to_fit",
            Self::TooShort { .. } => "too_short",
            Self::TooSlow { .. } => "too_slow",
            Self::TooShortToStitch { .. } => "too_short_to_stitch",
            Self::InconsistentDirection => "inconsistent_direction",
            Self::CanvasTooLarge { .. } => "unable_to_assemble_image",
        }
    }
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fit(err) => write!(f, "was not able to fit the sequence: {}", err),
            Self::TooShort {
                length_px,
                min_length_px,
            } => write!(f, "too short: {} < {} px", length_px, min_length_px),
            Self::TooSlow {
                speed_px_s,
                min_speed_px_s,
            } => write!(f, "too slow: {} < {} px/s", speed_px_s, min_speed_px_s),
            Self::TooShortToStitch { frames } => {
                write!(f, "sequence of {} frames is too short to stitch", frames)
            }
            Self::InconsistentDirection => {
                f.write_str("dx elements do not have a consistent sign")
            }
            Self::CanvasTooLarge { width, height } => {
                write!(f, "would allocate too much memory: size {}x{}", width, height)
            }
        }
    }
}

impl std::error::Error for DiscardReason {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Fit(err) => Some(err),
            _ => None,
        }
    }
}

impl From<FitError> for DiscardReason {
    fn from(err: FitError) -> Self {
        Self::Fit(err)
    }
}

/// A detected, measured and stitched train. Created only by the
/// stitcher; immutable afterwards.
#[derive(Clone, Serialize)]
pub struct Train {
    /// Timestamp of the frame preceding the first sequence frame, s.
    pub start_ts: f64,
    /// Timestamp of the last sequence frame, s.
    pub end_ts: f64,
    /// Number of frames in the stitched sequence.
    pub n_frames: usize,
    /// Train length, px. Always positive.
    pub length_px: f64,
    /// Speed at the temporal midpoint of the crossing, px/s. Positive
    /// sign means movement to the right, negative to the left.
    pub speed_px_s: f64,
    /// Acceleration, px/s^2, in the same sign convention as the speed.
    pub accel_px_s2: f64,
    /// The configuration the train was detected with.
    pub config: Config,
    /// The stitched panorama.
    #[serde(skip)]
    pub image: RgbaImage,
    /// Animated preview: every second frame of the original sequence,
    /// with inter-frame delays taken from the real timestamps. Encoding
    /// (e.g. to GIF) is up to the caller.
    #[serde(skip)]
    pub preview: Vec<Frame>,
}

impl Train {
    /// Absolute length, m.
    pub fn length_m(&self) -> f64 {
        self.length_px.abs() / self.config.pixels_per_m
    }

    /// Absolute speed, m/s.
    pub fn speed_m_s(&self) -> f64 {
        self.speed_px_s.abs() / self.config.pixels_per_m
    }

    /// Absolute speed, km/h.
    pub fn speed_km_h(&self) -> f64 {
        self.speed_m_s() * 3.6
    }

    /// Acceleration in m/s^2, corrected for the travel direction:
    /// positive always means accelerating, negative braking.
    pub fn accel_m_s2(&self) -> f64 {
        self.accel_px_s2 / self.config.pixels_per_m * self.speed_px_s.signum()
    }

    pub fn direction(&self) -> Direction {
        if self.speed_px_s > 0.0 {
            Direction::Right
        } else {
            Direction::Left
        }
    }
}

/// Fit the sequence's motion model and assemble the train record.
///
/// Panics on violated sequence invariants (mismatched vector lengths,
/// missing start timestamp, zero leading offset, inconsistent frame
/// dimensions): those indicate a broken producer contract.
pub(crate) fn fit_and_stitch(mut seq: Sequence, c: &Config) -> Result<Train, DiscardReason> {
    assert!(
        seq.frames.len() == seq.dx.len() && seq.frames.len() == seq.ts.len(),
        "frames, dx and ts must have the same length"
    );
    let start_ts = seq.start_ts.expect("sequence start timestamp missing");
    assert!(
        !seq.dx.is_empty() && seq.dx[0] != 0,
        "sequence is empty or its first offset is zero"
    );

    seq.trim_trailing_zeros();

    let fit = fit_dx(&seq.dx, &seq.ts, start_ts, c.max_speed_px_s())?;

    if fit.total_px.abs() < c.min_length_px() {
        return Err(DiscardReason::TooShort {
            length_px: fit.total_px.abs(),
            min_length_px: c.min_length_px(),
        });
    }

    // Sample the speed at the temporal midpoint rather than an endpoint
    // to reduce edge bias.
    let end_ts = *seq.ts.last().expect("sequence cannot be empty here");
    let t_mid = (end_ts - start_ts) / 2.0;
    let speed = fit.v0 + fit.accel * t_mid;
    if speed.abs() < c.min_speed_px_s() {
        return Err(DiscardReason::TooSlow {
            speed_px_s: speed.abs(),
            min_speed_px_s: c.min_speed_px_s(),
        });
    }

    let image = stitch(&seq.frames, &fit.dx)?;
    let preview = preview_frames(&seq);

    Ok(Train {
        start_ts,
        end_ts,
        n_frames: seq.frames.len(),
        length_px: fit.total_px.abs(),
        // Negated: with the usual camera mounting, things moving to the
        // left produce positive dx values. A fixed convention, not
        // derived from geometry.
        speed_px_s: -speed,
        accel_px_s2: -fit.accel,
        config: *c,
        image,
        preview,
    })
}

/// Composite the frames at cumulative horizontal offsets into a single
/// panorama. Later frames fully overwrite overlapped pixels.
pub(crate) fn stitch(frames: &[RgbaImage], dx: &[i64]) -> Result<RgbaImage, DiscardReason> {
    if dx.len() < 2 {
        return Err(DiscardReason::TooShortToStitch { frames: dx.len() });
    }
    assert_eq!(
        frames.len(),
        dx.len(),
        "frames and dx must have the same length"
    );
    let (fw, fh) = frames[0].dimensions();
    for f in frames {
        assert_eq!(f.dimensions(), (fw, fh), "inconsistent frame dimensions");
    }

    // Base width, signed by the travel direction. All non-zero offsets
    // must agree on the sign.
    let sign = dx[0].signum();
    let mut w = fw as i64 * sign;
    for &x in &dx[1..] {
        if x != 0 && x.signum() != sign {
            return Err(DiscardReason::InconsistentDirection);
        }
        w += x;
    }

    // Compare in u64; narrowing first would wrap widths beyond u32 past
    // the cap.
    let width = w.unsigned_abs();
    if width * fh as u64 * 4 > MAX_CANVAS_BYTES {
        return Err(DiscardReason::CanvasTooLarge {
            width,
            height: fh,
        });
    }
    let mut canvas = RgbaImage::new(width as u32, fh);

    // Left-to-right for positive total displacement, right-to-left for
    // negative.
    let mut pos: i64 = if w > 0 { 0 } else { -w - fw as i64 };
    for (frame, &d) in frames.iter().zip(dx) {
        imageops::replace(&mut canvas, frame, pos, 0);
        pos += d;
    }

    Ok(canvas)
}

/// Sample every second frame of the original (pre-fit) sequence, with
/// delays spanning the skipped frames.
fn preview_frames(seq: &Sequence) -> Vec<Frame> {
    let mut prev_ts = seq.start_ts.expect("sequence start timestamp missing");
    let mut out = Vec::with_capacity(seq.frames.len() / 2 + 1);

    for (i, (frame, &ts)) in seq.frames.iter().zip(&seq.ts).enumerate() {
        let dt = ts - prev_ts;
        if i % 2 == 1 {
            continue;
        }
        let delay = Delay::from_saturating_duration(Duration::from_secs_f64(dt.max(0.0)));
        out.push(Frame::from_parts(frame.clone(), 0, 0, delay));
        prev_ts = ts;
    }

    out
}
