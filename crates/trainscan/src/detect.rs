//! Automatic train detection state machine.
//!
//! [`TrainDetector`] consumes a stream of frames with timestamps, decides
//! per frame whether the scene is moving, accumulates a candidate
//! crossing sequence while it is, and hands finished sequences to the
//! fitter and stitcher. One instance handles one camera; calls must
//! arrive in strictly increasing timestamp order from a single thread.
//!
//! The detector takes ownership of every ingested frame buffer; no
//! pixel data is copied on the hot path.

use image::{imageops, GrayImage, RgbaImage};

use crate::config::{Config, ConfigError};
use crate::contrast;
use crate::event::{DetectEvent, DropReason, EventSink, TracingSink};
use crate::pmatch::{FastMatcher, Matcher};
use crate::stitch::{fit_and_stitch, Sequence, Train};

/// Match score above which a zero offset is trusted as "not moving".
pub(crate) const GOOD_SCORE_NO_MOVE: f64 = 0.99;
/// Match score above which a non-zero offset is trusted to start a
/// sequence. Lower than the no-move threshold: a moving scene never
/// correlates as cleanly as a static one.
pub(crate) const GOOD_SCORE_MOVE: f64 = 0.925;
/// Hard cap on buffered sequence length; exceeding it forces a
/// finalize. Pure memory bound for pathological non-terminating motion.
pub(crate) const MAX_SEQUENCE_LEN: usize = 1500;
/// Minimal accepted frame period, s. Guards against duplicate or
/// out-of-order timestamps.
pub(crate) const MIN_FRAME_PERIOD_S: f64 = 0.01;
/// Exponential low-pass factor on |dx| used for the stop condition.
pub(crate) const DX_LOW_PASS_FACTOR: f64 = 0.95;
/// Contrast gate: minimum channel-averaged pixel mean.
pub(crate) const MIN_CONTRAST_AVG: f64 = 0.005;
/// Contrast gate: minimum channel-averaged mean absolute deviation.
pub(crate) const MIN_CONTRAST_AVG_DEV: f64 = 0.01;

struct PrevFrame {
    ts: f64,
    gray: GrayImage,
}

/// Automatic train detector and stitcher.
///
/// Created with [`TrainDetector::new`]; optionally customized with
/// [`with_matcher`](Self::with_matcher) and
/// [`with_sink`](Self::with_sink).
pub struct TrainDetector {
    config: Config,
    matcher: Box<dyn Matcher>,
    sink: Box<dyn EventSink>,

    prev: Option<PrevFrame>,
    seq: Sequence,
    dx_abs_low_pass: f64,
}

impl TrainDetector {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            matcher: Box::new(FastMatcher),
            sink: Box::new(TracingSink),
            prev: None,
            seq: Sequence::default(),
            dx_abs_low_pass: 0.0,
        })
    }

    /// Replace the default search backend.
    pub fn with_matcher(mut self, matcher: impl Matcher + 'static) -> Self {
        self.matcher = Box::new(matcher);
        self
    }

    /// Replace the default (tracing) event sink.
    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Ingest one frame. Returns a completed [`Train`] if this call
    /// closed out a sequence.
    pub fn frame(&mut self, frame: RgbaImage, ts: f64) -> Option<Train> {
        let gray = imageops::grayscale(&frame);
        let prev = self.prev.take();

        let ret = match &prev {
            // First frame; nothing to pair it with yet.
            None => None,
            Some(prev) => self.process(prev, frame, &gray, ts),
        };

        self.prev = Some(PrevFrame { ts, gray });
        ret
    }

    /// Flush any in-progress sequence, e.g. at end of stream. No-op
    /// when idle.
    pub fn finalize(&mut self) -> Option<Train> {
        if self.seq.is_empty() {
            return None;
        }
        self.finalize_sequence()
    }

    fn process(
        &mut self,
        prev: &PrevFrame,
        frame: RgbaImage,
        gray: &GrayImage,
        ts: f64,
    ) -> Option<Train> {
        let period = ts - prev.ts;
        if period < MIN_FRAME_PERIOD_S {
            self.drop_frame(ts, DropReason::FramePeriodTooSmall);
            return None;
        }

        let min_dx = self.config.min_px_per_frame(period);
        let max_dx = self.config.max_px_per_frame(period);
        if (frame.width() as i64) < 3 * max_dx {
            self.drop_frame(ts, DropReason::FrameTooNarrow);
            return None;
        }

        let (mean, dev) = contrast::rgba_stats(&frame);
        let mean = mean.iter().sum::<f64>() / 3.0;
        let dev = dev.iter().sum::<f64>() / 3.0;
        if mean < MIN_CONTRAST_AVG || dev < MIN_CONTRAST_AVG_DEV {
            self.drop_frame(ts, DropReason::LowContrast);
            return None;
        }

        let (dx, score) = self.find_offset(&prev.gray, gray, max_dx);
        self.sink
            .on_event(&DetectEvent::FrameMatched { ts, dx, score });

        if !self.seq.is_empty() {
            self.dx_abs_low_pass = self.dx_abs_low_pass * DX_LOW_PASS_FACTOR
                + dx.abs() as f64 * (1.0 - DX_LOW_PASS_FACTOR);

            // Memory bound.
            if self.seq.len() > MAX_SEQUENCE_LEN {
                return self.finalize_sequence();
            }

            // The train has decelerated or left the view.
            if self.dx_abs_low_pass < min_dx as f64 {
                return self.finalize_sequence();
            }

            self.seq.record(prev.ts, frame, dx, ts);
            return None;
        }

        if score >= GOOD_SCORE_NO_MOVE && dx.abs() < min_dx {
            self.drop_frame(ts, DropReason::NotMoving);
            return None;
        }

        if score >= GOOD_SCORE_MOVE && dx.abs() >= min_dx && dx.abs() <= max_dx {
            self.sink.on_event(&DetectEvent::SequenceStarted {
                start_ts: prev.ts,
                dx,
                score,
            });
            self.seq.record(prev.ts, frame, dx, ts);
            self.dx_abs_low_pass = dx.abs() as f64;
            return None;
        }

        self.drop_frame(ts, DropReason::Inconclusive);
        None
    }

    /// Estimate the horizontal offset between consecutive frames.
    ///
    /// A centered band of the previous frame (3x the maximum per-frame
    /// displacement wide, three quarters of the frame high) is searched
    /// for the centered band of the current frame (1x wide). Motion is
    /// assumed horizontal, so a full 2-D search is never needed.
    fn find_offset(&self, prev: &GrayImage, curr: &GrayImage, max_dx: i64) -> (i64, f64) {
        assert_eq!(
            prev.dimensions(),
            curr.dimensions(),
            "inconsistent frame dimensions"
        );
        let (fw, fh) = curr.dimensions();

        let w = max_dx as u32 * 3;
        let h = fh * 3 / 4 + 1;
        let win_x = (fw - w) / 2;
        let y = (fh - h) / 2;
        let window = imageops::crop_imm(prev, win_x, y, w, h).to_image();

        let pw = max_dx as u32;
        let pat_x = (fw - pw) / 2;
        let patch = imageops::crop_imm(curr, pat_x, y, pw, h).to_image();

        // The x the search returns when nothing has moved.
        let x_zero = (pat_x - win_x) as i64;

        let m = self.matcher.search(&window, &patch);
        (m.x as i64 - x_zero, m.score)
    }

    fn finalize_sequence(&mut self) -> Option<Train> {
        let seq = std::mem::take(&mut self.seq);
        self.dx_abs_low_pass = 0.0;
        let frames = seq.len();

        match fit_and_stitch(seq, &self.config) {
            Ok(train) => {
                self.sink.on_event(&DetectEvent::TrainDetected {
                    start_ts: train.start_ts,
                    n_frames: train.n_frames,
                    length_px: train.length_px,
                    speed_px_s: train.speed_px_s,
                });
                Some(train)
            }
            Err(reason) => {
                self.sink.on_event(&DetectEvent::SequenceDiscarded { reason, frames });
                None
            }
        }
    }

    fn drop_frame(&mut self, ts: f64, reason: DropReason) {
        self.sink.on_event(&DetectEvent::FrameDropped { ts, reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stitch::Direction;
    use crate::test_utils::noise_rgba;
    use approx::assert_relative_eq;
    use image::imageops::crop_imm;
    use image::Rgba;
    use std::cell::RefCell;
    use std::rc::Rc;

    const PERIOD: f64 = 1.0 / 30.0;

    fn config() -> Config {
        Config {
            pixels_per_m: 50.0,
            min_speed_kph: 5.0,
            max_speed_kph: 50.0,
            min_length_m: 1.0,
        }
    }

    /// Frames of a 100x100 view scrolling over a noise background by
    /// `step` px per frame.
    fn scrolling_frames(n: usize, step: u32) -> Vec<RgbaImage> {
        let src = noise_rgba(100 + n as u32 * step, 100, 42);
        (0..n)
            .map(|i| crop_imm(&src, i as u32 * step, 0, 100, 100).to_image())
            .collect()
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Rc<RefCell<Vec<DetectEvent>>>);

    impl EventSink for RecordingSink {
        fn on_event(&mut self, event: &DetectEvent) {
            self.0.borrow_mut().push(event.clone());
        }
    }

    #[test]
    fn static_scene_never_starts_a_sequence() {
        let mut det = TrainDetector::new(config()).unwrap();
        let frame = noise_rgba(100, 100, 1);
        for i in 0..100 {
            assert!(det.frame(frame.clone(), i as f64 * PERIOD).is_none());
        }
        assert!(det.finalize().is_none());
    }

    #[test]
    fn detects_scrolling_motion() {
        let mut det = TrainDetector::new(config()).unwrap();
        let mut trains = Vec::new();
        for (i, frame) in scrolling_frames(30, 10).into_iter().enumerate() {
            trains.extend(det.frame(frame, i as f64 * PERIOD));
        }
        trains.extend(det.finalize());

        assert_eq!(trains.len(), 1);
        let t = &trains[0];
        // Frame 0 is the reference; frames 1..=29 get recorded.
        assert_eq!(t.n_frames, 29);
        assert!((t.length_px - 290.0).abs() <= 29.0, "length {}", t.length_px);
        // 10 px/frame at 30 fps and 50 px/m is 6 m/s.
        assert_relative_eq!(t.speed_m_s(), 6.0, epsilon = 0.5);
        // Positive dx, so the scene content moves left.
        assert_eq!(t.direction(), Direction::Left);
        assert_relative_eq!(t.start_ts, 0.0);
    }

    #[test]
    fn low_pass_filter_ends_the_sequence() {
        // Motion stops mid-stream; the train must come out without an
        // explicit finalize, once the low-pass |dx| decays below minDx.
        let mut det = TrainDetector::new(config()).unwrap();
        let frames = scrolling_frames(30, 10);
        let last = frames.last().cloned().unwrap();

        let mut trains = Vec::new();
        let mut i = 0usize;
        for frame in frames {
            trains.extend(det.frame(frame, i as f64 * PERIOD));
            i += 1;
        }
        for _ in 0..80 {
            trains.extend(det.frame(last.clone(), i as f64 * PERIOD));
            i += 1;
        }

        assert_eq!(trains.len(), 1);
        // Trailing zero offsets are trimmed before fitting.
        assert_eq!(trains[0].n_frames, 29);
    }

    #[test]
    fn detector_resets_after_a_train() {
        let mut det = TrainDetector::new(config()).unwrap();
        let mut trains = Vec::new();
        let mut i = 0usize;
        for _ in 0..2 {
            for frame in scrolling_frames(30, 10) {
                trains.extend(det.frame(frame, i as f64 * PERIOD));
                i += 1;
            }
            trains.extend(det.finalize());
        }
        assert_eq!(trains.len(), 2);
    }

    #[test]
    fn low_contrast_frames_are_dropped() {
        let events = RecordingSink::default();
        let mut det = TrainDetector::new(config())
            .unwrap()
            .with_sink(events.clone());

        let black = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        det.frame(black.clone(), 0.0);
        det.frame(black, PERIOD);

        assert_eq!(
            events.0.borrow().as_slice(),
            &[DetectEvent::FrameDropped {
                ts: PERIOD,
                reason: DropReason::LowContrast,
            }]
        );
    }

    #[test]
    fn degenerate_frame_period_is_dropped() {
        let events = RecordingSink::default();
        let mut det = TrainDetector::new(config())
            .unwrap()
            .with_sink(events.clone());

        let frame = noise_rgba(100, 100, 2);
        det.frame(frame.clone(), 1.0);
        det.frame(frame, 1.0);

        assert_eq!(
            events.0.borrow().as_slice(),
            &[DetectEvent::FrameDropped {
                ts: 1.0,
                reason: DropReason::FramePeriodTooSmall,
            }]
        );
    }

    #[test]
    fn narrow_frames_are_dropped() {
        let events = RecordingSink::default();
        let mut det = TrainDetector::new(config())
            .unwrap()
            .with_sink(events.clone());

        // maxDx at these settings is 24 px/frame; the search window
        // needs 72 px of width.
        let frame = noise_rgba(60, 100, 3);
        det.frame(frame.clone(), 0.0);
        det.frame(frame, PERIOD);

        assert_eq!(
            events.0.borrow().as_slice(),
            &[DetectEvent::FrameDropped {
                ts: PERIOD,
                reason: DropReason::FrameTooNarrow,
            }]
        );
    }

    #[test]
    fn sequence_start_is_reported() {
        let events = RecordingSink::default();
        let mut det = TrainDetector::new(config())
            .unwrap()
            .with_sink(events.clone());

        for (i, frame) in scrolling_frames(3, 10).into_iter().enumerate() {
            det.frame(frame, i as f64 * PERIOD);
        }

        // Every matched pair reports its offset and score through the
        // sink, followed by the state transition.
        let recorded = events.0.borrow();
        assert!(matches!(
            recorded[0],
            DetectEvent::FrameMatched { dx: 10, .. }
        ));
        assert!(matches!(
            recorded[1],
            DetectEvent::SequenceStarted { dx: 10, .. }
        ));
        assert!(matches!(
            recorded[2],
            DetectEvent::FrameMatched { dx: 10, .. }
        ));
    }

    #[test]
    fn rejects_invalid_config() {
        let c = Config {
            pixels_per_m: -1.0,
            ..config()
        };
        assert!(TrainDetector::new(c).is_err());
    }
}
