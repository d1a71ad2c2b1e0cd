//! Detector observability.
//!
//! The detector reports everything that happens to a frame or a sequence
//! through an injected [`EventSink`], so embedding applications can wire
//! counters or recording logic without the detector knowing about them.
//! [`TracingSink`] is the default and simply forwards to `tracing`.

use crate::stitch::DiscardReason;

/// Why a single frame was dropped instead of entering the pipeline.
/// Frame drops are routine and carry no further consequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Timestamp too close to the previous frame's.
    FramePeriodTooSmall,
    /// Frame too narrow for the search window at the configured speeds.
    FrameTooNarrow,
    /// Contrast gate: frame too dark or too flat to match reliably.
    LowContrast,
    /// High-confidence match at zero offset while idle.
    NotMoving,
    /// Match score below the confidence threshold; offset unusable.
    Inconclusive,
}

impl DropReason {
    /// Stable code for logs and counters.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::FramePeriodTooSmall => "frame_period_too_small",
            Self::FrameTooNarrow => "frame_too_narrow",
            Self::LowContrast => "low_contrast",
            Self::NotMoving => "not_moving",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Everything the detector reports while running.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectEvent {
    /// A frame was skipped before matching.
    FrameDropped { ts: f64, reason: DropReason },
    /// The offset search ran for a frame pair; emitted before the state
    /// transition logic, in both states.
    FrameMatched { ts: f64, dx: i64, score: f64 },
    /// Motion was detected and a new sequence started recording.
    SequenceStarted { start_ts: f64, dx: i64, score: f64 },
    /// A finalized sequence did not yield a train.
    SequenceDiscarded {
        reason: DiscardReason,
        frames: usize,
    },
    /// A finalized sequence was fit and stitched successfully.
    TrainDetected {
        start_ts: f64,
        n_frames: usize,
        length_px: f64,
        speed_px_s: f64,
    },
}

/// Receiver for [`DetectEvent`]s.
pub trait EventSink {
    fn on_event(&mut self, event: &DetectEvent);
}

/// Default sink: forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&mut self, event: &DetectEvent) {
        match event {
            DetectEvent::FrameDropped { ts, reason } => {
                tracing::debug!(ts, reason = reason.code(), "frame dropped");
            }
            DetectEvent::FrameMatched { ts, dx, score } => {
                tracing::debug!(ts, dx, score, "frame matched");
            }
            DetectEvent::SequenceStarted { start_ts, dx, score } => {
                tracing::info!(start_ts, dx, score, "sequence started");
            }
            DetectEvent::SequenceDiscarded { reason, frames } => {
                tracing::info!(code = reason.code(), frames, %reason, "sequence discarded");
            }
            DetectEvent::TrainDetected {
                start_ts,
                n_frames,
                length_px,
                speed_px_s,
            } => {
                tracing::info!(start_ts, n_frames, length_px, speed_px_s, "train detected");
            }
        }
    }
}
