//! trainscan — detects, measures and reconstructs passing trains from a
//! fixed camera view of a rail track.
//!
//! The input is a stream of timestamped RGBA frames; the output is one
//! [`Train`] record per crossing, holding the stitched panorama, an
//! animated preview and the physical measurements (length, speed,
//! acceleration). The pipeline stages are:
//!
//! 1. **Contrast gate** – per-channel mean / mean-absolute-deviation to
//!    skip frames too dark or too flat to match reliably.
//! 2. **Patch match** – exhaustive windowed cosine-similarity search for
//!    the horizontal offset between consecutive frames.
//! 3. **Motion state machine** – delimits the start and end of one
//!    train-crossing event from the per-frame offsets.
//! 4. **Robust fit** – RANSAC fit of a constant-acceleration velocity
//!    model to smooth the noisy offset samples.
//! 5. **Stitch** – composites the frames at the fitted offsets into a
//!    single panorama and derives the measurements.
//!
//! # Public API
//! - [`TrainDetector`] and [`Config`] as primary entry points
//! - [`Matcher`] for swapping in an alternative search backend
//! - [`EventSink`] for receiving per-frame/per-sequence diagnostics
//!
//! The detector is single-threaded and stateful: feed frames in strictly
//! increasing timestamp order through [`TrainDetector::frame`], and flush
//! with [`TrainDetector::finalize`] at end of stream. Frame buffers are
//! owned by the detector from the moment they are passed in. The robust
//! fit runs synchronously inside the call that closes a sequence and can
//! take tens of milliseconds for long sequences; real-time capture loops
//! should feed the detector from a bounded queue off the capture thread.

pub mod config;
pub mod contrast;
pub mod detect;
pub mod event;
pub mod fit;
pub mod pmatch;
pub mod stitch;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{Config, ConfigError};
pub use detect::TrainDetector;
pub use event::{DetectEvent, DropReason, EventSink, TracingSink};
pub use fit::{fit_dx, FitError, FitResult};
pub use pmatch::{FastMatcher, MatchResult, Matcher, NaiveMatcher, ParallelMatcher};
pub use stitch::{Direction, DiscardReason, Train};
