//! Detection run configuration.

use serde::{Deserialize, Serialize};

/// Physical-scale and plausibility parameters for one detection run.
///
/// Immutable once a [`crate::TrainDetector`] has been created from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Pixel density at the track plane, px/m. Can be reconstructed from
    /// the sleepers, which are usually 0.6 m apart (in Europe).
    pub pixels_per_m: f64,
    /// Assumed minimum train speed, km/h. May be zero.
    pub min_speed_kph: f64,
    /// Assumed maximum train speed, km/h. Bounds the search window.
    pub max_speed_kph: f64,
    /// Minimum length of a train, m. Shorter detections are discarded.
    pub min_length_m: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pixels_per_m: 45.0,
            min_speed_kph: 25.0,
            max_speed_kph: 160.0,
            min_length_m: 5.0,
        }
    }
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NotPositive { field: &'static str, value: f64 },
    Negative { field: &'static str, value: f64 },
    SpeedRangeInverted { min_kph: f64, max_kph: f64 },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotPositive { field, value } => {
                write!(f, "{} must be strictly positive, got {}", field, value)
            }
            Self::Negative { field, value } => {
                write!(f, "{} must not be negative, got {}", field, value)
            }
            Self::SpeedRangeInverted { min_kph, max_kph } => {
                write!(
                    f,
                    "max speed must be above min speed, got {} >= {} km/h",
                    min_kph, max_kph
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Check the configuration invariants: all values strictly positive,
    /// except the minimum speed which may be zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("pixels_per_m", self.pixels_per_m),
            ("max_speed_kph", self.max_speed_kph),
            ("min_length_m", self.min_length_m),
        ] {
            if !(value > 0.0) {
                return Err(ConfigError::NotPositive { field, value });
            }
        }
        if !(self.min_speed_kph >= 0.0) {
            return Err(ConfigError::Negative {
                field: "min_speed_kph",
                value: self.min_speed_kph,
            });
        }
        if self.min_speed_kph >= self.max_speed_kph {
            return Err(ConfigError::SpeedRangeInverted {
                min_kph: self.min_speed_kph,
                max_kph: self.max_speed_kph,
            });
        }
        Ok(())
    }

    /// Smallest plausible per-frame displacement, px. Always >= 1.
    pub(crate) fn min_px_per_frame(&self, frame_period_s: f64) -> i64 {
        let px = self.min_speed_kph / 3.6 * self.pixels_per_m * frame_period_s;
        (px as i64 - 1).max(1)
    }

    /// Largest plausible per-frame displacement, px. Always >= 1.
    pub(crate) fn max_px_per_frame(&self, frame_period_s: f64) -> i64 {
        let px = self.max_speed_kph / 3.6 * self.pixels_per_m * frame_period_s;
        (px as i64 + 1).max(1)
    }

    pub(crate) fn min_speed_px_s(&self) -> f64 {
        self.min_speed_kph / 3.6 * self.pixels_per_m
    }

    pub(crate) fn max_speed_px_s(&self) -> f64 {
        self.max_speed_kph / 3.6 * self.pixels_per_m
    }

    pub(crate) fn min_length_px(&self) -> f64 {
        self.min_length_m * self.pixels_per_m
    }
}
