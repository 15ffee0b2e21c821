//! Clock and timing utilities for segment bookkeeping.
//!
//! Segments are stamped with wall-clock times (for display and download
//! names) and measured with a monotonic clock (for durations that must
//! not jump when the system clock is adjusted).

use std::time::Instant;

use chrono::{DateTime, Utc};

/// A clock anchored to the moment a recording span started.
#[derive(Debug, Clone)]
pub struct RecordingClock {
    /// The instant recording started.
    epoch: Instant,

    /// Wall-clock time at epoch.
    epoch_wall: DateTime<Utc>,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: Utc::now(),
        }
    }

    /// Get seconds elapsed since recording start.
    pub fn elapsed_secs(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    /// Wall-clock time at recording start.
    pub fn epoch_wall(&self) -> DateTime<Utc> {
        self.epoch_wall
    }
}

/// Milliseconds since the Unix epoch, used in download file names.
pub fn epoch_millis() -> i64 {
    Utc::now().timestamp_millis()
}
