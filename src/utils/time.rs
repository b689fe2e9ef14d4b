use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Converts a wall-clock time to milliseconds since the Unix epoch.
///
/// Times before the epoch map to negative values.
#[must_use]
pub fn to_unix_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Inverse of [`to_unix_millis`].
#[must_use]
pub fn from_unix_millis(millis: i64) -> SystemTime {
    if millis >= 0 {
        UNIX_EPOCH + Duration::from_millis(millis as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(millis.unsigned_abs())
    }
}

/// Duration expressed as fractional milliseconds.
#[inline]
#[must_use]
pub fn as_millis_f64(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Measures how long a closure takes.
pub struct Stopwatch {
    start: Instant,
}

impl Stopwatch {
    #[must_use]
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        as_millis_f64(self.start.elapsed())
    }
}
