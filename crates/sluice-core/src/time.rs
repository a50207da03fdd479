//! Event and processing time.
//!
//! All times are nanoseconds since the Unix epoch, matching the unit of
//! Arrow `Timestamp(Nanosecond)` columns.

use std::fmt;

/// A point in time, in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Time(pub i64);

impl Time {
    /// The smallest representable time. Used as the initial watermark.
    pub const MIN: Time = Time(i64::MIN);

    /// The largest representable time.
    pub const MAX: Time = Time(i64::MAX);

    /// Creates a time from nanoseconds since the epoch.
    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Returns the time as nanoseconds since the epoch.
    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Returns the current wall clock time.
    #[must_use]
    pub fn now() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX));
        Self(nanos)
    }
}

impl From<i64> for Time {
    fn from(nanos: i64) -> Self {
        Self(nanos)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
