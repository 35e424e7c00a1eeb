// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;

use jiff::Timestamp;

/// The result type for fallible clock operations.
pub type Result<T> = std::result::Result<T, Error>;

/// An error raised when manipulating a clock.
///
/// The only operation that currently fails is
/// [`WarpingClock::set_warp_speed`][crate::WarpingClock::set_warp_speed],
/// which rejects ratios that are not positive finite numbers. All other
/// clock operations are total.
///
/// # Limited introspection
///
/// Other than implementing the [`std::error::Error`] and [`fmt::Debug`]
/// traits, this error type currently provides no introspection capabilities.
///
/// # Examples
///
/// ```
/// use tempo::WarpingClock;
///
/// let clock = WarpingClock::new();
/// let error = clock.set_warp_speed(-2.0).unwrap_err();
///
/// assert!(error.to_string().contains("warp ratio"));
/// ```
#[derive(Debug)]
pub struct Error(ErrorKind);

#[derive(Debug)]
enum ErrorKind {
    /// The requested warp ratio was zero, negative, NaN, or infinite.
    InvalidRatio(f64),

    /// A clock was asked to move backwards.
    ///
    /// Reserved: no operation raises this today. The settable clock permits
    /// moving backwards; a variant that enforces monotonic `set_now` would
    /// use it.
    #[allow(dead_code)]
    TimeInPast(Timestamp),
}

impl Error {
    const fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub(crate) const fn invalid_ratio(ratio: f64) -> Self {
        Self::from_kind(ErrorKind::InvalidRatio(ratio))
    }

    #[allow(dead_code)]
    pub(crate) const fn time_in_past(t: Timestamp) -> Self {
        Self::from_kind(ErrorKind::TimeInPast(t))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ErrorKind::InvalidRatio(ratio) => {
                write!(f, "warp ratio must be a positive finite number, got {ratio}")
            }
            ErrorKind::TimeInPast(t) => write!(f, "time cannot go backwards: {t} is in the past"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_types() {
        static_assertions::assert_impl_all!(Error: Send, Sync);
    }

    #[test]
    fn invalid_ratio_display() {
        let error = Error::invalid_ratio(f64::NAN);
        assert_eq!(error.to_string(), "warp ratio must be a positive finite number, got NaN");

        let error = Error::invalid_ratio(-1.5);
        assert_eq!(error.to_string(), "warp ratio must be a positive finite number, got -1.5");
    }

    #[test]
    fn time_in_past_display() {
        let error = Error::time_in_past(Timestamp::UNIX_EPOCH);
        assert_eq!(
            error.to_string(),
            "time cannot go backwards: 1970-01-01T00:00:00Z is in the past"
        );
    }
}
