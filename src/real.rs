// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use jiff::{SignedDuration, Timestamp};

use crate::clock::{Clock, TimeReceiver};
use crate::timer::{self, Timer};

/// A clock that reads the host's wall clock.
///
/// Deadlines ride the Tokio timer, so [`after`][Clock::after],
/// [`timer`][Clock::timer], and [`sleep`][crate::ClockExt::sleep] must be
/// called within a Tokio runtime. [`now`][Clock::now] works anywhere.
///
/// The wall clock is not monotonic; the host may adjust it between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a real-time clock.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }

    fn after(&self, duration: SignedDuration) -> TimeReceiver {
        if !duration.is_positive() {
            return TimeReceiver::ready(Timestamp::now());
        }

        let (sink, receiver) = TimeReceiver::channel();
        let delay = duration.unsigned_abs();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = sink.send(Timestamp::now());
        });

        receiver
    }

    fn timer(&self, duration: SignedDuration) -> Timer {
        timer::host_timer(duration)
    }
}
