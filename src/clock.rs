// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use jiff::{SignedDuration, Timestamp};
use tokio::sync::oneshot;

use crate::queue::TimeSink;
use crate::timer::Timer;

/// Interacts with time: query "now", await deadlines, and arm one-shot
/// timers.
///
/// Code written against this trait runs unchanged on the host clock
/// ([`RealClock`][crate::RealClock]), on a clock whose "now" only moves when
/// told to ([`SettableClock`][crate::SettableClock]), and on a clock that
/// runs at a configurable multiple of real time
/// ([`WarpingClock`][crate::WarpingClock]). Swapping the virtual clocks in
/// for tests makes time-dependent logic fast and deterministic.
///
/// All implementations are cheap to clone and safe to share across threads;
/// clones observe the same flow of time.
///
/// # Examples
///
/// ```
/// use tempo::{Clock, SettableClock, SignedDuration, Timestamp};
///
/// # async fn deadline_example() {
/// let clock = SettableClock::new();
/// clock.set_now("2020-01-01T00:00:00Z".parse::<Timestamp>().unwrap());
///
/// let pending = clock.after(SignedDuration::from_secs(1));
/// clock.set_now("2020-01-01T00:00:01Z".parse::<Timestamp>().unwrap());
///
/// assert_eq!(
///     pending.await.unwrap(),
///     "2020-01-01T00:00:01Z".parse::<Timestamp>().unwrap(),
/// );
/// # }
/// ```
pub trait Clock: fmt::Debug + Send + Sync {
    /// Returns the clock's current view of "now".
    fn now(&self) -> Timestamp;

    /// Returns the time elapsed on this clock since `earlier`.
    ///
    /// The result is negative when `earlier` is ahead of the clock.
    fn since(&self, earlier: Timestamp) -> SignedDuration {
        self.now().duration_since(earlier)
    }

    /// Returns a receiver that yields the clock's "now" once `duration` has
    /// elapsed on this clock.
    ///
    /// A zero or negative duration resolves the receiver with the current
    /// "now"; the value is already available when this returns.
    fn after(&self, duration: SignedDuration) -> TimeReceiver;

    /// Arms a one-shot [`Timer`] firing after `duration` has elapsed on this
    /// clock.
    ///
    /// Unlike [`after`][Self::after], the timer can be stopped and re-armed.
    fn timer(&self, duration: SignedDuration) -> Timer;
}

/// Extension methods available on every [`Clock`].
pub trait ClockExt: Clock {
    /// Suspends the caller until `duration` has elapsed on this clock.
    ///
    /// Zero and negative durations return immediately.
    ///
    /// # Examples
    ///
    /// ```
    /// use tempo::{Clock, ClockExt, SignedDuration, WarpingClock};
    ///
    /// # async fn sleep_example() -> tempo::Result<()> {
    /// let clock = WarpingClock::new();
    /// clock.set_warp_speed(60.0)?;
    ///
    /// // Completes in roughly one second of real time.
    /// clock.sleep(SignedDuration::from_mins(1)).await;
    /// # Ok(())
    /// # }
    /// ```
    fn sleep(&self, duration: SignedDuration) -> impl Future<Output = ()> + Send + '_ {
        async move {
            let _ = self.after(duration).await;
        }
    }
}

impl<C: Clock + ?Sized> ClockExt for C {}

/// A one-shot receiver for a firing timestamp.
///
/// Created by [`Clock::after`] and carried inside [`Timer`]. Resolves to
/// `Some(timestamp)` when the deadline fires and to `None` when the
/// delivering side went away without firing (for example, the clock was
/// dropped). The receiver is single-use: poll it to completion at most once.
#[derive(Debug)]
pub struct TimeReceiver(oneshot::Receiver<Timestamp>);

impl TimeReceiver {
    /// Creates a connected sink/receiver pair.
    pub(crate) fn channel() -> (TimeSink, Self) {
        let (sink, receiver) = oneshot::channel();
        (sink, Self(receiver))
    }

    /// Creates a receiver already holding `now`.
    pub(crate) fn ready(now: Timestamp) -> Self {
        let (sink, receiver) = Self::channel();
        // Capacity one and never contended; the send cannot fail.
        let _ = sink.send(now);
        receiver
    }

    /// Returns the fired timestamp if one is already available.
    ///
    /// Never blocks. Returns `None` while the deadline is still pending and
    /// after the value has been taken.
    pub fn try_recv(&mut self) -> Option<Timestamp> {
        self.0.try_recv().ok()
    }
}

impl Future for TimeReceiver {
    type Output = Option<Timestamp>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(Result::ok)
    }
}
