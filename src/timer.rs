// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::Arc;

use jiff::{SignedDuration, Timestamp};
use tokio::sync::oneshot;

use crate::clock::{Clock, TimeReceiver};

/// An armed deadline handed to the timer facade: the delivery channel plus
/// the cancellation handle for the underlying queue entry.
pub(crate) struct ArmedEntry {
    pub(crate) fired: TimeReceiver,
    pub(crate) cancel: Box<dyn FnOnce() -> bool + Send>,
}

/// Clocks that arm deadlines on an internal queue.
///
/// `arm` enqueues an entry `duration` past the clock's current "now" and
/// returns its delivery channel together with an idempotent cancellation
/// handle. Callers must pass a positive duration; non-positive durations are
/// handled before the queue is involved.
pub(crate) trait EntryClock: Clock + Clone + Sized + 'static {
    fn arm(&self, duration: SignedDuration) -> ArmedEntry;
}

type Rearm = Arc<dyn Fn(SignedDuration) -> Timer + Send + Sync>;

/// A one-shot timer armed on a [`Clock`][crate::Clock].
///
/// A timer moves from armed to fired, delivering exactly one timestamp on
/// its [`channel`][Self::channel], or from armed to stopped, in which case
/// the queued deadline never delivers. [`reset`][Self::reset] re-arms a
/// timer for a new deadline. Dropping a timer stops it.
///
/// # Examples
///
/// ```
/// use tempo::{Clock, SettableClock, SignedDuration};
///
/// # async fn timer_example() {
/// let clock = SettableClock::new();
/// let mut timer = clock.timer(SignedDuration::from_secs(30));
///
/// clock.add(SignedDuration::from_secs(30));
///
/// let fired = timer.channel().await;
/// assert_eq!(fired, Some(clock.now()));
/// # }
/// ```
pub struct Timer {
    receiver: TimeReceiver,

    /// Signals the forwarding task to cancel the underlying entry. `None`
    /// once the timer was stopped or was created already fired.
    stop: Option<oneshot::Sender<()>>,

    rearm: Rearm,
}

impl Timer {
    fn from_parts(receiver: TimeReceiver, stop: Option<oneshot::Sender<()>>, rearm: Rearm) -> Self {
        Self { receiver, stop, rearm }
    }

    fn already_fired(now: Timestamp, rearm: Rearm) -> Self {
        Self::from_parts(TimeReceiver::ready(now), None, rearm)
    }

    /// The channel the firing timestamp is delivered on.
    ///
    /// Yields at most one timestamp per arming: the clock's "now" at the
    /// moment the timer fired, or, after [`stop`][Self::stop], the current
    /// "now" as a courtesy signal that the timer is done.
    pub fn channel(&mut self) -> &mut TimeReceiver {
        &mut self.receiver
    }

    /// Re-arms the timer for a deadline `duration` past the clock's current
    /// "now". The previous arming is cancelled and never delivers.
    ///
    /// Always returns `false`: whether the previous arming was still active
    /// is intentionally not computed.
    pub fn reset(&mut self, duration: SignedDuration) -> bool {
        let fresh = (self.rearm)(duration);
        self.receiver = fresh.receiver;
        self.stop = fresh.stop;

        false
    }

    /// Stops the timer, cancelling the underlying entry.
    ///
    /// Returns `true` when the timer had already fired or been stopped, and
    /// `false` when this call took effect. Stopping is idempotent. The
    /// channel of a stopped timer yields the clock's "now" at the moment of
    /// the stop as a courtesy signal that the timer is done.
    pub fn stop(&mut self) -> bool {
        match self.stop.take() {
            None => true,
            Some(stop) => stop.send(()).is_err(),
        }
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("receiver", &self.receiver)
            .field("stopped", &self.stop.is_none())
            .finish_non_exhaustive()
    }
}

/// Arms a timer on a queue-backed clock and spawns its forwarding wire.
///
/// The wire either relays the fired timestamp into the timer's channel or,
/// once the stop handle is used or dropped, cancels the queue entry and
/// forwards the current "now".
pub(crate) fn entry_timer<C: EntryClock>(clock: &C, duration: SignedDuration) -> Timer {
    let rearm: Rearm = {
        let clock = clock.clone();
        Arc::new(move |d| entry_timer(&clock, d))
    };

    if !duration.is_positive() {
        return Timer::already_fired(clock.now(), rearm);
    }

    let ArmedEntry { fired, cancel } = clock.arm(duration);
    let (sink, receiver) = TimeReceiver::channel();
    let (stop, stopped) = oneshot::channel::<()>();

    let clock = clock.clone();
    tokio::spawn(async move {
        tokio::select! {
            delivered = fired => {
                if let Some(now) = delivered {
                    let _ = sink.send(now);
                }
            }
            _ = stopped => {
                let _ = cancel();
                let _ = sink.send(clock.now());
            }
        }
    });

    Timer::from_parts(receiver, Some(stop), rearm)
}

/// Arms a timer over the host clock's Tokio sleep.
pub(crate) fn host_timer(duration: SignedDuration) -> Timer {
    let rearm: Rearm = Arc::new(host_timer);

    if !duration.is_positive() {
        return Timer::already_fired(Timestamp::now(), rearm);
    }

    let (sink, receiver) = TimeReceiver::channel();
    let (stop, stopped) = oneshot::channel::<()>();
    let delay = duration.unsigned_abs();

    tokio::spawn(async move {
        tokio::select! {
            () = tokio::time::sleep(delay) => {
                let _ = sink.send(Timestamp::now());
            }
            _ = stopped => {
                let _ = sink.send(Timestamp::now());
            }
        }
    });

    Timer::from_parts(receiver, Some(stop), rearm)
}
