// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use jiff::{SignedDuration, Timestamp};
use tokio::sync::oneshot;
use tracing::trace;

use crate::clock::{Clock, TimeReceiver};
use crate::error::{Error, Result};
use crate::queue::TimeQueue;
use crate::real::RealClock;
use crate::timer::{self, ArmedEntry, EntryClock, Timer};

/// A clock that advances continuously at a configurable multiple of a
/// backing clock.
///
/// Simulated time is a linear transform of the backing clock: a warp ratio
/// of 60 turns one backing second into one simulated minute. The ratio can
/// be changed while deadlines are pending; they keep their simulated trigger
/// times and the single backing wake-up is rescheduled under the new ratio.
/// [`set_now`][Self::set_now] and [`add`][Self::add] jump simulated time
/// instantaneously.
///
/// The backing clock is usually the host's [`RealClock`], but anything
/// implementing [`Clock`] works; backing the warp with a
/// [`SettableClock`][crate::SettableClock] gives fully deterministic tests.
///
/// Deadlines are serviced by a spawned waiter holding a single backing
/// timer, so the clock must be created and used within a Tokio runtime.
///
/// # Examples
///
/// ```
/// use tempo::{Clock, ClockExt, SignedDuration, WarpingClock};
///
/// # async fn warp_example() -> tempo::Result<()> {
/// let clock = WarpingClock::new();
/// clock.set_warp_speed(60.0)?;
///
/// // One simulated minute: roughly one second of real time.
/// clock.sleep(SignedDuration::from_mins(1)).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct WarpingClock {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    backing: Arc<dyn Clock>,
    state: RwLock<State>,
}

#[derive(Debug)]
struct State {
    /// Simulated time at which the current linear segment starts.
    origin_sim: Timestamp,

    /// Backing time at which the current linear segment starts.
    origin_backing: Timestamp,

    /// Residual offset applied after the warp transform; accumulates the
    /// instantaneous jumps made by `set_now` and `add`.
    drift: SignedDuration,

    /// Positive finite multiplier from backing elapsed to simulated elapsed.
    ratio: f64,

    /// Pending deadlines, in simulated coordinates.
    timers: TimeQueue,

    /// Cancellation guard for the single outstanding backing timer.
    /// Dropping it releases the waiter and stops the backing timer.
    pending_wake: Option<oneshot::Sender<()>>,
}

impl WarpingClock {
    /// Creates a warping clock over the host's real clock, at ratio 1.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backing(Arc::new(RealClock::new()))
    }

    /// Creates a warping clock over an arbitrary backing clock, at ratio 1.
    ///
    /// The simulated origin is the backing clock's "now" at construction.
    #[must_use]
    pub fn with_backing(backing: Arc<dyn Clock>) -> Self {
        let origin = backing.now();
        Self {
            inner: Arc::new(Inner {
                backing,
                state: RwLock::new(State {
                    origin_sim: origin,
                    origin_backing: origin,
                    drift: SignedDuration::ZERO,
                    ratio: 1.0,
                    timers: TimeQueue::default(),
                    pending_wake: None,
                }),
            }),
        }
    }

    /// Changes how fast simulated time passes relative to the backing clock.
    ///
    /// A ratio above 1 runs the clock faster than the backing clock, below 1
    /// slower. Rejects zero, negative, NaN, and infinite ratios, leaving the
    /// clock untouched. Pending deadlines keep their simulated trigger
    /// times; the backing wake-up is rescheduled under the new ratio.
    pub fn set_warp_speed(&self, ratio: f64) -> Result<()> {
        if !ratio.is_finite() || ratio <= 0.0 {
            return Err(Error::invalid_ratio(ratio));
        }

        let mut state = self.inner.write();
        let backing_now = self.inner.backing.now();
        let now = state.now_sim(backing_now);

        // Start a fresh linear segment at the current simulated instant so
        // the ratio change has no instantaneous effect on "now".
        state.origin_sim = now;
        state.origin_backing = backing_now;
        state.drift = SignedDuration::ZERO;
        state.ratio = ratio;
        trace!(%now, ratio, "warp ratio changed");

        if let Some(head) = state.timers.peek() {
            Inner::rearm(&self.inner, &mut state, head.duration_since(now));
        }

        Ok(())
    }

    /// Sets simulated "now" to `t` and returns the previous simulated "now".
    ///
    /// Pending deadlines are not drained inline: the backing wake-up is
    /// rescheduled, and a jump at or past the earliest deadline makes it
    /// fire immediately.
    pub fn set_now(&self, t: Timestamp) -> Timestamp {
        let mut state = self.inner.write();
        let backing_now = self.inner.backing.now();
        let old = state.now_sim(backing_now);

        state.drift = state.drift.saturating_add(t.duration_since(old));

        if let Some(head) = state.timers.peek() {
            Inner::rearm(&self.inner, &mut state, head.duration_since(t));
        }

        old
    }

    /// Shifts simulated "now" by `d`, which may be negative, and returns the
    /// previous simulated "now".
    pub fn add(&self, d: SignedDuration) -> Timestamp {
        let mut state = self.inner.write();
        let backing_now = self.inner.backing.now();
        let old = state.now_sim(backing_now);
        let target = old.saturating_add(d).expect("saturating add does not overflow");

        state.drift = state.drift.saturating_add(d);

        if let Some(head) = state.timers.peek() {
            Inner::rearm(&self.inner, &mut state, head.duration_since(target));
        }

        old
    }

    #[cfg(test)]
    pub(crate) fn timers_len(&self) -> usize {
        self.inner.read().timers.len()
    }
}

impl Default for WarpingClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for WarpingClock {
    fn now(&self) -> Timestamp {
        let state = self.inner.read();
        state.now_sim(self.inner.backing.now())
    }

    fn after(&self, duration: SignedDuration) -> TimeReceiver {
        if !duration.is_positive() {
            return TimeReceiver::ready(self.now());
        }

        self.arm(duration).fired
    }

    fn timer(&self, duration: SignedDuration) -> Timer {
        timer::entry_timer(self, duration)
    }
}

impl EntryClock for WarpingClock {
    fn arm(&self, duration: SignedDuration) -> ArmedEntry {
        let mut state = self.inner.write();
        let backing_now = self.inner.backing.now();
        let now = state.now_sim(backing_now);
        let deadline = now.saturating_add(duration).expect("saturating add does not overflow");

        let head = state.timers.peek();
        let (sink, fired) = TimeReceiver::channel();
        let key = state.timers.add(deadline, sink);

        // Only a new head requires waking earlier than already scheduled.
        if head.is_none_or(|head| deadline < head) {
            Inner::rearm(&self.inner, &mut state, duration);
        }
        drop(state);

        let inner = Arc::clone(&self.inner);
        ArmedEntry {
            fired,
            cancel: Box::new(move || {
                let mut state = inner.write();
                let cancelled = state.timers.cancel(key);
                if cancelled && state.timers.is_empty() {
                    state.pending_wake = None;
                }
                cancelled
            }),
        }
    }
}

impl Inner {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().expect("clock lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().expect("clock lock poisoned")
    }

    /// Replaces the outstanding backing timer with one firing `delay_sim`
    /// (simulated units) from now. Must be called with the state lock held.
    ///
    /// The previous waiter is released by dropping its guard; it stops its
    /// backing timer and exits. A non-positive delay arms an already-fired
    /// backing timer, so the waiter drains immediately.
    #[cfg_attr(test, mutants::skip)] // Mutations stall the waiter and time out.
    fn rearm(inner: &Arc<Self>, state: &mut State, delay_sim: SignedDuration) {
        let delay_backing = state.from_sim(delay_sim);
        trace!(?delay_sim, ?delay_backing, "arming backing timer");

        let (guard, released) = oneshot::channel::<()>();
        state.pending_wake = Some(guard);

        let mut wake = inner.backing.timer(delay_backing);
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            tokio::select! {
                fired = wake.channel() => {
                    if fired.is_some() {
                        if let Some(inner) = weak.upgrade() {
                            Self::on_wake(&inner);
                        }
                    }
                }
                _ = released => {
                    let _ = wake.stop();
                }
            }
        });
    }

    /// Backing-timer expiry: drain everything due, then re-arm for the next
    /// head or clear the wake-up.
    #[cfg_attr(test, mutants::skip)] // Mutations stall the waiter and time out.
    fn on_wake(inner: &Arc<Self>) {
        let mut state = inner.write();
        let backing_now = inner.backing.now();
        let now = state.now_sim(backing_now);

        let expired = state.timers.pop_expired(now);
        if !expired.is_empty() {
            trace!(%now, fired = expired.len(), "delivering expired deadlines");
        }
        for sink in expired {
            // The receiver may be gone; delivery is best-effort.
            let _ = sink.send(now);
        }

        match state.timers.peek() {
            Some(head) => Self::rearm(inner, &mut state, head.duration_since(now)),
            None => state.pending_wake = None,
        }
    }
}

impl State {
    /// Simulated "now" for the given backing reading.
    fn now_sim(&self, backing_now: Timestamp) -> Timestamp {
        let elapsed = backing_now.duration_since(self.origin_backing);
        self.origin_sim
            .saturating_add(self.to_sim(elapsed))
            .expect("saturating add does not overflow")
            .saturating_add(self.drift)
            .expect("saturating add does not overflow")
    }

    /// Converts a backing interval into simulated units.
    fn to_sim(&self, d: SignedDuration) -> SignedDuration {
        SignedDuration::from_nanos((d.as_nanos() as f64 * self.ratio) as i64)
    }

    /// Converts a simulated interval into backing units.
    fn from_sim(&self, d: SignedDuration) -> SignedDuration {
        SignedDuration::from_nanos((d.as_nanos() as f64 / self.ratio) as i64)
    }
}
