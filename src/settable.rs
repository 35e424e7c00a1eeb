// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use jiff::{SignedDuration, Timestamp};
use tokio::sync::Notify;
use tracing::trace;

use crate::clock::{Clock, TimeReceiver};
use crate::queue::TimeQueue;
use crate::timer::{self, ArmedEntry, EntryClock, Timer};

/// A clock whose "now" moves only when told to.
///
/// The clock starts at the Unix epoch. [`set_now`][Self::set_now] and
/// [`add`][Self::add] move it, delivering every deadline the move crosses
/// before returning. Nothing advances on its own, which makes time-dependent
/// code fully deterministic under test.
///
/// Moving the clock backwards is permitted; pending deadlines keep their
/// original trigger times and fire only when "now" later crosses them.
///
/// Clones share state: a deadline armed through one handle fires when
/// another handle moves the clock.
///
/// # Examples
///
/// ```
/// use tempo::{Clock, SettableClock, SignedDuration, Timestamp};
///
/// let clock = SettableClock::new();
/// assert_eq!(clock.now(), Timestamp::UNIX_EPOCH);
///
/// let old = clock.add(SignedDuration::from_secs(90));
/// assert_eq!(old, Timestamp::UNIX_EPOCH);
/// assert_eq!(clock.since(old), SignedDuration::from_secs(90));
/// ```
#[derive(Debug, Clone)]
pub struct SettableClock {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,

    /// Signalled (lossily) whenever a deadline is enqueued.
    timer_added: Notify,
}

#[derive(Debug)]
struct State {
    now: Timestamp,
    timers: TimeQueue,
}

impl SettableClock {
    /// Creates a settable clock initialised to the Unix epoch.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State {
                    now: Timestamp::UNIX_EPOCH,
                    timers: TimeQueue::default(),
                }),
                timer_added: Notify::new(),
            }),
        }
    }

    /// Sets the clock to `t` and returns the previous "now".
    ///
    /// Every pending deadline at or before `t` is delivered `t` before this
    /// returns, in ascending deadline order. The clock may be moved
    /// backwards; pending deadlines are not adjusted.
    pub fn set_now(&self, t: Timestamp) -> Timestamp {
        self.inner.write().advance_to(t)
    }

    /// Moves the clock by `d`, which may be negative, and returns the
    /// previous "now".
    ///
    /// Equivalent to `set_now(now() + d)` in a single atomic step. Saturates
    /// at the bounds of the representable timestamp range.
    pub fn add(&self, d: SignedDuration) -> Timestamp {
        let mut state = self.inner.write();
        let target = state.now.saturating_add(d).expect("saturating add does not overflow");
        state.advance_to(target)
    }

    /// Waits until at least one deadline has been enqueued since the last
    /// call.
    ///
    /// The signal is lossy: several insertions may coalesce into a single
    /// notification. It exists so tests can synchronise with a task that is
    /// about to block on this clock; correctness never depends on it.
    pub async fn timer_added(&self) {
        self.inner.timer_added.notified().await;
    }

    #[cfg(test)]
    pub(crate) fn timers_len(&self) -> usize {
        self.inner.read().timers.len()
    }
}

impl Default for SettableClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SettableClock {
    fn now(&self) -> Timestamp {
        self.inner.read().now
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

impl EntryClock for SettableClock {
    fn arm(&self, duration: SignedDuration) -> ArmedEntry {
        let mut state = self.inner.write();
        let deadline = state.now.saturating_add(duration).expect("saturating add does not overflow");
        let (sink, fired) = TimeReceiver::channel();
        let key = state.timers.add(deadline, sink);
        drop(state);

        self.inner.timer_added.notify_one();

        let inner = Arc::clone(&self.inner);
        ArmedEntry {
            fired,
            cancel: Box::new(move || inner.write().timers.cancel(key)),
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
}

impl State {
    /// Moves "now" to `t` and delivers every deadline the move crossed.
    fn advance_to(&mut self, t: Timestamp) -> Timestamp {
        let old = self.now;
        self.now = t;

        let expired = self.timers.pop_expired(t);
        if !expired.is_empty() {
            trace!(now = %t, fired = expired.len(), "delivering expired deadlines");
        }
        for sink in expired {
            // The receiver may be gone; delivery is best-effort.
            let _ = sink.send(t);
        }

        old
    }
}
