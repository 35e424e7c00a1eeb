// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::mem;

use jiff::{SignedDuration, Timestamp};
use tokio::sync::oneshot;

/// Delivery channel for a single firing timestamp.
///
/// Capacity one; sending never blocks and happens at most once per entry.
pub(crate) type TimeSink = oneshot::Sender<Timestamp>;

/// Identifies a pending entry. Doubles as the cancellation handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EntryKey {
    deadline: Timestamp,

    /// Distinguishes entries sharing a deadline; assigned in insertion order.
    id: u64,
}

impl EntryKey {
    const fn new(deadline: Timestamp, id: u64) -> Self {
        Self { deadline, id }
    }

    /// The virtual time at which the entry is due.
    pub(crate) const fn deadline(&self) -> Timestamp {
        self.deadline
    }
}

/// A queue of pending deadlines, ordered by `(deadline, insertion id)`.
///
/// Not thread-safe: the owning clock serialises access under its writer
/// lock. Cancellation handles handed out to other threads must go through
/// that lock before touching the queue.
#[derive(Debug, Default)]
pub(crate) struct TimeQueue {
    entries: BTreeMap<EntryKey, TimeSink>,

    /// Ids increase monotonically and are never reused.
    last_id: u64,
}

impl TimeQueue {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts a new entry due at `deadline` and returns its key.
    ///
    /// Entries with equal deadlines pop in insertion order.
    pub fn add(&mut self, deadline: Timestamp, sink: TimeSink) -> EntryKey {
        self.last_id += 1;
        let key = EntryKey::new(deadline, self.last_id);
        self.entries.insert(key, sink);

        key
    }

    /// Removes a pending entry, dropping its sink undelivered.
    ///
    /// Returns `true` iff the entry was still pending. Repeated cancellation,
    /// or cancellation of an entry that a pop already removed, is a no-op
    /// returning `false`.
    pub fn cancel(&mut self, key: EntryKey) -> bool {
        self.entries.remove(&key).is_some()
    }

    /// Returns the earliest pending deadline without removing it.
    pub fn peek(&self) -> Option<Timestamp> {
        self.entries.keys().next().map(EntryKey::deadline)
    }

    /// Removes and returns every sink whose deadline is at or before `t`,
    /// in ascending `(deadline, insertion id)` order.
    pub fn pop_expired(&mut self, t: Timestamp) -> Vec<TimeSink> {
        // `split_off` keeps keys greater than or equal to the split point, so
        // split one nanosecond past `t` to also pop entries due exactly at
        // `t`. Past the end of the timestamp range everything is due.
        let pending = match t.checked_add(SignedDuration::from_nanos(1)) {
            Ok(bound) => self.entries.split_off(&EntryKey::new(bound, 0)),
            Err(_) => BTreeMap::new(),
        };

        let expired = mem::replace(&mut self.entries, pending);
        expired.into_values().collect()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> Timestamp {
        s.parse().unwrap()
    }

    fn sink() -> TimeSink {
        oneshot::channel().0
    }

    #[test]
    fn add_tracks_len() {
        for count in [0, 1, 100] {
            let mut queue = TimeQueue::default();
            for _ in 0..count {
                queue.add(Timestamp::UNIX_EPOCH, sink());
            }

            assert_eq!(queue.len(), count);
            assert_eq!(queue.is_empty(), count == 0);
        }
    }

    #[test]
    fn same_deadline_distinct_keys() {
        let mut queue = TimeQueue::default();
        let when = ts("2020-01-01T00:00:00Z");

        let key1 = queue.add(when, sink());
        let key2 = queue.add(when, sink());

        assert_ne!(key1, key2);
        assert_eq!(key1.deadline(), key2.deadline());
    }

    #[test]
    fn pop_expired_empty() {
        let mut queue = TimeQueue::default();
        assert!(queue.pop_expired(ts("2020-01-01T00:00:00Z")).is_empty());
    }

    #[test]
    fn pop_expired_newer_entry_stays() {
        let mut queue = TimeQueue::default();
        queue.add(ts("2020-02-01T00:00:00Z"), sink());

        let popped = queue.pop_expired(ts("2020-01-01T00:00:00Z"));

        assert!(popped.is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pop_expired_includes_exact_deadline() {
        let mut queue = TimeQueue::default();
        queue.add(ts("2020-01-01T00:00:00Z"), sink());

        let popped = queue.pop_expired(ts("2020-01-01T00:00:00Z"));

        assert_eq!(popped.len(), 1);
        assert!(queue.is_empty());
    }

    #[test]
    fn pop_expired_excludes_one_nanosecond_later() {
        let mut queue = TimeQueue::default();
        queue.add(ts("2020-01-01T00:00:00.000000001Z"), sink());

        let popped = queue.pop_expired(ts("2020-01-01T00:00:00Z"));

        assert!(popped.is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pop_expired_bulk() {
        let mut queue = TimeQueue::default();
        for day in 1..=6 {
            queue.add(ts(&format!("2020-01-0{day}T00:00:00Z")), sink());
        }

        let popped = queue.pop_expired(ts("2020-01-03T12:00:00Z"));

        assert_eq!(popped.len(), 3);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.peek(), Some(ts("2020-01-04T00:00:00Z")));
    }

    #[test]
    fn pop_expired_ascending_order() {
        // Deliver a distinct marker to each popped sink; every receiver must
        // observe the marker matching its deadline's rank.
        let mut queue = TimeQueue::default();
        let mut receivers = Vec::new();
        for day in [3, 1, 6, 2, 5, 4] {
            let (tx, rx) = oneshot::channel();
            queue.add(ts(&format!("2020-01-0{day}T00:00:00Z")), tx);
            receivers.push((day, rx));
        }

        let popped = queue.pop_expired(ts("2020-01-07T00:00:00Z"));
        for (index, sink) in popped.into_iter().enumerate() {
            let marker = ts(&format!("2021-01-0{}T00:00:00Z", index + 1));
            sink.send(marker).unwrap();
        }

        for (day, rx) in &mut receivers {
            let marker = rx.try_recv().unwrap();
            assert_eq!(marker, ts(&format!("2021-01-0{day}T00:00:00Z")));
        }
    }

    #[test]
    fn pop_expired_ties_in_insertion_order() {
        let mut queue = TimeQueue::default();
        let when = ts("2020-01-01T00:00:00Z");

        let (tx1, mut rx1) = oneshot::channel();
        let (tx2, mut rx2) = oneshot::channel();
        queue.add(when, tx1);
        queue.add(when, tx2);

        let popped = queue.pop_expired(when);
        assert_eq!(popped.len(), 2);

        let first = ts("2021-01-01T00:00:00Z");
        let second = ts("2022-01-01T00:00:00Z");
        let mut markers = [first, second].into_iter();
        for sink in popped {
            sink.send(markers.next().unwrap()).unwrap();
        }

        assert_eq!(rx1.try_recv().unwrap(), first);
        assert_eq!(rx2.try_recv().unwrap(), second);
    }

    #[test]
    fn pop_expired_at_range_end_takes_everything() {
        let mut queue = TimeQueue::default();
        queue.add(Timestamp::MAX, sink());
        queue.add(Timestamp::UNIX_EPOCH, sink());

        let popped = queue.pop_expired(Timestamp::MAX);

        assert_eq!(popped.len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn peek_returns_minimum() {
        let mut queue = TimeQueue::default();
        assert_eq!(queue.peek(), None);

        let days = [17, 3, 29, 11, 5, 23, 2, 19];
        for day in days {
            queue.add(ts(&format!("2021-01-{day:02}T00:00:00Z")), sink());
        }

        assert_eq!(queue.peek(), Some(ts("2021-01-02T00:00:00Z")));
        assert_eq!(queue.len(), days.len());
    }

    #[test]
    fn cancel_pending_entry() {
        let mut queue = TimeQueue::default();
        let key = queue.add(ts("2020-01-01T00:00:00Z"), sink());

        assert!(queue.cancel(key));
        assert!(queue.is_empty());
        assert!(queue.pop_expired(ts("2020-02-01T00:00:00Z")).is_empty());
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut queue = TimeQueue::default();
        let key = queue.add(ts("2020-01-01T00:00:00Z"), sink());

        assert!(queue.cancel(key));
        assert!(!queue.cancel(key));
    }

    #[test]
    fn cancel_after_pop_is_noop() {
        let mut queue = TimeQueue::default();
        let key = queue.add(ts("2020-01-01T00:00:00Z"), sink());

        let popped = queue.pop_expired(ts("2020-01-01T00:00:00Z"));
        assert_eq!(popped.len(), 1);

        assert!(!queue.cancel(key));
    }

    #[test]
    fn cancel_leaves_other_entries() {
        let mut queue = TimeQueue::default();
        let first = queue.add(ts("2020-01-01T00:00:00Z"), sink());
        let _second = queue.add(ts("2020-01-02T00:00:00Z"), sink());

        assert!(queue.cancel(first));

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.peek(), Some(ts("2020-01-02T00:00:00Z")));
    }
}
