// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Virtual-time clocks for simulations and tests.
//!
//! # Why?
//!
//! Code that reads the wall clock is slow and flaky to test: a thirty-second
//! timeout costs thirty seconds per run, and assertions about elapsed time
//! race the host scheduler. This crate abstracts "now", deadlines, sleeping,
//! and one-shot timers behind a single [`Clock`] trait so production code
//! runs on the host clock while tests and simulations substitute a clock
//! they control.
//!
//! # Overview
//!
//! - [`Clock`] - The capability set: query `now`, measure `since`, await a
//!   deadline with `after`, arm a [`Timer`]. [`ClockExt`] adds `sleep`.
//! - [`RealClock`] - Pass-through to the host's wall clock.
//! - [`SettableClock`] - A clock whose "now" moves only when told to, via
//!   `set_now` and `add`. Deadlines the move crosses are delivered before the
//!   mutator returns.
//! - [`WarpingClock`] - A clock that advances continuously at a configurable
//!   multiple of a backing clock. The warp ratio can be changed while
//!   deadlines are pending; a single backing timer is rescheduled to match.
//! - [`Timer`] - A one-shot timer that can be stopped and re-armed.
//! - [`TimeReceiver`] - The one-shot future a deadline resolves through.
//! - [`Error`] - The error raised for invalid warp ratios. Introspection is
//!   limited.
//!
//! Absolute time is [`jiff::Timestamp`] and durations are
//! [`jiff::SignedDuration`], re-exported here; both are signed, so clocks can
//! sit before the Unix epoch and `since` can be negative.
//!
//! The settable and warping clocks deliver deadlines through Tokio tasks and
//! channels, so they must be used within a Tokio runtime.
//!
//! # Examples
//!
//! ## Drive a deadline from a test
//!
//! ```
//! use tempo::{Clock, SettableClock, SignedDuration, Timestamp};
//!
//! # async fn drive_deadline() {
//! let clock = SettableClock::new();
//! clock.set_now("2020-01-01T00:00:00Z".parse::<Timestamp>().unwrap());
//!
//! let pending = clock.after(SignedDuration::from_secs(1));
//!
//! // Nothing fires until the clock is moved.
//! clock.set_now("2020-01-01T00:00:01Z".parse::<Timestamp>().unwrap());
//!
//! assert_eq!(
//!     pending.await.unwrap(),
//!     "2020-01-01T00:00:01Z".parse::<Timestamp>().unwrap(),
//! );
//! # }
//! ```
//!
//! ## Run a simulation at sixty times real time
//!
//! ```
//! use tempo::{Clock, ClockExt, SignedDuration, WarpingClock};
//!
//! # async fn simulate() -> tempo::Result<()> {
//! let clock = WarpingClock::new();
//! clock.set_warp_speed(60.0)?;
//!
//! // One simulated minute: roughly one second of real time.
//! clock.sleep(SignedDuration::from_mins(1)).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Testing
//!
//! Take a `Clock` (generically or as `Arc<dyn Clock>`) wherever code needs
//! time, hand it a [`RealClock`] in production, and a [`SettableClock`] in
//! tests. The settable clock's [`timer_added`][SettableClock::timer_added]
//! signal lets a test wait until the code under test has armed a deadline
//! before moving the clock; the signal is lossy and exists only for test
//! synchronisation.

mod clock;
mod error;
mod queue;
mod real;
mod settable;
mod timer;
mod warp;

pub use clock::{Clock, ClockExt, TimeReceiver};
pub use error::{Error, Result};
pub use real::RealClock;
pub use settable::SettableClock;
pub use timer::Timer;
pub use warp::WarpingClock;

pub use jiff::{SignedDuration, Timestamp};
