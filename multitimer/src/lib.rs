//! A deadline multiplexer.
//!
//! `Multitimer` lets a single loop juggle more than one independent cadence
//! (e.g. a 100 Hz strict deadline plus a once-a-minute background task)
//! without scattering `Instant` bookkeeping across the loop body. The
//! independent timers correspond to variants of an enum type, to make it easy
//! to tell them apart.
//!
//! Usage model:
//!
//! - Declare an `enum` naming your timers and derive `Enum` for it (from the
//!   `enum_map` crate).
//! - Create a `Multitimer<YourEnum>`.
//! - Arm timers with [`Multitimer::set_timer`].
//! - Each time around the loop, call [`Multitimer::poll_now`] and then drain
//!   [`Multitimer::iter_fired`] to find out which timers are due.
//! - [`Multitimer::next_deadline`] tells you how long the loop can sleep
//!   before anything is due again.
//!
//! This is a straightforward adaptation of a notification-driven timer
//! multiplexer to `std::time::Instant`-based polling: there is no OS
//! notification to wait on here, so `poll_now` replaces
//! `handle_notification`.

use std::time::{Duration, Instant};

use enum_map::{EnumArray, EnumMap};

pub struct Multitimer<E: EnumArray<Timer>> {
    timers: EnumMap<E, Timer>,
}

impl<E: EnumArray<Timer> + Copy> Multitimer<E> {
    pub fn new() -> Self {
        Self {
            timers: EnumMap::default(),
        }
    }

    /// Arms `which` to fire at `deadline`, optionally repeating afterward.
    /// Replaces any prior setting for this timer.
    pub fn set_timer(&mut self, which: E, deadline: Instant, repeat: Option<Repeat>) {
        let fired_but_not_observed = self.timers[which].fired_but_not_observed;
        self.timers[which] = Timer {
            deadline: Some((deadline, repeat)),
            fired_but_not_observed,
        };
    }

    /// Arms `which` to fire `delay` from now, optionally repeating.
    pub fn set_timer_in(&mut self, which: E, delay: Duration, repeat: Option<Repeat>) {
        self.set_timer(which, Instant::now() + delay, repeat);
    }

    pub fn get_timer(&self, which: E) -> Option<(Instant, Option<Repeat>)> {
        self.timers[which].deadline
    }

    pub fn clear_timer(&mut self, which: E) -> bool {
        self.timers[which].deadline.take().is_some()
    }

    /// Checks all timers against the current time, marking any that have
    /// elapsed as fired (and rearming repeaters). Call this once per pass
    /// through the driving loop.
    pub fn poll_now(&mut self) {
        let now = Instant::now();
        for timer in self.timers.values_mut() {
            if let Some((d, r)) = timer.deadline {
                if d <= now {
                    timer.deadline = r.map(|kind| {
                        let next = match kind {
                            Repeat::AfterWake(period) => now + period,
                            Repeat::AfterDeadline(period) => d + period,
                        };
                        (next, Some(kind))
                    });
                    timer.fired_but_not_observed = true;
                }
            }
        }
    }

    /// Drains the set of timers that have fired since the last call. A timer
    /// that fired more than once between calls is reported once.
    pub fn iter_fired(&mut self) -> impl Iterator<Item = E> + '_ {
        self.timers.iter_mut().filter_map(move |(e, timer)| {
            std::mem::replace(&mut timer.fired_but_not_observed, false).then_some(e)
        })
    }

    /// The soonest armed deadline across all timers, or `None` if nothing is
    /// armed. Useful for computing how long a loop can safely sleep.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers
            .values()
            .filter_map(|timer| timer.deadline)
            .map(|(dl, _)| dl)
            .min()
    }
}

impl<E: EnumArray<Timer> + Copy> Default for Multitimer<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Default)]
pub struct Timer {
    deadline: Option<(Instant, Option<Repeat>)>,
    fired_but_not_observed: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Repeat {
    /// Re-arm the timer `period` after the moment it was observed to fire.
    AfterWake(Duration),
    /// Re-arm the timer `period` after its own deadline, so a slow consumer
    /// doesn't drift the cadence forward.
    AfterDeadline(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use enum_map::Enum;
    use std::thread::sleep;

    #[derive(Copy, Clone, Debug, Eq, PartialEq, Enum)]
    enum Timers {
        A,
        B,
    }

    #[test]
    fn nothing_fired_initially() {
        let mut uut: Multitimer<Timers> = Multitimer::new();
        uut.poll_now();
        assert!(uut.iter_fired().next().is_none());
        assert_eq!(uut.next_deadline(), None);
    }

    #[test]
    fn earliest_deadline_reported() {
        let mut uut: Multitimer<Timers> = Multitimer::new();
        let far = Instant::now() + Duration::from_secs(10);
        let near = Instant::now() + Duration::from_millis(1);
        uut.set_timer(Timers::A, far, None);
        uut.set_timer(Timers::B, near, None);
        assert_eq!(uut.next_deadline(), Some(near));
    }

    #[test]
    fn fires_after_deadline_elapses() {
        let mut uut: Multitimer<Timers> = Multitimer::new();
        uut.set_timer_in(Timers::A, Duration::from_millis(5), None);
        sleep(Duration::from_millis(15));
        uut.poll_now();
        assert_eq!(uut.iter_fired().collect::<Vec<_>>(), [Timers::A]);
        // Once observed, it should not fire again (not a repeater).
        uut.poll_now();
        assert_eq!(uut.iter_fired().next(), None);
    }

    #[test]
    fn repeat_after_deadline_does_not_drift() {
        let mut uut: Multitimer<Timers> = Multitimer::new();
        let start = Instant::now();
        uut.set_timer(
            Timers::A,
            start + Duration::from_millis(5),
            Some(Repeat::AfterDeadline(Duration::from_millis(5))),
        );
        sleep(Duration::from_millis(12));
        uut.poll_now();
        assert_eq!(uut.iter_fired().collect::<Vec<_>>(), [Timers::A]);
        let (next, _) = uut.get_timer(Timers::A).unwrap();
        // Anchored to the prior deadline, not to "now".
        assert_eq!(next, start + Duration::from_millis(10));
    }

    #[test]
    fn clear_timer_disarms() {
        let mut uut: Multitimer<Timers> = Multitimer::new();
        uut.set_timer_in(Timers::A, Duration::from_millis(1), None);
        assert!(uut.clear_timer(Timers::A));
        sleep(Duration::from_millis(5));
        uut.poll_now();
        assert_eq!(uut.iter_fired().next(), None);
    }
}
