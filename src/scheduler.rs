//! Deferred events on a virtual clock.
//!
//! Time only moves when the owner says so, which keeps timed transitions
//! deterministic. A timer can be cancelled at any point before it fires.

use std::collections::BTreeMap;
use std::time::Duration;

/// A handle to a scheduled event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone)]
pub struct Scheduler<E> {
    now: Duration,
    last_id: u64,
    pending: BTreeMap<(Duration, TimerId), E>,
}

impl<E> Scheduler<E> {
    pub fn new() -> Scheduler<E> {
        Scheduler {
            now: Duration::from_millis(0),
            last_id: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Time elapsed since the scheduler was created.
    pub fn now(&self) -> Duration {
        self.now
    }

    /// Arrange for `event` to fire once `after` has elapsed.
    pub fn schedule(&mut self, after: Duration, event: E) -> TimerId {
        self.last_id += 1;
        let id = TimerId(self.last_id);
        let deadline = self.now + after;

        trace!("Scheduling timer {:?} for {:?}", id, deadline);
        self.pending.insert((deadline, id), event);

        id
    }

    /// Cancel a timer, returning its event if it hadn't fired yet.
    pub fn cancel(&mut self, id: TimerId) -> Option<E> {
        let key = self.pending.keys().find(|&&(_, other)| other == id).cloned()?;

        trace!("Cancelling timer {:?}", id);
        self.pending.remove(&key)
    }

    pub fn deadline(&self, id: TimerId) -> Option<Duration> {
        self.pending
            .keys()
            .find(|&&(_, other)| other == id)
            .map(|&(deadline, _)| deadline)
    }

    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.keys().next().map(|&(deadline, _)| deadline)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pop the earliest timer due at or before `until`, moving the clock to
    /// its deadline.
    ///
    /// Timers with the same deadline fire in the order they were scheduled.
    pub fn pop_due(&mut self, until: Duration) -> Option<(TimerId, E)> {
        let key = *self.pending.keys().next()?;

        if key.0 > until {
            return None;
        }

        let event = self.pending.remove(&key)?;
        if key.0 > self.now {
            self.now = key.0;
        }

        Some((key.1, event))
    }

    /// Move the clock forward without firing anything. The clock never goes
    /// backwards.
    pub fn advance_to(&mut self, until: Duration) {
        if until > self.now {
            self.now = until;
        }
    }
}

impl<E> Default for Scheduler<E> {
    fn default() -> Scheduler<E> {
        Scheduler::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn drain(sched: &mut Scheduler<&'static str>, until: Duration) -> Vec<&'static str> {
        let mut fired = Vec::new();
        while let Some((_, ev)) = sched.pop_due(until) {
            fired.push(ev);
        }
        sched.advance_to(until);
        fired
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let mut sched = Scheduler::new();
        sched.schedule(ms(300), "late");
        sched.schedule(ms(100), "early");
        sched.schedule(ms(100), "early, but second");

        assert_eq!(drain(&mut sched, ms(99)), Vec::<&str>::new());
        assert_eq!(
            drain(&mut sched, ms(100)),
            vec!["early", "early, but second"]
        );
        assert_eq!(sched.now(), ms(100));
        assert_eq!(drain(&mut sched, ms(1000)), vec!["late"]);
        assert!(sched.is_empty());
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut sched = Scheduler::new();
        let first = sched.schedule(ms(50), "first");
        sched.schedule(ms(60), "second");

        assert_eq!(sched.cancel(first), Some("first"));
        assert_eq!(sched.cancel(first), None);
        assert_eq!(drain(&mut sched, ms(100)), vec!["second"]);
    }

    #[test]
    fn deadlines_are_relative_to_now() {
        let mut sched = Scheduler::new();
        sched.advance_to(ms(1000));
        let id = sched.schedule(ms(500), "x");

        assert_eq!(sched.deadline(id), Some(ms(1500)));
        assert_eq!(sched.next_deadline(), Some(ms(1500)));

        sched.advance_to(ms(10));
        assert_eq!(sched.now(), ms(1000), "the clock never goes backwards");
    }
}
