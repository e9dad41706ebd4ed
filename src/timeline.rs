//! Session time and cancelable timer groups.
//!
//! Everything that waits in manpa (line reveals, countdown ticks, auto-advance,
//! burst steps) is a task parked in a [`TaskGroup`] and fired by an explicit
//! `advance(now)` from the host loop. Cancelling a group drops every pending
//! task at once, so nothing can fire against state that has moved on.

use std::time::Instant;

/// Milliseconds since the session epoch
pub type Millis = u64;

/// Source of session time
pub trait Clock {
    /// Current session time
    fn now(&self) -> Millis;
}

/// Wall clock anchored at construction
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Convert a captured instant into session time (instants before the epoch clamp to 0)
    pub fn millis_at(&self, at: Instant) -> Millis {
        at.saturating_duration_since(self.epoch).as_millis() as Millis
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        self.millis_at(Instant::now())
    }
}

/// Hand-driven clock for deterministic tests
#[cfg(test)]
#[derive(Default)]
pub struct ManualClock {
    now: std::cell::Cell<Millis>,
}

#[cfg(test)]
impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, at: Millis) {
        self.now.set(at);
    }

    pub fn advance(&self, by: std::time::Duration) {
        self.now.set(self.now.get() + by.as_millis() as Millis);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Millis {
        self.now.get()
    }
}

/// A pending task with its due time
struct Pending<T> {
    due: Millis,
    seq: u64,
    task: T,
}

/// Group of scheduled tasks that is cancelled as a unit.
///
/// Tasks fire earliest first; tasks with equal due times fire in the order they
/// were scheduled.
pub struct TaskGroup<T> {
    pending: Vec<Pending<T>>,
    next_seq: u64,
}

impl<T> Default for TaskGroup<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskGroup<T> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            next_seq: 0,
        }
    }

    /// Park a task until `due`
    pub fn schedule(&mut self, due: Millis, task: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.push(Pending { due, seq, task });
    }

    /// Drop every pending task
    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    /// Remove and return the earliest task due at or before `now`
    pub fn pop_due(&mut self, now: Millis) -> Option<(Millis, T)> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= now)
            .min_by_key(|(_, p)| (p.due, p.seq))
            .map(|(i, _)| i)?;
        let p = self.pending.swap_remove(idx);
        Some((p.due, p.task))
    }

    /// Due time of the next pending task
    #[cfg(test)]
    pub fn next_due(&self) -> Option<Millis> {
        self.pending.iter().map(|p| p.due).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pop_due_respects_time_and_order() {
        let mut group = TaskGroup::new();
        group.schedule(300, "c");
        group.schedule(100, "a");
        group.schedule(100, "b");

        assert_eq!(group.pop_due(50), None);
        assert_eq!(group.pop_due(100), Some((100, "a")));
        assert_eq!(group.pop_due(100), Some((100, "b")));
        assert_eq!(group.pop_due(299), None);
        assert_eq!(group.pop_due(1_000), Some((300, "c")));
        assert!(group.is_empty());
    }

    #[test]
    fn cancel_all_drops_everything() {
        let mut group = TaskGroup::new();
        group.schedule(10, 1);
        group.schedule(20, 2);
        assert_eq!(group.len(), 2);
        assert_eq!(group.next_due(), Some(10));

        group.cancel_all();
        assert!(group.is_empty());
        assert_eq!(group.pop_due(u64::MAX), None);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now(), 0);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.now(), 1500);
        clock.set(42);
        assert_eq!(clock.now(), 42);
    }

    #[test]
    fn system_clock_clamps_earlier_instants() {
        let before = Instant::now();
        let clock = SystemClock::new();
        assert_eq!(clock.millis_at(before), 0);
    }
}
