use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-context version counter used to drop stale edits.
///
/// The counter never decreases: `increment` and `is_older_with_set` both move
/// it forward only.
#[derive(Debug, Default)]
pub struct TaskClock {
    count: AtomicU64,
}

/// Immutable copy of a clock, handed to listeners and carried by editors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClockSnapshot(pub u64);

impl TaskClock {
    pub fn new(count: u64) -> Self {
        Self { count: AtomicU64::new(count) }
    }
    pub fn snapshot(&self) -> ClockSnapshot {
        ClockSnapshot(self.count.load(Ordering::SeqCst))
    }
    pub fn is_older_than(&self, other: ClockSnapshot) -> bool {
        self.snapshot() < other
    }
    /// Bumps the clock and returns the new value.
    pub fn increment(&self) -> ClockSnapshot {
        ClockSnapshot(self.count.fetch_add(1, Ordering::SeqCst) + 1)
    }
    /// If this clock is older than `other`, moves it to `other` and returns true.
    /// The compare and the set are one atomic step.
    pub fn is_older_with_set(&self, other: ClockSnapshot) -> bool {
        let mut current = self.count.load(Ordering::SeqCst);
        loop {
            if current >= other.0 {
                return false;
            }
            match self.count.compare_exchange(current, other.0, Ordering::SeqCst, Ordering::SeqCst) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }
}

impl ClockSnapshot {
    pub fn value(&self) -> u64 {
        self.0
    }
    /// Editors bump their own view clock before each submitted edit.
    pub fn next(&self) -> ClockSnapshot {
        ClockSnapshot(self.0 + 1)
    }
}

impl fmt::Display for ClockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_with_set_moves_forward_only() {
        let clock = TaskClock::new(3);
        assert!(!clock.is_older_with_set(ClockSnapshot(2)));
        assert!(!clock.is_older_with_set(ClockSnapshot(3)));
        assert_eq!(clock.snapshot(), ClockSnapshot(3));
        assert!(clock.is_older_with_set(ClockSnapshot(7)));
        assert_eq!(clock.snapshot(), ClockSnapshot(7));
    }

    #[test]
    fn increment_returns_new_value() {
        let clock = TaskClock::default();
        assert_eq!(clock.increment(), ClockSnapshot(1));
        assert_eq!(clock.increment(), ClockSnapshot(2));
        assert!(clock.is_older_than(ClockSnapshot(3)));
        assert!(!clock.is_older_than(ClockSnapshot(2)));
    }
}
