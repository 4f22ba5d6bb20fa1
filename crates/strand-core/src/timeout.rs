//! Cooperative timeout bookkeeping.
//!
//! The runtime never talks to a clock itself. The host supplies a sleep
//! primitive that sleeps for at most the requested duration and reports
//! how long actually elapsed; [`Timeouts::wait`] decrements every
//! pending entry by that amount and returns the ones that expired. The
//! precision of the sleep function bounds the precision of the
//! timeouts.
//!
//! Each timeout is registered under a `(scope, tag)` key: the scope
//! names the kind of timeout (say, channel establishment) and the tag
//! carries context such as a channel half. Keys must be unique among
//! pending entries.

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

/// Host-provided sleep: sleeps for at most the given duration and
/// returns the actually elapsed time.
pub type SleepFn = Box<dyn FnMut(Duration) -> Duration>;

/// Identity of a pending timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeoutKey {
    /// The kind of timeout.
    pub scope: u16,
    /// Context within the scope, such as a channel half.
    pub tag: u16,
}

impl TimeoutKey {
    /// Construct a key from scope and tag.
    pub fn new(scope: u16, tag: u16) -> Self {
        Self { scope, tag }
    }
}

/// Pending timeouts for one connection.
pub struct Timeouts {
    sleep: SleepFn,
    active: HashSet<TimeoutKey>,
    /// Entries keyed by remaining duration. Multiple keys may share a
    /// duration, so each key maps to the list of entries added at it.
    by_remaining: BTreeMap<Duration, Vec<TimeoutKey>>,
}

impl Timeouts {
    /// Create an empty collection driven by `sleep`.
    pub fn new(sleep: SleepFn) -> Self {
        Self { sleep, active: HashSet::new(), by_remaining: BTreeMap::new() }
    }

    /// Register a transient timeout; it is removed when it expires.
    ///
    /// Returns `false` without changes if `key` is already pending.
    pub fn add(&mut self, key: TimeoutKey, amount: Duration) -> bool {
        if !self.active.insert(key) {
            return false;
        }
        self.by_remaining.entry(amount).or_default().push(key);
        true
    }

    /// Cancel a pending timeout without expiring it.
    pub fn remove(&mut self, key: TimeoutKey) {
        if !self.active.remove(&key) {
            return;
        }
        let mut emptied = None;
        for (remaining, keys) in &mut self.by_remaining {
            if let Some(position) = keys.iter().position(|candidate| *candidate == key) {
                keys.remove(position);
                if keys.is_empty() {
                    emptied = Some(*remaining);
                }
                break;
            }
        }
        if let Some(remaining) = emptied {
            self.by_remaining.remove(&remaining);
        }
    }

    /// Whether `key` is pending.
    pub fn contains(&self, key: TimeoutKey) -> bool {
        self.active.contains(&key)
    }

    /// Number of pending timeouts.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no timeout is pending.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Sleep for at most `amount` and return the timeouts that expired,
    /// ordered by remaining duration (smallest first).
    ///
    /// Entries that did not expire have the elapsed time deducted from
    /// their remaining duration.
    pub fn wait(&mut self, amount: Duration) -> Vec<TimeoutKey> {
        let elapsed = (self.sleep)(amount);

        let mut expired = Vec::new();
        let mut remaining_entries = BTreeMap::<Duration, Vec<TimeoutKey>>::new();
        for (remaining, keys) in std::mem::take(&mut self.by_remaining) {
            if remaining <= elapsed {
                expired.extend(keys);
            } else {
                remaining_entries.insert(remaining - elapsed, keys);
            }
        }
        self.by_remaining = remaining_entries;

        for key in &expired {
            self.active.remove(key);
        }
        expired
    }
}

impl std::fmt::Debug for Timeouts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timeouts").field("pending", &self.active.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A sleep that reports exactly the requested duration.
    fn exact_sleep() -> SleepFn {
        Box::new(|amount| amount)
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut timeouts = Timeouts::new(exact_sleep());
        let key = TimeoutKey::new(1, 2);
        assert!(timeouts.add(key, Duration::from_millis(10)));
        assert!(!timeouts.add(key, Duration::from_millis(20)));
        assert_eq!(timeouts.len(), 1);
    }

    #[test]
    fn expiry_in_remaining_order() {
        let mut timeouts = Timeouts::new(exact_sleep());
        let late = TimeoutKey::new(1, 1);
        let early = TimeoutKey::new(1, 2);
        timeouts.add(late, Duration::from_millis(30));
        timeouts.add(early, Duration::from_millis(10));

        let expired = timeouts.wait(Duration::from_millis(30));
        assert_eq!(expired, vec![early, late]);
        assert!(timeouts.is_empty());
    }

    #[test]
    fn unexpired_entries_are_decremented() {
        let mut timeouts = Timeouts::new(exact_sleep());
        let key = TimeoutKey::new(1, 1);
        timeouts.add(key, Duration::from_millis(30));

        assert!(timeouts.wait(Duration::from_millis(10)).is_empty());
        assert!(timeouts.contains(key));

        // Two more waits of 10ms exhaust the original 30ms.
        assert!(timeouts.wait(Duration::from_millis(10)).is_empty());
        assert_eq!(timeouts.wait(Duration::from_millis(10)), vec![key]);
    }

    #[test]
    fn short_sleeps_delay_expiry() {
        // A sleep that always comes back early.
        let mut timeouts = Timeouts::new(Box::new(|amount| amount / 2));
        let key = TimeoutKey::new(3, 4);
        timeouts.add(key, Duration::from_millis(10));

        assert!(timeouts.wait(Duration::from_millis(10)).is_empty());
        assert_eq!(timeouts.wait(Duration::from_millis(10)), vec![key]);
    }

    #[test]
    fn removed_keys_do_not_expire() {
        let mut timeouts = Timeouts::new(exact_sleep());
        let key = TimeoutKey::new(1, 1);
        let other = TimeoutKey::new(1, 2);
        timeouts.add(key, Duration::from_millis(10));
        timeouts.add(other, Duration::from_millis(10));

        timeouts.remove(key);
        assert!(!timeouts.contains(key));
        assert_eq!(timeouts.wait(Duration::from_millis(10)), vec![other]);
    }

    #[test]
    fn removing_an_absent_key_is_harmless() {
        let mut timeouts = Timeouts::new(exact_sleep());
        timeouts.remove(TimeoutKey::new(9, 9));
        assert!(timeouts.is_empty());
    }

    #[test]
    fn same_duration_keys_all_expire() {
        let mut timeouts = Timeouts::new(exact_sleep());
        let a = TimeoutKey::new(1, 1);
        let b = TimeoutKey::new(1, 2);
        timeouts.add(a, Duration::from_millis(5));
        timeouts.add(b, Duration::from_millis(5));

        let expired = timeouts.wait(Duration::from_millis(5));
        assert_eq!(expired.len(), 2);
        assert!(expired.contains(&a) && expired.contains(&b));
    }
}
