use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use cloudrender_engine::{HostTimers, TimerId};

#[derive(Debug, Clone, Copy)]
struct Entry {
    interval: Duration,
    next_fire: Instant,
}

/// The shell's stand-in for a GUI toolkit's timer service. The main loop asks
/// it for due timers and hands each one to the orchestrator.
#[derive(Debug, Default)]
pub struct TimerWheel {
    next_id: TimerId,
    entries: BTreeMap<TimerId, Entry>,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the timers due at `now` in id order and reschedules each one
    /// an interval after `now`. Missed firings collapse into one.
    pub fn due(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if entry.next_fire <= now {
                entry.next_fire = now + entry.interval;
                fired.push(*id);
            }
        }
        fired
    }

    /// Time until the earliest timer is due, if any is registered.
    pub fn until_next(&self, now: Instant) -> Option<Duration> {
        self.entries
            .values()
            .map(|entry| entry.next_fire.saturating_duration_since(now))
            .min()
    }

    fn insert(&mut self, interval: Duration, now: Instant) -> TimerId {
        self.next_id += 1;
        self.entries.insert(
            self.next_id,
            Entry {
                interval,
                next_fire: now + interval,
            },
        );
        self.next_id
    }
}

impl HostTimers for TimerWheel {
    fn add_timer(&mut self, interval: Duration) -> TimerId {
        self.insert(interval, Instant::now())
    }

    fn remove_timer(&mut self, id: TimerId) {
        self.entries.remove(&id);
    }
}
