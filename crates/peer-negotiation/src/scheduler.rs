//! Delayed-task queue driven by explicit time.
//!
//! Nothing here sleeps. Callers ask for the next deadline, wait however
//! they like (a real timer, or `tokio::time::advance` in tests) and then
//! collect what is due.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

use tokio::time::Instant;

/// Keyed timers. Scheduling a key that is already pending moves it.
#[derive(Debug)]
pub struct Scheduler<K> {
    queue: BTreeMap<(Instant, u64), K>,
    index: HashMap<K, (Instant, u64)>,
    seq: u64,
}

impl<K> Default for Scheduler<K> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            index: HashMap::new(),
            seq: 0,
        }
    }
}

impl<K: Clone + Eq + Hash> Scheduler<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, key: K) {
        self.cancel(&key);
        self.seq += 1;
        let slot = (at, self.seq);
        self.index.insert(key.clone(), slot);
        self.queue.insert(slot, key);
    }

    /// Returns true if the key was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        let dropped: Vec<K> = self.index.keys().filter(|k| !keep(k)).cloned().collect();
        for key in &dropped {
            self.cancel(key);
        }
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.index.clear();
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    #[must_use]
    pub fn is_pending(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove and return every key due at or before `now`, earliest first.
    /// Keys due at the same instant come out in scheduling order.
    pub fn pop_due(&mut self, now: Instant) -> Vec<K> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            self.index.remove(&key);
            due.push(key);
        }
        due
    }
}
