//! Timer heap: a min-heap ordered by next fire time, insertion-sequence
//! tie-break, with drift control (reschedule from the previous *scheduled*
//! fire, not the actual fire time) and catch-up coalescing.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

pub type TimerCallback = Box<dyn FnMut() + Send>;

pub(crate) struct TimerEntry {
    pub id: TimerId,
    pub callback: TimerCallback,
    pub interval: Option<Duration>,
    pub next_fire: Instant,
    pub seq: u64,
    /// Bumped on every `start`/reschedule, independent of `seq`. `seq` is
    /// the tie-break and is fixed at creation; `generation` is purely so
    /// `pop_expired`/`next_fire` can tell a stale heap key left behind by an
    /// earlier restart from the one the entry is currently scheduled under.
    generation: u64,
    pub fires_remaining: Option<u64>,
    pub running: bool,
}

/// Heap key: earliest `next_fire` wins; ties break by insertion `seq`
/// (lower `seq` is older, so it should sort first too). `generation` plays
/// no part in ordering — it only lets a pop distinguish this key from a
/// stale one left by a since-superseded `start` call on the same id.
#[derive(PartialEq, Eq)]
struct HeapKey {
    next_fire: Instant,
    seq: u64,
    generation: u64,
    id: TimerId,
}

impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest fire is "greatest".
        other
            .next_fire
            .cmp(&self.next_fire)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The heap plus the full entry table. Entries live in `entries` keyed by
/// `TimerId`; `heap` only ever holds keys for entries that are `running`.
/// `timer_start` on an already-scheduled id does not insert a duplicate key:
/// it bumps `seq`/`next_fire` in the entry and lets the stale heap key (if
/// any) get discarded lazily on pop, since a live lookup in `entries`
/// disambiguates.
pub(crate) struct TimerHeap {
    heap: BinaryHeap<HeapKey>,
    entries: std::collections::HashMap<TimerId, TimerEntry>,
    next_id: u64,
    next_seq: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        TimerHeap {
            heap: BinaryHeap::new(),
            entries: std::collections::HashMap::new(),
            next_id: 0,
            next_seq: 0,
        }
    }

    pub fn add(&mut self, callback: TimerCallback) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id,
            TimerEntry {
                id,
                callback,
                interval: None,
                next_fire: Instant::now(),
                seq,
                generation: 0,
                fires_remaining: None,
                running: false,
            },
        );
        id
    }

    pub fn set_fire_count(&mut self, id: TimerId, n: Option<u64>) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.fires_remaining = n;
        }
    }

    /// Schedules (or reschedules) `id` to first fire after `interval`.
    /// Re-starting a pending timer overwrites its scheduled fire time rather
    /// than inserting a second heap entry for the same id; `seq` stays the
    /// one assigned at [`Self::add`] time, so restarting a timer never
    /// changes its tie-break order relative to other timers.
    pub fn start(&mut self, id: TimerId, interval: Duration) {
        let next_fire = Instant::now() + interval;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.interval = Some(interval);
            entry.next_fire = next_fire;
            entry.running = true;
            entry.generation += 1;
            self.heap.push(HeapKey {
                next_fire,
                seq: entry.seq,
                generation: entry.generation,
                id,
            });
        }
    }

    pub fn stop(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.running = false;
        }
    }

    pub fn remove(&mut self, id: TimerId) -> Option<TimerEntry> {
        self.entries.remove(&id)
    }

    pub fn next_fire(&self) -> Option<Instant> {
        // Skip stale/stopped keys without mutating the heap (peek only).
        self.heap
            .iter()
            .filter(|k| {
                self.entries
                    .get(&k.id)
                    .map(|e| e.running && e.generation == k.generation)
                    .unwrap_or(false)
            })
            .map(|k| k.next_fire)
            .min()
    }

    /// Pops and fires every timer entry whose `next_fire <= now`, applying
    /// drift control: the next scheduled fire is computed from the
    /// *previous scheduled* `next_fire`, and if more than one period has
    /// elapsed, intermediate fires coalesce into a single catch-up call.
    /// Returns the ids that fired (for dispatch-lock bookkeeping by the
    /// caller).
    pub fn pop_expired(&mut self, now: Instant) -> Vec<TimerId> {
        let mut fired = Vec::new();
        loop {
            let Some(top) = self.heap.peek() else { break };
            if top.next_fire > now {
                break;
            }
            let key = self.heap.pop().unwrap();
            let Some(entry) = self.entries.get_mut(&key.id) else {
                continue;
            };
            // Stale key from a since-restarted timer; its generation moved on.
            if !entry.running || entry.generation != key.generation {
                continue;
            }

            if let Some(remaining) = entry.fires_remaining {
                if remaining == 0 {
                    entry.running = false;
                    continue;
                }
            }

            fired.push(entry.id);
            if let Some(remaining) = entry.fires_remaining.as_mut() {
                *remaining -= 1;
            }

            match (entry.interval, entry.fires_remaining) {
                (Some(interval), Some(0)) => {
                    entry.running = false;
                    let _ = interval;
                }
                (Some(interval), _) => {
                    // Drift control: reschedule from the previous scheduled
                    // fire, coalescing any fully-elapsed periods.
                    let mut next = entry.next_fire + interval;
                    while next <= now {
                        next += interval;
                    }
                    entry.next_fire = next;
                    entry.generation += 1;
                    self.heap.push(HeapKey {
                        next_fire: next,
                        seq: entry.seq,
                        generation: entry.generation,
                        id: entry.id,
                    });
                }
                (None, _) => {
                    entry.running = false;
                }
            }
        }
        fired
    }

    pub fn invoke(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            (entry.callback)();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn earliest_fires_first() {
        let mut heap = TimerHeap::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let id1 = heap.add(Box::new(move || o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        let id2 = heap.add(Box::new(move || o2.lock().unwrap().push(2)));

        heap.set_fire_count(id1, Some(1));
        heap.set_fire_count(id2, Some(1));

        let now = Instant::now();
        heap.start(id2, Duration::from_millis(20));
        heap.start(id1, Duration::from_millis(10));

        let fired = heap.pop_expired(now + Duration::from_millis(15));
        assert_eq!(fired, vec![id1]);
        for id in &fired {
            heap.invoke(*id);
        }
        assert_eq!(*order.lock().unwrap(), vec![1]);
    }

    #[test]
    fn restart_does_not_change_tie_break_order() {
        let mut heap = TimerHeap::new();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let o1 = order.clone();
        let id1 = heap.add(Box::new(move || o1.lock().unwrap().push(1)));
        let o2 = order.clone();
        let id2 = heap.add(Box::new(move || o2.lock().unwrap().push(2)));
        heap.set_fire_count(id1, Some(1));
        heap.set_fire_count(id2, Some(1));

        // id2 is restarted several times after id1 was added (and even
        // after id1 itself was started), which must not let id2's later
        // restarts outrank id1 on an exact tie: seq reflects add() order,
        // not start() order.
        let now = Instant::now();
        heap.start(id1, Duration::from_millis(10));
        for _ in 0..5 {
            heap.start(id2, Duration::from_millis(10));
        }

        let fired = heap.pop_expired(now + Duration::from_millis(20));
        assert_eq!(fired, vec![id1, id2]);
        for id in &fired {
            heap.invoke(*id);
        }
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn restart_overwrites_rather_than_duplicates() {
        let mut heap = TimerHeap::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let id = heap.add(Box::new(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        heap.set_fire_count(id, Some(1));

        let base = Instant::now();
        for _ in 0..25 {
            heap.start(id, Duration::from_millis(5));
        }

        let fired = heap.pop_expired(base + Duration::from_secs(1));
        assert_eq!(fired.len(), 1);
        for f in &fired {
            heap.invoke(*f);
        }
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn drift_control_coalesces_catch_up() {
        let mut heap = TimerHeap::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = heap.add(Box::new(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        let base = Instant::now();
        heap.start(id, Duration::from_millis(10));

        // Jump ten periods ahead in a single check; should coalesce to one fire.
        let fired = heap.pop_expired(base + Duration::from_millis(105));
        assert_eq!(fired.len(), 1);
        for f in &fired {
            heap.invoke(*f);
        }
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);

        // The rescheduled fire should be strictly after the probe time.
        let next = heap.next_fire().unwrap();
        assert!(next > base + Duration::from_millis(105));
    }

    #[test]
    fn stop_prevents_future_fire() {
        let mut heap = TimerHeap::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = heap.add(Box::new(move || {
            c.fetch_add(1, AtomicOrdering::SeqCst);
        }));
        heap.set_fire_count(id, Some(1));
        let base = Instant::now();
        heap.start(id, Duration::from_millis(10));
        heap.stop(id);
        let fired = heap.pop_expired(base + Duration::from_secs(1));
        assert!(fired.is_empty());
    }
}
