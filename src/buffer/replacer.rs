//! Victim selection among unpinned frames (spec.md §4.2).
//!
//! The `Replacer` trait is the one place spec.md (Design Notes §9) explicitly
//! keeps runtime polymorphism, since the buffer pool is generic over replacer
//! kind at construction. `Lru` is grounded directly on the teacher's
//! `buffer_pool/replacer.rs` (`PriorityQueue<FrameId, i64>` with
//! `push_decrease(frame_id, -timestamp)`, oldest-unpinned-first ordering).
//! `LruK` has no teacher precedent (the teacher only implements LRU) and is
//! built from spec.md §4.2's backward-K-distance rule and the worked example
//! in §8 scenario 6.

use super::frame::FrameId;
use priority_queue::PriorityQueue;
use std::collections::{HashMap, HashSet, VecDeque};

pub trait Replacer: Send {
    /// Evicts and returns the chosen frame, or `None` if nothing is tracked.
    fn victim(&mut self) -> Option<FrameId>;
    /// Marks a frame non-evictable (pinned).
    fn pin(&mut self, frame: FrameId);
    /// Marks a frame evictable (unpinned).
    fn unpin(&mut self, frame: FrameId);
    /// Count of currently tracked (evictable) frames.
    fn size(&self) -> usize;
}

pub struct Lru {
    timestamp: i64,
    heap: PriorityQueue<FrameId, i64>,
}

impl Lru {
    pub fn new() -> Self {
        Self {
            timestamp: 0,
            heap: PriorityQueue::new(),
        }
    }
}

impl Default for Lru {
    fn default() -> Self {
        Self::new()
    }
}

impl Replacer for Lru {
    fn victim(&mut self) -> Option<FrameId> {
        self.heap.pop().map(|(frame, _)| frame)
    }

    fn pin(&mut self, frame: FrameId) {
        self.heap.remove(&frame);
    }

    fn unpin(&mut self, frame: FrameId) {
        if self.heap.get(&frame).is_none() {
            self.timestamp += 1;
            self.heap.push(frame, -self.timestamp);
        }
    }

    fn size(&self) -> usize {
        self.heap.len()
    }
}

pub struct LruK {
    k: usize,
    timestamp: i64,
    history: HashMap<FrameId, VecDeque<i64>>,
    tracked: HashSet<FrameId>,
}

impl LruK {
    pub fn new(k: usize) -> Self {
        assert!(k > 0, "k must be positive");
        Self {
            k,
            timestamp: 0,
            history: HashMap::new(),
            tracked: HashSet::new(),
        }
    }
}

impl Replacer for LruK {
    fn victim(&mut self) -> Option<FrameId> {
        let mut best: Option<FrameId> = None;
        let mut best_is_inf = false;
        let mut best_distance: i64 = i64::MIN;
        let mut best_earliest: i64 = i64::MAX;

        for &frame in &self.tracked {
            let hist = self.history.get(&frame);
            let len = hist.map(VecDeque::len).unwrap_or(0);
            let earliest = hist.and_then(|h| h.front().copied()).unwrap_or(i64::MAX);
            let is_inf = len < self.k;
            let distance = if is_inf {
                0
            } else {
                self.timestamp - hist.unwrap()[len - self.k]
            };

            let better = match best {
                None => true,
                Some(_) if is_inf && !best_is_inf => true,
                Some(_) if !is_inf && best_is_inf => false,
                Some(_) if is_inf && best_is_inf => earliest < best_earliest,
                Some(_) => distance > best_distance || (distance == best_distance && earliest < best_earliest),
            };

            if better {
                best = Some(frame);
                best_is_inf = is_inf;
                best_distance = distance;
                best_earliest = earliest;
            }
        }

        if let Some(frame) = best {
            self.tracked.remove(&frame);
        }
        best
    }

    fn pin(&mut self, frame: FrameId) {
        let hist = self.history.entry(frame).or_default();
        hist.push_back(self.timestamp);
        if hist.len() > self.k {
            hist.pop_front();
        }
        self.timestamp += 1;
        self.tracked.remove(&frame);
    }

    fn unpin(&mut self, frame: FrameId) {
        self.tracked.insert(frame);
    }

    fn size(&self) -> usize {
        self.tracked.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru_evicts_oldest_unpinned_first() {
        let mut r = Lru::new();
        for f in 0..4 {
            r.unpin(f);
        }
        assert_eq!(r.size(), 4);
        assert_eq!(r.victim(), Some(0));
        assert_eq!(r.victim(), Some(1));
        r.pin(2);
        assert_eq!(r.victim(), Some(3));
        assert_eq!(r.victim(), None);
    }

    #[test]
    fn lru_pin_removes_from_tracking() {
        let mut r = Lru::new();
        r.unpin(5);
        r.pin(5);
        assert_eq!(r.size(), 0);
        assert_eq!(r.victim(), None);
    }

    #[test]
    fn lru_k_prefers_fewer_than_k_accesses() {
        // scenario 8: a frame with < K accesses beats one with K accesses
        // regardless of recency.
        let mut r = LruK::new(3);
        r.pin(0);
        r.pin(0);
        r.pin(1);
        r.pin(1);
        r.pin(1);
        r.unpin(0);
        r.unpin(1);
        assert_eq!(r.victim(), Some(0));
    }

    #[test]
    fn lru_k_scenario_six() {
        // spec.md §8 scenario 6: frame 0 accessed at t=0,8,16; frame 7's 3rd
        // access at t=23. Frames 1..6 fill the remaining 18 timestamps evenly
        // (3 accesses each) so every frame reaches exactly K=3 accesses.
        let mut schedule: Vec<(i64, FrameId)> =
            vec![(0, 0), (8, 0), (16, 0), (1, 7), (9, 7), (23, 7)];
        let used: HashSet<i64> = schedule.iter().map(|(t, _)| *t).collect();
        for (i, t) in (0..24i64).filter(|t| !used.contains(t)).enumerate() {
            let frame = 1 + (i % 6) as FrameId;
            schedule.push((t, frame));
        }
        schedule.sort_by_key(|(t, _)| *t);

        let mut r = LruK::new(3);
        for (_, frame) in &schedule {
            r.pin(*frame);
        }
        for frame in 0..8u64 {
            r.unpin(frame as FrameId);
        }

        assert_eq!(r.victim(), Some(0));
    }
}
