//! Approximate-time pairing of two timestamped streams
//!
//! Each stream has a bounded FIFO (oldest evicted first). An arriving message
//! is matched against the opposite queue by smallest |Δt| within `slop`; on a
//! match the pair is emitted and the matched message plus everything older is
//! discarded from both sides. Messages not newer than the last emitted one of
//! their stream are dropped on arrival.

use std::collections::VecDeque;

use crate::types::{DetectionBatch, PoseStamped};

/// Anything carrying a timestamp in seconds.
pub trait Stamped {
    fn stamp(&self) -> f64;
}

impl Stamped for PoseStamped {
    fn stamp(&self) -> f64 {
        self.timestamp
    }
}

impl Stamped for DetectionBatch {
    fn stamp(&self) -> f64 {
        self.timestamp
    }
}

#[derive(Debug)]
pub struct ApproxTimeSync<A, B> {
    left: VecDeque<A>,
    right: VecDeque<B>,
    last_left: Option<f64>,
    last_right: Option<f64>,
    queue_size: usize,
    slop: f64,
    dropped: u64,
}

impl<A: Stamped, B: Stamped> ApproxTimeSync<A, B> {
    pub fn new(queue_size: usize, slop: f64) -> Self {
        Self {
            left: VecDeque::with_capacity(queue_size),
            right: VecDeque::with_capacity(queue_size),
            last_left: None,
            last_right: None,
            queue_size: queue_size.max(1),
            slop,
            dropped: 0,
        }
    }

    pub fn push_left(&mut self, msg: A) -> Option<(A, B)> {
        let stamp = msg.stamp();
        if is_stale(stamp, self.last_left) {
            self.dropped += 1;
            return None;
        }
        match take_match(&mut self.right, stamp, self.slop) {
            Some(other) => {
                self.left.retain(|m| m.stamp() > stamp);
                self.last_left = Some(stamp);
                self.last_right = Some(other.stamp());
                Some((msg, other))
            }
            None => {
                self.dropped += enqueue(&mut self.left, msg, self.queue_size);
                None
            }
        }
    }

    pub fn push_right(&mut self, msg: B) -> Option<(A, B)> {
        let stamp = msg.stamp();
        if is_stale(stamp, self.last_right) {
            self.dropped += 1;
            return None;
        }
        match take_match(&mut self.left, stamp, self.slop) {
            Some(other) => {
                self.right.retain(|m| m.stamp() > stamp);
                self.last_right = Some(stamp);
                self.last_left = Some(other.stamp());
                Some((other, msg))
            }
            None => {
                self.dropped += enqueue(&mut self.right, msg, self.queue_size);
                None
            }
        }
    }

    /// Queued (unmatched) message counts
    pub fn pending(&self) -> (usize, usize) {
        (self.left.len(), self.right.len())
    }

    /// Messages dropped as stale or evicted from a full queue
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

fn is_stale(stamp: f64, last: Option<f64>) -> bool {
    !stamp.is_finite() || last.map_or(false, |last| stamp <= last)
}

/// Remove and return the closest message within `slop`, discarding every
/// queued message at or before it.
fn take_match<T: Stamped>(queue: &mut VecDeque<T>, stamp: f64, slop: f64) -> Option<T> {
    let (best, _) = queue
        .iter()
        .enumerate()
        .map(|(i, m)| (i, (m.stamp() - stamp).abs()))
        .filter(|&(_, dt)| dt <= slop)
        .min_by(|a, b| a.1.total_cmp(&b.1))?;

    let matched = queue.remove(best)?;
    let cutoff = matched.stamp();
    queue.retain(|m| m.stamp() > cutoff);
    Some(matched)
}

/// Push with oldest-first eviction; returns the number evicted.
fn enqueue<T>(queue: &mut VecDeque<T>, msg: T, capacity: usize) -> u64 {
    let mut evicted = 0;
    while queue.len() >= capacity {
        queue.pop_front();
        evicted += 1;
    }
    queue.push_back(msg);
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Msg(f64);

    impl Stamped for Msg {
        fn stamp(&self) -> f64 {
            self.0
        }
    }

    fn sync() -> ApproxTimeSync<Msg, Msg> {
        ApproxTimeSync::new(20, 0.2)
    }

    #[test]
    fn test_pairs_within_slop() {
        let mut s = sync();
        assert!(s.push_left(Msg(1.0)).is_none());
        let pair = s.push_right(Msg(1.15)).unwrap();
        assert_eq!(pair, (Msg(1.0), Msg(1.15)));
        assert_eq!(s.pending(), (0, 0));
    }

    #[test]
    fn test_rejects_outside_slop() {
        let mut s = sync();
        s.push_left(Msg(1.0));
        assert!(s.push_right(Msg(1.5)).is_none());
        assert_eq!(s.pending(), (1, 1));
    }

    #[test]
    fn test_picks_closest_and_discards_older() {
        let mut s = sync();
        s.push_left(Msg(1.0));
        s.push_left(Msg(1.1));
        s.push_left(Msg(1.3));
        let pair = s.push_right(Msg(1.12)).unwrap();
        assert_eq!(pair.0, Msg(1.1));
        // 1.0 discarded as older, 1.3 stays queued
        assert_eq!(s.pending(), (1, 0));
    }

    #[test]
    fn test_stale_messages_dropped() {
        let mut s = sync();
        s.push_left(Msg(2.0));
        s.push_right(Msg(2.0)).unwrap();
        assert!(s.push_left(Msg(1.9)).is_none());
        assert!(s.push_right(Msg(2.0)).is_none());
        assert_eq!(s.pending(), (0, 0));
        assert_eq!(s.dropped(), 2);
    }

    #[test]
    fn test_queue_evicts_oldest() {
        let mut s: ApproxTimeSync<Msg, Msg> = ApproxTimeSync::new(3, 0.2);
        for i in 0..5 {
            s.push_left(Msg(i as f64));
        }
        assert_eq!(s.pending(), (3, 0));
        assert_eq!(s.dropped(), 2);
        // 0.0 was evicted, so nothing pairs with it
        assert!(s.push_right(Msg(0.05)).is_none());
        assert!(s.push_right(Msg(2.05)).is_some());
    }

    #[test]
    fn test_continuous_streams() {
        let mut s = sync();
        let mut pairs = 0;
        for k in 0..50 {
            let t = k as f64 * 0.1;
            if s.push_left(Msg(t)).is_some() {
                pairs += 1;
            }
            if s.push_right(Msg(t + 0.03)).is_some() {
                pairs += 1;
            }
        }
        assert_eq!(pairs, 50);
    }
}
