// src/pipeline/violation_store.rs
//
// Bounded history of emitted violations, ordered by frame number.
//
// Events are indexed by id and kept in frame order in a separate deque.
// Inserting past capacity evicts the event with the smallest frame number.
// Counters are maintained per insert/eviction:
//   - retained counts (total and per type) always match what is stored
//   - lifetime count never decreases; it is what live consumers see as
//     `total_violations`

use crate::rules::{ViolationEvent, ViolationType};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::debug;

/// Frames counted as "recent" behind the newest stored event (30 s at 30 fps).
pub const RECENT_WINDOW_FRAMES: u64 = 900;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViolationStats {
    /// Events currently retained
    pub total_violations: usize,
    /// Events ever inserted, including evicted ones
    pub lifetime_violations: u64,
    pub evicted: u64,
    pub by_type: BTreeMap<ViolationType, usize>,
    /// Retained events within RECENT_WINDOW_FRAMES of the newest one
    pub recent_violations: usize,
    /// Retained events per minute of video they span (span floored at one
    /// minute)
    pub violation_rate: f64,
}

#[derive(Debug, Clone)]
pub struct ViolationStore {
    capacity: usize,
    events: HashMap<String, ViolationEvent>,
    /// (frame_number, id), ascending by frame; ties keep insertion order
    order: VecDeque<(u64, String)>,
    retained_by_type: HashMap<ViolationType, usize>,
    lifetime: u64,
    evicted: u64,
}

impl ViolationStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            events: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            retained_by_type: HashMap::new(),
            lifetime: 0,
            evicted: 0,
        }
    }

    /// Store an event. Returns the event evicted to make room, if any.
    pub fn insert(&mut self, event: ViolationEvent) -> Option<ViolationEvent> {
        let frame = event.frame_number;
        // Append in the normal case; out-of-order frames are placed by search
        let at = match self.order.back() {
            Some((last, _)) if *last > frame => self.order.partition_point(|(f, _)| *f <= frame),
            _ => self.order.len(),
        };
        self.order.insert(at, (frame, event.id.clone()));
        *self.retained_by_type.entry(event.violation_type).or_insert(0) += 1;
        self.lifetime += 1;
        self.events.insert(event.id.clone(), event);

        if self.order.len() > self.capacity {
            return self.evict_oldest();
        }
        None
    }

    fn evict_oldest(&mut self) -> Option<ViolationEvent> {
        let (_, id) = self.order.pop_front()?;
        let event = self.events.remove(&id)?;
        if let Some(n) = self.retained_by_type.get_mut(&event.violation_type) {
            *n = n.saturating_sub(1);
        }
        self.evicted += 1;
        debug!(
            "Violation store full ({}), evicted {} from frame {}",
            self.capacity, event.violation_type, event.frame_number
        );
        Some(event)
    }

    pub fn get(&self, id: &str) -> Option<&ViolationEvent> {
        self.events.get(id)
    }

    /// All retained events, ascending by frame number.
    pub fn iter(&self) -> impl Iterator<Item = &ViolationEvent> {
        self.order.iter().filter_map(|(_, id)| self.events.get(id))
    }

    /// The `n` newest events, newest first.
    pub fn recent(&self, n: usize) -> Vec<&ViolationEvent> {
        self.order
            .iter()
            .rev()
            .take(n)
            .filter_map(|(_, id)| self.events.get(id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn lifetime_total(&self) -> u64 {
        self.lifetime
    }

    pub fn count(&self, kind: ViolationType) -> usize {
        self.retained_by_type.get(&kind).copied().unwrap_or(0)
    }

    pub fn counts_by_type(&self) -> BTreeMap<ViolationType, usize> {
        ViolationType::ALL
            .iter()
            .map(|k| (*k, self.count(*k)))
            .collect()
    }

    /// Retained events of one kind, ascending by frame number.
    pub fn by_type(&self, kind: ViolationType) -> Vec<&ViolationEvent> {
        self.iter().filter(|e| e.violation_type == kind).collect()
    }

    fn oldest(&self) -> Option<&ViolationEvent> {
        self.order.front().and_then(|(_, id)| self.events.get(id))
    }

    fn newest(&self) -> Option<&ViolationEvent> {
        self.order.back().and_then(|(_, id)| self.events.get(id))
    }

    pub fn stats(&self) -> ViolationStats {
        let recent = match self.order.back() {
            Some((newest, _)) => {
                let floor = newest.saturating_sub(RECENT_WINDOW_FRAMES);
                self.order.len() - self.order.partition_point(|(f, _)| *f < floor)
            }
            None => 0,
        };
        let violation_rate = match (self.oldest(), self.newest()) {
            (Some(first), Some(last)) => {
                let minutes = (last.video_timestamp_ms - first.video_timestamp_ms) / 60_000.0;
                self.len() as f64 / minutes.max(1.0)
            }
            _ => 0.0,
        };
        ViolationStats {
            total_violations: self.len(),
            lifetime_violations: self.lifetime,
            evicted: self.evicted,
            by_type: self.counts_by_type(),
            recent_violations: recent,
            violation_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::details;
    use crate::types::Point;
    use chrono::Utc;

    fn event(kind: ViolationType, frame: u64) -> ViolationEvent {
        ViolationEvent {
            id: uuid::Uuid::new_v4().to_string(),
            violation_type: kind,
            vehicle_id: 1,
            frame_number: frame,
            timestamp: Utc::now(),
            video_timestamp_ms: frame as f64 * 33.3,
            confidence: 0.9,
            location: Point::new(0.0, 0.0),
            details: details(kind),
        }
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut store = ViolationStore::new(5);
        for f in 0..50 {
            store.insert(event(ViolationType::RedLight, f));
            assert!(store.len() <= 5);
        }
        assert_eq!(store.len(), 5);
        assert_eq!(store.lifetime_total(), 50);
        assert_eq!(store.count(ViolationType::RedLight), 5);
        let frames: Vec<u64> = store.iter().map(|e| e.frame_number).collect();
        assert_eq!(frames, vec![45, 46, 47, 48, 49]);
    }

    #[test]
    fn test_eviction_removes_smallest_frame() {
        let mut store = ViolationStore::new(3);
        store.insert(event(ViolationType::RedLight, 10));
        store.insert(event(ViolationType::WrongSide, 30));
        store.insert(event(ViolationType::NoHelmet, 20));
        let evicted = store.insert(event(ViolationType::WrongSide, 40)).unwrap();
        assert_eq!(evicted.frame_number, 10);
        assert_eq!(evicted.violation_type, ViolationType::RedLight);
        assert!(store.get(&evicted.id).is_none());

        let frames: Vec<u64> = store.iter().map(|e| e.frame_number).collect();
        assert_eq!(frames, vec![20, 30, 40]);

        // A late event older than everything retained is itself the one evicted
        let late = event(ViolationType::RedLight, 5);
        let late_id = late.id.clone();
        let evicted = store.insert(late).unwrap();
        assert_eq!(evicted.id, late_id);
    }

    #[test]
    fn test_counters_track_retained_and_lifetime() {
        let mut store = ViolationStore::new(2);
        store.insert(event(ViolationType::RedLight, 1));
        store.insert(event(ViolationType::NoHelmet, 2));
        store.insert(event(ViolationType::NoHelmet, 3));
        let stats = store.stats();
        assert_eq!(stats.total_violations, 2);
        assert_eq!(stats.lifetime_violations, 3);
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.by_type[&ViolationType::RedLight], 0);
        assert_eq!(stats.by_type[&ViolationType::NoHelmet], 2);
        assert_eq!(stats.by_type[&ViolationType::WrongSide], 0);
    }

    #[test]
    fn test_recent_and_lookup() {
        let mut store = ViolationStore::new(10);
        let first = event(ViolationType::RedLight, 100);
        let id = first.id.clone();
        store.insert(first);
        store.insert(event(ViolationType::WrongSide, 2000));
        store.insert(event(ViolationType::NoHelmet, 2100));

        assert_eq!(store.get(&id).unwrap().frame_number, 100);
        let recent = store.recent(2);
        assert_eq!(recent[0].frame_number, 2100);
        assert_eq!(recent[1].frame_number, 2000);
        // 100 is outside the recent window of 2100
        assert_eq!(store.stats().recent_violations, 2);
    }

    #[test]
    fn test_by_type_and_rate() {
        let mut store = ViolationStore::new(10);
        assert_eq!(store.stats().violation_rate, 0.0);

        store.insert(event(ViolationType::WrongSide, 10));
        store.insert(event(ViolationType::RedLight, 20));
        store.insert(event(ViolationType::WrongSide, 30));
        let wrong: Vec<u64> = store
            .by_type(ViolationType::WrongSide)
            .iter()
            .map(|e| e.frame_number)
            .collect();
        assert_eq!(wrong, vec![10, 30]);
        assert!(store.by_type(ViolationType::NoHelmet).is_empty());
        // Well under a minute of video: the span counts as one minute
        assert_eq!(store.stats().violation_rate, 3.0);

        // ~4 minutes at 33.3 ms/frame
        store.insert(event(ViolationType::NoHelmet, 7207));
        let rate = store.stats().violation_rate;
        assert!((rate - 1.0).abs() < 0.01, "rate {}", rate);
    }

    #[test]
    fn test_stats_serialize_with_wire_names() {
        let mut store = ViolationStore::new(4);
        store.insert(event(ViolationType::NoHelmet, 1));
        let json = serde_json::to_value(store.stats()).unwrap();
        assert_eq!(json["by_type"]["no_helmet"], 1);
        assert_eq!(json["total_violations"], 1);
    }
}
