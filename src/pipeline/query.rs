// src/pipeline/query.rs
//
// Read-only view over a pipeline's store for API handlers and the CLI.
// Every call takes the store lock once, so answers reflect whole frames.

use super::engine::{read_store, SharedStore};
use super::metrics::{MetricsSummary, PipelineMetrics};
use super::violation_store::ViolationStats;
use crate::rules::{ViolationEvent, ViolationType};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct ViolationsResponse {
    pub violations: Vec<ViolationEvent>,
    pub statistics: ViolationStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub stored_violations: usize,
    pub store_capacity: usize,
    pub metrics: MetricsSummary,
}

#[derive(Clone)]
pub struct ViolationService {
    store: SharedStore,
    metrics: PipelineMetrics,
}

impl ViolationService {
    pub fn new(store: SharedStore, metrics: PipelineMetrics) -> Self {
        Self { store, metrics }
    }

    /// Retained events in ascending frame order, with aggregate statistics.
    pub fn all_violations(&self) -> ViolationsResponse {
        let store = read_store(&self.store);
        ViolationsResponse {
            violations: store.iter().cloned().collect(),
            statistics: store.stats(),
        }
    }

    pub fn violation_by_id(&self, id: &str) -> Option<ViolationEvent> {
        read_store(&self.store).get(id).cloned()
    }

    /// Retained events of one kind, ascending by frame number.
    pub fn violations_by_type(&self, kind: ViolationType) -> Vec<ViolationEvent> {
        read_store(&self.store).by_type(kind).into_iter().cloned().collect()
    }

    /// Newest first.
    pub fn recent_violations(&self, n: usize) -> Vec<ViolationEvent> {
        read_store(&self.store).recent(n).into_iter().cloned().collect()
    }

    pub fn statistics(&self) -> ViolationStats {
        read_store(&self.store).stats()
    }

    pub fn health(&self) -> HealthStatus {
        let (stored_violations, store_capacity) = {
            let store = read_store(&self.store);
            (store.len(), store.capacity())
        };
        HealthStatus {
            status: "healthy".to_string(),
            stored_violations,
            store_capacity,
            metrics: self.metrics.summary(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::engine::{new_shared_store, write_store};
    use crate::rules::test_support::details;
    use crate::rules::ViolationDetails;
    use crate::types::Point;
    use chrono::Utc;

    fn event(kind: ViolationType, frame: u64) -> ViolationEvent {
        ViolationEvent {
            id: format!("{}-{}", kind.as_str(), frame),
            violation_type: kind,
            vehicle_id: 1,
            frame_number: frame,
            timestamp: Utc::now(),
            video_timestamp_ms: frame as f64 * 33.3,
            confidence: 0.9,
            location: Point::new(10.0, 20.0),
            details: details(kind),
        }
    }

    fn service(capacity: usize) -> ViolationService {
        ViolationService::new(new_shared_store(capacity), PipelineMetrics::new())
    }

    #[test]
    fn test_all_violations_with_statistics() {
        let svc = service(10);
        {
            let mut store = write_store(&svc.store);
            store.insert(event(ViolationType::RedLight, 5));
            store.insert(event(ViolationType::NoHelmet, 9));
            store.insert(event(ViolationType::RedLight, 12));
        }

        let all = svc.all_violations();
        let frames: Vec<u64> = all.violations.iter().map(|v| v.frame_number).collect();
        assert_eq!(frames, vec![5, 9, 12]);
        assert_eq!(all.statistics.total_violations, 3);
        assert_eq!(all.statistics.by_type.get(&ViolationType::RedLight), Some(&2));

        let json = serde_json::to_value(&all).unwrap();
        assert_eq!(json["violations"][0]["type"], "red_light");
        assert!(json["violations"][0]["details"]["stop_line"].is_array());

        let red: Vec<u64> = svc
            .violations_by_type(ViolationType::RedLight)
            .iter()
            .map(|v| v.frame_number)
            .collect();
        assert_eq!(red, vec![5, 12]);
    }

    #[test]
    fn test_lookup_by_id() {
        let svc = service(10);
        write_store(&svc.store).insert(event(ViolationType::WrongSide, 40));

        let found = svc.violation_by_id("wrong_side-40").unwrap();
        assert_eq!(found.frame_number, 40);
        assert!(matches!(found.details, ViolationDetails::WrongSide { .. }));
        let json = serde_json::to_value(&found).unwrap();
        assert_eq!(json["details"]["lane"], "inbound");
        assert!(svc.violation_by_id("missing").is_none());
    }

    #[test]
    fn test_recent_and_health_after_eviction() {
        let svc = service(2);
        {
            let mut store = write_store(&svc.store);
            for f in [1, 2, 3] {
                store.insert(event(ViolationType::RedLight, f));
            }
        }

        let recent: Vec<u64> = svc.recent_violations(5).iter().map(|v| v.frame_number).collect();
        assert_eq!(recent, vec![3, 2]);

        let stats = svc.statistics();
        assert_eq!(stats.total_violations, 2);
        assert_eq!(stats.lifetime_violations, 3);
        assert_eq!(stats.evicted, 1);

        let health = svc.health();
        assert_eq!(health.status, "healthy");
        assert_eq!(health.stored_violations, 2);
        assert_eq!(health.store_capacity, 2);
    }
}
