// src/analysis/mod.rs
//
// Per-frame scene state: where every object is and what the signal shows.
//
// Signal flow:
//   Detections → object_tracker ─(spatial_grid, association, kalman)→ Tracks
//   Frame timestamp → traffic_light → LightPhase / red occurrence
//
// Both feed the rule evaluators in crate::rules.

pub mod association;
pub mod kalman;
pub mod object_tracker;
pub mod spatial_grid;
pub mod traffic_light;

pub use association::{associate, Assignment, Prediction};
pub use object_tracker::{ObjectTracker, Track, TrackState, TrackerStep};
pub use spatial_grid::SpatialGrid;
pub use traffic_light::{LightCycle, LightPhase, TrafficLightState};
