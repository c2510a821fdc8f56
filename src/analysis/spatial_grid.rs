// src/analysis/spatial_grid.rs
//
// Uniform grid over image space for neighbour lookups between tracks.
//
// Each track id lives in exactly one cell (⌊x/cell⌋, ⌊y/cell⌋). A radius
// query scans the square block of cells within ⌈r/cell⌉ of the query cell,
// which covers the whole disc, so the result never misses a true neighbour.

use crate::types::Point;
use std::collections::{HashMap, HashSet};

type Cell = (i32, i32);

#[derive(Debug, Clone)]
pub struct SpatialGrid {
    cell_size: f32,
    cells: HashMap<Cell, HashSet<u32>>,
    /// track id → (cell, exact position)
    entries: HashMap<u32, (Cell, Point)>,
}

impl SpatialGrid {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size,
            cells: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    fn cell_of(&self, p: Point) -> Cell {
        (
            (p.x / self.cell_size).floor() as i32,
            (p.y / self.cell_size).floor() as i32,
        )
    }

    /// Insert or move a track. Only touches the cell maps when the cell changes.
    pub fn upsert(&mut self, track_id: u32, position: Point) {
        let cell = self.cell_of(position);
        match self.entries.insert(track_id, (cell, position)) {
            Some((previous, _)) if previous == cell => return,
            Some((previous, _)) => self.detach(previous, track_id),
            None => {}
        }
        self.cells.entry(cell).or_default().insert(track_id);
    }

    pub fn remove(&mut self, track_id: u32) {
        if let Some((cell, _)) = self.entries.remove(&track_id) {
            self.detach(cell, track_id);
        }
    }

    fn detach(&mut self, cell: Cell, track_id: u32) {
        if let Some(ids) = self.cells.get_mut(&cell) {
            ids.remove(&track_id);
            if ids.is_empty() {
                self.cells.remove(&cell);
            }
        }
    }

    /// Candidate ids near `point`: a superset of every id within `radius`.
    pub fn query(&self, point: Point, radius: f32) -> Vec<u32> {
        let (cx, cy) = self.cell_of(point);
        let reach = (radius.max(0.0) / self.cell_size).ceil() as i32;
        let mut out = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                if let Some(ids) = self.cells.get(&(cx + dx, cy + dy)) {
                    out.extend(ids.iter().copied());
                }
            }
        }
        out.sort_unstable();
        out
    }

    /// Ids whose stored position is within `radius` (Euclidean) of `point`.
    pub fn query_within(&self, point: Point, radius: f32) -> Vec<u32> {
        let r2 = radius * radius;
        self.query(point, radius)
            .into_iter()
            .filter(|id| {
                self.entries
                    .get(id)
                    .is_some_and(|(_, p)| p.distance_sq(&point) <= r2)
            })
            .collect()
    }

    pub fn position(&self, track_id: u32) -> Option<Point> {
        self.entries.get(&track_id).map(|(_, p)| *p)
    }

    pub fn contains(&self, track_id: u32) -> bool {
        self.entries.contains_key(&track_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_moves_between_cells() {
        let mut grid = SpatialGrid::new(80.0);
        grid.upsert(1, Point::new(10.0, 10.0));
        assert_eq!(grid.query(Point::new(10.0, 10.0), 0.0), vec![1]);

        grid.upsert(1, Point::new(500.0, 500.0));
        assert!(grid.query(Point::new(10.0, 10.0), 0.0).is_empty());
        assert_eq!(grid.query(Point::new(500.0, 500.0), 0.0), vec![1]);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.cells.len(), 1);
    }

    #[test]
    fn test_remove_leaves_no_stale_entries() {
        let mut grid = SpatialGrid::new(80.0);
        grid.upsert(7, Point::new(100.0, 100.0));
        grid.remove(7);
        assert!(grid.is_empty());
        assert!(grid.cells.is_empty());
        assert!(grid.query(Point::new(100.0, 100.0), 500.0).is_empty());
    }

    #[test]
    fn test_query_is_superset_of_brute_force() {
        let mut grid = SpatialGrid::new(80.0);
        let mut points = Vec::new();
        // Deterministic scatter, including negative coordinates
        let mut seed: u32 = 12345;
        for id in 1..=300u32 {
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let x = (seed % 2400) as f32 - 200.0;
            seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
            let y = (seed % 1400) as f32 - 200.0;
            let p = Point::new(x, y);
            grid.upsert(id, p);
            points.push((id, p));
        }

        for (centre, radius) in [
            (Point::new(0.0, 0.0), 75.0),
            (Point::new(960.0, 540.0), 150.0),
            (Point::new(-150.0, 1100.0), 80.0),
            (Point::new(1234.5, 321.0), 33.0),
        ] {
            let candidates = grid.query(centre, radius);
            let exact = grid.query_within(centre, radius);
            for (id, p) in &points {
                if p.distance_to(&centre) <= radius {
                    assert!(candidates.contains(id), "query missed id {}", id);
                    assert!(exact.contains(id), "query_within missed id {}", id);
                }
            }
            for id in &exact {
                let p = grid.position(*id).unwrap();
                assert!(p.distance_to(&centre) <= radius + 1e-3);
            }
        }
    }
}
