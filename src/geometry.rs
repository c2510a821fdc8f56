// src/geometry.rs
//
// Planar primitives used by the rules: segment crossing for the stop line,
// polygon containment for lanes, and direction similarity.

use crate::types::Point;

fn orientation(a: Point, b: Point, c: Point) -> f32 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// True when segment `p1-p2` touches or crosses segment `q1-q2`.
pub fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    // Collinear / endpoint-touching cases
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// True when motion `from-to` moves from one side of line `a-b` to the
/// other (or onto it) within the segment's extent. A point that does not
/// move, or moves along the line, never crosses.
pub fn crosses_line(from: Point, to: Point, a: Point, b: Point) -> bool {
    let side = |p: Point| orientation(a, b, p).partial_cmp(&0.0);
    from != to && side(from) != side(to) && segments_intersect(from, to, a, b)
}

/// Even-odd ray casting.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y) {
            let x_cross = (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x;
            if point.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// Cosine of the angle between two vectors; 0.0 if either is degenerate.
pub fn cosine_similarity(a: Point, b: Point) -> f32 {
    let denom = a.norm() * b.norm();
    if denom < 1e-9 {
        return 0.0;
    }
    (a.dot(&b) / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: f32, y: f32) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_crossing_segments() {
        assert!(segments_intersect(p(0.0, 0.0), p(10.0, 10.0), p(0.0, 10.0), p(10.0, 0.0)));
        assert!(!segments_intersect(p(0.0, 0.0), p(1.0, 1.0), p(5.0, 0.0), p(6.0, 0.0)));
    }

    #[test]
    fn test_touching_endpoint_counts() {
        // Vertical motion that ends exactly on the line
        assert!(segments_intersect(p(5.0, 0.0), p(5.0, 10.0), p(0.0, 10.0), p(10.0, 10.0)));
    }

    #[test]
    fn test_crossing_needs_a_side_change() {
        let (a, b) = (p(0.0, 10.0), p(10.0, 10.0));
        assert!(crosses_line(p(5.0, 0.0), p(5.0, 20.0), a, b));
        assert!(crosses_line(p(5.0, 0.0), p(5.0, 10.0), a, b));
        // Parked on the line
        assert!(!crosses_line(p(5.0, 10.0), p(5.0, 10.0), a, b));
        // Sliding along it
        assert!(!crosses_line(p(2.0, 10.0), p(6.0, 10.0), a, b));
        // Past the end of the line
        assert!(!crosses_line(p(15.0, 0.0), p(15.0, 20.0), a, b));
    }

    #[test]
    fn test_parallel_disjoint() {
        assert!(!segments_intersect(p(0.0, 0.0), p(10.0, 0.0), p(0.0, 1.0), p(10.0, 1.0)));
    }

    #[test]
    fn test_point_in_polygon() {
        let square = [p(0.0, 0.0), p(10.0, 0.0), p(10.0, 10.0), p(0.0, 10.0)];
        assert!(point_in_polygon(p(5.0, 5.0), &square));
        assert!(!point_in_polygon(p(15.0, 5.0), &square));
        assert!(!point_in_polygon(p(5.0, 5.0), &square[..2]));
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(p(1.0, 0.0), p(2.0, 0.0)) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(p(0.0, 1.0), p(0.0, -1.0)) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(p(0.0, 0.0), p(1.0, 0.0)), 0.0);
    }
}
