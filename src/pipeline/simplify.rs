//! Ring simplification that never changes topology.
//!
//! Each closed ring is reduced with Ramer–Douglas–Peucker. The reduced ring is
//! only accepted if it keeps its orientation, stays simple, does not touch any
//! neighbouring ring and leaves every neighbour on the same side as before.
//! Otherwise the ring keeps its original points.

use super::compose::{signed_area, Point};

const CELL: f64 = 32.0;

/// Simplify every ring in place within `tolerance` units.
pub fn simplify_rings(rings: &mut [Vec<Point>], tolerance: f64) {
    if tolerance <= 0.0 || rings.is_empty() {
        return;
    }
    let index = RingIndex::new(rings);

    for i in 0..rings.len() {
        if rings[i].len() <= 4 {
            continue;
        }
        let candidate = simplify_closed(&rings[i], tolerance);
        if candidate.len() == rings[i].len() || candidate.len() < 3 {
            continue;
        }
        if !same_orientation(&rings[i], &candidate) || !is_simple(&candidate) {
            continue;
        }
        let neighbours = index.neighbours(i);
        let clashes = neighbours.iter().any(|&j| {
            rings_touch(&candidate, &rings[j]) || side_changed(&rings[i], &candidate, &rings[j])
        });
        if !clashes {
            rings[i] = candidate;
        }
    }
}

/// Ramer–Douglas–Peucker over a closed ring, anchored at the first point and
/// the point farthest from it.
pub fn simplify_closed(ring: &[Point], tolerance: f64) -> Vec<Point> {
    let n = ring.len();
    if n <= 3 {
        return ring.to_vec();
    }
    let mut far = 0;
    let mut far_d = 0.0;
    for (i, p) in ring.iter().enumerate() {
        let d = dist_sq(ring[0], *p);
        if d > far_d {
            far = i;
            far_d = d;
        }
    }
    if far == 0 {
        return ring.to_vec();
    }

    let mut seq = ring.to_vec();
    seq.push(ring[0]);
    let mut keep = vec![false; n + 1];
    keep[0] = true;
    keep[far] = true;
    keep[n] = true;
    rdp(&seq, 0, far, tolerance, &mut keep);
    rdp(&seq, far, n, tolerance, &mut keep);

    (0..n).filter(|&i| keep[i]).map(|i| seq[i]).collect()
}

fn rdp(points: &[Point], first: usize, last: usize, tolerance: f64, keep: &mut [bool]) {
    let mut stack = vec![(first, last)];
    while let Some((a, b)) = stack.pop() {
        if b <= a + 1 {
            continue;
        }
        let mut idx = a;
        let mut dmax = 0.0;
        for i in a + 1..b {
            let d = perpendicular_distance(points[i], points[a], points[b]);
            if d > dmax {
                idx = i;
                dmax = d;
            }
        }
        if dmax > tolerance {
            keep[idx] = true;
            stack.push((a, idx));
            stack.push((idx, b));
        }
    }
}

fn dist_sq(a: Point, b: Point) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    dx * dx + dy * dy
}

fn perpendicular_distance(p: Point, a: Point, b: Point) -> f64 {
    let len_sq = dist_sq(a, b);
    if len_sq == 0.0 {
        return dist_sq(p, a).sqrt();
    }
    ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs() / len_sq.sqrt()
}

fn same_orientation(a: &[Point], b: &[Point]) -> bool {
    let sa = signed_area(a);
    let sb = signed_area(b);
    sb != 0.0 && (sa > 0.0) == (sb > 0.0)
}

fn orient(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Whether two segments meet anywhere other than at an endpoint they share.
fn segments_conflict(a0: Point, a1: Point, b0: Point, b1: Point) -> bool {
    if a0.x.max(a1.x) < b0.x.min(b1.x)
        || b0.x.max(b1.x) < a0.x.min(a1.x)
        || a0.y.max(a1.y) < b0.y.min(b1.y)
        || b0.y.max(b1.y) < a0.y.min(a1.y)
    {
        return false;
    }
    let d1 = orient(b0, b1, a0);
    let d2 = orient(b0, b1, a1);
    let d3 = orient(a0, a1, b0);
    let d4 = orient(a0, a1, b1);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0)) && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0)) {
        return true;
    }
    let shared = |c: Point| (c == a0 || c == a1) && (c == b0 || c == b1);
    (d1 == 0.0 && on_segment(b0, b1, a0) && !shared(a0))
        || (d2 == 0.0 && on_segment(b0, b1, a1) && !shared(a1))
        || (d3 == 0.0 && on_segment(a0, a1, b0) && !shared(b0))
        || (d4 == 0.0 && on_segment(a0, a1, b1) && !shared(b1))
}

fn segments(ring: &[Point]) -> impl Iterator<Item = (Point, Point)> + '_ {
    (0..ring.len()).map(move |i| (ring[i], ring[(i + 1) % ring.len()]))
}

fn is_simple(ring: &[Point]) -> bool {
    let n = ring.len();
    for i in 0..n {
        let (a0, a1) = (ring[i], ring[(i + 1) % n]);
        // spike: the next segment doubles back over this one
        let a2 = ring[(i + 2) % n];
        if orient(a0, a1, a2) == 0.0 && (a1.x - a0.x) * (a2.x - a1.x) + (a1.y - a0.y) * (a2.y - a1.y) < 0.0 {
            return false;
        }
        for j in i + 2..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments_conflict(a0, a1, ring[j], ring[(j + 1) % n]) {
                return false;
            }
        }
    }
    true
}

fn rings_touch(a: &[Point], b: &[Point]) -> bool {
    let bb = bbox(b);
    segments(a).any(|(a0, a1)| {
        overlaps(segment_bbox(a0, a1), bb) && segments(b).any(|(b0, b1)| segments_conflict(a0, a1, b0, b1))
    })
}

/// Even-odd containment; callers never ask about points on the boundary.
fn contains(ring: &[Point], p: Point) -> bool {
    let mut inside = false;
    for (a, b) in segments(ring) {
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

fn side_changed(original: &[Point], candidate: &[Point], other: &[Point]) -> bool {
    if other.len() < 2 {
        return false;
    }
    // Midpoints of lattice edges never sit on another ring's boundary.
    let probe = Point::new((other[0].x + other[1].x) / 2.0, (other[0].y + other[1].y) / 2.0);
    contains(original, probe) != contains(candidate, probe)
}

type BBox = (f64, f64, f64, f64);

fn bbox(ring: &[Point]) -> BBox {
    ring.iter().fold((f64::MAX, f64::MAX, f64::MIN, f64::MIN), |(x0, y0, x1, y1), p| {
        (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y))
    })
}

fn segment_bbox(a: Point, b: Point) -> BBox {
    (a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
}

fn overlaps(a: BBox, b: BBox) -> bool {
    a.0 <= b.2 && b.0 <= a.2 && a.1 <= b.3 && b.1 <= a.3
}

/// Coarse grid of ring bounding boxes. Simplified rings keep a subset of
/// their points, so their boxes only shrink and the index stays valid.
struct RingIndex {
    boxes: Vec<BBox>,
    cols: usize,
    cells: Vec<Vec<usize>>,
}

impl RingIndex {
    fn new(rings: &[Vec<Point>]) -> Self {
        let boxes: Vec<BBox> = rings.iter().map(|r| bbox(r)).collect();
        let max_x = boxes.iter().map(|b| b.2).fold(0.0, f64::max);
        let max_y = boxes.iter().map(|b| b.3).fold(0.0, f64::max);
        let cols = (max_x / CELL) as usize + 1;
        let rows = (max_y / CELL) as usize + 1;
        let mut cells = vec![Vec::new(); cols * rows];
        for (i, b) in boxes.iter().enumerate() {
            for (cx, cy) in Self::cells_of(*b) {
                cells[cy * cols + cx].push(i);
            }
        }
        Self { boxes, cols, cells }
    }

    fn cells_of(b: BBox) -> impl Iterator<Item = (usize, usize)> {
        let (x0, y0) = ((b.0.max(0.0) / CELL) as usize, (b.1.max(0.0) / CELL) as usize);
        let (x1, y1) = ((b.2.max(0.0) / CELL) as usize, (b.3.max(0.0) / CELL) as usize);
        (y0..=y1).flat_map(move |cy| (x0..=x1).map(move |cx| (cx, cy)))
    }

    fn neighbours(&self, i: usize) -> Vec<usize> {
        let mine = self.boxes[i];
        let mut out: Vec<usize> = Self::cells_of(mine)
            .flat_map(|(cx, cy)| self.cells[cy * self.cols + cx].iter().copied())
            .filter(|&j| j != i && overlaps(self.boxes[j], mine))
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Quality;

    fn pts(v: &[(f64, f64)]) -> Vec<Point> {
        v.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    // A rectangle whose top edge carries a 0.1 high bump at x = 50.
    fn bumped() -> Vec<Point> {
        pts(&[(0.0, 0.0), (50.0, 0.1), (100.0, 0.0), (100.0, 10.0), (0.0, 10.0)])
    }

    #[test]
    fn rdp_drops_points_within_tolerance() {
        let out = simplify_closed(&bumped(), 0.2);
        assert_eq!(out, pts(&[(0.0, 0.0), (100.0, 0.0), (100.0, 10.0), (0.0, 10.0)]));
    }

    #[test]
    fn rdp_keeps_points_beyond_tolerance() {
        assert_eq!(simplify_closed(&bumped(), 0.05), bumped());
    }

    // Five two-wide steps down to (10, 5), closed along the bottom and left.
    fn staircase() -> Vec<Point> {
        let mut v = vec![(0.0, 0.0)];
        for i in 0..5 {
            let x = 2.0 * i as f64 + 2.0;
            v.push((x, i as f64));
            v.push((x, i as f64 + 1.0));
        }
        v.push((0.0, 5.0));
        pts(&v)
    }

    #[test]
    fn quality_tiers_flatten_staircases_differently() {
        let mut standard = vec![staircase()];
        simplify_rings(&mut standard, Quality::Standard.tolerance());
        assert_eq!(standard[0], pts(&[(0.0, 0.0), (10.0, 5.0), (0.0, 5.0)]));

        let mut high = vec![staircase()];
        simplify_rings(&mut high, Quality::High.tolerance());
        assert!(high[0].len() > standard[0].len());
    }

    #[test]
    fn zero_tolerance_is_a_no_op() {
        let mut rings = vec![bumped()];
        simplify_rings(&mut rings, 0.0);
        assert_eq!(rings[0], bumped());
    }

    #[test]
    fn simplification_keeps_orientation() {
        let mut rings = vec![bumped()];
        assert!((signed_area(&rings[0]) - 995.0).abs() < 1e-9);
        simplify_rings(&mut rings, 0.2);
        assert_eq!(rings[0].len(), 4);
        assert!((signed_area(&rings[0]) - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn simplification_rejected_when_it_would_touch_a_neighbour() {
        // The straightened top edge would run along this ring's bottom edge.
        let above = pts(&[(45.0, -1.0), (55.0, -1.0), (55.0, 0.0), (45.0, 0.0)]);
        let mut rings = vec![bumped(), above.clone()];
        simplify_rings(&mut rings, 0.2);
        assert_eq!(rings[0], bumped());
        assert_eq!(rings[1], above);
    }

    #[test]
    fn crossing_segments_conflict_shared_endpoints_do_not() {
        let p = Point::new;
        assert!(segments_conflict(p(0.0, 0.0), p(2.0, 2.0), p(0.0, 2.0), p(2.0, 0.0)));
        assert!(!segments_conflict(p(0.0, 0.0), p(1.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)));
        assert!(segments_conflict(p(0.0, 0.0), p(2.0, 0.0), p(1.0, 0.0), p(1.0, 1.0)));
        assert!(!segments_conflict(p(0.0, 0.0), p(1.0, 0.0), p(0.0, 1.0), p(1.0, 1.0)));
    }

    #[test]
    fn self_intersecting_ring_is_not_simple() {
        let bowtie = pts(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0)]);
        assert!(!is_simple(&bowtie));
        assert!(is_simple(&pts(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0)])));
    }

    #[test]
    fn containment_probe() {
        let sq = pts(&[(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]);
        assert!(contains(&sq, Point::new(1.5, 2.0)));
        assert!(!contains(&sq, Point::new(5.5, 2.0)));
    }
}
