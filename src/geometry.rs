//! Geometry kernel. Pure functions, no state.
//!
//! Every predicate here is inclusive: touching counts as intersecting. The
//! collision and line-of-sight code relies on that so a robot resting exactly
//! against an obstacle is always "blocked", never undecided.

use serde::{Deserialize, Serialize};

const EPSILON: f64 = 1e-9;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(self, other: Point) -> f64 {
        distance(self, other)
    }

    /// Moves `distance` units along `heading_deg`.
    pub fn advance(self, heading_deg: f64, distance: f64) -> Point {
        let radians = heading_deg.to_radians();
        Point {
            x: self.x + radians.cos() * distance,
            y: self.y + radians.sin() * distance,
        }
    }
}

/// Axis-aligned rectangle, origin at the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.right() && p.y >= self.y && p.y <= self.bottom()
    }

    /// Overlap test with every side pushed out by `margin`.
    pub fn intersects(&self, other: &Rect, margin: f64) -> bool {
        self.x - margin <= other.right()
            && self.right() + margin >= other.x
            && self.y - margin <= other.bottom()
            && self.bottom() + margin >= other.y
    }

    pub fn closest_point(&self, p: Point) -> Point {
        Point::new(
            p.x.clamp(self.x, self.right()),
            p.y.clamp(self.y, self.bottom()),
        )
    }

    pub fn edges(&self) -> [(Point, Point); 4] {
        let tl = Point::new(self.x, self.y);
        let tr = Point::new(self.right(), self.y);
        let br = Point::new(self.right(), self.bottom());
        let bl = Point::new(self.x, self.bottom());
        [(tl, tr), (tr, br), (br, bl), (bl, tl)]
    }
}

pub fn distance(a: Point, b: Point) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Distance from `p` to the segment `a`-`b`. A zero-length segment degrades
/// to the point distance.
pub fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq <= EPSILON {
        return distance(p, a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    distance(p, Point::new(a.x + t * dx, a.y + t * dy))
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) - EPSILON
        && p.x <= a.x.max(b.x) + EPSILON
        && p.y >= a.y.min(b.y) - EPSILON
        && p.y <= a.y.max(b.y) + EPSILON
}

/// Segment `p1`-`p2` against `p3`-`p4`, collinear overlap and shared
/// endpoints included.
pub fn segments_intersect(p1: Point, p2: Point, p3: Point, p4: Point) -> bool {
    let d1 = orientation(p3, p4, p1);
    let d2 = orientation(p3, p4, p2);
    let d3 = orientation(p1, p2, p3);
    let d4 = orientation(p1, p2, p4);

    if ((d1 > EPSILON && d2 < -EPSILON) || (d1 < -EPSILON && d2 > EPSILON))
        && ((d3 > EPSILON && d4 < -EPSILON) || (d3 < -EPSILON && d4 > EPSILON))
    {
        return true;
    }

    (d1.abs() <= EPSILON && on_segment(p3, p4, p1))
        || (d2.abs() <= EPSILON && on_segment(p3, p4, p2))
        || (d3.abs() <= EPSILON && on_segment(p1, p2, p3))
        || (d4.abs() <= EPSILON && on_segment(p1, p2, p4))
}

pub fn segment_distance(a1: Point, a2: Point, b1: Point, b2: Point) -> f64 {
    if segments_intersect(a1, a2, b1, b2) {
        return 0.0;
    }
    distance_to_segment(a1, b1, b2)
        .min(distance_to_segment(a2, b1, b2))
        .min(distance_to_segment(b1, a1, a2))
        .min(distance_to_segment(b2, a1, a2))
}

pub fn circle_intersects_rect(center: Point, radius: f64, rect: &Rect) -> bool {
    distance(center, rect.closest_point(center)) <= radius
}

/// Circle of `radius` swept from `start` to `end` against `rect`.
pub fn swept_circle_intersects_rect(start: Point, end: Point, radius: f64, rect: &Rect) -> bool {
    if rect.contains(start) || rect.contains(end) {
        return true;
    }
    rect.edges()
        .iter()
        .any(|(a, b)| segment_distance(start, end, *a, *b) <= radius)
}

/// Wraps an angle in degrees into [-180, 180].
pub fn normalize_angle(degrees: f64) -> f64 {
    let mut angle = degrees % 360.0;
    if angle > 180.0 {
        angle -= 360.0;
    } else if angle < -180.0 {
        angle += 360.0;
    }
    angle
}

/// Absolute bearing in degrees from `from` to `to`.
pub fn bearing(from: Point, to: Point) -> f64 {
    (to.y - from.y).atan2(to.x - from.x).to_degrees()
}

/// Bearing to `to` relative to a body facing `heading_deg`, in [-180, 180].
pub fn relative_angle(from: Point, heading_deg: f64, to: Point) -> f64 {
    normalize_angle(bearing(from, to) - heading_deg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-6
    }

    #[test]
    fn zero_length_segment_uses_point_distance() {
        let a = Point::new(3.0, 4.0);
        assert!(approx_eq(distance_to_segment(Point::new(0.0, 0.0), a, a), 5.0));
    }

    #[test]
    fn distance_to_segment_projects_onto_interior() {
        let d = distance_to_segment(
            Point::new(5.0, 3.0),
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
        );
        assert!(approx_eq(d, 3.0));
    }

    #[test]
    fn crossing_and_touching_segments_intersect() {
        assert!(segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(10.0, 0.0),
        ));
        assert!(segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(5.0, 5.0),
        ));
        assert!(!segments_intersect(
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(5.0, 5.0),
        ));
    }

    #[test]
    fn circle_touching_rect_edge_counts_as_hit() {
        let rect = Rect::new(10.0, 10.0, 20.0, 20.0);
        assert!(circle_intersects_rect(Point::new(5.0, 20.0), 5.0, &rect));
        assert!(!circle_intersects_rect(Point::new(4.0, 20.0), 5.0, &rect));
    }

    #[test]
    fn swept_circle_catches_thin_obstacle_between_endpoints() {
        let wall = Rect::new(50.0, 0.0, 2.0, 100.0);
        let start = Point::new(40.0, 50.0);
        let end = Point::new(60.0, 50.0);
        assert!(!circle_intersects_rect(start, 1.0, &wall));
        assert!(!circle_intersects_rect(end, 1.0, &wall));
        assert!(swept_circle_intersects_rect(start, end, 1.0, &wall));
    }

    #[test]
    fn swept_circle_misses_parallel_rect() {
        let rect = Rect::new(0.0, 20.0, 100.0, 10.0);
        assert!(!swept_circle_intersects_rect(
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            5.0,
            &rect
        ));
    }

    #[test]
    fn angles_wrap_into_half_turns() {
        assert!(approx_eq(normalize_angle(190.0), -170.0));
        assert!(approx_eq(normalize_angle(-190.0), 170.0));
        assert!(approx_eq(normalize_angle(540.0), 180.0));
        assert!(approx_eq(
            relative_angle(Point::new(0.0, 0.0), 90.0, Point::new(10.0, 0.0)),
            -90.0
        ));
    }
}
