use serde::Serialize;

use crate::constants::{
    MAX_PLACEMENT_ATTEMPTS, OBSTACLE_MARGIN, OBSTACLE_MAX_SIZE, OBSTACLE_MIN_SIZE,
    SAFE_ZONE_RADIUS,
};
use crate::geometry::{circle_intersects_rect, swept_circle_intersects_rect, Point, Rect};
use crate::rng::Rng;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Obstacle {
    pub id: String,
    #[serde(flatten)]
    pub rect: Rect,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Arena {
    pub width: f64,
    pub height: f64,
    pub obstacles: Vec<Obstacle>,
}

impl Arena {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            obstacles: Vec::new(),
        }
    }

    /// Places up to `count` random obstacles. Each obstacle gets a bounded
    /// number of attempts; one that never finds a legal spot is skipped, so
    /// the arena may end up with fewer obstacles than asked for.
    pub fn generate_obstacles(&mut self, count: usize, safe_zones: &[Point], rng: &mut Rng) -> usize {
        let mut placed = 0;
        for _ in 0..count {
            for _ in 0..MAX_PLACEMENT_ATTEMPTS {
                let width = rng.range(OBSTACLE_MIN_SIZE, OBSTACLE_MAX_SIZE);
                let height = rng.range(OBSTACLE_MIN_SIZE, OBSTACLE_MAX_SIZE);
                if width > self.width || height > self.height {
                    continue;
                }
                let rect = Rect::new(
                    rng.range(0.0, self.width - width),
                    rng.range(0.0, self.height - height),
                    width,
                    height,
                );
                if self.is_valid_obstacle_placement(&rect, safe_zones) {
                    let id = format!("obstacle_{}", self.obstacles.len() + 1);
                    self.obstacles.push(Obstacle { id, rect });
                    placed += 1;
                    break;
                }
            }
        }
        placed
    }

    pub fn is_valid_obstacle_placement(&self, rect: &Rect, safe_zones: &[Point]) -> bool {
        if rect.x < 0.0 || rect.y < 0.0 || rect.right() > self.width || rect.bottom() > self.height
        {
            return false;
        }
        if safe_zones
            .iter()
            .any(|zone| circle_intersects_rect(*zone, SAFE_ZONE_RADIUS, rect))
        {
            return false;
        }
        !self
            .obstacles
            .iter()
            .any(|obstacle| obstacle.rect.intersects(rect, OBSTACLE_MARGIN))
    }

    pub fn is_within_bounds(&self, pos: Point, radius: f64) -> bool {
        pos.x - radius >= 0.0
            && pos.x + radius <= self.width
            && pos.y - radius >= 0.0
            && pos.y + radius <= self.height
    }

    /// Bounds check plus a circle test against every obstacle.
    pub fn is_position_valid(&self, pos: Point, radius: f64) -> bool {
        self.is_within_bounds(pos, radius)
            && !self
                .obstacles
                .iter()
                .any(|obstacle| circle_intersects_rect(pos, radius, &obstacle.rect))
    }

    /// First obstacle touched by a circle of `radius` travelling `from`→`to`.
    pub fn first_obstacle_on_path(&self, from: Point, to: Point, radius: f64) -> Option<&Obstacle> {
        self.obstacles
            .iter()
            .filter(|obstacle| swept_circle_intersects_rect(from, to, radius, &obstacle.rect))
            .min_by(|a, b| {
                let da = from.distance_to(a.rect.closest_point(from));
                let db = from.distance_to(b.rect.closest_point(from));
                da.total_cmp(&db)
            })
    }

    /// True when a projectile of `radius` can travel `a`→`b` without touching
    /// an obstacle.
    pub fn check_line_of_sight(&self, a: Point, b: Point, radius: f64) -> bool {
        check_line_of_sight(a, b, radius, &self.obstacles)
    }
}

pub fn check_line_of_sight(a: Point, b: Point, radius: f64, obstacles: &[Obstacle]) -> bool {
    !obstacles
        .iter()
        .any(|obstacle| swept_circle_intersects_rect(a, b, radius, &obstacle.rect))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ARENA_HEIGHT, ARENA_WIDTH};
    use crate::geometry::distance;

    fn safe_zones() -> Vec<Point> {
        vec![Point::new(120.0, 300.0), Point::new(680.0, 300.0)]
    }

    #[test]
    fn generated_obstacles_respect_safe_zones_spacing_and_bounds() {
        for seed in 0..200u32 {
            let mut arena = Arena::new(ARENA_WIDTH, ARENA_HEIGHT);
            let mut rng = Rng::new(seed);
            let zones = safe_zones();
            let placed = arena.generate_obstacles(8, &zones, &mut rng);
            assert_eq!(placed, arena.obstacles.len());
            assert!(placed <= 8);

            for (idx, obstacle) in arena.obstacles.iter().enumerate() {
                let rect = obstacle.rect;
                assert!(rect.x >= 0.0 && rect.y >= 0.0);
                assert!(rect.right() <= arena.width && rect.bottom() <= arena.height);
                for zone in &zones {
                    assert!(
                        distance(*zone, rect.closest_point(*zone)) > SAFE_ZONE_RADIUS,
                        "seed={seed} obstacle overlaps safe zone"
                    );
                }
                for other in arena.obstacles.iter().skip(idx + 1) {
                    assert!(
                        !rect.intersects(&other.rect, OBSTACLE_MARGIN),
                        "seed={seed} obstacles too close"
                    );
                }
            }
        }
    }

    #[test]
    fn crowded_arena_silently_places_fewer_obstacles() {
        let mut arena = Arena::new(200.0, 200.0);
        let mut rng = Rng::new(11);
        let placed = arena.generate_obstacles(50, &[Point::new(100.0, 100.0)], &mut rng);
        assert!(placed < 50);
    }

    #[test]
    fn position_validity_checks_bounds_and_obstacles() {
        let mut arena = Arena::new(400.0, 400.0);
        arena.obstacles.push(Obstacle {
            id: "obstacle_1".to_string(),
            rect: Rect::new(100.0, 100.0, 50.0, 50.0),
        });
        assert!(arena.is_position_valid(Point::new(50.0, 50.0), 20.0));
        assert!(!arena.is_position_valid(Point::new(10.0, 50.0), 20.0));
        assert!(!arena.is_position_valid(Point::new(125.0, 125.0), 20.0));
        assert!(!arena.is_position_valid(Point::new(80.0, 125.0), 20.0));
        assert!(arena.is_position_valid(Point::new(79.0, 125.0), 20.0));
    }

    #[test]
    fn line_of_sight_is_blocked_by_obstacle_between_points() {
        let mut arena = Arena::new(400.0, 400.0);
        arena.obstacles.push(Obstacle {
            id: "obstacle_1".to_string(),
            rect: Rect::new(190.0, 100.0, 20.0, 200.0),
        });
        assert!(!arena.check_line_of_sight(Point::new(50.0, 200.0), Point::new(350.0, 200.0), 3.0));
        assert!(arena.check_line_of_sight(Point::new(50.0, 50.0), Point::new(350.0, 50.0), 3.0));
    }
}
