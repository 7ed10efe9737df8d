use crate::constants::{PROJECTILE_RADIUS, PROJECTILE_SPEED};
use crate::geometry::Point;
use crate::types::ProjectileView;

/// Straight-line shot. Speed and heading are fixed at creation.
#[derive(Clone, Debug, PartialEq)]
pub struct Projectile {
    pub id: String,
    pub owner_id: String,
    pub position: Point,
    pub previous: Point,
    pub rotation: f64,
    pub speed: f64,
    pub damage: f64,
    pub max_range: f64,
    pub traveled: f64,
}

impl Projectile {
    pub fn new(
        id: String,
        owner_id: String,
        origin: Point,
        rotation: f64,
        damage: f64,
        max_range: f64,
    ) -> Self {
        Self {
            id,
            owner_id,
            position: origin,
            previous: origin,
            rotation,
            speed: PROJECTILE_SPEED,
            damage,
            max_range,
            traveled: 0.0,
        }
    }

    pub fn radius(&self) -> f64 {
        PROJECTILE_RADIUS
    }

    /// Moves one tick along the heading; returns false once the shot has
    /// outrun its range.
    pub fn advance(&mut self) -> bool {
        self.previous = self.position;
        self.position = self.position.advance(self.rotation, self.speed);
        self.traveled += self.speed;
        self.traveled <= self.max_range
    }

    pub fn to_view(&self) -> ProjectileView {
        ProjectileView {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            x: self.position.x,
            y: self.position.y,
            rotation: self.rotation,
        }
    }
}
