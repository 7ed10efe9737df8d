use super::*;

/// How a projectile's flight ended this tick.
enum Impact {
    Obstacle(String),
    Robot(usize),
    Wall,
}

impl Game {
    /// Moves every projectile one tick and resolves what it ran into. A
    /// projectile ends with at most one impact: obstacles are tested first,
    /// then robots, then the arena edge.
    pub(super) fn update_projectiles(&mut self) {
        let mut in_flight = Vec::with_capacity(self.projectiles.len());
        for mut projectile in mem::take(&mut self.projectiles) {
            if !projectile.advance() {
                continue;
            }
            match self.find_impact(&projectile) {
                Some(impact) => self.resolve_impact(&projectile, impact),
                None => in_flight.push(projectile),
            }
        }
        self.projectiles = in_flight;
    }

    fn find_impact(&self, projectile: &Projectile) -> Option<Impact> {
        let (from, to) = (projectile.previous, projectile.position);
        let radius = projectile.radius();
        if let Some(obstacle) = self.world.arena.first_obstacle_on_path(from, to, radius) {
            return Some(Impact::Obstacle(obstacle.id.clone()));
        }
        let hit = self.robots.iter().position(|robot| {
            robot.id != projectile.owner_id
                && swept_circle_intersects_rect(from, to, radius, &robot.bounding_box())
        });
        if let Some(idx) = hit {
            return Some(Impact::Robot(idx));
        }
        if !self.world.arena.is_within_bounds(to, 0.0) {
            return Some(Impact::Wall);
        }
        None
    }

    fn resolve_impact(&mut self, projectile: &Projectile, impact: Impact) {
        let Point { x, y } = projectile.position;
        match impact {
            Impact::Obstacle(obstacle_id) => self.events.push(GameEvent::ProjectileHitObstacle {
                owner_id: projectile.owner_id.clone(),
                projectile_id: projectile.id.clone(),
                obstacle_id,
                x,
                y,
            }),
            Impact::Wall => self.events.push(GameEvent::ProjectileHitWall {
                owner_id: projectile.owner_id.clone(),
                projectile_id: projectile.id.clone(),
                x: x.clamp(0.0, self.world.arena.width),
                y: y.clamp(0.0, self.world.arena.height),
            }),
            Impact::Robot(idx) => {
                let damage = projectile.damage;
                let target = &mut self.robots[idx];
                target.apply_damage(damage);
                target.stats.damage_taken += damage;
                let target_id = target.id.clone();
                if let Some(owner) = self
                    .robots
                    .iter_mut()
                    .find(|robot| robot.id == projectile.owner_id)
                {
                    owner.stats.shots_hit += 1;
                    owner.stats.damage_dealt += damage;
                }
                debug!(
                    owner_id = %projectile.owner_id,
                    target_id = %target_id,
                    damage,
                    "projectile hit"
                );
                self.events.push(GameEvent::EnemyHit {
                    robot_id: projectile.owner_id.clone(),
                    target_id: target_id.clone(),
                    projectile_id: projectile.id.clone(),
                    damage,
                });
                self.events.push(GameEvent::HitByProjectile {
                    robot_id: target_id,
                    owner_id: projectile.owner_id.clone(),
                    projectile_id: projectile.id.clone(),
                    damage,
                });
            }
        }
    }
}
