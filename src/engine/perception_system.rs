use super::*;

impl Game {
    /// Refreshes every robot's radar caches and reports sightings.
    pub(super) fn update_perception(&mut self) {
        for idx in 0..self.robots.len() {
            let enemy = self
                .robots
                .iter()
                .enumerate()
                .find(|(other, _)| *other != idx)
                .and_then(|(_, enemy)| scan_for_enemy(&self.robots[idx], enemy));
            let obstacles = scan_for_obstacles(&self.robots[idx], &self.world.arena);

            let robot = &mut self.robots[idx];
            if let Some(scan) = &enemy {
                self.events.push(GameEvent::EnemyDetected {
                    robot_id: robot.id.clone(),
                    target_id: scan.id.clone(),
                    distance: scan.distance,
                    angle: scan.angle,
                });
            }
            robot.last_scan = enemy;
            robot.last_obstacle_scan = obstacles;
        }
    }
}

/// The enemy's bearing relative to `robot`'s heading, if it is within radar
/// range.
pub fn scan_for_enemy(robot: &Robot, enemy: &Robot) -> Option<EnemyScan> {
    let distance = robot.position.distance_to(enemy.position);
    if distance > robot.radar.range {
        return None;
    }
    Some(EnemyScan {
        id: enemy.id.clone(),
        distance,
        angle: relative_angle(robot.position, robot.rotation, enemy.position),
        x: enemy.position.x,
        y: enemy.position.y,
    })
}

/// Obstacles touched by the radar circle, nearest first.
pub fn scan_for_obstacles(robot: &Robot, arena: &Arena) -> Vec<ObstacleScan> {
    let mut seen: Vec<ObstacleScan> = arena
        .obstacles
        .iter()
        .filter(|obstacle| circle_intersects_rect(robot.position, robot.radar.range, &obstacle.rect))
        .map(|obstacle| {
            let rect = &obstacle.rect;
            ObstacleScan {
                id: obstacle.id.clone(),
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                distance: robot.position.distance_to(rect.closest_point(robot.position)),
                angle: relative_angle(robot.position, robot.rotation, rect.center()),
            }
        })
        .collect();
    seen.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    seen
}
