use super::*;

impl Game {
    /// Turns what each behavior staged this tick into queued commands or
    /// instant effects.
    pub(super) fn apply_actions(&mut self) {
        for idx in 0..self.robots.len() {
            let actions = mem::take(&mut self.robots[idx].next_actions);
            for action in actions {
                self.apply_action(idx, action);
            }
        }
    }

    fn apply_action(&mut self, idx: usize, action: Action) {
        match action {
            Action::Move { distance, speed } => {
                if distance.abs() >= COMMAND_TOLERANCE && speed > 0.0 {
                    self.robots[idx].queue.push_back(Command::Move {
                        speed: speed.copysign(distance),
                        remaining: distance.abs(),
                    });
                }
            }
            Action::Rotate { angle, speed } => {
                if angle.abs() >= COMMAND_TOLERANCE && speed > 0.0 {
                    self.robots[idx].queue.push_back(Command::Rotate {
                        speed: speed.copysign(angle),
                        remaining: angle.abs(),
                    });
                }
            }
            Action::EndSequence => self.robots[idx].queue.push_back(Command::EndSequence),
            Action::Aim { angle, speed } => self.aim(idx, angle, speed),
            Action::Fire => self.fire(idx),
            Action::Stop { source } => {
                let robot = &mut self.robots[idx];
                if robot.clear_queue() {
                    self.events.push(GameEvent::ActionStopped {
                        robot_id: robot.id.clone(),
                        reason: StopReason::UserCommand,
                        source,
                    });
                }
            }
            Action::Path {
                waypoints,
                destination,
            } => {
                let robot = &mut self.robots[idx];
                robot.path = waypoints;
                robot.destination = Some(destination);
            }
        }
    }

    /// Retargets an active rotation, or starts one on an idle robot. A robot
    /// busy moving keeps moving.
    fn aim(&mut self, idx: usize, angle: f64, speed: f64) {
        if angle.abs() < COMMAND_TOLERANCE || speed <= 0.0 {
            return;
        }
        let command = Command::Rotate {
            speed: speed.copysign(angle),
            remaining: angle.abs(),
        };
        let queue = &mut self.robots[idx].queue;
        match queue.front_mut() {
            Some(head) if matches!(head, Command::Rotate { .. }) => *head = command,
            Some(_) => {}
            None => queue.push_back(command),
        }
    }

    fn fire(&mut self, idx: usize) {
        if !self.robots[idx].can_fire() {
            return;
        }
        let id = self.make_id("projectile");
        let robot = &mut self.robots[idx];
        let origin = robot.position.advance(robot.rotation, robot.radius());
        robot.battery.energy -= robot.cannon.energy_cost;
        robot.cooldown = robot.cannon.fire_rate;
        robot.stats.shots_fired += 1;
        self.projectiles.push(Projectile::new(
            id,
            robot.id.clone(),
            origin,
            robot.rotation,
            robot.cannon.damage,
            robot.cannon.range,
        ));
    }
}
