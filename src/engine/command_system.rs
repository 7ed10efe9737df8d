use super::*;

impl Game {
    /// Advances the head of every robot's command queue by one tick.
    pub(super) fn advance_commands(&mut self) {
        for idx in 0..self.robots.len() {
            let opponent = self.opponent_position(idx);
            self.complete_sequences(idx);
            let Some(head) = self.robots[idx].queue.front().cloned() else {
                continue;
            };
            match head {
                Command::Move { speed, remaining } => self.advance_move(idx, speed, remaining, opponent),
                Command::Rotate { speed, remaining } => self.advance_rotation(idx, speed, remaining),
                Command::EndSequence => {}
            }
            self.complete_sequences(idx);
        }
    }

    /// Pops sequence markers sitting at the head of the queue.
    fn complete_sequences(&mut self, idx: usize) {
        let robot = &mut self.robots[idx];
        while matches!(robot.queue.front(), Some(Command::EndSequence)) {
            robot.queue.pop_front();
            robot.path.clear();
            robot.destination = None;
            self.events.push(GameEvent::SequenceCompleted {
                robot_id: robot.id.clone(),
            });
        }
    }

    fn advance_move(&mut self, idx: usize, speed: f64, remaining: f64, opponent: Option<Point>) {
        let arena = &self.world.arena;
        let robot = &mut self.robots[idx];
        let step = robot.effective_speed(speed);
        let distance = step.abs().min(remaining);
        let cost = robot.move_cost(distance);
        if robot.battery.energy < cost {
            robot.queue.pop_front();
            self.events.push(stopped(&robot.id, StopReason::NoEnergy));
            return;
        }

        let from = robot.position;
        let to = from.advance(robot.rotation, distance.copysign(step));
        let radius = robot.radius();
        let blocked_by_arena = !arena.is_position_valid(to, radius)
            || arena.first_obstacle_on_path(from, to, radius).is_some();
        let blocked_by_opponent = opponent.is_some_and(|other| {
            let gap = to.distance_to(other);
            gap < radius * 2.0 && gap < from.distance_to(other)
        });
        if blocked_by_arena || blocked_by_opponent {
            robot.queue.pop_front();
            self.events.push(stopped(&robot.id, StopReason::Collision));
            return;
        }

        robot.position = to;
        robot.battery.energy -= cost;
        let remaining = remaining - distance;
        if remaining < COMMAND_TOLERANCE {
            robot.queue.pop_front();
            self.events.push(GameEvent::MoveCompleted {
                robot_id: robot.id.clone(),
            });
        } else if let Some(head) = robot.queue.front_mut() {
            *head = Command::Move { speed, remaining };
        }
    }

    fn advance_rotation(&mut self, idx: usize, speed: f64, remaining: f64) {
        let robot = &mut self.robots[idx];
        let step = robot.effective_speed(speed);
        let angle = step.abs().min(remaining);
        let cost = robot.rotation_cost(angle);
        if robot.battery.energy < cost {
            robot.queue.pop_front();
            self.events.push(stopped(&robot.id, StopReason::NoEnergy));
            return;
        }

        robot.rotation = normalize_angle(robot.rotation + angle.copysign(step));
        robot.battery.energy -= cost;
        let remaining = remaining - angle;
        if remaining < COMMAND_TOLERANCE {
            robot.queue.pop_front();
            self.events.push(GameEvent::RotationCompleted {
                robot_id: robot.id.clone(),
            });
        } else if let Some(head) = robot.queue.front_mut() {
            *head = Command::Rotate { speed, remaining };
        }
    }
}

fn stopped(robot_id: &str, reason: StopReason) -> GameEvent {
    GameEvent::ActionStopped {
        robot_id: robot_id.to_string(),
        reason,
        source: ENGINE_SOURCE.to_string(),
    }
}
