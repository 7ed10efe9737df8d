use super::*;

impl Game {
    /// Passive upkeep: cannon cooldown and battery regen.
    pub(super) fn update_robot_state(&mut self) {
        for robot in &mut self.robots {
            robot.cooldown = robot.cooldown.saturating_sub(1);
            robot.battery.energy =
                (robot.battery.energy + robot.battery.recharge_rate).min(robot.battery.max_energy);
        }
    }
}
