use std::mem;
use std::rc::Rc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{Action, Behavior, WorldView};
use crate::arena::Arena;
use crate::compiler::{compile, CompileError};
use crate::config::{ConfigError, MatchConfig};
use crate::constants::COMMAND_TOLERANCE;
use crate::geometry::{
    circle_intersects_rect, normalize_angle, relative_angle, swept_circle_intersects_rect, Point,
};
use crate::projectile::Projectile;
use crate::rng::Rng;
use crate::robot::{Command, Robot};
use crate::types::{
    EnemyScan, FinishReason, GameEvent, GameSnapshot, GameStatus, MatchSummary, ObstacleScan,
    StatsEntry, StopReason, ENGINE_SOURCE,
};

mod action_system;
mod command_system;
mod perception_system;
mod projectile_system;
mod robot_state_system;

pub use self::perception_system::{scan_for_enemy, scan_for_obstacles};

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no robot in slot {0}")]
    UnknownSlot(usize),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// One match between two behaviors.
///
/// `tick()` runs the systems in a fixed order: robot state, commands,
/// perception, behaviors, actions, projectiles. Events produced during a
/// tick are handed to behaviors on the following tick.
pub struct Game {
    config: MatchConfig,
    behaviors: [Rc<dyn Behavior>; 2],
    world: Rc<WorldView>,
    robots: Vec<Robot>,
    projectiles: Vec<Projectile>,
    rng: Rng,

    status: GameStatus,
    winner: Option<String>,
    finish_reason: Option<FinishReason>,
    tick_counter: u64,
    elapsed_ms: u64,
    events: Vec<GameEvent>,
    last_tick_events: Vec<GameEvent>,
    next_id_counter: u64,
}

impl Game {
    pub fn new(config: MatchConfig, behaviors: [Rc<dyn Behavior>; 2]) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut rng = Rng::new(config.seed);
        let (world, robots) = Self::setup(&config, &mut rng);
        info!(
            seed = config.seed,
            obstacles = world.arena.obstacles.len(),
            "match ready"
        );
        Ok(Self {
            config,
            behaviors,
            world: Rc::new(world),
            robots,
            projectiles: Vec::new(),
            rng,
            status: GameStatus::Idle,
            winner: None,
            finish_reason: None,
            tick_counter: 0,
            elapsed_ms: 0,
            events: Vec::new(),
            last_tick_events: Vec::new(),
            next_id_counter: 1,
        })
    }

    fn setup(config: &MatchConfig, rng: &mut Rng) -> (WorldView, Vec<Robot>) {
        let spawns = config.resolved_spawn_points();
        let safe_zones: Vec<Point> = spawns.iter().map(|spawn| spawn.position()).collect();

        let mut arena = Arena::new(config.arena_width, config.arena_height);
        let placed = arena.generate_obstacles(config.obstacle_count, &safe_zones, rng);
        if placed < config.obstacle_count {
            debug!(
                requested = config.obstacle_count,
                placed, "obstacle generation ran out of attempts"
            );
        }

        let robots = spawns
            .iter()
            .zip(config.robot_ids.iter().zip(config.loadouts.iter()))
            .map(|(spawn, (id, loadout))| {
                Robot::new(id.clone(), loadout, spawn.position(), spawn.rotation)
            })
            .collect();
        (WorldView::new(arena), robots)
    }

    // ---- lifecycle ----

    pub fn start(&mut self) {
        if self.status != GameStatus::Idle {
            debug!(status = ?self.status, "start ignored");
            return;
        }
        self.status = GameStatus::Running;
        info!(seed = self.config.seed, "match started");
    }

    pub fn pause(&mut self) {
        if self.status == GameStatus::Running {
            self.status = GameStatus::Paused;
            info!(tick = self.tick_counter, "match paused");
        }
    }

    pub fn resume(&mut self) {
        if self.status == GameStatus::Paused {
            self.status = GameStatus::Running;
            info!(tick = self.tick_counter, "match resumed");
        }
    }

    /// Rebuilds arena and robots from the config and keeps the installed
    /// behaviors. Everything else is discarded.
    pub fn reset(&mut self) {
        let mut rng = Rng::new(self.config.seed);
        let (world, robots) = Self::setup(&self.config, &mut rng);
        self.world = Rc::new(world);
        self.robots = robots;
        self.projectiles.clear();
        self.rng = rng;
        self.status = GameStatus::Idle;
        self.winner = None;
        self.finish_reason = None;
        self.tick_counter = 0;
        self.elapsed_ms = 0;
        self.events.clear();
        self.last_tick_events.clear();
        self.next_id_counter = 1;
        info!(seed = self.config.seed, "match reset");
    }

    /// Compiles `source` and swaps it in for `slot`. On any error the
    /// current behavior stays installed. Returns whether the script is a
    /// state machine.
    pub fn install_behavior(&mut self, slot: usize, source: &str) -> Result<bool, InstallError> {
        if slot >= self.behaviors.len() {
            return Err(InstallError::UnknownSlot(slot));
        }
        let compiled = compile(source)?;
        let state_machine = compiled.is_state_machine();
        self.set_behavior(slot, Rc::new(compiled))?;
        info!(slot, state_machine, "behavior installed");
        Ok(state_machine)
    }

    /// Replaces the behavior in `slot`. The robot's memory and queue are
    /// cleared so the new behavior starts from scratch.
    pub fn set_behavior(&mut self, slot: usize, behavior: Rc<dyn Behavior>) -> Result<(), InstallError> {
        let robot = self
            .robots
            .get_mut(slot)
            .ok_or(InstallError::UnknownSlot(slot))?;
        robot.memory.clear();
        robot.clear_queue();
        robot.next_actions.clear();
        self.behaviors[slot] = behavior;
        Ok(())
    }

    // ---- simulation ----

    pub fn tick(&mut self) {
        self.step(self.config.tick_ms);
    }

    /// Advances one tick, counting `dt_ms` toward the match clock. Does
    /// nothing unless the match is running.
    pub fn step(&mut self, dt_ms: u64) {
        if self.status != GameStatus::Running {
            return;
        }
        self.tick_counter += 1;
        self.elapsed_ms = self.elapsed_ms.saturating_add(dt_ms);
        self.last_tick_events = mem::take(&mut self.events);

        self.update_robot_state();
        self.advance_commands();
        self.update_perception();
        self.run_behaviors();
        self.apply_actions();
        self.update_projectiles();
        self.check_game_over();
    }

    fn run_behaviors(&mut self) {
        for idx in 0..self.robots.len() {
            let rng = self.rng.fork(idx as u32);
            let behavior = Rc::clone(&self.behaviors[idx]);
            let world = Rc::clone(&self.world);
            let robot = &mut self.robots[idx];
            let events = self
                .last_tick_events
                .iter()
                .filter(|event| event.concerns(&robot.id))
                .cloned()
                .collect();
            if let Err(err) =
                robot.compute_next_action(behavior.as_ref(), world, events, rng, self.tick_counter)
            {
                warn!(
                    robot_id = %robot.id,
                    tick = self.tick_counter,
                    error = %err,
                    "behavior failed, skipping its actions this tick"
                );
            }
        }
    }

    fn check_game_over(&mut self) {
        let destroyed: Vec<bool> = self.robots.iter().map(Robot::is_destroyed).collect();
        match destroyed.as_slice() {
            [true, true] => self.finish(None, FinishReason::MutualDestruction),
            [true, false] => self.finish(Some(1), FinishReason::Destroyed),
            [false, true] => self.finish(Some(0), FinishReason::Destroyed),
            _ => {
                let limit = self.config.time_limit_ms;
                if limit > 0 && self.elapsed_ms >= limit {
                    let winner = self.timeout_leader();
                    self.finish(winner, FinishReason::Timeout);
                }
            }
        }
    }

    /// Robot with more hull plus armor left, if any.
    fn timeout_leader(&self) -> Option<usize> {
        let remaining: Vec<f64> = self
            .robots
            .iter()
            .map(|robot| robot.hull() + robot.armor.hp.max(0.0))
            .collect();
        match remaining.as_slice() {
            [a, b] if a > b => Some(0),
            [a, b] if b > a => Some(1),
            _ => None,
        }
    }

    fn finish(&mut self, winner_idx: Option<usize>, reason: FinishReason) {
        self.status = GameStatus::Finished;
        self.winner = winner_idx.and_then(|idx| self.robots.get(idx)).map(|robot| robot.id.clone());
        self.finish_reason = Some(reason);
        info!(
            tick = self.tick_counter,
            winner = self.winner.as_deref().unwrap_or("draw"),
            reason = ?reason,
            "match finished"
        );
    }

    // ---- queries ----

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status == GameStatus::Finished
    }

    pub fn winner(&self) -> Option<&str> {
        self.winner.as_deref()
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_counter
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    pub fn arena(&self) -> &Arena {
        &self.world.arena
    }

    pub fn robots(&self) -> &[Robot] {
        &self.robots
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    /// Events behaviors were handed during the latest tick, i.e. the ones
    /// produced by the tick before it.
    pub fn last_tick_events(&self) -> &[GameEvent] {
        &self.last_tick_events
    }

    /// Events produced by the latest tick.
    pub fn current_events(&self) -> &[GameEvent] {
        &self.events
    }

    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            tick: self.tick_counter,
            status: self.status,
            winner: self.winner.clone(),
            elapsed_ms: self.elapsed_ms,
            arena: self.world.arena.clone(),
            robots: self.robots.iter().map(Robot::to_view).collect(),
            projectiles: self.projectiles.iter().map(Projectile::to_view).collect(),
            events: self.events.clone(),
            stats: self.stats(),
        }
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            winner: self.winner.clone(),
            reason: self.finish_reason,
            ticks: self.tick_counter,
            elapsed_ms: self.elapsed_ms,
            stats: self.stats(),
        }
    }

    fn stats(&self) -> Vec<StatsEntry> {
        self.robots
            .iter()
            .map(|robot| StatsEntry {
                robot_id: robot.id.clone(),
                stats: robot.stats.clone(),
            })
            .collect()
    }

    fn opponent_position(&self, idx: usize) -> Option<Point> {
        self.robots
            .iter()
            .enumerate()
            .find(|(other, _)| *other != idx)
            .map(|(_, robot)| robot.position)
    }

    fn make_id(&mut self, prefix: &str) -> String {
        let id = format!("{}_{}", prefix, self.next_id_counter);
        self.next_id_counter = self.next_id_counter.saturating_add(1);
        id
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::api::{BehaviorError, RobotApi};
    use crate::arena::Obstacle;
    use crate::behaviors::default_pair;
    use crate::config::SpawnPoint;
    use crate::constants::{ROBOT_RADIUS, TICK_MS};
    use crate::geometry::Rect;

    struct FnBehavior<F>(F);

    impl<F> Behavior for FnBehavior<F>
    where
        F: Fn(&mut RobotApi) -> Result<(), BehaviorError>,
    {
        fn run(&self, api: &mut RobotApi) -> Result<(), BehaviorError> {
            (self.0)(api)
        }
    }

    fn behavior(f: impl Fn(&mut RobotApi) + 'static) -> Rc<dyn Behavior> {
        Rc::new(FnBehavior(move |api: &mut RobotApi| {
            f(api);
            Ok(())
        }))
    }

    fn idle() -> Rc<dyn Behavior> {
        behavior(|_| {})
    }

    /// Open arena, robots facing each other 200 units apart.
    fn face_off_config() -> MatchConfig {
        MatchConfig {
            obstacle_count: 0,
            spawn_points: Some([
                SpawnPoint {
                    x: 300.0,
                    y: 300.0,
                    rotation: 0.0,
                },
                SpawnPoint {
                    x: 500.0,
                    y: 300.0,
                    rotation: 180.0,
                },
            ]),
            ..MatchConfig::default()
        }
    }

    fn running_game(first: Rc<dyn Behavior>, second: Rc<dyn Behavior>) -> Game {
        let mut game = Game::new(face_off_config(), [first, second]).expect("valid config");
        game.start();
        game
    }

    fn with_obstacle(game: &mut Game, rect: Rect) {
        let mut arena = game.world.arena.clone();
        arena.obstacles.push(Obstacle {
            id: "obstacle_test".to_string(),
            rect,
        });
        game.world = Rc::new(WorldView::new(arena));
    }

    fn shot(owner: &str, x: f64, y: f64, rotation: f64, damage: f64) -> Projectile {
        Projectile::new(
            format!("projectile_{owner}"),
            owner.to_string(),
            Point::new(x, y),
            rotation,
            damage,
            1_000.0,
        )
    }

    fn count_kind(events: &[GameEvent], kind: &str) -> usize {
        events.iter().filter(|event| event.kind() == kind).count()
    }

    #[test]
    fn lifecycle_transitions_are_guarded() {
        let mut game = Game::new(face_off_config(), [idle(), idle()]).expect("valid config");
        assert_eq!(game.status(), GameStatus::Idle);
        game.tick();
        assert_eq!(game.tick_count(), 0);

        game.resume();
        assert_eq!(game.status(), GameStatus::Idle);
        game.start();
        assert_eq!(game.status(), GameStatus::Running);
        game.tick();
        game.start();
        assert_eq!(game.status(), GameStatus::Running);

        game.pause();
        assert_eq!(game.status(), GameStatus::Paused);
        game.tick();
        assert_eq!(game.tick_count(), 1);
        assert_eq!(game.elapsed_ms(), TICK_MS);

        game.resume();
        game.tick();
        assert_eq!(game.tick_count(), 2);

        game.reset();
        assert_eq!(game.status(), GameStatus::Idle);
        assert_eq!(game.tick_count(), 0);
        assert_eq!(game.elapsed_ms(), 0);
        assert_eq!(game.robots()[0].position, Point::new(300.0, 300.0));
    }

    #[test]
    fn reset_rebuilds_the_same_arena() {
        let config = MatchConfig::default().with_seed(99);
        let mut game = Game::new(config, [idle(), idle()]).expect("valid config");
        let before = game.arena().obstacles.clone();
        assert!(!before.is_empty());
        game.start();
        for _ in 0..10 {
            game.tick();
        }
        game.reset();
        assert_eq!(game.arena().obstacles, before);
    }

    #[test]
    fn enemy_detection_reaches_behaviors_one_tick_later() {
        let watcher = behavior(|api| {
            if api.has_event("ENEMY_DETECTED") && api.memory().get("seen_at").is_none() {
                let tick = api.tick();
                api.set_memory("seen_at", tick);
            }
        });
        let mut game = running_game(watcher, idle());

        game.tick();
        assert_eq!(count_kind(game.current_events(), "ENEMY_DETECTED"), 2);
        assert_eq!(count_kind(game.last_tick_events(), "ENEMY_DETECTED"), 0);
        assert!(game.robots()[0].memory.get("seen_at").is_none());

        game.tick();
        assert_eq!(count_kind(game.last_tick_events(), "ENEMY_DETECTED"), 2);
        assert_eq!(
            game.robots()[0].memory.get("seen_at").and_then(Value::as_i64),
            Some(2)
        );
    }

    #[test]
    fn behaviors_only_see_their_own_events() {
        let counter = behavior(|api| {
            let foreign = api.events().iter().filter(|event| !event.concerns("robot_1")).count();
            api.set_memory("foreign", foreign as u64);
        });
        let mut game = running_game(counter, idle());
        game.tick();
        game.tick();
        assert_eq!(
            game.robots()[0].memory.get("foreign").and_then(Value::as_u64),
            Some(0)
        );
    }

    #[test]
    fn cannon_cooldown_blocks_second_shot() {
        let trigger_happy = behavior(|api| {
            api.fire();
        });
        let mut game = running_game(trigger_happy, idle());
        let fire_rate = game.robots()[0].cannon.fire_rate as usize;

        game.tick();
        assert_eq!(game.projectiles().len(), 1);
        for _ in 1..fire_rate {
            game.tick();
        }
        assert_eq!(game.robots()[0].stats.shots_fired, 1);
        game.tick();
        assert_eq!(game.robots()[0].stats.shots_fired, 2);
    }

    #[test]
    fn double_fire_in_one_tick_spawns_one_projectile() {
        let mut game = running_game(idle(), idle());
        let energy = game.robots[0].battery.energy;
        game.robots[0].next_actions = vec![Action::Fire, Action::Fire];
        game.apply_actions();
        assert_eq!(game.projectiles().len(), 1);
        assert_eq!(game.robots[0].cooldown, game.robots[0].cannon.fire_rate);
        assert_eq!(
            game.robots[0].battery.energy,
            energy - game.robots[0].cannon.energy_cost
        );
        let spawn = game.projectiles()[0].position;
        assert!((spawn.x - (300.0 + ROBOT_RADIUS)).abs() < 1e-9);
    }

    #[test]
    fn projectile_into_obstacle_yields_one_event() {
        let mut game = running_game(idle(), idle());
        with_obstacle(&mut game, Rect::new(340.0, 80.0, 40.0, 40.0));
        game.projectiles.push(shot("robot_1", 300.0, 100.0, 0.0, 10.0));

        for _ in 0..20 {
            game.update_projectiles();
        }
        assert!(game.projectiles().is_empty());
        assert_eq!(count_kind(&game.events, "PROJECTILE_HIT_OBSTACLE"), 1);
        assert_eq!(game.events.len(), 1);
    }

    #[test]
    fn projectile_leaving_arena_hits_wall_once() {
        let mut game = running_game(idle(), idle());
        game.projectiles.push(shot("robot_1", 780.0, 100.0, 0.0, 10.0));
        for _ in 0..10 {
            game.update_projectiles();
        }
        assert!(game.projectiles().is_empty());
        assert_eq!(game.events.len(), 1);
        assert!(matches!(
            &game.events[0],
            GameEvent::ProjectileHitWall { owner_id, .. } if owner_id == "robot_1"
        ));
    }

    #[test]
    fn projectile_out_of_range_is_dropped_silently() {
        let mut game = running_game(idle(), idle());
        let mut projectile = shot("robot_1", 100.0, 100.0, 90.0, 10.0);
        projectile.max_range = 10.0;
        game.projectiles.push(projectile);
        game.update_projectiles();
        assert_eq!(game.projectiles().len(), 1);
        game.update_projectiles();
        assert!(game.projectiles().is_empty());
        assert!(game.events.is_empty());
    }

    #[test]
    fn projectile_hit_damages_target_and_updates_stats() {
        let mut game = running_game(idle(), idle());
        game.projectiles.push(shot("robot_1", 470.0, 300.0, 0.0, 12.0));
        game.update_projectiles();

        assert!(game.projectiles().is_empty());
        assert_eq!(game.events.len(), 2);
        assert_eq!(count_kind(&game.events, "ENEMY_HIT"), 1);
        assert_eq!(count_kind(&game.events, "HIT_BY_PROJECTILE"), 1);
        assert_eq!(game.robots[1].armor.hp, game.robots[1].armor.max_hp - 12.0);
        assert_eq!(game.robots[0].stats.shots_hit, 1);
        assert_eq!(game.robots[0].stats.damage_dealt, 12.0);
        assert_eq!(game.robots[1].stats.damage_taken, 12.0);
    }

    #[test]
    fn owner_is_never_hit_by_its_own_projectile() {
        let mut game = running_game(idle(), idle());
        game.projectiles.push(shot("robot_1", 300.0, 300.0, 90.0, 12.0));
        game.update_projectiles();
        assert_eq!(game.projectiles().len(), 1);
        assert!(game.events.is_empty());
    }

    #[test]
    fn destroyed_robot_ends_match_in_same_tick() {
        let mut game = running_game(idle(), idle());
        game.robots[1].armor.hp = 0.0;
        game.robots[1].hull_hp = 5.0;
        game.projectiles.push(shot("robot_1", 470.0, 300.0, 0.0, 10.0));
        game.tick();

        assert!(game.is_finished());
        assert_eq!(game.winner(), Some("robot_1"));
        assert_eq!(game.finish_reason(), Some(FinishReason::Destroyed));
        assert_eq!(game.snapshot().robots[1].hull, 0.0);

        let tick = game.tick_count();
        game.tick();
        assert_eq!(game.tick_count(), tick);
    }

    #[test]
    fn simultaneous_destruction_is_a_draw() {
        let mut game = running_game(idle(), idle());
        for robot in &mut game.robots {
            robot.armor.hp = 0.0;
            robot.hull_hp = 5.0;
        }
        game.projectiles.push(shot("robot_1", 470.0, 300.0, 0.0, 10.0));
        game.projectiles.push(shot("robot_2", 330.0, 300.0, 180.0, 10.0));
        game.tick();

        assert!(game.is_finished());
        assert_eq!(game.winner(), None);
        assert_eq!(game.finish_reason(), Some(FinishReason::MutualDestruction));
    }

    #[test]
    fn timeout_goes_to_the_healthier_robot() {
        let mut config = face_off_config();
        config.time_limit_ms = TICK_MS * 3;
        let mut game = Game::new(config.clone(), [idle(), idle()]).expect("valid config");
        game.start();
        for _ in 0..3 {
            game.tick();
        }
        assert!(game.is_finished());
        assert_eq!(game.winner(), None);
        assert_eq!(game.finish_reason(), Some(FinishReason::Timeout));

        let mut game = Game::new(config, [idle(), idle()]).expect("valid config");
        game.robots[1].armor.hp = 10.0;
        game.start();
        for _ in 0..3 {
            game.tick();
        }
        assert_eq!(game.winner(), Some("robot_1"));
        assert_eq!(game.summary().ticks, 3);
    }

    #[test]
    fn stop_clears_active_move_and_reports_user_command() {
        let mut game = running_game(idle(), idle());
        game.robots[0].queue.push_back(Command::Move {
            speed: 3.0,
            remaining: 100.0,
        });
        game.robots[0].next_actions = vec![Action::Stop {
            source: "panic_button".to_string(),
        }];
        game.apply_actions();

        assert!(game.robots[0].queue.is_empty());
        assert_eq!(
            game.events,
            vec![GameEvent::ActionStopped {
                robot_id: "robot_1".to_string(),
                reason: StopReason::UserCommand,
                source: "panic_button".to_string(),
            }]
        );

        game.robots[0].next_actions = vec![Action::Stop {
            source: "again".to_string(),
        }];
        game.apply_actions();
        assert_eq!(game.events.len(), 1);
    }

    #[test]
    fn behavior_stop_cancels_move_started_earlier() {
        let driver = behavior(|api| match api.tick() {
            1 => api.move_by(100.0),
            3 => api.stop("driver"),
            _ => {}
        });
        let mut game = running_game(driver, idle());
        game.tick();
        game.tick();
        assert_eq!(game.robots()[0].queue.len(), 1);
        game.tick();
        assert!(game.robots()[0].queue.is_empty());
        assert_eq!(count_kind(game.current_events(), "ACTION_STOPPED"), 1);
    }

    #[test]
    fn overweight_robot_moves_half_as_far_for_more_energy() {
        let mut game = running_game(idle(), idle());
        for robot in &mut game.robots {
            robot.rotation = 90.0;
            robot.queue.push_back(Command::Move {
                speed: 3.0,
                remaining: 50.0,
            });
        }
        game.robots[1].armor.weight = 500.0;
        assert!(game.robots[1].is_overweight());
        let start: Vec<(Point, f64)> = game
            .robots
            .iter()
            .map(|robot| (robot.position, robot.battery.energy))
            .collect();
        game.advance_commands();

        let normal = &game.robots[0];
        let heavy = &game.robots[1];
        assert!((normal.position.distance_to(start[0].0) - 3.0).abs() < 1e-9);
        assert!((heavy.position.distance_to(start[1].0) - 1.5).abs() < 1e-9);
        let normal_spent = start[0].1 - normal.battery.energy;
        let heavy_spent = start[1].1 - heavy.battery.energy;
        assert!((normal_spent - 3.0 * normal.motor.energy_cost_per_move).abs() < 1e-9);
        assert!((heavy_spent - 1.5 * heavy.motor.energy_cost_per_move * 1.5).abs() < 1e-9);
    }

    #[test]
    fn move_without_energy_stops_in_place() {
        let mut game = running_game(idle(), idle());
        game.robots[0].battery.energy = 0.0;
        game.robots[0].queue.push_back(Command::Move {
            speed: 3.0,
            remaining: 10.0,
        });
        game.advance_commands();
        assert_eq!(game.robots[0].position, Point::new(300.0, 300.0));
        assert!(game.robots[0].queue.is_empty());
        assert!(matches!(
            &game.events[0],
            GameEvent::ActionStopped { reason: StopReason::NoEnergy, source, .. } if source == ENGINE_SOURCE
        ));
    }

    #[test]
    fn move_into_wall_or_opponent_is_a_collision() {
        let mut game = running_game(idle(), idle());
        game.robots[0].position = Point::new(21.0, 300.0);
        game.robots[0].rotation = 180.0;
        game.robots[0].queue.push_back(Command::Move {
            speed: 3.0,
            remaining: 50.0,
        });
        game.advance_commands();
        assert_eq!(game.robots[0].position, Point::new(21.0, 300.0));
        assert_eq!(count_kind(&game.events, "ACTION_STOPPED"), 1);

        game.events.clear();
        game.robots[0].position = Point::new(459.0, 300.0);
        game.robots[0].rotation = 0.0;
        game.robots[0].queue.push_back(Command::Move {
            speed: 3.0,
            remaining: 50.0,
        });
        game.advance_commands();
        assert_eq!(game.robots[0].position, Point::new(459.0, 300.0));
        assert!(matches!(
            &game.events[0],
            GameEvent::ActionStopped { reason: StopReason::Collision, .. }
        ));
    }

    #[test]
    fn move_into_obstacle_is_a_collision() {
        let mut game = running_game(idle(), idle());
        with_obstacle(&mut game, Rect::new(322.0, 280.0, 20.0, 40.0));
        game.robots[0].queue.push_back(Command::Move {
            speed: 3.0,
            remaining: 50.0,
        });
        game.advance_commands();
        assert_eq!(game.robots[0].position, Point::new(300.0, 300.0));
        assert_eq!(count_kind(&game.events, "ACTION_STOPPED"), 1);
    }

    #[test]
    fn finishing_last_step_completes_the_sequence() {
        let mut game = running_game(idle(), idle());
        game.robots[0].path = vec![Point::new(320.0, 300.0)];
        game.robots[0].destination = Some(Point::new(320.0, 300.0));
        game.robots[0].queue.extend([
            Command::Rotate {
                speed: -5.0,
                remaining: 4.0,
            },
            Command::Move {
                speed: 3.0,
                remaining: 2.5,
            },
            Command::EndSequence,
        ]);
        game.advance_commands();
        assert_eq!(game.robots[0].rotation, -4.0);
        assert_eq!(count_kind(&game.events, "ROTATION_COMPLETED"), 1);

        game.advance_commands();
        assert!(game.robots[0].queue.is_empty());
        assert_eq!(count_kind(&game.events, "MOVE_COMPLETED"), 1);
        assert_eq!(count_kind(&game.events, "SEQUENCE_COMPLETED"), 1);
        assert!(game.robots[0].path.is_empty());
        assert!(game.robots[0].destination.is_none());
    }

    #[test]
    fn aim_retargets_active_rotation() {
        let mut game = running_game(idle(), idle());
        game.robots[0].queue.push_back(Command::Rotate {
            speed: 5.0,
            remaining: 90.0,
        });
        game.robots[0].next_actions = vec![Action::Aim {
            angle: -30.0,
            speed: 5.0,
        }];
        game.apply_actions();
        assert_eq!(
            game.robots[0].queue.front(),
            Some(&Command::Rotate {
                speed: -5.0,
                remaining: 30.0,
            })
        );
        assert_eq!(game.robots[0].queue.len(), 1);
    }

    #[test]
    fn regen_and_cooldown_tick_down() {
        let mut game = running_game(idle(), idle());
        game.robots[0].battery.energy = 10.0;
        game.robots[0].cooldown = 2;
        game.robots[1].battery.energy = game.robots[1].battery.max_energy;
        game.update_robot_state();
        assert!((game.robots[0].battery.energy - 10.2).abs() < 1e-9);
        assert_eq!(game.robots[0].cooldown, 1);
        assert_eq!(game.robots[1].battery.energy, game.robots[1].battery.max_energy);
    }

    #[test]
    fn failing_behavior_does_not_halt_the_match() {
        let broken: Rc<dyn Behavior> = Rc::new(FnBehavior(|api: &mut RobotApi| {
            api.move_by(50.0);
            Err(BehaviorError::Script("undefined variable".to_string()))
        }));
        let mut game = running_game(broken, idle());
        game.tick();
        game.tick();
        assert_eq!(game.status(), GameStatus::Running);
        assert!(game.robots()[0].queue.is_empty());
        assert_eq!(game.robots()[0].logs.len(), 2);
    }

    #[test]
    fn install_behavior_fails_closed() {
        let marker = behavior(|api| api.set_memory("marker", true));
        let mut game = running_game(marker, idle());

        assert!(matches!(
            game.install_behavior(0, "#{ run: |api| { api.fire( }"),
            Err(InstallError::Compile(_))
        ));
        assert!(matches!(
            game.install_behavior(0, "42"),
            Err(InstallError::Compile(CompileError::NotAnObject(_)))
        ));
        assert!(matches!(
            game.install_behavior(5, "#{ run: |api| {} }"),
            Err(InstallError::UnknownSlot(5))
        ));
        game.tick();
        assert_eq!(game.robots()[0].memory.get("marker"), Some(&Value::Bool(true)));

        game.install_behavior(0, r#"#{ run: |api| { api.update_memory(#{ via: "script" }); } }"#)
            .expect("valid script");
        assert!(game.robots()[0].memory.is_empty());
        game.tick();
        assert_eq!(
            game.robots()[0].memory.get("via").and_then(Value::as_str),
            Some("script")
        );
        assert!(game.robots()[0].memory.get("marker").is_none());
    }

    #[test]
    fn reset_starts_script_counters_over() {
        let mut game = running_game(idle(), idle());
        let kind = game
            .install_behavior(
                0,
                r#"#{ run: |api| { let n = api.get_memory().n ?? 0; api.update_memory(#{ n: n + 1 }); } }"#,
            )
            .expect("valid script");
        assert!(!kind);
        let counter = |game: &Game| game.robots()[0].memory.get("n").and_then(Value::as_i64);

        for _ in 0..3 {
            game.tick();
        }
        assert_eq!(counter(&game), Some(3));

        game.reset();
        assert_eq!(counter(&game), None);
        game.start();
        game.tick();
        assert_eq!(counter(&game), Some(1));
    }

    #[test]
    fn same_seed_produces_same_trajectories() {
        let config = MatchConfig::default().with_seed(424_242);
        let mut a = Game::new(config.clone(), default_pair().expect("valid")).expect("valid");
        let mut b = Game::new(config, default_pair().expect("valid")).expect("valid");
        a.start();
        b.start();

        for _ in 0..600 {
            a.tick();
            b.tick();
            let sa = serde_json::to_value(a.snapshot()).expect("serializable");
            let sb = serde_json::to_value(b.snapshot()).expect("serializable");
            assert_eq!(sa, sb);
            if a.is_finished() {
                break;
            }
        }
    }

    #[test]
    fn default_pair_fights_to_a_result() {
        let mut config = MatchConfig::default().with_seed(7);
        config.time_limit_ms = TICK_MS * 60 * 60;
        let mut game = Game::new(config, default_pair().expect("valid")).expect("valid");
        game.start();
        while !game.is_finished() {
            game.tick();
        }
        let summary = game.summary();
        assert!(summary.reason.is_some());
        assert!(summary.ticks <= 3_600);
        assert_eq!(summary.stats.len(), 2);
    }

    #[test]
    fn snapshot_serializes_the_contract_fields() {
        let mut game = running_game(idle(), idle());
        game.tick();
        let snapshot = serde_json::to_value(game.snapshot()).expect("serializable");
        assert_eq!(snapshot["status"], "running");
        assert_eq!(snapshot["tick"], 1);
        assert_eq!(snapshot["arena"]["width"], 800.0);
        assert_eq!(snapshot["robots"][0]["id"], "robot_1");
        assert_eq!(snapshot["robots"][0]["hullMax"], 100.0);
        assert_eq!(snapshot["events"][0]["type"], "ENEMY_DETECTED");
        assert_eq!(snapshot["stats"][1]["robotId"], "robot_2");
        assert!(snapshot["winner"].is_null());
    }
}
