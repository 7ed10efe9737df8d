use serde::Serialize;

use crate::arena::Arena;
use crate::geometry::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Idle,
    Running,
    Paused,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Destroyed,
    MutualDestruction,
    Timeout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    NoEnergy,
    Collision,
    UserCommand,
}

pub const ENGINE_SOURCE: &str = "ENGINE";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameEvent {
    EnemyDetected {
        #[serde(rename = "robotId")]
        robot_id: String,
        #[serde(rename = "targetId")]
        target_id: String,
        distance: f64,
        angle: f64,
    },
    HitByProjectile {
        #[serde(rename = "robotId")]
        robot_id: String,
        #[serde(rename = "ownerId")]
        owner_id: String,
        #[serde(rename = "projectileId")]
        projectile_id: String,
        damage: f64,
    },
    EnemyHit {
        #[serde(rename = "robotId")]
        robot_id: String,
        #[serde(rename = "targetId")]
        target_id: String,
        #[serde(rename = "projectileId")]
        projectile_id: String,
        damage: f64,
    },
    ProjectileHitWall {
        #[serde(rename = "ownerId")]
        owner_id: String,
        #[serde(rename = "projectileId")]
        projectile_id: String,
        x: f64,
        y: f64,
    },
    ProjectileHitObstacle {
        #[serde(rename = "ownerId")]
        owner_id: String,
        #[serde(rename = "projectileId")]
        projectile_id: String,
        #[serde(rename = "obstacleId")]
        obstacle_id: String,
        x: f64,
        y: f64,
    },
    MoveCompleted {
        #[serde(rename = "robotId")]
        robot_id: String,
    },
    RotationCompleted {
        #[serde(rename = "robotId")]
        robot_id: String,
    },
    ActionStopped {
        #[serde(rename = "robotId")]
        robot_id: String,
        reason: StopReason,
        source: String,
    },
    SequenceCompleted {
        #[serde(rename = "robotId")]
        robot_id: String,
    },
}

impl GameEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            GameEvent::EnemyDetected { .. } => "ENEMY_DETECTED",
            GameEvent::HitByProjectile { .. } => "HIT_BY_PROJECTILE",
            GameEvent::EnemyHit { .. } => "ENEMY_HIT",
            GameEvent::ProjectileHitWall { .. } => "PROJECTILE_HIT_WALL",
            GameEvent::ProjectileHitObstacle { .. } => "PROJECTILE_HIT_OBSTACLE",
            GameEvent::MoveCompleted { .. } => "MOVE_COMPLETED",
            GameEvent::RotationCompleted { .. } => "ROTATION_COMPLETED",
            GameEvent::ActionStopped { .. } => "ACTION_STOPPED",
            GameEvent::SequenceCompleted { .. } => "SEQUENCE_COMPLETED",
        }
    }

    /// Whether the event is addressed to `robot_id`: it is the acting or
    /// receiving robot, or it owns the projectile involved.
    pub fn concerns(&self, robot_id: &str) -> bool {
        match self {
            GameEvent::EnemyDetected { robot_id: id, .. }
            | GameEvent::HitByProjectile { robot_id: id, .. }
            | GameEvent::EnemyHit { robot_id: id, .. }
            | GameEvent::MoveCompleted { robot_id: id }
            | GameEvent::RotationCompleted { robot_id: id }
            | GameEvent::ActionStopped { robot_id: id, .. }
            | GameEvent::SequenceCompleted { robot_id: id } => id == robot_id,
            GameEvent::ProjectileHitWall { owner_id, .. }
            | GameEvent::ProjectileHitObstacle { owner_id, .. } => owner_id == robot_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnemyScan {
    pub id: String,
    pub distance: f64,
    pub angle: f64,
    pub x: f64,
    pub y: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObstacleScan {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub distance: f64,
    pub angle: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CombatStats {
    pub shots_fired: u32,
    pub shots_hit: u32,
    pub damage_dealt: f64,
    pub damage_taken: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotView {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
    pub hull: f64,
    pub hull_max: f64,
    pub armor: f64,
    pub armor_max: f64,
    pub energy: f64,
    pub energy_max: f64,
    pub weight: f64,
    pub overweight: bool,
    pub radar_range: f64,
    pub cooldown: u32,
    pub queue_length: usize,
    pub logs: Vec<String>,
    pub path: Vec<Point>,
    pub destination: Option<Point>,
}

impl RobotView {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectileView {
    pub id: String,
    pub owner_id: String,
    pub x: f64,
    pub y: f64,
    pub rotation: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsEntry {
    pub robot_id: String,
    #[serde(flatten)]
    pub stats: CombatStats,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub tick: u64,
    pub status: GameStatus,
    pub winner: Option<String>,
    pub elapsed_ms: u64,
    pub arena: Arena,
    pub robots: Vec<RobotView>,
    pub projectiles: Vec<ProjectileView>,
    pub events: Vec<GameEvent>,
    pub stats: Vec<StatsEntry>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub winner: Option<String>,
    pub reason: Option<FinishReason>,
    pub ticks: u64,
    pub elapsed_ms: u64,
    pub stats: Vec<StatsEntry>,
}
