use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::{SecondsFormat, Utc};
use clap::Parser;
use robot_arena::api::Behavior;
use robot_arena::config::MatchConfig;
use robot_arena::engine::Game;
use robot_arena::server_utils::{init_tracing, resolve_behavior};
use robot_arena::types::{FinishReason, GameSnapshot, StatsEntry};
use serde::Serialize;
use tracing::{error, info, warn};

const DEFAULT_MAX_TICKS: u64 = 60 * 60 * 15;
const MAX_LIVE_PROJECTILES: usize = 256;
const EPSILON: f64 = 1e-6;

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs headless robot matches and reports the results")]
struct Cli {
    /// Seed of the first match; match `n` uses `seed + n`.
    #[arg(long, default_value_t = 1)]
    seed: u32,
    #[arg(long, default_value_t = 1)]
    matches: u32,
    /// Safety cap on ticks per match.
    #[arg(long)]
    max_ticks: Option<u64>,
    /// Match config JSON.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Built-in behavior name or path to a script.
    #[arg(long, default_value = "hunter")]
    script_a: String,
    #[arg(long, default_value = "sentry")]
    script_b: String,
    #[arg(long)]
    run_id: Option<String>,
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchResultLine {
    index: u32,
    seed: u32,
    winner: Option<String>,
    /// `None` when the tick cap ended the match.
    reason: Option<FinishReason>,
    ticks: u64,
    elapsed_ms: u64,
    stats: Vec<StatsEntry>,
    anomalies: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunSummary {
    run_id: String,
    started_at: String,
    finished_at: String,
    script_a: String,
    script_b: String,
    match_count: usize,
    wins: BTreeMap<String, usize>,
    draws: usize,
    unfinished: usize,
    average_ticks: u64,
    anomaly_count: usize,
    matches: Vec<MatchResultLine>,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    let started_at = Utc::now();
    let run_id = cli
        .run_id
        .clone()
        .unwrap_or_else(|| default_run_id(cli.seed, started_at.timestamp_millis()));

    let config = match cli.config.as_ref() {
        Some(path) => match MatchConfig::from_path(path) {
            Ok(config) => config,
            Err(err) => {
                error!(%run_id, error = %err, "failed to load match config");
                std::process::exit(2);
            }
        },
        None => MatchConfig::default(),
    };
    let behaviors = match load_behaviors(&cli.script_a, &cli.script_b) {
        Ok(behaviors) => behaviors,
        Err(err) => {
            error!(%run_id, error = %err, "failed to load behaviors");
            std::process::exit(2);
        }
    };
    let max_ticks = cli.max_ticks.unwrap_or(DEFAULT_MAX_TICKS);

    let mut results = Vec::new();
    for index in 0..cli.matches {
        let seed = cli.seed.wrapping_add(index);
        info!(%run_id, index, seed, "match started");
        let result = match run_match(index, config.clone().with_seed(seed), &behaviors, max_ticks) {
            Ok(result) => result,
            Err(err) => {
                error!(%run_id, index, seed, error = %err, "invalid match setup");
                std::process::exit(2);
            }
        };
        info!(
            %run_id,
            index,
            seed,
            ticks = result.ticks,
            winner = result.winner.as_deref().unwrap_or("none"),
            "match finished"
        );
        match serde_json::to_string(&result) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "failed to serialize match result"),
        }
        results.push(result);
    }

    let summary = build_run_summary(
        run_id.clone(),
        started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        &cli,
        results,
    );

    if let Some(path) = cli.summary_out.as_ref() {
        if let Err(err) = write_summary(path, &summary) {
            error!(%run_id, path = %path.display(), error = %err, "failed to write summary");
            std::process::exit(2);
        }
    }

    info!(
        %run_id,
        matches = summary.match_count,
        draws = summary.draws,
        unfinished = summary.unfinished,
        average_ticks = summary.average_ticks,
        anomalies = summary.anomaly_count,
        wins = ?summary.wins,
        "run finished"
    );

    if summary.anomaly_count > 0 {
        std::process::exit(1);
    }
}

fn load_behaviors(
    script_a: &str,
    script_b: &str,
) -> Result<[Rc<dyn Behavior>; 2], robot_arena::compiler::CompileError> {
    Ok([resolve_behavior(script_a)?, resolve_behavior(script_b)?])
}

fn run_match(
    index: u32,
    config: MatchConfig,
    behaviors: &[Rc<dyn Behavior>; 2],
    max_ticks: u64,
) -> Result<MatchResultLine, robot_arena::config::ConfigError> {
    let seed = config.seed;
    let mut game = Game::new(config, behaviors.clone())?;
    game.start();

    let mut anomalies = Vec::new();
    let mut seen = HashSet::new();
    while !game.is_finished() && game.tick_count() < max_ticks {
        game.tick();
        let snapshot = game.snapshot();
        for message in collect_snapshot_anomalies(&snapshot) {
            if seen.insert(message.clone()) {
                warn!(seed, tick = snapshot.tick, %message, "anomaly detected");
                anomalies.push(message);
            }
        }
    }

    let summary = game.summary();
    Ok(MatchResultLine {
        index,
        seed,
        winner: summary.winner,
        reason: summary.reason,
        ticks: summary.ticks,
        elapsed_ms: summary.elapsed_ms,
        stats: summary.stats,
        anomalies,
    })
}

/// Physical invariants the engine should never break.
fn collect_snapshot_anomalies(snapshot: &GameSnapshot) -> Vec<String> {
    let mut anomalies = Vec::new();
    let arena = &snapshot.arena;
    for robot in &snapshot.robots {
        let pos = robot.position();
        if !arena.is_within_bounds(pos, 0.0) {
            anomalies.push(format!("{} left the arena", robot.id));
        }
        if arena
            .obstacles
            .iter()
            .any(|obstacle| obstacle.rect.contains(pos))
        {
            anomalies.push(format!("{} is inside an obstacle", robot.id));
        }
        if robot.energy < -EPSILON || robot.energy > robot.energy_max + EPSILON {
            anomalies.push(format!("{} energy out of range: {}", robot.id, robot.energy));
        }
        if !(-180.0 - EPSILON..=180.0 + EPSILON).contains(&robot.rotation) {
            anomalies.push(format!("{} rotation not normalized: {}", robot.id, robot.rotation));
        }
    }
    if snapshot.projectiles.len() > MAX_LIVE_PROJECTILES {
        anomalies.push(format!("too many projectiles: {}", snapshot.projectiles.len()));
    }
    anomalies
}

fn default_run_id(seed: u32, timestamp_ms: i64) -> String {
    format!("sim-{seed}-{timestamp_ms}")
}

fn build_run_summary(
    run_id: String,
    started_at: String,
    finished_at: String,
    cli: &Cli,
    matches: Vec<MatchResultLine>,
) -> RunSummary {
    let match_count = matches.len();
    let mut wins = BTreeMap::new();
    let mut draws = 0;
    let mut unfinished = 0;
    for result in &matches {
        match (&result.winner, result.reason) {
            (Some(winner), _) => *wins.entry(winner.clone()).or_insert(0) += 1,
            (None, Some(_)) => draws += 1,
            (None, None) => unfinished += 1,
        }
    }
    let total_ticks: u64 = matches.iter().map(|result| result.ticks).sum();
    let average_ticks = if match_count == 0 {
        0
    } else {
        total_ticks / match_count as u64
    };
    let anomaly_count = matches.iter().map(|result| result.anomalies.len()).sum();
    RunSummary {
        run_id,
        started_at,
        finished_at,
        script_a: cli.script_a.clone(),
        script_b: cli.script_b.clone(),
        match_count,
        wins,
        draws,
        unfinished,
        average_ticks,
        anomaly_count,
        matches,
    }
}

fn write_summary(path: &Path, summary: &RunSummary) -> io::Result<()> {
    let text = serde_json::to_string_pretty(summary).map_err(io::Error::other)?;
    std::fs::write(path, text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use robot_arena::behaviors::default_pair;

    fn make_result(winner: Option<&str>, reason: Option<FinishReason>, ticks: u64) -> MatchResultLine {
        MatchResultLine {
            index: 0,
            seed: 42,
            winner: winner.map(str::to_string),
            reason,
            ticks,
            elapsed_ms: ticks * 16,
            stats: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    fn cli() -> Cli {
        Cli::parse_from(["simulate", "--matches", "3"])
    }

    #[test]
    fn default_run_id_contains_seed_and_timestamp() {
        assert_eq!(default_run_id(42, 123_456_789), "sim-42-123456789");
    }

    #[test]
    fn cli_defaults_pit_hunter_against_sentry() {
        let cli = cli();
        assert_eq!(cli.matches, 3);
        assert_eq!(cli.seed, 1);
        assert_eq!(cli.script_a, "hunter");
        assert_eq!(cli.script_b, "sentry");
    }

    #[test]
    fn build_run_summary_counts_outcomes() {
        let summary = build_run_summary(
            "sim-1-1".to_string(),
            "start".to_string(),
            "end".to_string(),
            &cli(),
            vec![
                make_result(Some("robot_1"), Some(FinishReason::Destroyed), 100),
                make_result(None, Some(FinishReason::Timeout), 200),
                make_result(None, None, 300),
            ],
        );
        assert_eq!(summary.wins.get("robot_1"), Some(&1));
        assert_eq!(summary.draws, 1);
        assert_eq!(summary.unfinished, 1);
        assert_eq!(summary.average_ticks, 200);
        assert_eq!(summary.match_count, 3);
    }

    #[test]
    fn write_summary_returns_error_when_parent_does_not_exist() {
        let dir = tempfile::tempdir().expect("temp dir");
        let target = dir.path().join("missing").join("summary.json");
        let summary = build_run_summary(
            "sim-1-1".to_string(),
            "start".to_string(),
            "end".to_string(),
            &cli(),
            Vec::new(),
        );
        assert!(write_summary(&target, &summary).is_err());

        let target = dir.path().join("summary.json");
        write_summary(&target, &summary).expect("writable");
        assert!(target.is_file());
    }

    #[test]
    fn capped_match_reports_no_reason() {
        let behaviors = default_pair().expect("valid");
        let result = run_match(0, MatchConfig::default().with_seed(5), &behaviors, 30)
            .expect("valid config");
        assert_eq!(result.ticks, 30);
        assert!(result.reason.is_none());
        assert!(result.anomalies.is_empty());
    }
}
