use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use robot_arena::api::Behavior;
use robot_arena::behaviors::default_pair;
use robot_arena::config::MatchConfig;
use robot_arena::engine::Game;
use robot_arena::protocol::{parse_client_message, ParsedClientMessage, ServerMessage};
use robot_arena::server_utils::{
    init_tracing, normalize_tick_ms, parse_flag, parse_seed, resolve_behavior,
    validate_script_source,
};
use robot_arena::types::GameStatus;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

const CLIENT_QUEUE: usize = 64;
const BROADCAST_QUEUE: usize = 256;

/// Requests handled by the game thread.
enum GameCommand {
    Start,
    Pause,
    Resume,
    Reset,
    LoadScript {
        slot: usize,
        source: String,
        reply: oneshot::Sender<Result<bool, String>>,
    },
    Snapshot {
        reply: oneshot::Sender<String>,
    },
}

#[derive(Clone)]
struct AppState {
    commands: mpsc::UnboundedSender<GameCommand>,
    updates: broadcast::Sender<String>,
    welcome: Arc<String>,
}

/// Everything read from the environment at boot.
struct ServerSettings {
    port: u16,
    tick_ms: u64,
    autostart: bool,
    config: MatchConfig,
    script_a: Option<String>,
    script_b: Option<String>,
}

impl ServerSettings {
    fn from_env() -> Result<Self, String> {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);
        let tick_ms = normalize_tick_ms(std::env::var("TICK_MS").ok().as_deref());
        let mut config = match std::env::var("MATCH_CONFIG") {
            Ok(path) => MatchConfig::from_path(&path).map_err(|err| err.to_string())?,
            Err(_) => MatchConfig::default(),
        };
        config.tick_ms = tick_ms;
        config.seed = parse_seed(std::env::var("SEED").ok().as_deref()).unwrap_or_else(rand::random);
        Ok(Self {
            port,
            tick_ms,
            autostart: parse_flag(std::env::var("AUTOSTART").ok().as_deref()),
            config,
            script_a: std::env::var("SCRIPT_A").ok(),
            script_b: std::env::var("SCRIPT_B").ok(),
        })
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let settings = match ServerSettings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            error!(error = %err, "invalid server settings");
            std::process::exit(2);
        }
    };

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (update_tx, _) = broadcast::channel(BROADCAST_QUEUE);
    let welcome = ServerMessage::Welcome {
        tick_ms: settings.tick_ms,
        robot_ids: settings.config.robot_ids.to_vec(),
    };
    let state = AppState {
        commands: command_tx,
        updates: update_tx.clone(),
        welcome: Arc::new(json!(welcome).to_string()),
    };
    let port = settings.port;
    spawn_game_thread(settings, command_rx, update_tx);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir() {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.display(), "serving static files");
        app.fallback_service(ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)))
    } else {
        app
    };

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%bind_addr, error = %err, "failed to bind server socket");
            std::process::exit(2);
        }
    };

    info!(port, "listening");
    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "server stopped");
        std::process::exit(1);
    }
}

fn resolve_static_dir() -> Option<PathBuf> {
    let path = PathBuf::from(std::env::var("STATIC_DIR").ok()?);
    path.join("index.html").is_file().then_some(path)
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

/// The game holds `Rc` handles and script engines, so it lives on its own
/// thread with a single-threaded runtime.
fn spawn_game_thread(
    settings: ServerSettings,
    commands: mpsc::UnboundedReceiver<GameCommand>,
    updates: broadcast::Sender<String>,
) {
    std::thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(error = %err, "failed to build game runtime");
                return;
            }
        };
        let game = match build_game(&settings) {
            Ok(game) => game,
            Err(err) => {
                error!(error = %err, "failed to set up match");
                return;
            }
        };
        runtime.block_on(run_game_loop(game, settings.tick_ms, commands, updates));
    });
}

fn build_game(settings: &ServerSettings) -> Result<Game, String> {
    let [default_a, default_b] = default_pair().map_err(|err| err.to_string())?;
    let behavior = |spec: &Option<String>, fallback: Rc<dyn Behavior>| match spec {
        Some(spec) => resolve_behavior(spec).map_err(|err| format!("{spec}: {err}")),
        None => Ok(fallback),
    };
    let behaviors = [
        behavior(&settings.script_a, default_a)?,
        behavior(&settings.script_b, default_b)?,
    ];
    let mut game = Game::new(settings.config.clone(), behaviors).map_err(|err| err.to_string())?;
    if settings.autostart {
        game.start();
    }
    Ok(game)
}

async fn run_game_loop(
    mut game: Game,
    tick_ms: u64,
    mut commands: mpsc::UnboundedReceiver<GameCommand>,
    updates: broadcast::Sender<String>,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut announced_finish = false;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if game.status() != GameStatus::Running {
                    continue;
                }
                game.tick();
                publish(&updates, &state_message(&game));
                if game.is_finished() && !announced_finish {
                    announced_finish = true;
                    let summary = game.summary();
                    publish(&updates, &json!(ServerMessage::Finished { summary: &summary }).to_string());
                }
            }
            Some(command) = commands.recv() => {
                if handle_command(&mut game, command) {
                    announced_finish = game.is_finished();
                    publish(&updates, &state_message(&game));
                }
            }
        }
    }
}

/// Applies one command; returns whether the game changed in a way spectators
/// should see.
fn handle_command(game: &mut Game, command: GameCommand) -> bool {
    match command {
        GameCommand::Start => game.start(),
        GameCommand::Pause => game.pause(),
        GameCommand::Resume => game.resume(),
        GameCommand::Reset => game.reset(),
        GameCommand::LoadScript { slot, source, reply } => {
            let result = load_script(game, slot, &source);
            if let Err(err) = &result {
                warn!(slot, error = %err, "script rejected");
            }
            let _ = reply.send(result);
            return false;
        }
        GameCommand::Snapshot { reply } => {
            let _ = reply.send(state_message(game));
            return false;
        }
    }
    true
}

fn load_script(game: &mut Game, slot: usize, source: &str) -> Result<bool, String> {
    validate_script_source(source)?;
    game.install_behavior(slot, source).map_err(|err| err.to_string())
}

fn state_message(game: &Game) -> String {
    let snapshot = game.snapshot();
    json!(ServerMessage::State { snapshot: &snapshot }).to_string()
}

fn publish(updates: &broadcast::Sender<String>, payload: &str) {
    // No subscribers is fine; nobody is watching yet.
    let _ = updates.send(payload.to_string());
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let client_id = make_id("client");
    info!(%client_id, "client connected");
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);
    let mut updates = state.updates.subscribe();

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                direct = rx.recv() => match direct {
                    Some(payload) => payload,
                    None => break,
                },
                update = updates.recv() => match update {
                    Ok(payload) => payload,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(client_id = %writer_id, skipped, "client lagging, dropped updates");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let _ = tx.send(state.welcome.as_ref().clone()).await;
    let (reply_tx, reply_rx) = oneshot::channel();
    if state.commands.send(GameCommand::Snapshot { reply: reply_tx }).is_ok() {
        if let Ok(snapshot) = reply_rx.await {
            let _ = tx.send(snapshot).await;
        }
    }

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };
        match message {
            Message::Text(raw) => handle_client_message(&state, &tx, raw.as_str()).await,
            Message::Binary(raw) => match std::str::from_utf8(&raw) {
                Ok(text) => handle_client_message(&state, &tx, text).await,
                Err(_) => send_error(&tx, "invalid utf8 message").await,
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    info!(%client_id, "client disconnected");
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: &AppState, tx: &mpsc::Sender<String>, raw: &str) {
    let Some(message) = parse_client_message(raw) else {
        send_error(tx, "invalid message").await;
        return;
    };

    let command = match message {
        ParsedClientMessage::Ping { t } => {
            let _ = tx.send(json!(ServerMessage::Pong { t }).to_string()).await;
            return;
        }
        ParsedClientMessage::Start => GameCommand::Start,
        ParsedClientMessage::Pause => GameCommand::Pause,
        ParsedClientMessage::Resume => GameCommand::Resume,
        ParsedClientMessage::Reset => GameCommand::Reset,
        ParsedClientMessage::LoadScript { slot, source } => {
            let (reply_tx, reply_rx) = oneshot::channel();
            if state
                .commands
                .send(GameCommand::LoadScript {
                    slot,
                    source,
                    reply: reply_tx,
                })
                .is_err()
            {
                send_error(tx, "game is not running").await;
                return;
            }
            let reply = match reply_rx.await {
                Ok(Ok(state_machine)) => ServerMessage::ScriptLoaded {
                    slot,
                    state_machine,
                },
                Ok(Err(error)) => ServerMessage::ScriptRejected { slot, error },
                Err(_) => ServerMessage::Error {
                    message: "game is not running".to_string(),
                },
            };
            let _ = tx.send(json!(reply).to_string()).await;
            return;
        }
    };

    if state.commands.send(command).is_err() {
        send_error(tx, "game is not running").await;
    }
}

async fn send_error(tx: &mpsc::Sender<String>, message: &str) {
    let payload = json!(ServerMessage::Error {
        message: message.to_string(),
    });
    let _ = tx.send(payload.to_string()).await;
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

#[cfg(test)]
mod tests {
    use robot_arena::server_utils::MAX_SCRIPT_BYTES;

    use super::*;

    fn game() -> Game {
        let behaviors = default_pair().expect("valid");
        Game::new(MatchConfig::default(), behaviors).expect("valid config")
    }

    #[test]
    fn load_script_installs_through_the_game() {
        let mut game = game();
        assert_eq!(load_script(&mut game, 1, "#{ run: |api| { api.rotate(5); } }"), Ok(false));
        assert_eq!(
            load_script(&mut game, 0, "#{ states: #{ idle: #{} } }"),
            Ok(true)
        );
    }

    #[test]
    fn load_script_rejects_before_compiling() {
        let mut game = game();
        assert!(load_script(&mut game, 0, "   ").is_err());
        let oversized = format!("#{{ run: |api| {{}} }} //{}", "x".repeat(MAX_SCRIPT_BYTES));
        assert!(load_script(&mut game, 0, &oversized).is_err());
        assert!(load_script(&mut game, 0, "#{ run: |api| { api.fire( }").is_err());
        assert!(load_script(&mut game, 7, "#{ run: |api| {} }").is_err());
    }

    #[test]
    fn commands_report_whether_spectators_need_a_refresh() {
        let mut game = game();
        assert!(handle_command(&mut game, GameCommand::Start));
        assert_eq!(game.status(), GameStatus::Running);

        let (reply, mut received) = oneshot::channel();
        let refresh = handle_command(
            &mut game,
            GameCommand::LoadScript {
                slot: 0,
                source: "#{ run: |api| {} }".to_string(),
                reply,
            },
        );
        assert!(!refresh);
        assert_eq!(received.try_recv().expect("reply sent"), Ok(false));
    }
}
