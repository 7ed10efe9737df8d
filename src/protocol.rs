use serde::Serialize;
use serde_json::Value;

use crate::types::{GameSnapshot, MatchSummary};

#[derive(Debug, PartialEq)]
pub enum ParsedClientMessage {
    Start,
    Pause,
    Resume,
    Reset,
    LoadScript { slot: usize, source: String },
    Ping { t: f64 },
}

pub fn parse_client_message(raw: &str) -> Option<ParsedClientMessage> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let message_type = object.get("type")?.as_str()?;

    match message_type {
        "start" => Some(ParsedClientMessage::Start),
        "pause" => Some(ParsedClientMessage::Pause),
        "resume" => Some(ParsedClientMessage::Resume),
        "reset" => Some(ParsedClientMessage::Reset),
        "load_script" => {
            let slot = parse_slot(object.get("slot")?)?;
            let source = object.get("source")?.as_str()?.to_string();
            Some(ParsedClientMessage::LoadScript { slot, source })
        }
        "ping" => {
            let t = object.get("t")?.as_f64()?;
            if !t.is_finite() {
                return None;
            }
            Some(ParsedClientMessage::Ping { t })
        }
        _ => None,
    }
}

/// Slots are `0`/`1`, or `"a"`/`"b"` for readability.
fn parse_slot(value: &Value) -> Option<usize> {
    if let Some(number) = value.as_u64() {
        return (number < 2).then_some(number as usize);
    }
    match value.as_str()?.trim().to_ascii_lowercase().as_str() {
        "a" => Some(0),
        "b" => Some(1),
        _ => None,
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    #[serde(rename_all = "camelCase")]
    Welcome { tick_ms: u64, robot_ids: Vec<String> },
    State { snapshot: &'a GameSnapshot },
    Finished { summary: &'a MatchSummary },
    #[serde(rename_all = "camelCase")]
    ScriptLoaded { slot: usize, state_machine: bool },
    ScriptRejected { slot: usize, error: String },
    Error { message: String },
    Pong { t: f64 },
}
