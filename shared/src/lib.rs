//! Data model and wire protocol shared by the quiz session server and its clients.
//!
//! Everything that crosses the WebSocket lives here: the session snapshot the
//! server broadcasts, and the `{ "type", "payload" }` event envelope clients send.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub type SessionId = Uuid;
pub type PlayerId = Uuid;

/// Every generated problem set has exactly this many problems.
pub const PROBLEMS_PER_GAME: usize = 10;

/// Arithmetic operation a problem asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Add,
        Operation::Subtract,
        Operation::Multiply,
        Operation::Divide,
    ];

    pub fn symbol(self) -> char {
        match self {
            Operation::Add => '+',
            Operation::Subtract => '-',
            Operation::Multiply => '*',
            Operation::Divide => '/',
        }
    }
}

/// Inclusive operand range for generated problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("game config must allow at least one method")]
    NoMethods,
    #[error("invalid range: min {min} is greater than max {max}")]
    InvertedRange { min: i32, max: i32 },
}

/// Problem-set configuration attached to a session.
///
/// Construction goes through [`GameConfig::new`] (and deserialization goes
/// through the same check), so a config held anywhere in the system always
/// has at least one method and `min <= max`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawGameConfig")]
pub struct GameConfig {
    methods: Vec<Operation>,
    range: NumberRange,
}

#[derive(Deserialize)]
struct RawGameConfig {
    methods: Vec<Operation>,
    range: NumberRange,
}

impl TryFrom<RawGameConfig> for GameConfig {
    type Error = ConfigError;

    fn try_from(raw: RawGameConfig) -> Result<Self, Self::Error> {
        GameConfig::new(raw.methods, raw.range)
    }
}

impl GameConfig {
    pub fn new(methods: Vec<Operation>, range: NumberRange) -> Result<Self, ConfigError> {
        if methods.is_empty() {
            return Err(ConfigError::NoMethods);
        }
        if range.min > range.max {
            return Err(ConfigError::InvertedRange {
                min: range.min,
                max: range.max,
            });
        }
        Ok(Self { methods, range })
    }

    pub fn methods(&self) -> &[Operation] {
        &self.methods
    }

    pub fn range(&self) -> NumberRange {
        self.range
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            methods: vec![Operation::Add, Operation::Subtract],
            range: NumberRange { min: 1, max: 10 },
        }
    }
}

/// A single generated problem with its precomputed answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub operand1: i64,
    pub operand2: i64,
    pub method: Operation,
    pub answer: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
}

impl Player {
    pub fn new(id: PlayerId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub id: Uuid,
    pub user_id: PlayerId,
    pub username: String,
    pub points: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InProgress,
    Finished,
}

/// Full snapshot of one multiplayer quiz session.
///
/// This is both the record kept in the session store and the message the
/// server pushes to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub game_id: Uuid,
    pub game_config: GameConfig,
    pub problems: Vec<Problem>,
    pub current_problem_index: usize,
    pub status: SessionStatus,
    pub players: Vec<Player>,
    pub scores: Vec<Score>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    /// Creates a waiting session with no players
    pub fn new(
        name: impl Into<String>,
        game_id: Uuid,
        game_config: GameConfig,
        problems: Vec<Problem>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            game_id,
            game_config,
            problems,
            current_problem_index: 0,
            status: SessionStatus::Waiting,
            players: Vec::new(),
            scores: Vec::new(),
            start_time: None,
            end_time: None,
        }
    }

    pub fn has_player(&self, player_id: &PlayerId) -> bool {
        self.players.iter().any(|p| p.id == *player_id)
    }

    pub fn player(&self, player_id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == *player_id)
    }

    /// The problem players are currently answering, `None` once all are done
    pub fn current_problem(&self) -> Option<&Problem> {
        self.problems.get(self.current_problem_index)
    }

    pub fn score_for(&self, player_id: &PlayerId) -> Option<&Score> {
        self.scores.iter().find(|s| s.user_id == *player_id)
    }
}

/// Client intent applied to a session by the server's event engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StartGame,
    SubmitAnswer { answer: i64 },
    SkipProblem,
    NewGame { game_config: GameConfig },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed event envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unknown event type `{0}`")]
    UnknownEvent(String),
    #[error("invalid payload for `{event}`: {source}")]
    InvalidPayload {
        event: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw `{ "type": ..., "payload": ... }` frame as it travels over the socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Deserialize)]
struct SubmitAnswerPayload {
    answer: i64,
}

#[derive(Deserialize)]
struct NewGamePayload {
    game_config: GameConfig,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::StartGame => "start_game",
            SessionEvent::SubmitAnswer { .. } => "submit_answer",
            SessionEvent::SkipProblem => "skip_problem",
            SessionEvent::NewGame { .. } => "new_game",
        }
    }

    pub fn to_envelope(&self) -> EventEnvelope {
        let payload = match self {
            SessionEvent::StartGame | SessionEvent::SkipProblem => Value::Object(Map::new()),
            SessionEvent::SubmitAnswer { answer } => json!({ "answer": answer }),
            SessionEvent::NewGame { game_config } => json!({ "game_config": game_config }),
        };
        EventEnvelope {
            kind: self.name().to_string(),
            payload,
        }
    }

    pub fn to_json(&self) -> String {
        // An envelope of strings and JSON values always serializes.
        serde_json::to_string(&self.to_envelope()).unwrap_or_default()
    }

    /// Decodes one text frame into an event.
    ///
    /// Unknown event names are an error here, so nothing past the decoder
    /// ever sees an event it cannot handle.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: EventEnvelope =
            serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: EventEnvelope) -> Result<Self, ProtocolError> {
        match envelope.kind.as_str() {
            "start_game" => Ok(SessionEvent::StartGame),
            "skip_problem" => Ok(SessionEvent::SkipProblem),
            "submit_answer" => {
                let p: SubmitAnswerPayload = parse_payload("submit_answer", envelope.payload)?;
                Ok(SessionEvent::SubmitAnswer { answer: p.answer })
            }
            "new_game" => {
                let p: NewGamePayload = parse_payload("new_game", envelope.payload)?;
                Ok(SessionEvent::NewGame {
                    game_config: p.game_config,
                })
            }
            _ => Err(ProtocolError::UnknownEvent(envelope.kind)),
        }
    }
}

fn parse_payload<T: DeserializeOwned>(
    event: &'static str,
    payload: Value,
) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|source| ProtocolError::InvalidPayload { event, source })
}
