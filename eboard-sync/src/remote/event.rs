use std::time::Duration;

use cozy_chess::Color;
use serde::{Deserialize, Deserializer};

use crate::game::GameModel;
use crate::time_control::{deserialize_millis, TimeControl};

use super::RemoteError;

/// One event from the server's stream, decoded once at the boundary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RemoteEvent {
    Challenge {
        challenge: Challenge
    },
    GameStart {
        game: GameStart
    },
    /// The state-changed event: the full move list plus clocks.
    GameState(GameState),
    ChatLine(ChatLine),
    GameFull(GameFull),
    #[serde(other)]
    Unknown
}

impl RemoteEvent {
    pub fn from_json(line: &str) -> Result<Self, RemoteError> {
        Ok(serde_json::from_str(line)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Challenge {
    pub id: String,
    #[serde(default)]
    pub speed: Option<Speed>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Speed {
    UltraBullet,
    Bullet,
    Blitz,
    Rapid,
    Classical,
    Correspondence,
    #[serde(other)]
    Unknown
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStart {
    pub game_id: String,
    #[serde(deserialize_with = "deserialize_color")]
    pub color: Color,
    #[serde(default)]
    pub speed: Option<Speed>,
    #[serde(default)]
    pub seconds_left: Option<u64>,
    #[serde(default)]
    pub variant: Option<Variant>
}

impl GameStart {
    /// Starting clock when the event carries one; the increment is not part of this event.
    pub fn time_control(&self) -> Option<TimeControl> {
        self.seconds_left
            .map(|secs| TimeControl::new(Duration::from_secs(secs), Duration::ZERO))
    }

    pub fn is_standard(&self) -> bool {
        self.variant.as_ref().map_or(true, |v| v.key == "standard")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Variant {
    pub key: String
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameStatus {
    Created,
    Started,
    Aborted,
    Mate,
    Resign,
    Stalemate,
    Timeout,
    Draw,
    Outoftime,
    Cheat,
    NoStart,
    UnknownFinish,
    VariantEnd,
    #[serde(other)]
    Unknown
}

impl GameStatus {
    pub fn is_ongoing(self) -> bool {
        matches!(self, GameStatus::Created | GameStatus::Started)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GameState {
    /// Space-separated UCI moves from the initial position.
    #[serde(default)]
    pub moves: String,
    #[serde(deserialize_with = "deserialize_millis")]
    pub wtime: Duration,
    #[serde(deserialize_with = "deserialize_millis")]
    pub btime: Duration,
    pub status: GameStatus,
    #[serde(default, deserialize_with = "deserialize_winner")]
    pub winner: Option<Color>
}

impl GameState {
    /// The server considers the game finished.
    pub fn is_finished(&self) -> bool {
        !self.status.is_ongoing() || self.winner.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatLine {
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub room: String
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFull {
    pub id: String,
    /// `"startpos"` or a FEN.
    #[serde(default)]
    pub initial_fen: Option<String>,
    pub state: GameState
}

impl GameFull {
    pub fn is_standard_start(&self) -> bool {
        match self.initial_fen.as_deref() {
            None | Some("startpos") => true,
            Some(fen) => GameModel::from_fen(fen).map_or(false, |game| game.is_standard_start())
        }
    }
}

fn parse_color(s: &str) -> Option<Color> {
    match s {
        "white" => Some(Color::White),
        "black" => Some(Color::Black),
        _ => None
    }
}

fn deserialize_color<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Color, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_color(&s).ok_or_else(|| serde::de::Error::unknown_variant(&s, &["white", "black"]))
}

fn deserialize_winner<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Color>, D::Error> {
    let s: Option<String> = Option::deserialize(deserializer)?;
    Ok(s.as_deref().and_then(parse_color))
}
