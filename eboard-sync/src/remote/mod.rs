//! The online server as seen by the coordinator: an event source and a move sink.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::Deserialize;
use thiserror::Error;

mod event;

pub use event::{ChatLine, Challenge, GameFull, GameStart, GameState, GameStatus, RemoteEvent, Speed, Variant};

/// Rejection text the server uses once a move can no longer matter.
pub const GAME_FINISHED_REASON: &str = "Not your turn, or game already over";

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("move rejected: {reason}")]
    Rejected { reason: String },
    #[error("server unavailable: {0}")]
    Unavailable(String),
    #[error("rate limited")]
    RateLimited,
    #[error("undecodable event")]
    Decode(#[from] serde_json::Error)
}

impl RemoteError {
    /// The game already ended from the server's point of view; retrying is pointless.
    pub fn is_game_finished(&self) -> bool {
        matches!(self, RemoteError::Rejected { reason } if reason.contains(GAME_FINISHED_REASON))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OngoingGame {
    #[serde(alias = "gameId")]
    pub id: String,
    pub speed: Speed
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<RemoteEvent, RemoteError>> + Send>>;

#[async_trait]
pub trait RemoteSession: Send + Sync + 'static {
    /// Opens the event stream. It may end or fail at any time; callers reconnect
    /// by calling this again.
    async fn stream_events(&self) -> Result<EventStream, RemoteError>;

    /// `mv` is in standard UCI notation.
    async fn submit_move(&self, game_id: &str, mv: &str) -> Result<(), RemoteError>;

    async fn ongoing_games(&self) -> Result<Vec<OngoingGame>, RemoteError>;
}
