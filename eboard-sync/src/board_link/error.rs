use thiserror::Error;

use crate::game::GameError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("board did not answer the connection probe")]
    ConnectionFailed,
    #[error("no occupancy signal from board")]
    NoSignal,
    #[error("board disconnected: {0}")]
    Disconnected(String)
}

impl TransportError {
    /// A missed read is retried; anything else ends the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TransportError::NoSignal)
    }
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("transport error")]
    Transport(#[from] TransportError),
    #[error("game error")]
    Game(#[from] GameError)
}
