//! Error types for room arbitration and the session collaborator.

use thiserror::Error;

/// Business-rule violations raised by the room table. Each is reported to
/// the sender as an `ERROR` frame and never closes the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Game {0} not found")]
    RoomNotFound(String),
    #[error("Not your turn")]
    OutOfTurn,
    #[error("Game is full")]
    RoomFull,
    #[error("Game is already over")]
    GameOver,
    #[error("Waiting for an opponent")]
    WaitingForOpponent,
    #[error("Invalid position {0}")]
    InvalidPosition(usize),
    #[error("Position {0} is already taken")]
    CellOccupied(usize),
    #[error("Player {0} is not in this game")]
    NotInRoom(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session service unavailable: {0}")]
    Unavailable(String),
    #[error("session service returned no session id")]
    MissingSessionId,
    #[error("session {0} not found")]
    NotFound(String),
}
