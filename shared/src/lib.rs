//! Wire protocol and board rules shared by the arena server and its clients.
//!
//! Every frame on the wire is a single JSON object discriminated by a `type`
//! field. Client frames decode into [`ClientPacket`], server frames encode
//! from [`ServerPacket`]. Win detection lives here too so a client renders
//! exactly the verdict the server reaches.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const BOARD_SIZE: usize = 9;
pub const MAX_PLAYERS_PER_ROOM: usize = 2;

/// The 8 lines that win a game: 3 rows, 3 columns, 2 diagonals.
pub const WIN_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mark {
    X,
    O,
}

impl Mark {
    pub fn other(self) -> Mark {
        match self {
            Mark::X => Mark::O,
            Mark::O => Mark::X,
        }
    }
}

/// Linear 3x3 grid, `None` for an empty cell.
pub type Board = [Option<Mark>; BOARD_SIZE];

pub fn empty_board() -> Board {
    [None; BOARD_SIZE]
}

/// Returns the mark holding any complete line.
pub fn winning_mark(board: &Board) -> Option<Mark> {
    WIN_LINES.iter().find_map(|&[a, b, c]| match board[a] {
        Some(mark) if board[b] == Some(mark) && board[c] == Some(mark) => Some(mark),
        _ => None,
    })
}

pub fn is_full(board: &Board) -> bool {
    board.iter().all(Option::is_some)
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Quick,
    Ranked,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Quick => "quick",
            MatchType::Ranked => "ranked",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Searching,
    Found,
    Timeout,
    Error,
}

/// Frames sent by clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientPacket {
    JoinGame {
        game_id: String,
        player_id: String,
    },
    MakeMove {
        game_id: String,
        player_id: String,
        position: usize,
    },
    LeaveGame {
        game_id: String,
        player_id: String,
    },
    JoinMatchmaking {
        match_type: MatchType,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
        #[serde(default)]
        rating: Option<i32>,
    },
    LeaveMatchmaking {
        match_type: MatchType,
        player_id: String,
    },
    GetPoolSize {
        match_type: MatchType,
    },
}

impl ClientPacket {
    /// Every `type` tag a client may send.
    pub const TYPES: [&'static str; 6] = [
        "JOIN_GAME",
        "MAKE_MOVE",
        "LEAVE_GAME",
        "JOIN_MATCHMAKING",
        "LEAVE_MATCHMAKING",
        "GET_POOL_SIZE",
    ];
}

/// Frames sent by the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerPacket {
    GameUpdate {
        players: Vec<String>,
        current_turn: String,
        board: Board,
    },
    GameStart {
        message: String,
    },
    MoveMade {
        player_id: String,
        position: usize,
        current_turn: String,
        board: Board,
    },
    GameEnd {
        winner: Option<String>,
        board: Board,
    },
    PlayerLeft {
        message: String,
    },
    Error {
        message: String,
    },
    MatchmakingJoined {
        match_type: MatchType,
        player_id: String,
    },
    MatchmakingLeft {
        match_type: MatchType,
        removed: bool,
    },
    MatchmakingStatus {
        match_type: MatchType,
        status: MatchStatus,
    },
    MatchFound {
        match_type: MatchType,
        session_id: String,
    },
    PoolSize {
        match_type: MatchType,
        size: usize,
    },
}

impl ServerPacket {
    pub fn error(message: impl Into<String>) -> Self {
        ServerPacket::Error {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    Malformed(String),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

/// Decodes one client frame, separating unknown `type` tags from bad payloads.
pub fn decode_client(text: &str) -> Result<ClientPacket, ProtocolError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| ProtocolError::Malformed("missing `type` field".to_string()))?;

    if !ClientPacket::TYPES.contains(&kind) {
        return Err(ProtocolError::UnknownType(kind.to_string()));
    }

    serde_json::from_value(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn encode_server(packet: &ServerPacket) -> Result<String, serde_json::Error> {
    serde_json::to_string(packet)
}
