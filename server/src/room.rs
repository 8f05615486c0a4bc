//! Room arbitration for two-player games
//!
//! The room table owns every in-progress game. It validates joins, moves and
//! leaves, applies them to the board and reports which frames must go to
//! which players. It never touches a connection directly: the network layer
//! resolves player ids to sockets and delivers the returned [`Broadcast`]s.

use crate::error::RoomError;
use log::{debug, info};
use shared::{
    empty_board, is_full, winning_mark, Board, Mark, ServerPacket, BOARD_SIZE,
    MAX_PLAYERS_PER_ROOM,
};
use std::collections::HashMap;

/// A frame addressed to a set of players
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub recipients: Vec<String>,
    pub packet: ServerPacket,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameOutcome {
    Winner(String),
    Draw,
}

impl GameOutcome {
    pub fn winner(&self) -> Option<&str> {
        match self {
            GameOutcome::Winner(id) => Some(id),
            GameOutcome::Draw => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomPhase {
    WaitingForOpponent,
    Active,
    Finished(GameOutcome),
}

/// Result of an accepted move
#[derive(Debug, Clone, PartialEq)]
pub struct MoveApplied {
    pub broadcast: Broadcast,
    /// Set when this move ended the game
    pub outcome: Option<GameOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub player_id: String,
    pub mark: Mark,
}

/// One game session and its board
#[derive(Debug, Clone)]
pub struct Room {
    pub id: String,
    pub seats: Vec<Seat>,
    pub current_turn: String,
    pub board: Board,
    pub phase: RoomPhase,
}

impl Room {
    fn new(id: &str, first_player: &str) -> Self {
        Self {
            id: id.to_string(),
            seats: Vec::with_capacity(MAX_PLAYERS_PER_ROOM),
            current_turn: first_player.to_string(),
            board: empty_board(),
            phase: RoomPhase::WaitingForOpponent,
        }
    }

    pub fn players(&self) -> Vec<String> {
        self.seats.iter().map(|s| s.player_id.clone()).collect()
    }

    pub fn has_player(&self, player_id: &str) -> bool {
        self.seats.iter().any(|s| s.player_id == player_id)
    }

    pub fn mark_of(&self, player_id: &str) -> Option<Mark> {
        self.seats
            .iter()
            .find(|s| s.player_id == player_id)
            .map(|s| s.mark)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, RoomPhase::Finished(_))
    }

    /// The first seat plays X; a later seat takes whichever mark is free.
    fn free_mark(&self) -> Mark {
        match self.seats.first() {
            Some(seat) => seat.mark.other(),
            None => Mark::X,
        }
    }

    fn opponent_of(&self, player_id: &str) -> Option<&str> {
        self.seats
            .iter()
            .find(|s| s.player_id != player_id)
            .map(|s| s.player_id.as_str())
    }

    fn state_packet(&self) -> ServerPacket {
        ServerPacket::GameUpdate {
            players: self.players(),
            current_turn: self.current_turn.clone(),
            board: self.board,
        }
    }

    fn to_all(&self, packet: ServerPacket) -> Broadcast {
        Broadcast {
            recipients: self.players(),
            packet,
        }
    }
}

/// Every live room, keyed by room id
#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<String, Room>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Seats a player, creating the room on first sight of its id.
    ///
    /// Rejoining with a seated id leaves the seats untouched but still
    /// re-broadcasts the full state. The transition to two seats also emits
    /// the start notification.
    pub fn join(&mut self, room_id: &str, player_id: &str) -> Result<Vec<Broadcast>, RoomError> {
        let room = self.rooms.entry(room_id.to_string()).or_insert_with(|| {
            info!("Created room {} for player {}", room_id, player_id);
            Room::new(room_id, player_id)
        });

        let mut seated_now = false;
        if !room.has_player(player_id) {
            if room.seats.len() >= MAX_PLAYERS_PER_ROOM {
                return Err(RoomError::RoomFull);
            }
            let mark = room.free_mark();
            room.seats.push(Seat {
                player_id: player_id.to_string(),
                mark,
            });
            seated_now = true;
            info!("Player {} joined room {} as {:?}", player_id, room_id, mark);
        } else {
            debug!("Player {} rejoined room {}", player_id, room_id);
        }

        let mut broadcasts = vec![room.to_all(room.state_packet())];

        if seated_now && room.seats.len() == MAX_PLAYERS_PER_ROOM && !room.is_finished() {
            room.phase = RoomPhase::Active;
            broadcasts.push(room.to_all(ServerPacket::GameStart {
                message: "Game started!".to_string(),
            }));
        }

        Ok(broadcasts)
    }

    /// Validates and applies one move.
    ///
    /// Rejections leave the room untouched.
    pub fn make_move(
        &mut self,
        room_id: &str,
        player_id: &str,
        position: usize,
    ) -> Result<MoveApplied, RoomError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;

        if room.is_finished() {
            return Err(RoomError::GameOver);
        }
        if room.current_turn != player_id {
            return Err(RoomError::OutOfTurn);
        }
        if room.seats.len() < MAX_PLAYERS_PER_ROOM {
            return Err(RoomError::WaitingForOpponent);
        }
        if position >= BOARD_SIZE {
            return Err(RoomError::InvalidPosition(position));
        }
        if room.board[position].is_some() {
            return Err(RoomError::CellOccupied(position));
        }

        let mark = room
            .mark_of(player_id)
            .ok_or_else(|| RoomError::NotInRoom(player_id.to_string()))?;
        room.board[position] = Some(mark);
        debug!(
            "Room {}: {} placed {:?} at {}",
            room_id, player_id, mark, position
        );

        let outcome = if winning_mark(&room.board) == Some(mark) {
            Some(GameOutcome::Winner(player_id.to_string()))
        } else if is_full(&room.board) {
            Some(GameOutcome::Draw)
        } else {
            None
        };

        if let Some(outcome) = outcome {
            info!("Room {} finished: {:?}", room_id, outcome);
            room.phase = RoomPhase::Finished(outcome.clone());
            let broadcast = room.to_all(ServerPacket::GameEnd {
                winner: outcome.winner().map(str::to_string),
                board: room.board,
            });
            return Ok(MoveApplied {
                broadcast,
                outcome: Some(outcome),
            });
        }

        if let Some(next) = room.opponent_of(player_id).map(str::to_string) {
            room.current_turn = next;
        }

        let broadcast = room.to_all(ServerPacket::MoveMade {
            player_id: player_id.to_string(),
            position,
            current_turn: room.current_turn.clone(),
            board: room.board,
        });

        Ok(MoveApplied {
            broadcast,
            outcome: None,
        })
    }

    /// Removes a player; the room is dropped once nobody is seated.
    pub fn leave(&mut self, room_id: &str, player_id: &str) -> Result<Vec<Broadcast>, RoomError> {
        let room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| RoomError::RoomNotFound(room_id.to_string()))?;

        if !room.has_player(player_id) {
            return Err(RoomError::NotInRoom(player_id.to_string()));
        }
        room.seats.retain(|s| s.player_id != player_id);
        info!("Player {} left room {}", player_id, room_id);

        if room.seats.is_empty() {
            self.rooms.remove(room_id);
            info!("Removed empty room {}", room_id);
            return Ok(Vec::new());
        }

        if !room.is_finished() {
            room.phase = RoomPhase::WaitingForOpponent;
            if room.current_turn == player_id {
                if let Some(remaining) = room.seats.first() {
                    room.current_turn = remaining.player_id.clone();
                }
            }
        }

        Ok(vec![room.to_all(ServerPacket::PlayerLeft {
            message: format!("Player {} left the game", player_id),
        })])
    }
}
