//! Connection tracking for the arena server
//!
//! This module handles the server-side bookkeeping of live WebSocket peers:
//! - Connection lifecycle (register, remove) and capacity limits
//! - Resolving a player id to the connection that last claimed it
//! - Remembering which rooms and pools a connection entered, so a dropped
//!   socket can be cleaned up as if it had left them explicitly
//!
//! Rooms only know player ids. Every frame addressed to a player goes
//! through [`ConnectionManager::send_to_players`].

use crate::pool::Notifier;
use log::{debug, info, warn};
use shared::{MatchType, ServerPacket};
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio::sync::mpsc;

pub type ConnectionId = u32;

/// A connected peer and what it has joined
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    /// Frames queued for the socket writer
    pub outbound: mpsc::UnboundedSender<ServerPacket>,
    /// Matchmaking events queued for the socket writer
    pub events: Notifier,
    /// `(room_id, player_id)` pairs joined through this connection
    pub rooms: HashSet<(String, String)>,
    /// Pool entries created through this connection
    pub queued: HashSet<(MatchType, String)>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<ServerPacket>,
        events: Notifier,
    ) -> Self {
        Self {
            id,
            addr,
            outbound,
            events,
            rooms: HashSet::new(),
            queued: HashSet::new(),
        }
    }

    pub fn send(&self, packet: ServerPacket) -> bool {
        if self.outbound.send(packet).is_err() {
            debug!("Connection {} writer is gone", self.id);
            return false;
        }
        true
    }
}

/// Every live connection plus the player-id index used for delivery
pub struct ConnectionManager {
    connections: HashMap<ConnectionId, Connection>,
    players: HashMap<String, ConnectionId>,
    max_connections: usize,
}

impl ConnectionManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            players: HashMap::new(),
            max_connections,
        }
    }

    /// Registers a connection. Returns false when the server is full.
    pub fn register(&mut self, connection: Connection) -> bool {
        if self.connections.len() >= self.max_connections {
            warn!(
                "Rejecting connection {} from {}: server full",
                connection.id, connection.addr
            );
            return false;
        }

        info!("Connection {} registered from {}", connection.id, connection.addr);
        self.connections.insert(connection.id, connection);
        true
    }

    /// Removes a connection and every player binding that points at it.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        self.players.retain(|_, conn_id| *conn_id != id);
        info!("Connection {} removed", id);
        Some(connection)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Routes a player's frames to `id` and records the room binding.
    ///
    /// A player claimed by another connection moves here with all of its
    /// room bindings, so the old socket closing no longer unseats it.
    pub fn bind_player(&mut self, id: ConnectionId, room_id: &str, player_id: &str) {
        if !self.connections.contains_key(&id) {
            return;
        }

        let mut bindings = vec![(room_id.to_string(), player_id.to_string())];
        if let Some(previous) = self.players.insert(player_id.to_string(), id) {
            if previous != id {
                debug!(
                    "Player {} moved from connection {} to {}",
                    player_id, previous, id
                );
                if let Some(old) = self.connections.get_mut(&previous) {
                    let moved: Vec<(String, String)> = old
                        .rooms
                        .iter()
                        .filter(|(_, p)| p == player_id)
                        .cloned()
                        .collect();
                    for binding in &moved {
                        old.rooms.remove(binding);
                    }
                    bindings.extend(moved);
                }
            }
        }

        if let Some(connection) = self.connections.get_mut(&id) {
            connection.rooms.extend(bindings);
        }
    }

    pub fn unbind_player(&mut self, id: ConnectionId, room_id: &str, player_id: &str) {
        let Some(connection) = self.connections.get_mut(&id) else {
            return;
        };
        connection
            .rooms
            .remove(&(room_id.to_string(), player_id.to_string()));

        let still_seated = connection.rooms.iter().any(|(_, p)| p == player_id);
        if !still_seated && self.players.get(player_id) == Some(&id) {
            self.players.remove(player_id);
        }
    }

    pub fn track_queue(&mut self, id: ConnectionId, match_type: MatchType, identity: &str) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.queued.insert((match_type, identity.to_string()));
        }
    }

    pub fn untrack_queue(&mut self, id: ConnectionId, match_type: MatchType, identity: &str) {
        if let Some(connection) = self.connections.get_mut(&id) {
            connection.queued.remove(&(match_type, identity.to_string()));
        }
    }

    /// Sends a frame to one connection.
    pub fn send_to(&self, id: ConnectionId, packet: ServerPacket) -> bool {
        match self.connections.get(&id) {
            Some(connection) => connection.send(packet),
            None => false,
        }
    }

    /// Sends a frame once to every connection serving one of `player_ids`.
    /// Returns how many connections accepted it.
    pub fn send_to_players(&self, player_ids: &[String], packet: &ServerPacket) -> usize {
        let mut seen = HashSet::new();
        player_ids
            .iter()
            .filter_map(|player_id| {
                let id = self.players.get(player_id).copied();
                if id.is_none() {
                    debug!("No connection bound for player {}", player_id);
                }
                id
            })
            .filter(|id| seen.insert(*id))
            .filter(|id| self.send_to(*id, packet.clone()))
            .count()
    }

    /// Notifier for pool entries created through `id`.
    pub fn notifier(&self, id: ConnectionId) -> Option<Notifier> {
        self.connections.get(&id).map(|c| c.events.clone())
    }

    pub fn connection_for_player(&self, player_id: &str) -> Option<ConnectionId> {
        self.players.get(player_id).copied()
    }

    /// Returns the number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
