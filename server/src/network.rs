//! Server network layer handling WebSocket connections and the event loop

use crate::config::ServerConfig;
use crate::connection_manager::{Connection, ConnectionId, ConnectionManager};
use crate::error::{RoomError, SessionError};
use crate::matchmaking::{materialize, JoinRequest, Matchmaker};
use crate::pool::{MatchmakingEvent, Notifier};
use crate::room::{Broadcast, GameOutcome, RoomTable};
use crate::session_store::SessionStore;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{decode_client, encode_server, ClientPacket, ServerPacket};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Connected {
        conn_id: ConnectionId,
        addr: SocketAddr,
        outbound: mpsc::UnboundedSender<ServerPacket>,
        events: Notifier,
    },
    FrameReceived {
        conn_id: ConnectionId,
        text: String,
    },
    Disconnected {
        conn_id: ConnectionId,
    },
    Shutdown,
}

/// Main server owning rooms, pools and connections.
///
/// Everything here runs on one task: inbound frames and scheduler ticks are
/// handled one at a time, so no state is shared or locked. Only session
/// creation and result recording leave the loop, as spawned tasks.
pub struct Server {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    config: ServerConfig,
    rooms: RoomTable,
    matchmaker: Matchmaker,
    connections: ConnectionManager,
    store: Arc<dyn SessionStore>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn bind(config: ServerConfig, store: Arc<dyn SessionStore>) -> Result<Self, BoxError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            local_addr,
            rooms: RoomTable::new(),
            matchmaker: Matchmaker::new(config.matchmaking.clone()),
            connections: ConnectionManager::new(config.max_connections),
            config,
            store,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sender for injecting messages, e.g. [`ServerMessage::Shutdown`]
    pub fn sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    pub fn rooms(&self) -> &RoomTable {
        &self.rooms
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    /// Spawns task that accepts sockets and hands each to its own task
    fn spawn_acceptor(&mut self) -> Result<(), BoxError> {
        let listener = self.listener.take().ok_or("server is already running")?;
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut next_id: ConnectionId = 1;

            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let conn_id = next_id;
                        next_id = next_id.wrapping_add(1);
                        tokio::spawn(handle_connection(stream, addr, conn_id, server_tx.clone()));
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }

                if server_tx.is_closed() {
                    break;
                }
            }
        });

        Ok(())
    }

    /// Main server loop coordinating connections and matchmaking
    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.spawn_acceptor()?;

        let mut scan = interval(self.config.matchmaking.scan_interval);
        scan.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // Skip the first tick since it fires immediately
        scan.tick().await;

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                        Some(message) => self.handle_message(message),
                    }
                },

                _ = scan.tick() => {
                    self.run_matchmaking_pass(Instant::now());
                },
            }
        }

        Ok(())
    }

    pub fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Connected {
                conn_id,
                addr,
                outbound,
                events,
            } => {
                let connection = Connection::new(conn_id, addr, outbound.clone(), events);
                if !self.connections.register(connection) {
                    // Dropping the last sender afterwards closes the socket
                    let _ = outbound.send(ServerPacket::error("Server full"));
                }
            }
            ServerMessage::FrameReceived { conn_id, text } => self.handle_frame(conn_id, &text),
            ServerMessage::Disconnected { conn_id } => self.handle_disconnect(conn_id),
            ServerMessage::Shutdown => {}
        }
    }

    fn handle_frame(&mut self, conn_id: ConnectionId, text: &str) {
        if self.connections.get(conn_id).is_none() {
            debug!("Ignoring frame from unregistered connection {}", conn_id);
            return;
        }

        match decode_client(text) {
            Ok(packet) => self.handle_packet(conn_id, packet),
            Err(e) => {
                warn!("Rejected frame from connection {}: {}", conn_id, e);
                self.reply(conn_id, ServerPacket::error(e.to_string()));
            }
        }
    }

    /// Applies one decoded client packet
    fn handle_packet(&mut self, conn_id: ConnectionId, packet: ClientPacket) {
        debug!("Connection {}: {:?}", conn_id, packet);

        match packet {
            ClientPacket::JoinGame { game_id, player_id } => {
                match self.rooms.join(&game_id, &player_id) {
                    Ok(broadcasts) => {
                        self.connections.bind_player(conn_id, &game_id, &player_id);
                        self.deliver(broadcasts);
                    }
                    Err(e) => self.reject(conn_id, e),
                }
            }

            ClientPacket::MakeMove {
                game_id,
                player_id,
                position,
            } => match self.rooms.make_move(&game_id, &player_id, position) {
                Ok(applied) => {
                    self.deliver(vec![applied.broadcast]);
                    if let Some(outcome) = applied.outcome {
                        self.record_outcome(&game_id, outcome);
                    }
                }
                Err(e) => self.reject(conn_id, e),
            },

            ClientPacket::LeaveGame { game_id, player_id } => {
                match self.rooms.leave(&game_id, &player_id) {
                    Ok(broadcasts) => {
                        self.connections.unbind_player(conn_id, &game_id, &player_id);
                        self.deliver(broadcasts);
                    }
                    Err(e) => self.reject(conn_id, e),
                }
            }

            ClientPacket::JoinMatchmaking {
                match_type,
                user_id,
                display_name,
                rating,
            } => {
                let Some(notifier) = self.connections.notifier(conn_id) else {
                    return;
                };
                let request = JoinRequest {
                    user_id,
                    display_name,
                    rating,
                };
                let identity = self
                    .matchmaker
                    .join(match_type, request, notifier, Instant::now());
                self.connections.track_queue(conn_id, match_type, &identity);
                self.reply(
                    conn_id,
                    ServerPacket::MatchmakingJoined {
                        match_type,
                        player_id: identity,
                    },
                );
            }

            ClientPacket::LeaveMatchmaking {
                match_type,
                player_id,
            } => {
                let removed = self.matchmaker.leave(match_type, &player_id);
                self.connections.untrack_queue(conn_id, match_type, &player_id);
                self.reply(
                    conn_id,
                    ServerPacket::MatchmakingLeft {
                        match_type,
                        removed,
                    },
                );
            }

            ClientPacket::GetPoolSize { match_type } => {
                let size = self.matchmaker.pool_size(match_type);
                self.reply(conn_id, ServerPacket::PoolSize { match_type, size });
            }
        }
    }

    /// Leaves every room and pool the connection entered
    fn handle_disconnect(&mut self, conn_id: ConnectionId) {
        let Some(connection) = self.connections.remove(conn_id) else {
            return;
        };

        for (room_id, player_id) in &connection.rooms {
            match self.rooms.leave(room_id, player_id) {
                Ok(broadcasts) => self.deliver(broadcasts),
                Err(e) => debug!("Cleanup of {} in {} skipped: {}", player_id, room_id, e),
            }
        }

        for (match_type, identity) in &connection.queued {
            self.matchmaker
                .leave_owned(*match_type, identity, &connection.events);
        }
    }

    /// Pairs waiting clients and materializes each pair off the loop
    pub fn run_matchmaking_pass(&mut self, now: Instant) {
        for pairing in self.matchmaker.tick(now) {
            let store = Arc::clone(&self.store);
            tokio::spawn(async move {
                // outcome already reported to both players
                let _ = materialize(store.as_ref(), pairing).await;
            });
        }
    }

    fn record_outcome(&self, room_id: &str, outcome: GameOutcome) {
        let store = Arc::clone(&self.store);
        let session_id = room_id.to_string();

        tokio::spawn(async move {
            match store.complete_session(&session_id, outcome.winner()).await {
                Ok(()) => {}
                Err(SessionError::NotFound(_)) => {
                    debug!("Room {} has no stored session", session_id)
                }
                Err(e) => warn!("Failed to record result of {}: {}", session_id, e),
            }
        });
    }

    fn deliver(&self, broadcasts: Vec<Broadcast>) {
        for broadcast in broadcasts {
            self.connections
                .send_to_players(&broadcast.recipients, &broadcast.packet);
        }
    }

    fn reply(&self, conn_id: ConnectionId, packet: ServerPacket) {
        self.connections.send_to(conn_id, packet);
    }

    fn reject(&self, conn_id: ConnectionId, error: RoomError) {
        debug!("Connection {} rejected: {}", conn_id, error);
        self.reply(conn_id, ServerPacket::error(error.to_string()));
    }
}

/// Runs one WebSocket peer: frames in go to the main loop, queued packets
/// and matchmaking events go out.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    conn_id: ConnectionId,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", addr, e);
            return;
        }
    };
    info!("Connection {} opened from {}", conn_id, addr);

    let (mut write, mut read) = ws_stream.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerPacket>();
    let (events, mut events_rx) = mpsc::unbounded_channel::<MatchmakingEvent>();

    let connected = ServerMessage::Connected {
        conn_id,
        addr,
        outbound,
        events,
    };
    if server_tx.send(connected).is_err() {
        return;
    }

    loop {
        tokio::select! {
            packet = outbound_rx.recv() => {
                // None: the server dropped this connection
                let Some(packet) = packet else { break };
                if !write_packet(&mut write, &packet).await {
                    break;
                }
            },

            Some(event) = events_rx.recv() => {
                if !write_packet(&mut write, &ServerPacket::from(event)).await {
                    break;
                }
            },

            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if server_tx.send(ServerMessage::FrameReceived { conn_id, text }).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        let reply = ServerPacket::error("Binary frames are not supported");
                        if !write_packet(&mut write, &reply).await {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Connection {} read error: {}", conn_id, e);
                        break;
                    }
                }
            },
        }
    }

    let _ = write.close().await;
    info!("Connection {} closed", conn_id);
    let _ = server_tx.send(ServerMessage::Disconnected { conn_id });
}

async fn write_packet(write: &mut WsSink, packet: &ServerPacket) -> bool {
    let text = match encode_server(packet) {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode packet: {}", e);
            return true;
        }
    };

    if let Err(e) = write.send(Message::Text(text)).await {
        debug!("Failed to write frame: {}", e);
        return false;
    }
    true
}
