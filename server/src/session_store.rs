//! Persistence collaborator for game sessions.
//!
//! The matchmaker asks a [`SessionStore`] to create a session for every pair
//! it forms, and the server reports finished games back to it. The crate
//! ships an in-memory implementation; a database-backed store implements the
//! same trait.

use crate::error::SessionError;
use async_trait::async_trait;
use log::info;
use rand::Rng;
use shared::MatchType;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameMode {
    Casual,
    Ranked,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Casual => "casual",
            GameMode::Ranked => "ranked",
        }
    }
}

impl From<MatchType> for GameMode {
    fn from(match_type: MatchType) -> Self {
        match match_type {
            MatchType::Quick => GameMode::Casual,
            MatchType::Ranked => GameMode::Ranked,
        }
    }
}

/// Request to persist a new two-player session.
///
/// Guests have no account, so their id is `None`; the display name is
/// always stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub player1_id: Option<String>,
    pub player1_name: String,
    pub player2_id: Option<String>,
    pub player2_name: String,
    pub mode: GameMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub player1_id: Option<String>,
    pub player1_name: String,
    pub player2_id: Option<String>,
    pub player2_name: String,
    pub mode: GameMode,
    pub status: SessionStatus,
    pub winner: Option<String>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session and returns its id.
    async fn create_session(&self, session: NewSession) -> Result<String, SessionError>;

    /// Stores the final result; `winner` is `None` for a draw.
    async fn complete_session(
        &self,
        session_id: &str,
        winner: Option<&str>,
    ) -> Result<(), SessionError>;
}

/// Keeps sessions in process memory
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.lock().ok()?.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|sessions| sessions.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, SessionRecord>>, SessionError> {
        self.sessions
            .lock()
            .map_err(|_| SessionError::Unavailable("session table poisoned".to_string()))
    }
}

fn generate_session_id() -> String {
    format!("{:016x}", rand::thread_rng().gen::<u64>())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, session: NewSession) -> Result<String, SessionError> {
        let mut sessions = self.lock()?;

        let mut id = generate_session_id();
        while sessions.contains_key(&id) {
            id = generate_session_id();
        }

        info!(
            "Created {} session {} for {} vs {}",
            session.mode.as_str(),
            id,
            session.player1_name,
            session.player2_name
        );

        sessions.insert(
            id.clone(),
            SessionRecord {
                id: id.clone(),
                player1_id: session.player1_id,
                player1_name: session.player1_name,
                player2_id: session.player2_id,
                player2_name: session.player2_name,
                mode: session.mode,
                status: SessionStatus::Active,
                winner: None,
            },
        );

        Ok(id)
    }

    async fn complete_session(
        &self,
        session_id: &str,
        winner: Option<&str>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.lock()?;
        let record = sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        record.status = SessionStatus::Completed;
        record.winner = winner.map(str::to_string);
        info!("Completed session {} (winner: {:?})", session_id, winner);
        Ok(())
    }
}
