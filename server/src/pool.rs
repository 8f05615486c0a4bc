//! Waiting pools for matchmaking
//!
//! A pool holds the clients waiting for one kind of match. It knows how to
//! pick pairs (FIFO for quick games, rating-tolerance for ranked games) and
//! which entries have waited too long, but leaves removal and notification
//! to the [`Matchmaker`](crate::matchmaking::Matchmaker).

use crate::config::MatchmakingConfig;
use log::debug;
use shared::{MatchStatus, MatchType, ServerPacket};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// What the scheduler reports back to a waiting client
#[derive(Debug, Clone, PartialEq)]
pub enum MatchmakingEvent {
    Status {
        match_type: MatchType,
        status: MatchStatus,
    },
    MatchFound {
        match_type: MatchType,
        session_id: String,
    },
}

impl From<MatchmakingEvent> for ServerPacket {
    fn from(event: MatchmakingEvent) -> Self {
        match event {
            MatchmakingEvent::Status { match_type, status } => {
                ServerPacket::MatchmakingStatus { match_type, status }
            }
            MatchmakingEvent::MatchFound {
                match_type,
                session_id,
            } => ServerPacket::MatchFound {
                match_type,
                session_id,
            },
        }
    }
}

/// Outbound event queue of one waiting client
pub type Notifier = mpsc::UnboundedSender<MatchmakingEvent>;

/// A client waiting for an opponent
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub identity: String,
    pub display_name: String,
    pub is_guest: bool,
    pub enqueued_at: Instant,
    /// Only set in the ranked pool
    pub rating: Option<i32>,
    pub notifier: Notifier,
}

impl WaitingEntry {
    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    /// Sends an event, returning false when the client is gone.
    pub fn notify(&self, event: MatchmakingEvent) -> bool {
        notify(&self.notifier, &self.identity, event)
    }
}

pub(crate) fn notify(notifier: &Notifier, identity: &str, event: MatchmakingEvent) -> bool {
    if notifier.send(event).is_err() {
        debug!("Dropped matchmaking event for departed client {}", identity);
        return false;
    }
    true
}

/// All entries waiting for one kind of match, keyed by identity
#[derive(Debug)]
pub struct Pool {
    match_type: MatchType,
    entries: HashMap<String, WaitingEntry>,
}

impl Pool {
    pub fn new(match_type: MatchType) -> Self {
        Self {
            match_type,
            entries: HashMap::new(),
        }
    }

    /// Inserts an entry, returning the one it replaced.
    pub fn insert(&mut self, entry: WaitingEntry) -> Option<WaitingEntry> {
        self.entries.insert(entry.identity.clone(), entry)
    }

    pub fn remove(&mut self, identity: &str) -> Option<WaitingEntry> {
        self.entries.remove(identity)
    }

    pub fn get(&self, identity: &str) -> Option<&WaitingEntry> {
        self.entries.get(identity)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries sorted by enqueue instant, identity breaking ties so scans
    /// are deterministic.
    fn oldest_first(&self) -> Vec<&WaitingEntry> {
        let mut entries: Vec<&WaitingEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| {
            a.enqueued_at
                .cmp(&b.enqueued_at)
                .then_with(|| a.identity.cmp(&b.identity))
        });
        entries
    }

    /// The two longest-waiting entries. One pair per scheduler pass.
    pub fn select_oldest_pair(&self) -> Option<(String, String)> {
        let order = self.oldest_first();
        match order.as_slice() {
            [first, second, ..] => Some((first.identity.clone(), second.identity.clone())),
            _ => None,
        }
    }

    /// Pairs entries whose rating gap fits the tolerance of the older entry.
    ///
    /// Each unmatched entry, oldest first, takes the closest-rated later
    /// entry within its tolerance. The earliest candidate wins a tie.
    pub fn select_rated_pairs(
        &self,
        now: Instant,
        config: &MatchmakingConfig,
        default_rating: i32,
    ) -> Vec<(String, String)> {
        let order = self.oldest_first();
        let mut matched: HashSet<&str> = HashSet::new();
        let mut pairs = Vec::new();

        for (i, a) in order.iter().enumerate() {
            if matched.contains(a.identity.as_str()) {
                continue;
            }

            let tolerance = config.tolerance(a.waited(now));
            let rating_a = a.rating.unwrap_or(default_rating);

            let mut best: Option<(&WaitingEntry, u32)> = None;
            for b in &order[i + 1..] {
                if matched.contains(b.identity.as_str()) {
                    continue;
                }
                let diff = rating_a.abs_diff(b.rating.unwrap_or(default_rating));
                if diff > tolerance {
                    continue;
                }
                if best.map_or(true, |(_, best_diff)| diff < best_diff) {
                    best = Some((*b, diff));
                }
            }

            if let Some((b, diff)) = best {
                debug!(
                    "Rated pair {} / {} in {} pool (diff {}, tolerance {})",
                    a.identity,
                    b.identity,
                    self.match_type.as_str(),
                    diff,
                    tolerance
                );
                matched.insert(a.identity.as_str());
                matched.insert(b.identity.as_str());
                pairs.push((a.identity.clone(), b.identity.clone()));
            }
        }

        pairs
    }

    /// Identities that have waited longer than `timeout`.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.waited(now) > timeout)
            .map(|entry| entry.identity.clone())
            .collect()
    }
}
