//! Matchmaking scheduler
//!
//! The [`Matchmaker`] owns the quick and ranked pools for the life of the
//! server. Clients join a pool and are told `SEARCHING` right away; pairing
//! happens later, on [`Matchmaker::tick`], which the server drives from its
//! scan interval.
//!
//! A tick removes every paired entry from its pool and reports `FOUND`
//! before anything asynchronous happens, so a pending session creation can
//! never be paired twice. The pairs it returns are then turned into
//! persisted sessions by [`materialize`], off the event loop.

use crate::config::MatchmakingConfig;
use crate::error::SessionError;
use crate::pool::{notify, MatchmakingEvent, Notifier, Pool, WaitingEntry};
use crate::session_store::{GameMode, NewSession, SessionStore};
use log::{info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use shared::{MatchStatus, MatchType};
use std::time::Instant;

/// Rating assumed for ranked entries that did not send one
pub const DEFAULT_RATING: i32 = 1000;

const GUEST_ID_LEN: usize = 9;

/// Parameters of a pool join
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinRequest {
    /// Account id; `None` queues as a guest
    pub user_id: Option<String>,
    pub display_name: Option<String>,
    pub rating: Option<i32>,
}

/// One side of a pairing, detached from its pool
#[derive(Debug, Clone)]
pub struct PairedPlayer {
    pub identity: String,
    pub display_name: String,
    pub is_guest: bool,
    pub notifier: Notifier,
}

impl From<WaitingEntry> for PairedPlayer {
    fn from(entry: WaitingEntry) -> Self {
        Self {
            identity: entry.identity,
            display_name: entry.display_name,
            is_guest: entry.is_guest,
            notifier: entry.notifier,
        }
    }
}

impl PairedPlayer {
    fn notify(&self, event: MatchmakingEvent) -> bool {
        notify(&self.notifier, &self.identity, event)
    }

    fn account_id(&self) -> Option<String> {
        (!self.is_guest).then(|| self.identity.clone())
    }
}

/// Two entries matched on one tick
#[derive(Debug, Clone)]
pub struct Pairing {
    pub match_type: MatchType,
    pub first: PairedPlayer,
    pub second: PairedPlayer,
}

impl Pairing {
    fn new_session(&self) -> NewSession {
        NewSession {
            player1_id: self.first.account_id(),
            player1_name: self.first.display_name.clone(),
            player2_id: self.second.account_id(),
            player2_name: self.second.display_name.clone(),
            mode: GameMode::from(self.match_type),
        }
    }

    fn notify_both(&self, event: MatchmakingEvent) {
        self.first.notify(event.clone());
        self.second.notify(event);
    }
}

pub fn generate_guest_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GUEST_ID_LEN)
        .map(char::from)
        .collect();
    format!("guest_{}", suffix.to_lowercase())
}

/// Service object owning both waiting pools
#[derive(Debug)]
pub struct Matchmaker {
    quick: Pool,
    ranked: Pool,
    config: MatchmakingConfig,
}

impl Matchmaker {
    pub fn new(config: MatchmakingConfig) -> Self {
        Self {
            quick: Pool::new(MatchType::Quick),
            ranked: Pool::new(MatchType::Ranked),
            config,
        }
    }

    pub fn pool(&self, match_type: MatchType) -> &Pool {
        match match_type {
            MatchType::Quick => &self.quick,
            MatchType::Ranked => &self.ranked,
        }
    }

    fn pool_mut(&mut self, match_type: MatchType) -> &mut Pool {
        match match_type {
            MatchType::Quick => &mut self.quick,
            MatchType::Ranked => &mut self.ranked,
        }
    }

    /// Queues a client and reports `SEARCHING`. Returns the identity used,
    /// which is freshly generated for guests.
    pub fn join(
        &mut self,
        match_type: MatchType,
        request: JoinRequest,
        notifier: Notifier,
        now: Instant,
    ) -> String {
        let is_guest = request.user_id.is_none();
        let identity = request.user_id.unwrap_or_else(generate_guest_id);
        let display_name = request
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Guest".to_string());
        let rating = match match_type {
            MatchType::Ranked => Some(request.rating.unwrap_or(DEFAULT_RATING)),
            MatchType::Quick => None,
        };

        let entry = WaitingEntry {
            identity: identity.clone(),
            display_name,
            is_guest,
            enqueued_at: now,
            rating,
            notifier,
        };
        entry.notify(MatchmakingEvent::Status {
            match_type,
            status: MatchStatus::Searching,
        });

        let pool = self.pool_mut(match_type);
        if pool.insert(entry).is_some() {
            info!("Re-queued {} in {} pool", identity, match_type.as_str());
        } else {
            info!(
                "Queued {} in {} pool ({} waiting)",
                identity,
                match_type.as_str(),
                pool.len()
            );
        }

        identity
    }

    /// Returns whether an entry was actually removed.
    pub fn leave(&mut self, match_type: MatchType, identity: &str) -> bool {
        let removed = self.pool_mut(match_type).remove(identity).is_some();
        if removed {
            info!("{} left the {} pool", identity, match_type.as_str());
        }
        removed
    }

    /// Removes an entry only if it still reports to `notifier`, so a
    /// departed connection cannot pull an identity re-queued elsewhere.
    pub fn leave_owned(&mut self, match_type: MatchType, identity: &str, notifier: &Notifier) -> bool {
        let pool = self.pool_mut(match_type);
        let owned = pool
            .get(identity)
            .map_or(false, |entry| entry.notifier.same_channel(notifier));
        owned && self.leave(match_type, identity)
    }

    pub fn pool_size(&self, match_type: MatchType) -> usize {
        self.pool(match_type).len()
    }

    /// Runs one scheduler pass over both pools: pairing, then timeouts.
    pub fn tick(&mut self, now: Instant) -> Vec<Pairing> {
        let mut pairings = Vec::new();
        for match_type in [MatchType::Quick, MatchType::Ranked] {
            pairings.extend(self.pair_pool(match_type, now));
            self.evict_expired(match_type, now);
        }
        pairings
    }

    fn pair_pool(&mut self, match_type: MatchType, now: Instant) -> Vec<Pairing> {
        let selected = match match_type {
            MatchType::Quick => self.quick.select_oldest_pair().into_iter().collect(),
            MatchType::Ranked => {
                self.ranked
                    .select_rated_pairs(now, &self.config, DEFAULT_RATING)
            }
        };

        let pool = self.pool_mut(match_type);
        let mut pairings = Vec::with_capacity(selected.len());

        for (a, b) in selected {
            let (Some(first), Some(second)) = (pool.remove(&a), pool.remove(&b)) else {
                continue;
            };

            let pairing = Pairing {
                match_type,
                first: first.into(),
                second: second.into(),
            };
            pairing.notify_both(MatchmakingEvent::Status {
                match_type,
                status: MatchStatus::Found,
            });
            info!(
                "Paired {} with {} in {} pool",
                pairing.first.identity,
                pairing.second.identity,
                match_type.as_str()
            );
            pairings.push(pairing);
        }

        pairings
    }

    fn evict_expired(&mut self, match_type: MatchType, now: Instant) {
        let timeout = self.config.wait_timeout;
        let pool = self.pool_mut(match_type);

        for identity in pool.expired(now, timeout) {
            if let Some(entry) = pool.remove(&identity) {
                info!(
                    "{} timed out after {:?} in {} pool",
                    identity,
                    entry.waited(now),
                    match_type.as_str()
                );
                entry.notify(MatchmakingEvent::Status {
                    match_type,
                    status: MatchStatus::Timeout,
                });
            }
        }
    }
}

/// Persists a pairing as a game session and tells both players the outcome.
///
/// Failure is final for this attempt: both players get `ERROR` and must
/// queue again.
pub async fn materialize(
    store: &dyn SessionStore,
    pairing: Pairing,
) -> Result<String, SessionError> {
    let result = match store.create_session(pairing.new_session()).await {
        Ok(session_id) if session_id.is_empty() => Err(SessionError::MissingSessionId),
        other => other,
    };

    match &result {
        Ok(session_id) => {
            info!(
                "Session {} ready for {} and {}",
                session_id, pairing.first.identity, pairing.second.identity
            );
            pairing.notify_both(MatchmakingEvent::MatchFound {
                match_type: pairing.match_type,
                session_id: session_id.clone(),
            });
        }
        Err(e) => {
            warn!(
                "Session creation failed for {} and {}: {}",
                pairing.first.identity, pairing.second.identity, e
            );
            pairing.notify_both(MatchmakingEvent::Status {
                match_type: pairing.match_type,
                status: MatchStatus::Error,
            });
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::InMemorySessionStore;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;

    type Events = mpsc::UnboundedReceiver<MatchmakingEvent>;

    fn registered(name: &str, rating: Option<i32>) -> JoinRequest {
        JoinRequest {
            user_id: Some(name.to_string()),
            display_name: Some(name.to_uppercase()),
            rating,
        }
    }

    fn join(
        mm: &mut Matchmaker,
        match_type: MatchType,
        request: JoinRequest,
        now: Instant,
    ) -> (String, Events) {
        let (tx, rx) = mpsc::unbounded_channel();
        let identity = mm.join(match_type, request, tx, now);
        (identity, rx)
    }

    fn drain(rx: &mut Events) -> Vec<MatchmakingEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn status(match_type: MatchType, status: MatchStatus) -> MatchmakingEvent {
        MatchmakingEvent::Status { match_type, status }
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn create_session(&self, _session: NewSession) -> Result<String, SessionError> {
            Err(SessionError::Unavailable("database offline".to_string()))
        }

        async fn complete_session(
            &self,
            _session_id: &str,
            _winner: Option<&str>,
        ) -> Result<(), SessionError> {
            Ok(())
        }
    }

    struct EmptyIdStore;

    #[async_trait]
    impl SessionStore for EmptyIdStore {
        async fn create_session(&self, _session: NewSession) -> Result<String, SessionError> {
            Ok(String::new())
        }

        async fn complete_session(
            &self,
            _session_id: &str,
            _winner: Option<&str>,
        ) -> Result<(), SessionError> {
            Ok(())
        }
    }

    #[test]
    fn test_join_reports_searching() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let (identity, mut rx) = join(&mut mm, MatchType::Quick, registered("alice", None), Instant::now());

        assert_eq!(identity, "alice");
        assert_eq!(mm.pool_size(MatchType::Quick), 1);
        assert_eq!(mm.pool_size(MatchType::Ranked), 0);
        assert_eq!(
            drain(&mut rx),
            vec![status(MatchType::Quick, MatchStatus::Searching)]
        );
    }

    #[test]
    fn test_guest_join_generates_identity() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let (identity, _rx) = join(&mut mm, MatchType::Quick, JoinRequest::default(), Instant::now());

        assert!(identity.starts_with("guest_"));
        assert_eq!(identity.len(), "guest_".len() + GUEST_ID_LEN);
        let entry = mm.pool(MatchType::Quick).get(&identity).unwrap();
        assert!(entry.is_guest);
        assert_eq!(entry.display_name, "Guest");
    }

    #[test]
    fn test_rejoin_overwrites_entry() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, _rx1) = join(&mut mm, MatchType::Ranked, registered("alice", Some(900)), base);
        let later = base + Duration::from_secs(10);
        let (_, _rx2) = join(&mut mm, MatchType::Ranked, registered("alice", Some(950)), later);

        let entry = mm.pool(MatchType::Ranked).get("alice").unwrap();
        assert_eq!(mm.pool_size(MatchType::Ranked), 1);
        assert_eq!(entry.rating, Some(950));
        assert_eq!(entry.enqueued_at, later);
    }

    #[test]
    fn test_quick_entries_carry_no_rating() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let (_, _rx) = join(&mut mm, MatchType::Quick, registered("alice", Some(1500)), Instant::now());
        assert_eq!(mm.pool(MatchType::Quick).get("alice").unwrap().rating, None);
    }

    #[test]
    fn test_leave_reports_presence() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let (_, _rx) = join(&mut mm, MatchType::Quick, registered("alice", None), Instant::now());

        assert!(!mm.leave(MatchType::Ranked, "alice"));
        assert!(mm.leave(MatchType::Quick, "alice"));
        assert!(!mm.leave(MatchType::Quick, "alice"));
        assert_eq!(mm.pool_size(MatchType::Quick), 0);
    }

    #[test]
    fn test_leave_owned_checks_notifier() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let (first_tx, _first_rx) = mpsc::unbounded_channel();
        let (second_tx, _second_rx) = mpsc::unbounded_channel();
        let now = Instant::now();

        mm.join(MatchType::Quick, registered("alice", None), first_tx.clone(), now);
        mm.join(MatchType::Quick, registered("alice", None), second_tx.clone(), now);

        assert!(!mm.leave_owned(MatchType::Quick, "alice", &first_tx));
        assert_eq!(mm.pool_size(MatchType::Quick), 1);
        assert!(mm.leave_owned(MatchType::Quick, "alice", &second_tx));
        assert_eq!(mm.pool_size(MatchType::Quick), 0);
    }

    #[test]
    fn test_tick_pairs_quick_fifo() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, mut rx_a) = join(&mut mm, MatchType::Quick, registered("a", None), base);
        let (_, mut rx_b) = join(&mut mm, MatchType::Quick, registered("b", None), base + Duration::from_millis(1));
        let (_, mut rx_c) = join(&mut mm, MatchType::Quick, registered("c", None), base + Duration::from_millis(2));
        let (_, mut rx_d) = join(&mut mm, MatchType::Quick, registered("d", None), base + Duration::from_millis(3));

        let pairings = mm.tick(base + Duration::from_secs(2));
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0].first.identity, "a");
        assert_eq!(pairings[0].second.identity, "b");
        assert_eq!(mm.pool_size(MatchType::Quick), 2);

        let found = status(MatchType::Quick, MatchStatus::Found);
        assert_eq!(drain(&mut rx_a).last(), Some(&found));
        assert_eq!(drain(&mut rx_b).last(), Some(&found));
        for rx in [&mut rx_c, &mut rx_d] {
            assert_eq!(
                drain(rx),
                vec![status(MatchType::Quick, MatchStatus::Searching)]
            );
        }

        // the rest wait for the next pass
        let pairings = mm.tick(base + Duration::from_secs(4));
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0].first.identity, "c");
        assert_eq!(pairings[0].second.identity, "d");
        assert_eq!(mm.pool_size(MatchType::Quick), 0);
    }

    #[test]
    fn test_quick_pairs_once_per_tick_at_same_instant() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let _receivers: Vec<Events> = ["a", "b", "c", "d"]
            .iter()
            .map(|id| join(&mut mm, MatchType::Quick, registered(id, None), base).1)
            .collect();

        assert_eq!(mm.tick(base).len(), 1);
        assert_eq!(mm.pool_size(MatchType::Quick), 2);
    }

    #[test]
    fn test_tick_pairs_ranked_same_rating_same_tick() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, _rx_a) = join(&mut mm, MatchType::Ranked, registered("a", Some(1000)), base);
        let (_, _rx_b) = join(&mut mm, MatchType::Ranked, registered("b", Some(1000)), base);

        let pairings = mm.tick(base);
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0].match_type, MatchType::Ranked);
        assert_eq!(mm.pool_size(MatchType::Ranked), 0);
    }

    #[test]
    fn test_pools_do_not_mix() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, _rx_a) = join(&mut mm, MatchType::Quick, registered("a", None), base);
        let (_, _rx_b) = join(&mut mm, MatchType::Ranked, registered("b", Some(1000)), base);

        assert!(mm.tick(base + Duration::from_secs(2)).is_empty());
        assert_eq!(mm.pool_size(MatchType::Quick), 1);
        assert_eq!(mm.pool_size(MatchType::Ranked), 1);
    }

    #[test]
    fn test_timeout_evicts_with_status() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, mut rx) = join(&mut mm, MatchType::Ranked, registered("lonely", Some(1000)), base);

        assert!(mm.tick(base + Duration::from_secs(60)).is_empty());
        assert_eq!(mm.pool_size(MatchType::Ranked), 1);

        assert!(mm.tick(base + Duration::from_secs(61)).is_empty());
        assert_eq!(mm.pool_size(MatchType::Ranked), 0);
        assert_eq!(
            drain(&mut rx),
            vec![
                status(MatchType::Ranked, MatchStatus::Searching),
                status(MatchType::Ranked, MatchStatus::Timeout),
            ]
        );
    }

    #[test]
    fn test_paired_entry_is_never_also_timed_out() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, mut rx_a) = join(&mut mm, MatchType::Quick, registered("a", None), base);
        let (_, mut rx_b) = join(&mut mm, MatchType::Quick, registered("b", None), base);

        let pairings = mm.tick(base + Duration::from_secs(120));
        assert_eq!(pairings.len(), 1);

        for rx in [&mut rx_a, &mut rx_b] {
            let events = drain(rx);
            assert!(events.contains(&status(MatchType::Quick, MatchStatus::Found)));
            assert!(!events.contains(&status(MatchType::Quick, MatchStatus::Timeout)));
        }
    }

    #[test]
    fn test_custom_tuning_is_honoured() {
        let config = MatchmakingConfig {
            scan_interval: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(5),
            tolerance_per_second: 100,
            max_tolerance: 300,
        };
        let mut mm = Matchmaker::new(config);
        let base = Instant::now();
        let (_, _rx_a) = join(&mut mm, MatchType::Ranked, registered("a", Some(1000)), base);
        let (_, _rx_b) = join(&mut mm, MatchType::Ranked, registered("b", Some(1300)), base);

        assert!(mm.tick(base + Duration::from_secs(2)).is_empty());
        assert_eq!(mm.tick(base + Duration::from_secs(3)).len(), 1);
    }

    #[tokio::test]
    async fn test_materialize_success_notifies_both() {
        let store = InMemorySessionStore::new();
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, mut rx_a) = join(&mut mm, MatchType::Ranked, registered("a", Some(1000)), base);
        let (guest, mut rx_b) = join(&mut mm, MatchType::Ranked, JoinRequest::default(), base);

        let pairing = mm.tick(base).pop().unwrap();
        let session_id = materialize(&store, pairing).await.unwrap();

        let record = store.get(&session_id).unwrap();
        assert_eq!(record.mode, GameMode::Ranked);
        let ids = [record.player1_id.clone(), record.player2_id.clone()];
        assert!(ids.contains(&Some("a".to_string())));
        assert!(ids.contains(&None));
        assert!(!ids.contains(&Some(guest)));

        let found = MatchmakingEvent::MatchFound {
            match_type: MatchType::Ranked,
            session_id: session_id.clone(),
        };
        assert_eq!(drain(&mut rx_a).last(), Some(&found));
        assert_eq!(drain(&mut rx_b).last(), Some(&found));
    }

    #[tokio::test]
    async fn test_materialize_failure_reports_error_to_both() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, mut rx_a) = join(&mut mm, MatchType::Quick, registered("a", None), base);
        let (_, mut rx_b) = join(&mut mm, MatchType::Quick, registered("b", None), base);

        let pairing = mm.tick(base).pop().unwrap();
        let result = materialize(&FailingStore, pairing).await;
        assert!(matches!(result, Err(SessionError::Unavailable(_))));

        let error = status(MatchType::Quick, MatchStatus::Error);
        assert_eq!(
            drain(&mut rx_a),
            vec![
                status(MatchType::Quick, MatchStatus::Searching),
                status(MatchType::Quick, MatchStatus::Found),
                error.clone(),
            ]
        );
        assert_eq!(drain(&mut rx_b).last(), Some(&error));
        assert_eq!(mm.pool_size(MatchType::Quick), 0);
    }

    #[tokio::test]
    async fn test_materialize_without_session_id_is_an_error() {
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, mut rx_a) = join(&mut mm, MatchType::Quick, registered("a", None), base);
        let (_, _rx_b) = join(&mut mm, MatchType::Quick, registered("b", None), base);

        let pairing = mm.tick(base).pop().unwrap();
        assert_eq!(
            materialize(&EmptyIdStore, pairing).await,
            Err(SessionError::MissingSessionId)
        );
        assert_eq!(
            drain(&mut rx_a).last(),
            Some(&status(MatchType::Quick, MatchStatus::Error))
        );
    }

    #[tokio::test]
    async fn test_departed_peer_still_lets_partner_hear_outcome() {
        let store = InMemorySessionStore::new();
        let mut mm = Matchmaker::new(MatchmakingConfig::default());
        let base = Instant::now();
        let (_, mut rx_a) = join(&mut mm, MatchType::Quick, registered("a", None), base);
        let (_, rx_b) = join(&mut mm, MatchType::Quick, registered("b", None), base);

        let pairing = mm.tick(base).pop().unwrap();
        drop(rx_b);

        let session_id = materialize(&store, pairing).await.unwrap();
        assert_eq!(
            drain(&mut rx_a).last(),
            Some(&MatchmakingEvent::MatchFound {
                match_type: MatchType::Quick,
                session_id,
            })
        );
    }
}
