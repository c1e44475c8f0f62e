//! In-process conversation memory.
//!
//! Sessions live in a map behind a `RwLock`; each session has its own
//! `Mutex` so writers to different sessions never contend. Writers wait at
//! most `lock_wait` for a session lock and report `WriteConflict` otherwise.

use chrono::Duration as ChronoDuration;
use sitrep_core::conversation::{ConversationSession, SessionId, Turn};
use sitrep_core::error::MemoryError;
use sitrep_core::token::TokenEstimator;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

type SessionHandle = Arc<Mutex<ConversationSession>>;

/// Limits applied by [`ConversationMemory`].
#[derive(Debug, Clone, Copy)]
pub struct MemoryLimits {
    /// Oldest turns are evicted beyond this many
    pub max_turns_per_session: usize,
    /// Bound on waiting for a session's writer lock
    pub lock_wait: Duration,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        Self {
            max_turns_per_session: 50,
            lock_wait: Duration::from_millis(500),
        }
    }
}

/// Per-session ordered turn logs with token-bounded retrieval.
pub struct ConversationMemory {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    estimator: TokenEstimator,
    limits: MemoryLimits,
}

impl ConversationMemory {
    pub fn new(estimator: TokenEstimator, limits: MemoryLimits) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            estimator,
            limits,
        }
    }

    pub fn estimator(&self) -> &TokenEstimator {
        &self.estimator
    }

    async fn handle(&self, id: &SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    async fn handle_or_create(&self, id: &SessionId) -> SessionHandle {
        if let Some(handle) = self.handle(id).await {
            return handle;
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ConversationSession::new(id.clone()))))
            .clone()
    }

    /// Append one turn atomically.
    pub async fn append(&self, id: &SessionId, turn: Turn) -> Result<(), MemoryError> {
        self.append_all(id, vec![turn]).await
    }

    /// Append several turns as one unit; no other writer interleaves.
    pub async fn append_all(&self, id: &SessionId, turns: Vec<Turn>) -> Result<(), MemoryError> {
        let handle = self.handle_or_create(id).await;
        let mut session = tokio::time::timeout(self.limits.lock_wait, handle.lock())
            .await
            .map_err(|_| MemoryError::WriteConflict {
                session: id.to_string(),
            })?;

        let count = turns.len();
        for mut turn in turns {
            // Append order wins over caller clocks.
            if let Some(last) = session.last_timestamp() {
                if turn.timestamp <= last {
                    turn.timestamp = last + ChronoDuration::microseconds(1);
                }
            }
            session.turns.push(turn);
        }

        let max = self.limits.max_turns_per_session;
        if max > 0 && session.turns.len() > max {
            let excess = session.turns.len() - max;
            session.turns.drain(..excess);
            debug!(session = %id, evicted = excess, "Evicted oldest turns");
        }

        debug!(session = %id, appended = count, total = session.turns.len(), "Turns appended");
        Ok(())
    }

    /// The longest suffix of the session whose estimate fits `max_tokens`.
    ///
    /// When older turns are left out, a truncation marker leads the result;
    /// its cost counts against the budget. Empty if not even the marker fits.
    pub async fn get_recent(&self, id: &SessionId, max_tokens: usize) -> Vec<Turn> {
        let Some(handle) = self.handle(id).await else {
            return Vec::new();
        };
        let session = handle.lock().await;
        let turns = &session.turns;

        let mut used = 0;
        let mut keep = 0;
        for turn in turns.iter().rev() {
            let cost = self.estimator.turn(turn);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            keep += 1;
        }

        if keep == turns.len() {
            return turns.clone();
        }

        // Make room for the marker, giving up more old turns if needed.
        loop {
            let marker = Turn::truncation_marker(turns.len() - keep);
            let marker_cost = self.estimator.turn(&marker);
            if used + marker_cost <= max_tokens {
                let start = turns.len() - keep;
                let mut out = Vec::with_capacity(keep + 1);
                out.push(marker);
                out.extend_from_slice(&turns[start..]);
                debug!(
                    session = %id,
                    kept = keep,
                    dropped = start,
                    tokens = used + marker_cost,
                    "History truncated"
                );
                return out;
            }
            if keep == 0 {
                return Vec::new();
            }
            let oldest_kept = &turns[turns.len() - keep];
            used -= self.estimator.turn(oldest_kept);
            keep -= 1;
        }
    }

    pub async fn turn_count(&self, id: &SessionId) -> usize {
        match self.handle(id).await {
            Some(handle) => handle.lock().await.turns.len(),
            None => 0,
        }
    }

    /// Snapshot of a whole session.
    pub async fn session(&self, id: &SessionId) -> Option<ConversationSession> {
        let handle = self.handle(id).await?;
        let session = handle.lock().await;
        Some(session.clone())
    }

    pub async fn sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(TokenEstimator::default(), MemoryLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn numbered(n: usize) -> Turn {
        let base = Utc.with_ymd_and_hms(2025, 1, 8, 14, 0, 0).unwrap();
        let turn = if n % 2 == 1 {
            Turn::user(format!("question number {n}"))
        } else {
            Turn::assistant(format!("answer number {n}"))
        };
        turn.at(base + ChronoDuration::seconds(n as i64))
    }

    async fn filled(n: usize) -> (ConversationMemory, SessionId) {
        let memory = ConversationMemory::default();
        let id = SessionId::from("s1");
        for i in 1..=n {
            memory.append(&id, numbered(i)).await.unwrap();
        }
        (memory, id)
    }

    #[tokio::test]
    async fn unknown_session_is_empty() {
        let memory = ConversationMemory::default();
        let id = SessionId::from("nobody");
        assert!(memory.get_recent(&id, 1000).await.is_empty());
        assert_eq!(memory.turn_count(&id).await, 0);
        assert!(memory.session(&id).await.is_none());
    }

    #[tokio::test]
    async fn everything_fits_without_marker() {
        let (memory, id) = filled(4).await;
        let recent = memory.get_recent(&id, 10_000).await;
        assert_eq!(recent.len(), 4);
        assert!(recent.iter().all(|t| !t.is_truncation_marker()));
    }

    #[tokio::test]
    async fn budget_for_last_three_returns_marker_and_three() {
        let (memory, id) = filled(10).await;
        let est = *memory.estimator();
        let session = memory.session(&id).await.unwrap();
        let last_three = &session.turns[7..];
        let budget = est.turns(last_three) + est.turn(&Turn::truncation_marker(7));

        let recent = memory.get_recent(&id, budget).await;
        assert_eq!(recent.len(), 4);
        assert!(recent[0].is_truncation_marker());
        assert_eq!(recent[1].content, "answer number 8");
        assert_eq!(recent[2].content, "question number 9");
        assert_eq!(recent[3].content, "answer number 10");
    }

    #[tokio::test]
    async fn estimate_never_exceeds_budget() {
        let (memory, id) = filled(10).await;
        let est = *memory.estimator();
        for budget in 0..200 {
            let recent = memory.get_recent(&id, budget).await;
            assert!(
                est.turns(&recent) <= budget,
                "budget {budget} exceeded: {}",
                est.turns(&recent)
            );
        }
    }

    #[tokio::test]
    async fn zero_budget_returns_nothing() {
        let (memory, id) = filled(3).await;
        assert!(memory.get_recent(&id, 0).await.is_empty());
    }

    #[tokio::test]
    async fn out_of_order_timestamps_are_restamped() {
        let memory = ConversationMemory::default();
        let id = SessionId::from("s1");
        memory.append(&id, numbered(5)).await.unwrap();
        memory.append(&id, numbered(1)).await.unwrap();

        let session = memory.session(&id).await.unwrap();
        assert_eq!(session.turns[1].content, "question number 1");
        assert!(session.turns[1].timestamp > session.turns[0].timestamp);
    }

    #[tokio::test]
    async fn retention_cap_evicts_oldest() {
        let memory = ConversationMemory::new(
            TokenEstimator::default(),
            MemoryLimits {
                max_turns_per_session: 3,
                ..MemoryLimits::default()
            },
        );
        let id = SessionId::from("s1");
        for i in 1..=5 {
            memory.append(&id, numbered(i)).await.unwrap();
        }
        let session = memory.session(&id).await.unwrap();
        assert_eq!(session.turns.len(), 3);
        assert_eq!(session.turns[0].content, "question number 3");
    }

    #[tokio::test]
    async fn concurrent_appends_stay_ordered() {
        let memory = Arc::new(ConversationMemory::default());
        let id = SessionId::from("shared");

        let mut handles = Vec::new();
        for i in 0..20 {
            let memory = Arc::clone(&memory);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                memory
                    .append_all(
                        &id,
                        vec![Turn::user(format!("q{i}")), Turn::assistant(format!("a{i}"))],
                    )
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let session = memory.session(&id).await.unwrap();
        assert_eq!(session.turns.len(), 40);
        for pair in session.turns.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        // exchanges are never interleaved
        for chunk in session.turns.chunks(2) {
            assert_eq!(&chunk[0].content[1..], &chunk[1].content[1..]);
        }
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let memory = ConversationMemory::default();
        let a = SessionId::from("a");
        let b = SessionId::from("b");
        memory.append(&a, Turn::user("hello")).await.unwrap();
        memory.append(&b, Turn::user("hi")).await.unwrap();
        memory.append(&b, Turn::assistant("hey")).await.unwrap();

        assert_eq!(memory.turn_count(&a).await, 1);
        assert_eq!(memory.turn_count(&b).await, 2);
        assert_eq!(memory.sessions().await, vec![a, b]);
    }

    #[tokio::test]
    async fn held_lock_yields_write_conflict() {
        let memory = ConversationMemory::new(
            TokenEstimator::default(),
            MemoryLimits {
                lock_wait: Duration::from_millis(20),
                ..MemoryLimits::default()
            },
        );
        let id = SessionId::from("busy");
        memory.append(&id, Turn::user("first")).await.unwrap();

        let handle = memory.handle(&id).await.unwrap();
        let guard = handle.lock().await;

        let err = memory.append(&id, Turn::user("second")).await.unwrap_err();
        assert!(matches!(err, MemoryError::WriteConflict { .. }));

        drop(guard);
        memory.append(&id, Turn::user("second")).await.unwrap();
        assert_eq!(memory.turn_count(&id).await, 2);
    }
}
