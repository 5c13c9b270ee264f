//! Lobby registry: creates, tracks, and routes players to lobbies.

use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use quizduel_hub::{AccountStore, ConnectionHub};
use quizduel_protocol::{EndReason, LobbyId, LobbyStatus, Question, Username};
use rand::Rng;
use tokio::sync::Mutex;

use crate::lobby::validate_questions;
use crate::session::spawn_session;
use crate::{Lobby, LobbyConfig, LobbyError, ScoreCommitter, SessionHandle};

/// Lobby IDs are random nine-digit numbers: short enough to read out,
/// and well inside the integer range JSON clients handle exactly.
const LOBBY_ID_RANGE: RangeInclusive<u64> = 100_000_000..=999_999_999;

/// A lobby plus the handle of its running session, if any.
///
/// The session handle is present only while the lobby is `Active`.
/// `ended_by` is set when [`LobbyRegistry::end_lobby`] closed the lobby;
/// the session checks it before acting on anything still queued.
pub(crate) struct LobbySlot {
    pub(crate) lobby: Lobby,
    pub(crate) session: Option<SessionHandle>,
    pub(crate) ended_by: Option<EndReason>,
}

/// Owns every lobby on this server.
///
/// The outer map lock is held only to look up or insert a slot. Each
/// slot has its own lock, and the join read-modify-write runs under it,
/// so two joins on the same lobby are serialized while different lobbies
/// never contend.
///
/// Ended lobbies stay in the registry with status `Ended`; nothing is
/// removed behind a caller's back.
pub struct LobbyRegistry<S: AccountStore> {
    lobbies: Mutex<HashMap<LobbyId, Arc<Mutex<LobbySlot>>>>,
    hub: Arc<ConnectionHub>,
    store: Arc<S>,
    config: LobbyConfig,
}

impl<S: AccountStore> LobbyRegistry<S> {
    /// Creates an empty registry with the default [`LobbyConfig`].
    pub fn new(hub: Arc<ConnectionHub>, store: Arc<S>) -> Self {
        Self::with_config(hub, store, LobbyConfig::default())
    }

    pub fn with_config(hub: Arc<ConnectionHub>, store: Arc<S>, config: LobbyConfig) -> Self {
        Self {
            lobbies: Mutex::new(HashMap::new()),
            hub,
            store,
            config,
        }
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Creates a `waiting` lobby hosted by `host`.
    ///
    /// # Errors
    /// [`LobbyError::InvalidInput`] if the question set is empty or any
    /// question is malformed.
    pub async fn create_lobby(
        &self,
        host: Username,
        questions: Vec<Question>,
    ) -> Result<Lobby, LobbyError> {
        validate_questions(&questions, &self.config)?;

        let mut lobbies = self.lobbies.lock().await;
        let lobby_id = fresh_id(&lobbies);
        let lobby = Lobby::new(lobby_id, host, questions);
        let slot = LobbySlot {
            lobby: lobby.clone(),
            session: None,
            ended_by: None,
        };
        lobbies.insert(lobby_id, Arc::new(Mutex::new(slot)));
        drop(lobbies);

        tracing::info!(
            %lobby_id,
            host = %lobby.host,
            questions = lobby.questions.len(),
            "lobby created"
        );
        Ok(lobby)
    }

    /// Every lobby that is still `waiting`, oldest first.
    ///
    /// A lobby that becomes active while this runs may or may not appear.
    pub async fn list_available(&self) -> Vec<Lobby> {
        let mut lobbies = self.snapshot().await;
        lobbies.retain(|lobby| lobby.status.is_joinable());
        lobbies
    }

    /// Every lobby regardless of status, oldest first.
    pub async fn list_all(&self) -> Vec<Lobby> {
        self.snapshot().await
    }

    /// A snapshot of one lobby.
    pub async fn get(&self, lobby_id: LobbyId) -> Result<Lobby, LobbyError> {
        let slot = self.slot(lobby_id).await?;
        let lobby = slot.lock().await.lobby.clone();
        Ok(lobby)
    }

    /// Takes the second seat of a `waiting` lobby and starts its session.
    ///
    /// Linearizable per lobby: of several concurrent joins exactly one
    /// succeeds and the rest get [`LobbyError::Conflict`].
    ///
    /// # Errors
    /// - [`LobbyError::NotFound`] if the lobby doesn't exist
    /// - [`LobbyError::Conflict`] if it isn't waiting, or `joiner` is the host
    pub async fn join_lobby(
        &self,
        lobby_id: LobbyId,
        joiner: Username,
    ) -> Result<Lobby, LobbyError> {
        let slot = self.slot(lobby_id).await?;
        let mut guard = slot.lock().await;

        if !guard.lobby.status.is_joinable() {
            return Err(LobbyError::Conflict(format!(
                "lobby {lobby_id} is {}",
                guard.lobby.status
            )));
        }
        if guard.lobby.host == joiner {
            return Err(LobbyError::Conflict(
                "cannot join your own lobby".into(),
            ));
        }

        let host = guard.lobby.host.clone();
        guard.lobby.participants = vec![host.clone(), joiner.clone()];
        guard.lobby.status = LobbyStatus::Active;

        let handle = spawn_session(
            lobby_id,
            [host, joiner.clone()],
            Arc::clone(&guard.lobby.questions),
            Arc::clone(&slot),
            Arc::clone(&self.hub),
            ScoreCommitter::new(Arc::clone(&self.store)),
            self.config.clone(),
        );
        guard.session = Some(handle);
        let lobby = guard.lobby.clone();
        drop(guard);

        tracing::info!(%lobby_id, %joiner, "lobby joined");
        Ok(lobby)
    }

    /// Forces the lobby to `ended`. A running session stops with
    /// `reason` and commits nothing, even if answers already queued
    /// would have completed it.
    ///
    /// Ending a lobby that already ended is a no-op.
    ///
    /// # Errors
    /// [`LobbyError::NotFound`] if the lobby doesn't exist.
    pub async fn end_lobby(
        &self,
        lobby_id: LobbyId,
        reason: EndReason,
    ) -> Result<Lobby, LobbyError> {
        let slot = self.slot(lobby_id).await?;
        let mut guard = slot.lock().await;
        let changed = guard.lobby.end();
        if changed {
            guard.ended_by = Some(reason);
        }
        let session = guard.session.take();
        let lobby = guard.lobby.clone();
        drop(guard);

        if changed {
            tracing::info!(%lobby_id, %reason, "lobby ended");
        }
        if let Some(session) = session {
            // The session may have finished on its own in the meantime.
            if session.end(reason).await.is_err() {
                tracing::debug!(%lobby_id, "session already stopped");
            }
        }
        Ok(lobby)
    }

    /// Routes an answer to the lobby's running session.
    ///
    /// # Errors
    /// - [`LobbyError::NotFound`] if the lobby doesn't exist
    /// - [`LobbyError::NotParticipant`] if `username` isn't playing in it
    /// - [`LobbyError::Conflict`] if no session is running
    pub async fn submit_answer(
        &self,
        lobby_id: LobbyId,
        username: Username,
        question_index: usize,
        chosen_option: String,
    ) -> Result<(), LobbyError> {
        let slot = self.slot(lobby_id).await?;
        let guard = slot.lock().await;
        if !guard.lobby.participants.contains(&username) {
            return Err(LobbyError::NotParticipant(username, lobby_id));
        }
        let session = guard.session.clone().ok_or_else(|| {
            LobbyError::Conflict(format!(
                "lobby {lobby_id} is {}",
                guard.lobby.status
            ))
        })?;
        drop(guard);

        session
            .submit_answer(username, question_index, chosen_option)
            .await
    }

    async fn slot(&self, lobby_id: LobbyId) -> Result<Arc<Mutex<LobbySlot>>, LobbyError> {
        self.lobbies
            .lock()
            .await
            .get(&lobby_id)
            .cloned()
            .ok_or(LobbyError::NotFound(lobby_id))
    }

    async fn snapshot(&self) -> Vec<Lobby> {
        let slots: Vec<_> = self.lobbies.lock().await.values().cloned().collect();
        let mut lobbies = Vec::with_capacity(slots.len());
        for slot in slots {
            lobbies.push(slot.lock().await.lobby.clone());
        }
        lobbies.sort_by_key(|lobby| (lobby.created_at, lobby.id));
        lobbies
    }
}

fn fresh_id(lobbies: &HashMap<LobbyId, Arc<Mutex<LobbySlot>>>) -> LobbyId {
    let mut rng = rand::rng();
    loop {
        let id = LobbyId(rng.random_range(LOBBY_ID_RANGE));
        if !lobbies.contains_key(&id) {
            return id;
        }
    }
}

#[cfg(test)]
mod tests {
    use quizduel_hub::InMemoryAccountStore;

    use super::*;

    fn user(name: &str) -> Username {
        Username::new(name)
    }

    fn questions(n: usize) -> Vec<Question> {
        (0..n)
            .map(|i| Question {
                id: format!("q{i}"),
                prompt: format!("question {i}"),
                options: vec!["A".into(), "B".into(), "C".into()],
                correct_option: "B".into(),
            })
            .collect()
    }

    fn registry() -> LobbyRegistry<InMemoryAccountStore> {
        LobbyRegistry::new(
            Arc::new(ConnectionHub::new()),
            Arc::new(InMemoryAccountStore::new()),
        )
    }

    #[tokio::test]
    async fn test_create_lobby_starts_waiting_with_id_in_range() {
        let reg = registry();

        let lobby = reg.create_lobby(user("host"), questions(2)).await.unwrap();

        assert_eq!(lobby.status, LobbyStatus::Waiting);
        assert!(lobby.participants.is_empty());
        assert!(LOBBY_ID_RANGE.contains(&lobby.id.0));
    }

    #[tokio::test]
    async fn test_create_lobby_without_questions_returns_invalid_input() {
        let reg = registry();

        let result = reg.create_lobby(user("host"), Vec::new()).await;

        assert!(matches!(result, Err(LobbyError::InvalidInput(_))));
        assert!(reg.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_get_unknown_lobby_returns_not_found() {
        let reg = registry();
        let result = reg.get(LobbyId(1)).await;
        assert!(matches!(result, Err(LobbyError::NotFound(LobbyId(1)))));
    }

    #[tokio::test]
    async fn test_join_lobby_unknown_returns_not_found() {
        let reg = registry();
        let result = reg.join_lobby(LobbyId(7), user("bob")).await;
        assert!(matches!(result, Err(LobbyError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_join_lobby_as_host_returns_conflict() {
        let reg = registry();
        let lobby = reg.create_lobby(user("host"), questions(1)).await.unwrap();

        let result = reg.join_lobby(lobby.id, user("host")).await;

        assert!(matches!(result, Err(LobbyError::Conflict(_))));
        let after = reg.get(lobby.id).await.unwrap();
        assert_eq!(after.status, LobbyStatus::Waiting);
    }

    #[tokio::test]
    async fn test_join_lobby_sets_participants_and_activates() {
        let reg = registry();
        let lobby = reg.create_lobby(user("host"), questions(1)).await.unwrap();

        let joined = reg.join_lobby(lobby.id, user("bob")).await.unwrap();

        assert_eq!(joined.status, LobbyStatus::Active);
        assert_eq!(joined.participants, vec![user("host"), user("bob")]);
    }

    #[tokio::test]
    async fn test_join_lobby_second_joiner_returns_conflict() {
        let reg = registry();
        let lobby = reg.create_lobby(user("host"), questions(1)).await.unwrap();
        reg.join_lobby(lobby.id, user("bob")).await.unwrap();

        let result = reg.join_lobby(lobby.id, user("carol")).await;

        assert!(matches!(result, Err(LobbyError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_end_lobby_waiting_is_idempotent() {
        let reg = registry();
        let lobby = reg.create_lobby(user("host"), questions(1)).await.unwrap();

        let first = reg.end_lobby(lobby.id, EndReason::Aborted).await.unwrap();
        let second = reg.end_lobby(lobby.id, EndReason::Aborted).await.unwrap();

        assert_eq!(first.status, LobbyStatus::Ended);
        assert_eq!(second.status, LobbyStatus::Ended);
        assert!(reg.list_available().await.is_empty());
        assert_eq!(reg.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_join_lobby_after_end_returns_conflict() {
        let reg = registry();
        let lobby = reg.create_lobby(user("host"), questions(1)).await.unwrap();
        reg.end_lobby(lobby.id, EndReason::Aborted).await.unwrap();

        let result = reg.join_lobby(lobby.id, user("bob")).await;

        assert!(matches!(result, Err(LobbyError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_submit_answer_before_start_returns_not_participant() {
        let reg = registry();
        let lobby = reg.create_lobby(user("host"), questions(1)).await.unwrap();

        let result = reg
            .submit_answer(lobby.id, user("host"), 0, "B".into())
            .await;

        assert!(matches!(result, Err(LobbyError::NotParticipant(..))));
    }

    #[tokio::test]
    async fn test_list_available_is_oldest_first() {
        let reg = registry();
        let a = reg.create_lobby(user("a"), questions(1)).await.unwrap();
        let b = reg.create_lobby(user("b"), questions(1)).await.unwrap();

        let listed: Vec<Username> = reg
            .list_available()
            .await
            .into_iter()
            .map(|l| l.host)
            .collect();

        assert_eq!(listed.len(), 2);
        if a.created_at < b.created_at {
            assert_eq!(listed, vec![user("a"), user("b")]);
        }
    }
}
