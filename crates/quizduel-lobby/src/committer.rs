//! Writing a completed session's result to the account store.

use std::sync::Arc;

use quizduel_hub::{AccountStore, HubError};
use quizduel_protocol::{FinalResult, LobbyId, Username};

/// Applies a [`FinalResult`] to the account store.
///
/// One `apply_score_delta` call per player, including players whose
/// delta is zero. Failures are logged and reported back but never
/// retried here; the store owns its retry policy.
pub struct ScoreCommitter<S> {
    store: Arc<S>,
}

impl<S> Clone for ScoreCommitter<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: AccountStore> ScoreCommitter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Commits every player's delta. Returns the writes that failed.
    pub async fn commit(
        &self,
        lobby_id: LobbyId,
        result: &FinalResult,
    ) -> Vec<(Username, HubError)> {
        let mut failures = Vec::new();
        for entry in &result.scores {
            let username = &entry.username;
            let Some(delta) = result.delta_for(username) else {
                continue;
            };
            match self.store.apply_score_delta(username, delta).await {
                Ok(()) => {
                    tracing::info!(%lobby_id, %username, delta, "score committed");
                }
                Err(e) => {
                    tracing::warn!(
                        %lobby_id,
                        %username,
                        delta,
                        error = %e,
                        "score commit failed"
                    );
                    failures.push((username.clone(), e));
                }
            }
        }
        failures
    }
}
