//! The account store boundary.
//!
//! QuizDuel doesn't own user accounts. Sign-up, passwords, profiles and
//! streaks belong to another service. The engine needs exactly two things
//! from it: "does this user exist?" at handshake time and "add this delta
//! to their multiplayer score" when a session completes.
//!
//! [`AccountStore`] is that interface. Production deployments implement
//! it over their database; [`InMemoryAccountStore`] backs the dev server
//! and the test-suite.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use quizduel_protocol::Username;
use tokio::sync::Mutex;

use crate::HubError;

/// What the engine knows about a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub username: Username,
    /// Cumulative score across all completed multiplayer sessions.
    pub multiplayer_score: i64,
}

/// Access to persistent user records.
///
/// # Trait bounds
///
/// - `Send + Sync` → one store is shared by every connection task and
///   every session actor.
/// - `'static` → it lives as long as the server.
///
/// # Example
///
/// ```rust
/// use quizduel_hub::{AccountStore, HubError, UserRecord};
/// use quizduel_protocol::Username;
///
/// /// Every user exists and writes go nowhere. Handy for load tests.
/// struct OpenDoor;
///
/// impl AccountStore for OpenDoor {
///     async fn get_user(&self, username: &Username) -> Result<UserRecord, HubError> {
///         Ok(UserRecord { username: username.clone(), multiplayer_score: 0 })
///     }
///
///     async fn apply_score_delta(&self, _: &Username, _: i64) -> Result<(), HubError> {
///         Ok(())
///     }
/// }
/// ```
pub trait AccountStore: Send + Sync + 'static {
    /// Looks a user up by name.
    ///
    /// # Errors
    /// [`HubError::UnknownUser`] if there is no such user.
    fn get_user(
        &self,
        username: &Username,
    ) -> impl Future<Output = Result<UserRecord, HubError>> + Send;

    /// Adds `delta` (which may be zero or negative) to the user's
    /// multiplayer score.
    ///
    /// # Errors
    /// [`HubError::UnknownUser`] or [`HubError::PersistenceFailure`].
    fn apply_score_delta(
        &self,
        username: &Username,
        delta: i64,
    ) -> impl Future<Output = Result<(), HubError>> + Send;

    /// Checks that the store is reachable. Called once at startup; a
    /// failure aborts the process. Default: always reachable.
    fn ping(&self) -> impl Future<Output = Result<(), HubError>> + Send {
        async { Ok(()) }
    }
}

/// A [`AccountStore`] kept in process memory.
///
/// Records every applied delta so tests can assert on exactly what was
/// committed, and can be told to fail writes to exercise the
/// persistence-failure path.
#[derive(Debug, Default)]
pub struct InMemoryAccountStore {
    users: Mutex<HashMap<Username, UserRecord>>,
    applied: Mutex<Vec<(Username, i64)>>,
    fail_writes: AtomicBool,
}

impl InMemoryAccountStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already knows the given users, each with a
    /// score of zero.
    pub fn with_users<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let users = names
            .into_iter()
            .map(|name| {
                let username = Username::new(name);
                let record = UserRecord {
                    username: username.clone(),
                    multiplayer_score: 0,
                };
                (username, record)
            })
            .collect();
        Self {
            users: Mutex::new(users),
            ..Self::default()
        }
    }

    /// Adds (or resets) a user.
    pub async fn insert_user(&self, username: Username) {
        let record = UserRecord {
            username: username.clone(),
            multiplayer_score: 0,
        };
        self.users.lock().await.insert(username, record);
    }

    /// Every `(username, delta)` successfully applied, in call order.
    pub async fn applied_deltas(&self) -> Vec<(Username, i64)> {
        self.applied.lock().await.clone()
    }

    /// Makes every subsequent `apply_score_delta` fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl AccountStore for InMemoryAccountStore {
    async fn get_user(
        &self,
        username: &Username,
    ) -> Result<UserRecord, HubError> {
        self.users
            .lock()
            .await
            .get(username)
            .cloned()
            .ok_or_else(|| HubError::UnknownUser(username.clone()))
    }

    async fn apply_score_delta(
        &self,
        username: &Username,
        delta: i64,
    ) -> Result<(), HubError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HubError::PersistenceFailure(format!(
                "write for {username} rejected"
            )));
        }

        let mut users = self.users.lock().await;
        let record = users
            .get_mut(username)
            .ok_or_else(|| HubError::UnknownUser(username.clone()))?;
        record.multiplayer_score += delta;
        drop(users);

        self.applied.lock().await.push((username.clone(), delta));
        tracing::debug!(%username, delta, "score delta applied");
        Ok(())
    }
}
