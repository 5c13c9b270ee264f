//! The connection hub: who is online, and how to reach them.
//!
//! Every identified connection registers its outbound queue here under
//! its username. Session actors never touch sockets; they call
//! [`ConnectionHub::send`] with a username and the hub forwards the event
//! to that user's single live connection.
//!
//! # One connection per user
//!
//! ```text
//! register(alice, conn-1) ──→ alice → conn-1
//! register(alice, conn-2) ──→ alice → conn-2   (conn-1 told to close)
//! unregister(alice, conn-1) ─→ no-op           (stale id, conn-2 stays)
//! unregister(alice, conn-2) ─→ alice offline   (watchers notified)
//! ```
//!
//! # Departure watchers
//!
//! A running session watches both of its participants. When a watched
//! user's connection goes away the hub pushes the username down every
//! watcher channel registered for them, so the session learns about the
//! departure without polling.

use std::collections::HashMap;

use quizduel_protocol::{ErrorKind, LobbyId, ServerEvent, Username};
use quizduel_transport::ConnectionId;
use tokio::sync::{Mutex, mpsc};

/// An item on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Deliver this event to the client.
    Event(ServerEvent),
    /// Close the connection. Nothing queued after this is sent.
    Close { reason: String },
}

/// The sending half of a connection's outbound queue.
pub type OutboundSender = mpsc::UnboundedSender<Outbound>;

/// Where the hub reports that a watched user went offline.
pub type DepartureSender = mpsc::UnboundedSender<Username>;

struct ConnectionEntry {
    conn_id: ConnectionId,
    outbound: OutboundSender,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<Username, ConnectionEntry>,
    /// username → (lobby → that lobby's departure channel)
    watchers: HashMap<Username, HashMap<LobbyId, DepartureSender>>,
}

/// Maps each online username to its one live connection.
///
/// Shared behind an `Arc` by the server (which registers connections) and
/// every session actor (which sends through it). All operations take a
/// single internal lock and never hold it across a send that can block;
/// outbound queues are unbounded.
#[derive(Default)]
pub struct ConnectionHub {
    state: Mutex<HubState>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `conn_id` as the live connection for `username`.
    ///
    /// If the user already had a connection, that one is sent an
    /// `Error{Conflict}` followed by [`Outbound::Close`] and its id is
    /// returned. Its later `unregister` call becomes a no-op.
    pub async fn register(
        &self,
        username: Username,
        conn_id: ConnectionId,
        outbound: OutboundSender,
    ) -> Option<ConnectionId> {
        let mut state = self.state.lock().await;
        let previous = state
            .connections
            .insert(username.clone(), ConnectionEntry { conn_id, outbound });
        drop(state);

        let previous = previous?;
        tracing::info!(
            %username,
            old = %previous.conn_id,
            new = %conn_id,
            "connection superseded"
        );
        // The old writer may already be gone; nothing to do if so.
        let _ = previous.outbound.send(Outbound::Event(ServerEvent::error(
            ErrorKind::Conflict,
            "superseded by a newer connection",
        )));
        let _ = previous.outbound.send(Outbound::Close {
            reason: "superseded".into(),
        });
        Some(previous.conn_id)
    }

    /// Removes `username`'s connection if it is still `conn_id`.
    ///
    /// On removal, every departure watcher for the user is notified and
    /// dropped. Returns `true` if the entry was removed.
    pub async fn unregister(
        &self,
        username: &Username,
        conn_id: ConnectionId,
    ) -> bool {
        let mut state = self.state.lock().await;
        let is_current = state
            .connections
            .get(username)
            .is_some_and(|entry| entry.conn_id == conn_id);
        if !is_current {
            tracing::debug!(%username, %conn_id, "stale unregister ignored");
            return false;
        }

        state.connections.remove(username);
        let watchers = state.watchers.remove(username).unwrap_or_default();
        drop(state);

        tracing::info!(%username, %conn_id, "player offline");
        for (lobby_id, tx) in watchers {
            if tx.send(username.clone()).is_err() {
                tracing::debug!(%username, %lobby_id, "watcher already gone");
            }
        }
        true
    }

    /// Sends `event` to `username`'s live connection.
    ///
    /// A user with no connection (or a connection whose writer already
    /// exited) is logged and skipped. Returns whether the event was
    /// queued.
    pub async fn send(&self, username: &Username, event: ServerEvent) -> bool {
        let state = self.state.lock().await;
        let Some(entry) = state.connections.get(username) else {
            tracing::debug!(%username, "no live connection, event dropped");
            return false;
        };
        if entry.outbound.send(Outbound::Event(event)).is_err() {
            tracing::debug!(%username, "outbound queue closed, event dropped");
            return false;
        }
        true
    }

    /// Sends the same event to every listed participant.
    pub async fn broadcast_to_session(
        &self,
        participants: &[Username],
        event: ServerEvent,
    ) {
        for username in participants {
            self.send(username, event.clone()).await;
        }
    }

    /// Whether `username` currently has a live connection.
    pub async fn is_connected(&self, username: &Username) -> bool {
        self.state.lock().await.connections.contains_key(username)
    }

    /// Number of users online.
    pub async fn connected_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Asks to be told (via `tx`) when `username` goes offline, on behalf
    /// of `lobby_id`. Replaces any earlier watcher for the same pair.
    ///
    /// If the user is already offline the notification is sent at once.
    pub async fn watch(
        &self,
        username: &Username,
        lobby_id: LobbyId,
        tx: DepartureSender,
    ) {
        let mut state = self.state.lock().await;
        if !state.connections.contains_key(username) {
            drop(state);
            let _ = tx.send(username.clone());
            return;
        }
        state
            .watchers
            .entry(username.clone())
            .or_default()
            .insert(lobby_id, tx);
    }

    /// Drops `lobby_id`'s watchers on all of `participants`.
    pub async fn unwatch(&self, lobby_id: LobbyId, participants: &[Username]) {
        let mut state = self.state.lock().await;
        for username in participants {
            if let Some(by_lobby) = state.watchers.get_mut(username) {
                by_lobby.remove(&lobby_id);
                if by_lobby.is_empty() {
                    state.watchers.remove(username);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> Username {
        Username::new(name)
    }

    fn queue() -> (OutboundSender, mpsc::UnboundedReceiver<Outbound>) {
        mpsc::unbounded_channel()
    }

    fn welcome(name: &str) -> ServerEvent {
        ServerEvent::Welcome {
            username: user(name),
            server_time: 0,
        }
    }

    #[tokio::test]
    async fn test_send_delivers_to_registered_connection() {
        let hub = ConnectionHub::new();
        let (tx, mut rx) = queue();
        hub.register(user("alice"), ConnectionId::new(1), tx).await;

        assert!(hub.send(&user("alice"), welcome("alice")).await);

        assert_eq!(rx.recv().await, Some(Outbound::Event(welcome("alice"))));
    }

    #[tokio::test]
    async fn test_send_to_offline_user_returns_false() {
        let hub = ConnectionHub::new();
        assert!(!hub.send(&user("nobody"), welcome("nobody")).await);
    }

    #[tokio::test]
    async fn test_register_twice_closes_previous_connection() {
        let hub = ConnectionHub::new();
        let (old_tx, mut old_rx) = queue();
        let (new_tx, mut new_rx) = queue();

        hub.register(user("alice"), ConnectionId::new(1), old_tx).await;
        let superseded = hub
            .register(user("alice"), ConnectionId::new(2), new_tx)
            .await;

        assert_eq!(superseded, Some(ConnectionId::new(1)));
        assert!(matches!(
            old_rx.recv().await,
            Some(Outbound::Event(ServerEvent::Error {
                kind: ErrorKind::Conflict,
                ..
            }))
        ));
        assert!(matches!(old_rx.recv().await, Some(Outbound::Close { .. })));

        hub.send(&user("alice"), welcome("alice")).await;
        assert_eq!(new_rx.recv().await, Some(Outbound::Event(welcome("alice"))));
        assert_eq!(hub.connected_count().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_stale_connection_keeps_current() {
        let hub = ConnectionHub::new();
        let (old_tx, _old_rx) = queue();
        let (new_tx, _new_rx) = queue();
        hub.register(user("alice"), ConnectionId::new(1), old_tx).await;
        hub.register(user("alice"), ConnectionId::new(2), new_tx).await;

        let removed = hub.unregister(&user("alice"), ConnectionId::new(1)).await;

        assert!(!removed);
        assert!(hub.is_connected(&user("alice")).await);
    }

    #[tokio::test]
    async fn test_unregister_notifies_watchers() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = queue();
        hub.register(user("alice"), ConnectionId::new(1), tx).await;
        let (dep_tx, mut dep_rx) = mpsc::unbounded_channel();
        hub.watch(&user("alice"), LobbyId(1), dep_tx).await;

        assert!(hub.unregister(&user("alice"), ConnectionId::new(1)).await);

        assert_eq!(dep_rx.recv().await, Some(user("alice")));
        assert!(!hub.is_connected(&user("alice")).await);
    }

    #[tokio::test]
    async fn test_watch_offline_user_notifies_immediately() {
        let hub = ConnectionHub::new();
        let (dep_tx, mut dep_rx) = mpsc::unbounded_channel();

        hub.watch(&user("ghost"), LobbyId(4), dep_tx).await;

        assert_eq!(dep_rx.recv().await, Some(user("ghost")));
    }

    #[tokio::test]
    async fn test_unwatch_stops_notifications() {
        let hub = ConnectionHub::new();
        let (tx, _rx) = queue();
        hub.register(user("alice"), ConnectionId::new(1), tx).await;
        let (dep_tx, mut dep_rx) = mpsc::unbounded_channel();
        hub.watch(&user("alice"), LobbyId(1), dep_tx).await;

        hub.unwatch(LobbyId(1), &[user("alice")]).await;
        hub.unregister(&user("alice"), ConnectionId::new(1)).await;

        // The only sender was dropped by unwatch, so the channel is closed
        // rather than carrying a notification.
        assert_eq!(dep_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_broadcast_to_session_reaches_both_players() {
        let hub = ConnectionHub::new();
        let (a_tx, mut a_rx) = queue();
        let (b_tx, mut b_rx) = queue();
        hub.register(user("a"), ConnectionId::new(1), a_tx).await;
        hub.register(user("b"), ConnectionId::new(2), b_tx).await;

        let event = ServerEvent::error(ErrorKind::NotFound, "x");
        hub.broadcast_to_session(&[user("a"), user("b")], event.clone())
            .await;

        assert_eq!(a_rx.recv().await, Some(Outbound::Event(event.clone())));
        assert_eq!(b_rx.recv().await, Some(Outbound::Event(event)));
    }
}
