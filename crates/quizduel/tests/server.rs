//! End-to-end tests: a real server on an OS-assigned port, driven by
//! plain `tokio-tungstenite` clients speaking JSON envelopes.
//!
//! These run on real time. Lobby settings use short timeouts where a test
//! needs a question to expire.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use quizduel::prelude::*;
use tokio::io::AsyncReadExt;
use tokio_tungstenite::tungstenite::Message;

type ClientWs = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Upper bound for any single expected frame.
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =========================================================================
// Helpers
// =========================================================================

async fn start_server(
    store: Arc<InMemoryAccountStore>,
    lobby: LobbyConfig,
) -> SocketAddr {
    start_with(QuizDuelServerBuilder::new().lobby_config(lobby), store).await
}

async fn start_with(
    builder: QuizDuelServerBuilder,
    store: Arc<InMemoryAccountStore>,
) -> SocketAddr {
    let server = builder
        .bind("127.0.0.1:0")
        .build(store)
        .await
        .expect("server should build");
    let addr = server.local_addr().expect("local addr");
    tokio::spawn(server.run());
    addr
}

fn default_store() -> Arc<InMemoryAccountStore> {
    Arc::new(InMemoryAccountStore::with_users(["alice", "bob"]))
}

/// `n` questions, each with options A/B/C and correct answer "B".
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

struct Client {
    ws: ClientWs,
}

impl Client {
    async fn open(addr: SocketAddr) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect");
        Self { ws }
    }

    /// Opens a connection and completes the handshake as `name`.
    async fn login(addr: SocketAddr, name: &str) -> Self {
        let mut client = Self::open(addr).await;
        client.hello(PROTOCOL_VERSION, name).await;
        match client.next_event().await {
            ServerEvent::Welcome { username, .. } => {
                assert_eq!(username.as_str(), name);
            }
            other => panic!("expected Welcome, got {other:?}"),
        }
        client
    }

    async fn send(&mut self, event: ClientEvent) {
        let envelope = Envelope::new(0, 0, event);
        let json = serde_json::to_string(&envelope).unwrap();
        self.ws.send(Message::text(json)).await.unwrap();
    }

    async fn hello(&mut self, version: u32, name: &str) {
        self.send(ClientEvent::Hello {
            version,
            username: name.to_string(),
        })
        .await;
    }

    async fn next_envelope(&mut self) -> Envelope<ServerEvent> {
        loop {
            let msg = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("stream ended")
                .expect("websocket error");
            if msg.is_text() || msg.is_binary() {
                return serde_json::from_slice(&msg.into_data()).unwrap();
            }
        }
    }

    async fn next_event(&mut self) -> ServerEvent {
        self.next_envelope().await.event
    }

    async fn expect_error(&mut self, expected: ErrorKind) {
        match self.next_event().await {
            ServerEvent::Error { kind, .. } => assert_eq!(kind, expected),
            other => panic!("expected Error({expected:?}), got {other:?}"),
        }
    }

    /// Waits until the server closes the socket.
    async fn expect_closed(&mut self) {
        loop {
            let next = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for close");
            match next {
                None | Some(Err(_)) => return,
                Some(Ok(msg)) if msg.is_close() => return,
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn create_lobby(&mut self, count: usize) -> LobbyId {
        self.send(ClientEvent::CreateLobby {
            questions: questions(count),
        })
        .await;
        match self.next_event().await {
            ServerEvent::LobbyCreated { lobby } => lobby.lobby_id,
            other => panic!("expected LobbyCreated, got {other:?}"),
        }
    }

    async fn join(&mut self, lobby_id: LobbyId, name: &str) {
        self.send(ClientEvent::JoinLobby {
            lobby_id,
            username: Username::new(name),
        })
        .await;
    }

    async fn answer(&mut self, lobby_id: LobbyId, name: &str, index: usize, choice: &str) {
        self.send(ClientEvent::SubmitAnswer {
            lobby_id,
            username: Username::new(name),
            question_index: index,
            chosen_option: choice.to_string(),
        })
        .await;
    }

    async fn expect_joined(&mut self, lobby_id: LobbyId) {
        match self.next_event().await {
            ServerEvent::Joined { lobby } => {
                assert_eq!(lobby.lobby_id, lobby_id);
                assert_eq!(lobby.status, LobbyStatus::Active);
            }
            other => panic!("expected Joined, got {other:?}"),
        }
    }

    async fn expect_reveal(&mut self, index: usize) {
        match self.next_event().await {
            ServerEvent::QuestionReveal {
                question_index,
                options,
                ..
            } => {
                assert_eq!(question_index, index);
                assert_eq!(options, vec!["A", "B", "C"]);
            }
            other => panic!("expected QuestionReveal({index}), got {other:?}"),
        }
    }

    async fn expect_ended(&mut self) -> (EndReason, Option<FinalResult>) {
        match self.next_event().await {
            ServerEvent::SessionEnded {
                reason,
                final_result,
                ..
            } => (reason, final_result),
            other => panic!("expected SessionEnded, got {other:?}"),
        }
    }
}

/// Logs both players in, starts a lobby of `count` questions, and
/// consumes the opening `Joined` and first reveal on both sides.
async fn start_match(addr: SocketAddr, count: usize) -> (Client, Client, LobbyId) {
    let mut alice = Client::login(addr, "alice").await;
    let mut bob = Client::login(addr, "bob").await;

    let lobby_id = alice.create_lobby(count).await;
    bob.join(lobby_id, "bob").await;

    for client in [&mut alice, &mut bob] {
        client.expect_joined(lobby_id).await;
        client.expect_reveal(0).await;
    }
    (alice, bob, lobby_id)
}

// =========================================================================
// Handshake
// =========================================================================

#[tokio::test]
async fn test_handshake_known_user_gets_welcome() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut client = Client::open(addr).await;

    client.hello(PROTOCOL_VERSION, "alice").await;
    let envelope = client.next_envelope().await;

    assert_eq!(envelope.seq, 1);
    assert!(matches!(envelope.event, ServerEvent::Welcome { .. }));
}

#[tokio::test]
async fn test_handshake_unknown_user_rejected_not_found() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut client = Client::open(addr).await;

    client.hello(PROTOCOL_VERSION, "mallory").await;

    client.expect_error(ErrorKind::NotFound).await;
    client.expect_closed().await;
}

#[tokio::test]
async fn test_handshake_version_mismatch_rejected() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut client = Client::open(addr).await;

    client.hello(PROTOCOL_VERSION + 1, "alice").await;

    client.expect_error(ErrorKind::InvalidInput).await;
    client.expect_closed().await;
}

#[tokio::test]
async fn test_handshake_blank_username_rejected() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut client = Client::open(addr).await;

    client.hello(PROTOCOL_VERSION, "   ").await;

    client.expect_error(ErrorKind::InvalidInput).await;
}

#[tokio::test]
async fn test_handshake_first_message_not_hello_unauthorized() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut client = Client::open(addr).await;

    client.send(ClientEvent::ListLobbies).await;

    client.expect_error(ErrorKind::Unauthorized).await;
    client.expect_closed().await;
}

// =========================================================================
// Requests
// =========================================================================

#[tokio::test]
async fn test_heartbeat_echoes_client_time() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut client = Client::login(addr, "alice").await;

    client.send(ClientEvent::Heartbeat { client_time: 1234 }).await;

    let envelope = client.next_envelope().await;
    assert_eq!(envelope.seq, 2, "Welcome was 1");
    match envelope.event {
        ServerEvent::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 1234),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_then_list_shows_waiting_lobby() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut alice = Client::login(addr, "alice").await;
    let mut bob = Client::login(addr, "bob").await;

    let lobby_id = alice.create_lobby(3).await;
    bob.send(ClientEvent::ListLobbies).await;

    match bob.next_event().await {
        ServerEvent::LobbyList { lobbies } => {
            assert_eq!(lobbies.len(), 1);
            assert_eq!(lobbies[0].lobby_id, lobby_id);
            assert_eq!(lobbies[0].host, Username::new("alice"));
            assert_eq!(lobbies[0].status, LobbyStatus::Waiting);
            assert_eq!(lobbies[0].question_count, 3);
        }
        other => panic!("expected LobbyList, got {other:?}"),
    }
}

#[tokio::test]
async fn test_create_lobby_without_questions_invalid_input() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut alice = Client::login(addr, "alice").await;

    alice
        .send(ClientEvent::CreateLobby { questions: vec![] })
        .await;

    alice.expect_error(ErrorKind::InvalidInput).await;
}

#[tokio::test]
async fn test_join_missing_lobby_not_found() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut bob = Client::login(addr, "bob").await;

    bob.join(LobbyId(42), "bob").await;

    bob.expect_error(ErrorKind::NotFound).await;
}

#[tokio::test]
async fn test_malformed_frame_ignored_connection_stays_open() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut alice = Client::login(addr, "alice").await;

    alice.ws.send(Message::text("not json at all")).await.unwrap();
    alice.send(ClientEvent::Heartbeat { client_time: 7 }).await;

    match alice.next_event().await {
        ServerEvent::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 7),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_repeated_hello_invalid_input() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut alice = Client::login(addr, "alice").await;

    alice.hello(PROTOCOL_VERSION, "alice").await;

    alice.expect_error(ErrorKind::InvalidInput).await;
}

#[tokio::test]
async fn test_end_lobby_by_outsider_forbidden() {
    let store = Arc::new(InMemoryAccountStore::with_users(["alice", "bob", "carol"]));
    let addr = start_server(store, LobbyConfig::default()).await;
    let mut alice = Client::login(addr, "alice").await;
    let mut carol = Client::login(addr, "carol").await;

    let lobby_id = alice.create_lobby(1).await;
    carol.send(ClientEvent::EndLobby { lobby_id }).await;

    carol.expect_error(ErrorKind::Forbidden).await;
}

#[tokio::test]
async fn test_end_waiting_lobby_by_host_removes_it_from_list() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut alice = Client::login(addr, "alice").await;

    let lobby_id = alice.create_lobby(1).await;
    alice.send(ClientEvent::EndLobby { lobby_id }).await;

    let (reason, result) = alice.expect_ended().await;
    assert_eq!(reason, EndReason::Aborted);
    assert!(result.is_none());

    alice.send(ClientEvent::ListLobbies).await;
    match alice.next_event().await {
        ServerEvent::LobbyList { lobbies } => assert!(lobbies.is_empty()),
        other => panic!("expected LobbyList, got {other:?}"),
    }
}

// =========================================================================
// Sessions
// =========================================================================

#[tokio::test]
async fn test_full_duel_commits_scores_and_bonus() {
    let store = default_store();
    let addr = start_server(Arc::clone(&store), LobbyConfig::default()).await;
    let (mut alice, mut bob, lobby_id) = start_match(addr, 2).await;

    // Question 0: alice first and right.
    alice.answer(lobby_id, "alice", 0, "B").await;
    for client in [&mut alice, &mut bob] {
        match client.next_event().await {
            ServerEvent::ScoreUpdate { scores, next, .. } => {
                assert_eq!(scores[0].score, 10);
                assert_eq!(scores[1].score, 0);
                assert_eq!(next, NextStep::Question(1));
            }
            other => panic!("expected ScoreUpdate, got {other:?}"),
        }
        client.expect_reveal(1).await;
    }

    // Question 1: bob wrong, alice right.
    bob.answer(lobby_id, "bob", 1, "C").await;
    alice.answer(lobby_id, "alice", 1, "B").await;
    for client in [&mut alice, &mut bob] {
        match client.next_event().await {
            ServerEvent::ScoreUpdate { next, .. } => assert_eq!(next, NextStep::Finished),
            other => panic!("expected ScoreUpdate, got {other:?}"),
        }
        let (reason, result) = client.expect_ended().await;
        assert_eq!(reason, EndReason::Completed);
        let result = result.expect("completed sessions carry a result");
        assert_eq!(
            result.outcome,
            Outcome::Winner {
                username: Username::new("alice")
            }
        );
        assert_eq!(result.bonus, 30);
    }

    assert_eq!(
        store.applied_deltas().await,
        vec![(Username::new("alice"), 50), (Username::new("bob"), 0)]
    );
}

#[tokio::test]
async fn test_answer_for_other_user_dropped() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let (mut alice, _bob, lobby_id) = start_match(addr, 1).await;

    // alice tries to answer as bob; nothing happens.
    alice.answer(lobby_id, "bob", 0, "B").await;
    alice.send(ClientEvent::Heartbeat { client_time: 9 }).await;

    match alice.next_event().await {
        ServerEvent::HeartbeatAck { client_time, .. } => assert_eq!(client_time, 9),
        other => panic!("expected HeartbeatAck, got {other:?}"),
    }
}

#[tokio::test]
async fn test_silent_question_ends_session_inactivity() {
    let config = LobbyConfig {
        question_timeout: Duration::from_millis(300),
        ..LobbyConfig::default()
    };
    let store = default_store();
    let addr = start_server(Arc::clone(&store), config).await;
    let (mut alice, mut bob, _lobby_id) = start_match(addr, 2).await;

    for client in [&mut alice, &mut bob] {
        let (reason, result) = client.expect_ended().await;
        assert_eq!(reason, EndReason::Inactivity);
        assert!(result.is_none());
    }
    assert!(store.applied_deltas().await.is_empty());
}

#[tokio::test]
async fn test_silent_question_outlasts_short_idle_timeout_ends_inactivity() {
    // Idle shorter than a question, in the same ratio as 30 s / 60 s.
    let builder = QuizDuelServerBuilder::new()
        .idle_timeout(Duration::from_millis(300))
        .lobby_config(LobbyConfig {
            question_timeout: Duration::from_millis(600),
            ..LobbyConfig::default()
        });
    let store = default_store();
    let addr = start_with(builder, Arc::clone(&store)).await;
    let (mut alice, mut bob, lobby_id) = start_match(addr, 3).await;

    alice.answer(lobby_id, "alice", 0, "B").await;
    for client in [&mut alice, &mut bob] {
        match client.next_event().await {
            ServerEvent::ScoreUpdate { next, .. } => assert_eq!(next, NextStep::Question(1)),
            other => panic!("expected ScoreUpdate, got {other:?}"),
        }
        client.expect_reveal(1).await;
    }

    // Both stay silent on question 1; the sockets must outlive the question.
    for client in [&mut alice, &mut bob] {
        let (reason, result) = client.expect_ended().await;
        assert_eq!(reason, EndReason::Inactivity);
        assert!(result.is_none());
    }
    assert!(store.applied_deltas().await.is_empty());
}

#[tokio::test]
async fn test_stalled_tcp_peer_does_not_block_logins() {
    let builder = QuizDuelServerBuilder::new().handshake_timeout(Duration::from_millis(200));
    let addr = start_with(builder, default_store()).await;

    // Connects but never sends the WebSocket upgrade request.
    let mut stalled = tokio::net::TcpStream::connect(addr).await.unwrap();

    let _alice = tokio::time::timeout(Duration::from_secs(3), Client::login(addr, "alice"))
        .await
        .expect("login must not wait behind the stalled peer");

    // The stalled peer is dropped once the handshake timeout passes.
    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(2), stalled.read(&mut buf))
        .await
        .expect("server should close the stalled peer");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn test_disconnect_ends_opponents_session() {
    let store = default_store();
    let addr = start_server(Arc::clone(&store), LobbyConfig::default()).await;
    let (mut alice, mut bob, _lobby_id) = start_match(addr, 2).await;

    bob.ws.close(None).await.unwrap();

    let (reason, result) = alice.expect_ended().await;
    assert_eq!(reason, EndReason::Disconnect);
    assert!(result.is_none());
    assert!(store.applied_deltas().await.is_empty());
}

#[tokio::test]
async fn test_second_login_supersedes_first_with_conflict() {
    let addr = start_server(default_store(), LobbyConfig::default()).await;
    let mut first = Client::login(addr, "alice").await;

    let mut second = Client::login(addr, "alice").await;

    first.expect_error(ErrorKind::Conflict).await;
    first.expect_closed().await;

    // The newer connection keeps working.
    second.send(ClientEvent::Heartbeat { client_time: 3 }).await;
    assert!(matches!(
        second.next_event().await,
        ServerEvent::HeartbeatAck { client_time: 3, .. }
    ));
}

#[tokio::test]
async fn test_end_lobby_during_session_aborts_for_both() {
    let store = default_store();
    let addr = start_server(Arc::clone(&store), LobbyConfig::default()).await;
    let (mut alice, mut bob, lobby_id) = start_match(addr, 3).await;

    bob.send(ClientEvent::EndLobby { lobby_id }).await;

    for client in [&mut alice, &mut bob] {
        let (reason, result) = client.expect_ended().await;
        assert_eq!(reason, EndReason::Aborted);
        assert!(result.is_none());
    }
    assert!(store.applied_deltas().await.is_empty());
}
