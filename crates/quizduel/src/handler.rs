//! Per-connection handler: handshake, registration, and event routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Finish the WebSocket upgrade (bounded by the handshake timeout)
//!   2. Receive `Hello` → validate version and username
//!   3. Look the user up in the account store
//!   4. Register with the hub and start the writer task
//!   5. Send `Welcome`
//!   6. Loop: receive envelopes → dispatch to the lobby registry
//!
//! Everything sent to the client after the handshake goes through the
//! connection's outbound queue, drained by a single writer task that
//! stamps sequence numbers. Session actors push onto the same queue via
//! the hub, so the client sees one ordered stream.

use std::sync::Arc;

use quizduel_hub::{AccountStore, ConnectionHub, Outbound, OutboundSender};
use quizduel_lobby::LobbyError;
use quizduel_protocol::{
    ClientEvent, Codec, EndReason, Envelope, ErrorKind, LobbyId, LobbyStatus,
    PROTOCOL_VERSION, ProtocolError, Question, ServerEvent, Username,
};
use quizduel_transport::{
    Connection, ConnectionId, PendingConnection, PendingWebSocket, TransportError,
    WebSocketConnection,
};
use tokio::sync::mpsc;

use crate::QuizDuelError;
use crate::server::ServerState;

/// Drop guard that unregisters the connection from the hub when the
/// handler exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task for the async call.
struct HubGuard {
    username: Username,
    conn_id: ConnectionId,
    hub: Arc<ConnectionHub>,
}

impl Drop for HubGuard {
    fn drop(&mut self) {
        let username = self.username.clone();
        let conn_id = self.conn_id;
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            hub.unregister(&username, conn_id).await;
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<S, C>(
    pending: PendingWebSocket,
    state: Arc<ServerState<S, C>>,
) -> Result<(), QuizDuelError>
where
    S: AccountStore,
    C: Codec,
{
    let conn_id = pending.id();
    tracing::debug!(%conn_id, "handling new connection");

    // --- Step 1: Upgrade ---
    let conn = match tokio::time::timeout(
        state.config.handshake_timeout,
        pending.upgrade(),
    )
    .await
    {
        Ok(Ok(conn)) => conn,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            tracing::debug!(%conn_id, "websocket upgrade timed out");
            return Err(TransportError::ConnectionClosed(
                "websocket upgrade timed out".into(),
            )
            .into());
        }
    };

    // --- Step 2: Handshake ---
    let username = perform_handshake(&conn, &state).await?;

    // --- Step 3: Registration ---
    let conn = Arc::new(conn);
    let (outbound, outbound_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_outbound(
        Arc::clone(&conn),
        outbound_rx,
        Arc::clone(&state),
    ));

    state
        .hub
        .register(username.clone(), conn_id, outbound.clone())
        .await;
    let _guard = HubGuard {
        username: username.clone(),
        conn_id,
        hub: Arc::clone(&state.hub),
    };
    tracing::info!(%conn_id, %username, "player connected");

    reply(
        &outbound,
        ServerEvent::Welcome {
            username: username.clone(),
            server_time: state.elapsed_ms(),
        },
    );

    // --- Step 4: Event loop ---
    let close_reason = loop {
        let data = match tokio::time::timeout(
            state.config.idle_timeout,
            conn.recv(),
        )
        .await
        {
            Ok(Ok(Some(data))) => data,
            Ok(Ok(None)) => {
                tracing::info!(%username, "connection closed cleanly");
                break "closed";
            }
            Ok(Err(e)) => {
                tracing::debug!(%username, error = %e, "recv error");
                break "receive error";
            }
            Err(_) => {
                tracing::info!(%username, "connection idle, closing");
                break "idle timeout";
            }
        };

        let envelope: Envelope<ClientEvent> = match state.codec.decode(&data) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(%username, error = %e, "failed to decode envelope");
                continue;
            }
        };

        if dispatch(&state, &username, &outbound, envelope.event).await == Flow::Close {
            break "goodbye";
        }
    };

    let _ = outbound.send(Outbound::Close {
        reason: close_reason.into(),
    });
    // _guard drops here → hub unregister fires.
    Ok(())
}

/// Performs the initial handshake: receive `Hello`, validate, look the
/// user up. Rejections are answered with an `Error` frame before
/// returning `Err`.
async fn perform_handshake<S, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<S, C>>,
) -> Result<Username, QuizDuelError>
where
    S: AccountStore,
    C: Codec,
{
    let data = match tokio::time::timeout(
        state.config.handshake_timeout,
        conn.recv(),
    )
    .await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before handshake".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(QuizDuelError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage(
                "handshake timed out".into(),
            )
            .into());
        }
    };

    let envelope: Envelope<ClientEvent> = match state.codec.decode(&data) {
        Ok(envelope) => envelope,
        Err(e) => {
            send_error(conn, state, ErrorKind::InvalidInput, "malformed Hello").await?;
            return Err(e.into());
        }
    };

    let (version, raw_name) = match envelope.event {
        ClientEvent::Hello { version, username } => (version, username),
        _ => {
            send_error(conn, state, ErrorKind::Unauthorized, "expected Hello").await?;
            return Err(ProtocolError::InvalidMessage(
                "first message must be Hello".into(),
            )
            .into());
        }
    };

    if version != PROTOCOL_VERSION {
        send_error(
            conn,
            state,
            ErrorKind::InvalidInput,
            &format!("version mismatch: expected {PROTOCOL_VERSION}, got {version}"),
        )
        .await?;
        return Err(ProtocolError::InvalidMessage(
            "protocol version mismatch".into(),
        )
        .into());
    }

    let username = match Username::parse(&raw_name) {
        Ok(name) => name,
        Err(e) => {
            send_error(conn, state, ErrorKind::InvalidInput, &e.to_string()).await?;
            return Err(e.into());
        }
    };

    if let Err(e) = state.store.get_user(&username).await {
        let err = QuizDuelError::from(e);
        send_error(conn, state, err.kind(), &err.to_string()).await?;
        return Err(err);
    }

    Ok(username)
}

/// Handles one client event. Returns [`Flow::Close`] on `Goodbye`.
async fn dispatch<S, C>(
    state: &Arc<ServerState<S, C>>,
    username: &Username,
    outbound: &OutboundSender,
    event: ClientEvent,
) -> Flow
where
    S: AccountStore,
    C: Codec,
{
    match event {
        ClientEvent::Heartbeat { client_time } => {
            reply(
                outbound,
                ServerEvent::HeartbeatAck {
                    client_time,
                    server_time: state.elapsed_ms(),
                },
            );
        }

        ClientEvent::CreateLobby { questions } => {
            create_lobby(state, username, outbound, questions).await;
        }

        ClientEvent::ListLobbies => {
            let lobbies = state
                .lobbies
                .list_available()
                .await
                .iter()
                .map(|lobby| lobby.summary())
                .collect();
            reply(outbound, ServerEvent::LobbyList { lobbies });
        }

        ClientEvent::JoinLobby {
            lobby_id,
            username: claimed,
        } => {
            if !is_self(username, &claimed) {
                return Flow::Continue;
            }
            // On success the session announces the match to both players.
            if let Err(e) = state.lobbies.join_lobby(lobby_id, claimed).await {
                reply_error(outbound, &e);
            }
        }

        ClientEvent::SubmitAnswer {
            lobby_id,
            username: claimed,
            question_index,
            chosen_option,
        } => {
            if !is_self(username, &claimed) {
                return Flow::Continue;
            }
            if let Err(e) = state
                .lobbies
                .submit_answer(lobby_id, claimed, question_index, chosen_option)
                .await
            {
                reply_error(outbound, &e);
            }
        }

        ClientEvent::EndLobby { lobby_id } => {
            end_lobby(state, username, outbound, lobby_id).await;
        }

        ClientEvent::Goodbye => {
            tracing::info!(%username, "client said goodbye");
            return Flow::Close;
        }

        ClientEvent::Hello { .. } => {
            reply(
                outbound,
                ServerEvent::error(ErrorKind::InvalidInput, "already identified"),
            );
        }
    }

    Flow::Continue
}

async fn create_lobby<S, C>(
    state: &Arc<ServerState<S, C>>,
    host: &Username,
    outbound: &OutboundSender,
    questions: Vec<Question>,
) where
    S: AccountStore,
    C: Codec,
{
    match state.lobbies.create_lobby(host.clone(), questions).await {
        Ok(lobby) => reply(
            outbound,
            ServerEvent::LobbyCreated {
                lobby: lobby.summary(),
            },
        ),
        Err(e) => reply_error(outbound, &e),
    }
}

/// Ends a lobby on behalf of its host or a participant.
///
/// A running session announces the end itself; for a lobby that never
/// started, the requester gets the `SessionEnded` directly.
async fn end_lobby<S, C>(
    state: &Arc<ServerState<S, C>>,
    requester: &Username,
    outbound: &OutboundSender,
    lobby_id: LobbyId,
) where
    S: AccountStore,
    C: Codec,
{
    let lobby = match state.lobbies.get(lobby_id).await {
        Ok(lobby) => lobby,
        Err(e) => return reply_error(outbound, &e),
    };
    if !lobby.involves(requester) {
        let err = LobbyError::NotParticipant(requester.clone(), lobby_id);
        return reply_error(outbound, &err);
    }

    match state.lobbies.end_lobby(lobby_id, EndReason::Aborted).await {
        Ok(_) if lobby.status == LobbyStatus::Waiting => reply(
            outbound,
            ServerEvent::SessionEnded {
                lobby_id,
                reason: EndReason::Aborted,
                final_result: None,
            },
        ),
        Ok(_) => {}
        Err(e) => reply_error(outbound, &e),
    }
}

/// Usernames inside events must name the connection's own user.
fn is_self(username: &Username, claimed: &Username) -> bool {
    if username == claimed {
        return true;
    }
    tracing::debug!(%username, %claimed, "event for another user dropped");
    false
}

/// Queues an event for this connection only.
fn reply(outbound: &OutboundSender, event: ServerEvent) {
    if outbound.send(Outbound::Event(event)).is_err() {
        tracing::debug!("writer gone, reply dropped");
    }
}

fn reply_error(outbound: &OutboundSender, err: &LobbyError) {
    reply(outbound, ServerEvent::error(err.kind(), err.to_string()));
}

/// Drains the outbound queue onto the socket.
///
/// Owns the connection's sequence counter: frames are numbered in the
/// order they leave, starting at 1.
async fn write_outbound<S, C>(
    conn: Arc<WebSocketConnection>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    state: Arc<ServerState<S, C>>,
) where
    S: AccountStore,
    C: Codec,
{
    let conn_id = conn.id();
    let mut seq: u64 = 1;

    while let Some(item) = queue.recv().await {
        match item {
            Outbound::Event(event) => {
                let envelope = Envelope::new(next_seq(&mut seq), state.elapsed_ms(), event);
                let bytes = match state.codec.encode(&envelope) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        tracing::warn!(%conn_id, error = %e, "failed to encode event");
                        continue;
                    }
                };
                if let Err(e) = conn.send(&bytes).await {
                    tracing::debug!(%conn_id, error = %e, "send failed, writer stopping");
                    break;
                }
            }
            Outbound::Close { reason } => {
                tracing::debug!(%conn_id, %reason, "closing connection");
                let _ = conn.close().await;
                break;
            }
        }
    }
}

/// Sends an `Error` frame straight to the socket. Only used during the
/// handshake, before the writer task exists.
async fn send_error<S, C>(
    conn: &WebSocketConnection,
    state: &Arc<ServerState<S, C>>,
    kind: ErrorKind,
    message: &str,
) -> Result<(), QuizDuelError>
where
    S: AccountStore,
    C: Codec,
{
    let envelope = Envelope::new(0, state.elapsed_ms(), ServerEvent::error(kind, message));
    let bytes = state.codec.encode(&envelope)?;
    conn.send(&bytes).await.map_err(QuizDuelError::Transport)?;
    Ok(())
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
