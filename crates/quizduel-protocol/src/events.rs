//! The tagged event vocabulary and the envelope every frame travels in.
//!
//! Both enums use `#[serde(tag = "type")]` ("internally tagged"), so an
//! event looks like `{ "type": "SubmitAnswer", "lobby_id": 7, ... }`.
//! That is the shape the browser client builds by hand.

use serde::{Deserialize, Serialize};

use crate::types::{
    EndReason, ErrorKind, FinalResult, LobbyId, LobbySummary, NextStep,
    PlayerScore, Question, Username,
};

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Everything a client may send.
///
/// Usernames inside events must match the name the connection identified
/// with in `Hello`; the handler drops events that don't.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// First frame on every connection.
    Hello { version: u32, username: String },

    /// Keep-alive. The server echoes `client_time` back for RTT.
    Heartbeat { client_time: u64 },

    /// Host a new lobby with the given question set.
    CreateLobby { questions: Vec<Question> },

    /// Ask for every lobby that still has an open seat.
    ListLobbies,

    /// Take the second seat of a waiting lobby.
    JoinLobby { lobby_id: LobbyId, username: Username },

    /// Answer the question at `question_index`.
    SubmitAnswer {
        lobby_id: LobbyId,
        username: Username,
        question_index: usize,
        chosen_option: String,
    },

    /// End a lobby (host or participant only).
    EndLobby { lobby_id: LobbyId },

    /// Client is closing the connection.
    Goodbye,
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Everything the server may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Handshake accepted.
    Welcome { username: Username, server_time: u64 },

    HeartbeatAck { client_time: u64, server_time: u64 },

    LobbyCreated { lobby: LobbySummary },

    LobbyList { lobbies: Vec<LobbySummary> },

    /// Both seats are taken; the session is starting. Sent to both players.
    Joined { lobby: LobbySummary },

    /// A question is live. The correct option is never included.
    QuestionReveal {
        lobby_id: LobbyId,
        question_index: usize,
        prompt: String,
        options: Vec<String>,
    },

    /// Scores after a question was decided.
    ScoreUpdate {
        lobby_id: LobbyId,
        scores: Vec<PlayerScore>,
        next: NextStep,
    },

    /// The session is over. `final_result` is present only for
    /// [`EndReason::Completed`].
    SessionEnded {
        lobby_id: LobbyId,
        reason: EndReason,
        final_result: Option<FinalResult>,
    },

    /// A request was rejected. Nothing changed on the server.
    Error { kind: ErrorKind, message: String },
}

impl ServerEvent {
    /// Shorthand for building an [`ServerEvent::Error`].
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level frame. Every message on the wire is an `Envelope`.
///
/// ```text
/// ┌──────────────────────────────────┐
/// │ seq: 42                          │  ← per-connection ordering
/// │ timestamp: 15000                 │  ← ms since server start
/// │ ┌──────────────────────────────┐ │
/// │ │ event: { "type": ... }       │ │  ← the actual content
/// │ └──────────────────────────────┘ │
/// └──────────────────────────────────┘
/// ```
///
/// `seq` and `timestamp` default to 0 when a client leaves them out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<E> {
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub timestamp: u64,
    pub event: E,
}

impl<E> Envelope<E> {
    pub fn new(seq: u64, timestamp: u64, event: E) -> Self {
        Self {
            seq,
            timestamp,
            event,
        }
    }
}
