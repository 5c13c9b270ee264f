//! Core data types shared by the client and the server.
//!
//! Everything in this module can travel on the wire. Internal game state
//! (the session's running scores, the clock, the judge) lives in the lobby
//! crate and is only ever exposed through these shapes.

use serde::{Deserialize, Serialize};

use std::fmt;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a lobby.
///
/// Newtype over `u64` so a lobby ID can never be confused with a question
/// index or a connection ID. `#[serde(transparent)]` keeps the JSON a
/// plain number: `LobbyId(7)` is `7` on the wire, not `{"0": 7}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LobbyId(pub u64);

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L-{}", self.0)
    }
}

/// A logged-in player's name. Usernames are the identity players are known
/// by everywhere: the connection hub, lobbies, and the account store.
///
/// Deserialization does not validate. Call [`Username::parse`] at the
/// boundary (the handshake) before trusting one.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    /// Longest username accepted by [`Username::parse`].
    pub const MAX_LEN: usize = 64;

    /// Wraps a string without validating it.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Validates and normalizes a username received from a client.
    ///
    /// Leading/trailing whitespace is trimmed; the result must be non-empty,
    /// at most [`Self::MAX_LEN`] characters, and contain no control
    /// characters.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] when any rule is violated.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "username must not be empty".into(),
            ));
        }
        if trimmed.chars().count() > Self::MAX_LEN {
            return Err(ProtocolError::InvalidMessage(format!(
                "username longer than {} characters",
                Self::MAX_LEN
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ProtocolError::InvalidMessage(
                "username contains control characters".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrows the name as a `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Questions
// ---------------------------------------------------------------------------

/// A trivia question as submitted by the lobby host.
///
/// Carries the correct option, so it is only ever sent client → server.
/// Questions are revealed to players field by field in
/// [`ServerEvent::QuestionReveal`](crate::ServerEvent::QuestionReveal),
/// which leaves `correct_option` out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Host-chosen identifier. Optional on the wire; empty when omitted.
    #[serde(default)]
    pub id: String,
    /// The text shown to both players.
    pub prompt: String,
    /// Answer options in display order.
    pub options: Vec<String>,
    /// The option (by value) that wins the point.
    pub correct_option: String,
}

impl Question {
    /// Returns `true` if `choice` is one of this question's options.
    pub fn has_option(&self, choice: &str) -> bool {
        self.options.iter().any(|o| o == choice)
    }
}

// ---------------------------------------------------------------------------
// Lobby views
// ---------------------------------------------------------------------------

/// Lifecycle status of a lobby. Transitions only move forward:
///
/// ```text
/// Waiting ──(join)──→ Active ──(finish / end)──→ Ended
///    └──────────────(end)───────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    Waiting,
    Active,
    Ended,
}

impl LobbyStatus {
    /// Returns `true` if the lobby still has an open seat.
    pub fn is_joinable(self) -> bool {
        matches!(self, Self::Waiting)
    }

    /// Returns `true` if moving from `self` to `target` is a forward edge.
    pub fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Waiting, Self::Active)
                | (Self::Waiting, Self::Ended)
                | (Self::Active, Self::Ended)
        )
    }
}

impl fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// What clients see of a lobby: everything except the answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbySummary {
    pub lobby_id: LobbyId,
    pub host: Username,
    pub participants: Vec<Username>,
    pub status: LobbyStatus,
    pub question_count: usize,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

// ---------------------------------------------------------------------------
// Scores and results
// ---------------------------------------------------------------------------

/// One player's running score inside a session. Scores are signed; a
/// session never produces a negative one today, but the account store
/// deltas are signed and the type stays honest about it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub username: Username,
    pub score: i64,
}

/// Where the session goes after a [`ServerEvent::ScoreUpdate`](crate::ServerEvent::ScoreUpdate).
///
/// Serializes as `{"question": 2}` or `"finished"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStep {
    Question(usize),
    Finished,
}

/// Who won a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Winner { username: Username },
    Draw,
}

/// The result of a session that ran to completion. Produced once and
/// handed to the score committer by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    pub outcome: Outcome,
    /// Final running scores, host first.
    pub scores: Vec<PlayerScore>,
    /// Bonus added to the winner's delta (0 on a draw).
    pub bonus: i64,
}

impl FinalResult {
    /// The amount to add to `username`'s persistent score: their session
    /// score, plus the bonus if they won. `None` for non-participants.
    pub fn delta_for(&self, username: &Username) -> Option<i64> {
        let score = self
            .scores
            .iter()
            .find(|s| &s.username == username)?
            .score;
        let bonus = match &self.outcome {
            Outcome::Winner { username: w } if w == username => self.bonus,
            _ => 0,
        };
        Some(score + bonus)
    }
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Every question was played; scores were committed.
    Completed,
    /// A participant's connection went away.
    Disconnect,
    /// Nobody answered a question before the clock ran out.
    Inactivity,
    /// The lobby was ended explicitly while the session was running.
    Aborted,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Disconnect => write!(f, "disconnect"),
            Self::Inactivity => write!(f, "inactivity"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Category of a rejected client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed payload; nothing changed.
    InvalidInput,
    /// Unknown lobby or user.
    NotFound,
    /// Lobby already active/ended, or the host tried to join their own.
    Conflict,
    /// Handshake missing or rejected.
    Unauthorized,
    /// The requester isn't allowed to act on this lobby.
    Forbidden,
}
