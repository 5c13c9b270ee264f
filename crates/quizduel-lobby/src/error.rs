//! Error types for the lobby layer.

use quizduel_protocol::{ErrorKind, LobbyId, Username};

/// Errors returned synchronously by lobby operations.
///
/// Session-internal failures (disconnects, inactivity) never show up here;
/// they end the session and reach clients as `SessionEnded`.
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The request payload was malformed. Nothing changed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The lobby does not exist.
    #[error("lobby {0} not found")]
    NotFound(LobbyId),

    /// The lobby is not in a state that allows this: already active or
    /// ended, or the host tried to join their own lobby.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The user is neither the host nor a participant of the lobby.
    #[error("{0} is not a participant of lobby {1}")]
    NotParticipant(Username, LobbyId),

    /// The lobby's session stopped accepting commands.
    #[error("lobby {0} is unavailable")]
    Unavailable(LobbyId),
}

impl LobbyError {
    /// The category reported to clients.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) | Self::Unavailable(_) => ErrorKind::Conflict,
            Self::NotParticipant(..) => ErrorKind::Forbidden,
        }
    }
}
