//! Unified error type for QuizDuel.

use quizduel_hub::HubError;
use quizduel_lobby::LobbyError;
use quizduel_protocol::{ErrorKind, ProtocolError};
use quizduel_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant generates the `From` impls, so
/// `?` converts layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum QuizDuelError {
    /// A transport-level error (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An account store or connection hub error.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// A lobby error (not found, conflict, invalid questions).
    #[error(transparent)]
    Lobby(#[from] LobbyError),
}

impl QuizDuelError {
    /// The category reported to clients in `ServerEvent::Error`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport(_) | Self::Protocol(_) => ErrorKind::InvalidInput,
            Self::Hub(HubError::UnknownUser(_)) => ErrorKind::NotFound,
            Self::Hub(_) => ErrorKind::Unauthorized,
            Self::Lobby(e) => e.kind(),
        }
    }
}
