//! # QuizDuel
//!
//! A real-time trivia duel server. A host creates a lobby with a set of
//! questions, an opponent joins, and the two race to answer each question
//! over a WebSocket. The first correct answer takes the points; the final
//! winner gets a bonus written to their account.
//!
//! The server is assembled from one crate per layer:
//!
//! ```text
//! quizduel-transport  → frames over WebSocket
//! quizduel-protocol   → Envelope<ClientEvent> / Envelope<ServerEvent>
//! quizduel-hub        → username → live connection, account store
//! quizduel-clock      → per-question timer
//! quizduel-lobby      → lobbies, sessions, judging, score commits
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use quizduel::prelude::*;
//!
//! # async fn start() -> Result<(), QuizDuelError> {
//! let store = Arc::new(InMemoryAccountStore::with_users(["alice", "bob"]));
//! let server = QuizDuelServerBuilder::new()
//!     .bind("0.0.0.0:8080")
//!     .build(store)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod error;
mod handler;
mod server;

pub use error::QuizDuelError;
pub use server::{QuizDuelServer, QuizDuelServerBuilder, ServerConfig};

pub mod prelude {
    pub use crate::{QuizDuelError, QuizDuelServer, QuizDuelServerBuilder, ServerConfig};
    pub use quizduel_hub::{
        AccountStore, ConnectionHub, HubError, InMemoryAccountStore, UserRecord,
    };
    pub use quizduel_lobby::{LobbyConfig, LobbyError};
    pub use quizduel_protocol::{
        ClientEvent, Codec, EndReason, Envelope, ErrorKind, FinalResult, JsonCodec,
        LobbyId, LobbyStatus, LobbySummary, NextStep, Outcome, PROTOCOL_VERSION,
        PlayerScore, Question, ServerEvent, Username,
    };
}
