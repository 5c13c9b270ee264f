//! Lobbies and game sessions for QuizDuel.
//!
//! A host creates a lobby with a question set; one opponent joins it; the
//! join spawns a game session actor that plays the questions
//! out and, if both players stay to the end, commits the final scores.
//!
//! # Key types
//!
//! - [`LobbyRegistry`]: creates, lists, joins and ends lobbies
//! - [`Lobby`]: the lobby model (host, questions, participants, status)
//! - [`SessionHandle`]: send answers and end requests to a running session
//! - [`ScoringJudge`]: decides one question from the arriving answers
//! - [`ScoreCommitter`]: writes final deltas to the account store
//! - [`LobbyConfig`]: timeout and point values

mod committer;
mod config;
mod error;
mod judge;
mod lobby;
mod registry;
mod session;

pub use committer::ScoreCommitter;
pub use config::LobbyConfig;
pub use error::LobbyError;
pub use judge::{ScoringJudge, Verdict};
pub use lobby::Lobby;
pub use registry::LobbyRegistry;
pub use session::SessionHandle;
