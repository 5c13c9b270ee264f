//! Lobby and session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by every lobby a registry creates.
///
/// The point values are the game's rules, not a menu of modes. They are
/// fields so tests can shorten the timeout without waiting a minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyConfig {
    /// How long both players may stay silent on a question before the
    /// question times out.
    pub question_timeout: Duration,

    /// Points for winning a question.
    pub points_per_question: i64,

    /// Extra points for the player with the strictly higher final score.
    pub win_bonus: i64,

    /// Capacity of each session's command queue.
    pub command_buffer: usize,

    /// Minimum number of distinct options a question must offer.
    pub min_options: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            question_timeout: quizduel_clock::QUESTION_TIMEOUT,
            points_per_question: 10,
            win_bonus: 30,
            command_buffer: 64,
            min_options: 2,
        }
    }
}
