//! The lobby model.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use quizduel_protocol::{LobbyId, LobbyStatus, LobbySummary, Question, Username};

use crate::{LobbyConfig, LobbyError};

/// A host, a question set, and at most one opponent.
///
/// `participants` is empty while waiting and exactly `[host, joiner]`
/// once active. Status only moves forward (see [`LobbyStatus`]).
/// The question list is shared with the running session and never
/// changes after creation.
#[derive(Debug, Clone)]
pub struct Lobby {
    pub id: LobbyId,
    pub host: Username,
    pub questions: Arc<[Question]>,
    pub participants: Vec<Username>,
    pub status: LobbyStatus,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
}

impl Lobby {
    pub(crate) fn new(id: LobbyId, host: Username, questions: Vec<Question>) -> Self {
        Self {
            id,
            host,
            questions: Arc::from(questions),
            participants: Vec::new(),
            status: LobbyStatus::Waiting,
            created_at: now_millis(),
        }
    }

    /// The client-facing view, without correct answers.
    pub fn summary(&self) -> LobbySummary {
        LobbySummary {
            lobby_id: self.id,
            host: self.host.clone(),
            participants: self.participants.clone(),
            status: self.status,
            question_count: self.questions.len(),
            created_at: self.created_at,
        }
    }

    /// Whether `username` hosts or plays in this lobby.
    pub fn involves(&self, username: &Username) -> bool {
        &self.host == username || self.participants.contains(username)
    }

    /// Moves the lobby to `Ended`. Returns `false` if it already was.
    pub(crate) fn end(&mut self) -> bool {
        if self.status == LobbyStatus::Ended {
            return false;
        }
        self.status = LobbyStatus::Ended;
        true
    }
}

/// Checks a host-submitted question set.
///
/// Every question needs a prompt, at least `config.min_options` distinct
/// options, and a correct option that is one of them.
pub(crate) fn validate_questions(
    questions: &[Question],
    config: &LobbyConfig,
) -> Result<(), LobbyError> {
    if questions.is_empty() {
        return Err(LobbyError::InvalidInput(
            "a lobby needs at least one question".into(),
        ));
    }

    for (index, question) in questions.iter().enumerate() {
        if question.prompt.trim().is_empty() {
            return Err(LobbyError::InvalidInput(format!(
                "question {index} has an empty prompt"
            )));
        }
        let distinct: HashSet<&str> =
            question.options.iter().map(String::as_str).collect();
        if distinct.len() != question.options.len() {
            return Err(LobbyError::InvalidInput(format!(
                "question {index} has duplicate options"
            )));
        }
        if distinct.len() < config.min_options {
            return Err(LobbyError::InvalidInput(format!(
                "question {index} needs at least {} options",
                config.min_options
            )));
        }
        if !question.has_option(&question.correct_option) {
            return Err(LobbyError::InvalidInput(format!(
                "question {index}: correct option is not among the options"
            )));
        }
    }
    Ok(())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
