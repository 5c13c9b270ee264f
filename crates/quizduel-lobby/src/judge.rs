//! Deciding a single question.
//!
//! The judge sees answers in the order the session dequeued them. That
//! order is authoritative: two answers are never compared by timestamp.
//!
//! ```text
//! first answer correct            → Win(first)
//! first wrong, second correct     → Win(second)
//! first wrong, second wrong       → Draw
//! clock runs out, one wrong       → Draw
//! clock runs out, nobody answered → Timeout
//! ```

use quizduel_protocol::Username;

/// The judge's decision for one question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// `winner` takes the question's points.
    Win { winner: Username },
    /// Nobody scores; the session moves on.
    Draw,
    /// Nobody answered in time; the session ends for inactivity.
    Timeout,
}

/// Judges one question for two players.
///
/// Once a verdict is reached every further input is ignored, so the
/// session can keep feeding late answers without special-casing them.
#[derive(Debug)]
pub struct ScoringJudge {
    players: [Username; 2],
    correct_option: String,
    answered: [bool; 2],
    verdict: Option<Verdict>,
}

impl ScoringJudge {
    pub fn new(players: [Username; 2], correct_option: impl Into<String>) -> Self {
        Self {
            players,
            correct_option: correct_option.into(),
            answered: [false; 2],
            verdict: None,
        }
    }

    /// Feeds one answer. Returns the verdict if this answer settles the
    /// question.
    ///
    /// Answers from non-players, second answers from the same player, and
    /// anything after a verdict return `None` and change nothing.
    pub fn submit(&mut self, player: &Username, answer: &str) -> Option<Verdict> {
        if self.verdict.is_some() {
            return None;
        }
        let seat = self.players.iter().position(|p| p == player)?;
        if self.answered[seat] {
            return None;
        }
        self.answered[seat] = true;

        let verdict = if answer == self.correct_option {
            Verdict::Win {
                winner: player.clone(),
            }
        } else if self.answered[1 - seat] {
            // The other player already answered and didn't win.
            Verdict::Draw
        } else {
            return None;
        };

        self.verdict = Some(verdict.clone());
        Some(verdict)
    }

    /// The clock ran out. Returns `None` if a verdict was already given.
    pub fn expire(&mut self) -> Option<Verdict> {
        if self.verdict.is_some() {
            return None;
        }
        let verdict = if self.answered.iter().any(|&a| a) {
            Verdict::Draw
        } else {
            Verdict::Timeout
        };
        self.verdict = Some(verdict.clone());
        Some(verdict)
    }

    pub fn verdict(&self) -> Option<&Verdict> {
        self.verdict.as_ref()
    }
}
