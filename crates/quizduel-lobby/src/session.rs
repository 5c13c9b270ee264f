//! The game session actor: one Tokio task per active lobby.
//!
//! Everything that can change a session's state arrives on one queue and
//! is handled one item at a time:
//!
//! - answers, routed in by the registry,
//! - clock expiries, enqueued by the [`SessionClock`] task,
//! - end requests from [`LobbyRegistry::end_lobby`](crate::LobbyRegistry::end_lobby),
//! - departures, pushed by the [`ConnectionHub`] on its own channel and
//!   multiplexed in with `tokio::select!`.
//!
//! ```text
//! AwaitingQuestion ──reveal + arm──→ AwaitingAnswer ──verdict──→ Scoring
//!        ↑                                                         │
//!        └─────────────────── more questions ──────────────────────┤
//!                                                                  ↓
//!                                                              Finished
//! ```
//!
//! Inactivity, disconnects and explicit ends leave from any state without
//! committing scores.

use std::cmp::Ordering;
use std::sync::Arc;

use quizduel_clock::{Expiry, SessionClock};
use quizduel_hub::{AccountStore, ConnectionHub};
use quizduel_protocol::{
    EndReason, FinalResult, LobbyId, NextStep, Outcome, PlayerScore, Question,
    ServerEvent, Username,
};
use tokio::sync::{Mutex, mpsc};

use crate::registry::LobbySlot;
use crate::{LobbyConfig, LobbyError, ScoreCommitter, ScoringJudge, Verdict};

/// Commands sent to a session actor through its channel.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// A participant answered a question.
    Answer {
        username: Username,
        question_index: usize,
        chosen_option: String,
    },

    /// The session clock fired.
    ClockExpired(Expiry),

    /// Stop the session without committing scores.
    End { reason: EndReason },
}

/// Handle to a running session. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    lobby_id: LobbyId,
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub fn lobby_id(&self) -> LobbyId {
        self.lobby_id
    }

    /// Queues an answer. Stale or invalid answers are dropped by the
    /// session, not rejected here.
    pub async fn submit_answer(
        &self,
        username: Username,
        question_index: usize,
        chosen_option: String,
    ) -> Result<(), LobbyError> {
        self.sender
            .send(SessionCommand::Answer {
                username,
                question_index,
                chosen_option,
            })
            .await
            .map_err(|_| LobbyError::Unavailable(self.lobby_id))
    }

    /// Asks the session to stop with `reason`.
    pub async fn end(&self, reason: EndReason) -> Result<(), LobbyError> {
        self.sender
            .send(SessionCommand::End { reason })
            .await
            .map_err(|_| LobbyError::Unavailable(self.lobby_id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

struct GameSession<S> {
    lobby_id: LobbyId,
    /// Host first.
    players: [Username; 2],
    questions: Arc<[Question]>,
    config: LobbyConfig,
    index: usize,
    scores: [i64; 2],
    judge: Option<ScoringJudge>,
    clock: SessionClock,
    /// Weak so that pending timers don't keep the actor's queue open.
    clock_tx: mpsc::WeakSender<SessionCommand>,
    hub: Arc<ConnectionHub>,
    committer: ScoreCommitter<S>,
    slot: Arc<Mutex<LobbySlot>>,
}

impl<S: AccountStore> GameSession<S> {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut departures: mpsc::UnboundedReceiver<Username>,
    ) {
        tracing::info!(
            lobby_id = %self.lobby_id,
            host = %self.players[0],
            joiner = %self.players[1],
            questions = self.questions.len(),
            "session started"
        );

        let summary = self.slot.lock().await.lobby.summary();
        self.hub
            .broadcast_to_session(&self.players, ServerEvent::Joined { lobby: summary })
            .await;

        let mut flow = self.enter_question().await;
        while flow == Flow::Continue {
            flow = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => {
                        tracing::warn!(lobby_id = %self.lobby_id, "session queue closed");
                        self.terminate(EndReason::Aborted).await;
                        Flow::Stop
                    }
                },
                Some(username) = departures.recv() => {
                    tracing::info!(
                        lobby_id = %self.lobby_id,
                        %username,
                        "participant departed"
                    );
                    self.terminate(EndReason::Disconnect).await;
                    Flow::Stop
                }
            };
        }

        tracing::info!(lobby_id = %self.lobby_id, "session actor stopped");
    }

    async fn handle_command(&mut self, cmd: SessionCommand) -> Flow {
        if !matches!(cmd, SessionCommand::End { .. }) {
            // The lobby may have been ended while this command sat in the
            // queue ahead of the `End` request.
            let ended_by = self.slot.lock().await.ended_by;
            if let Some(reason) = ended_by {
                self.terminate(reason).await;
                return Flow::Stop;
            }
        }

        match cmd {
            SessionCommand::Answer {
                username,
                question_index,
                chosen_option,
            } => {
                self.handle_answer(&username, question_index, &chosen_option)
                    .await
            }
            SessionCommand::ClockExpired(expiry) => self.handle_expiry(expiry).await,
            SessionCommand::End { reason } => {
                self.terminate(reason).await;
                Flow::Stop
            }
        }
    }

    /// AwaitingQuestion: reveal the current question or finish.
    async fn enter_question(&mut self) -> Flow {
        let Some(question) = self.questions.get(self.index).cloned() else {
            self.finish().await;
            return Flow::Stop;
        };

        self.judge = Some(ScoringJudge::new(
            self.players.clone(),
            question.correct_option,
        ));
        self.hub
            .broadcast_to_session(
                &self.players,
                ServerEvent::QuestionReveal {
                    lobby_id: self.lobby_id,
                    question_index: self.index,
                    prompt: question.prompt,
                    options: question.options,
                },
            )
            .await;

        let tx = self.clock_tx.clone();
        self.clock.arm(self.config.question_timeout, move |expiry| async move {
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(SessionCommand::ClockExpired(expiry)).await;
            }
        });
        Flow::Continue
    }

    /// AwaitingAnswer: feed one answer to the judge.
    async fn handle_answer(
        &mut self,
        username: &Username,
        question_index: usize,
        chosen_option: &str,
    ) -> Flow {
        if !self.players.contains(username) {
            tracing::debug!(lobby_id = %self.lobby_id, %username, "answer from outsider dropped");
            return Flow::Continue;
        }
        if question_index != self.index {
            tracing::debug!(
                lobby_id = %self.lobby_id,
                %username,
                question_index,
                current = self.index,
                "stale answer dropped"
            );
            return Flow::Continue;
        }
        let listed = self
            .questions
            .get(self.index)
            .is_some_and(|q| q.has_option(chosen_option));
        if !listed {
            tracing::debug!(
                lobby_id = %self.lobby_id,
                %username,
                "answer not among the options, dropped"
            );
            return Flow::Continue;
        }

        let Some(verdict) = self
            .judge
            .as_mut()
            .and_then(|judge| judge.submit(username, chosen_option))
        else {
            return Flow::Continue;
        };

        tracing::debug!(lobby_id = %self.lobby_id, question = self.index, ?verdict, "question decided");
        self.clock.disarm();
        self.score(verdict).await
    }

    async fn handle_expiry(&mut self, expiry: Expiry) -> Flow {
        if !self.clock.is_current(&expiry) {
            tracing::trace!(lobby_id = %self.lobby_id, generation = expiry.generation, "stale expiry dropped");
            return Flow::Continue;
        }

        for player in &self.players {
            if !self.hub.is_connected(player).await {
                tracing::info!(
                    lobby_id = %self.lobby_id,
                    username = %player,
                    "participant still offline at timeout"
                );
                self.terminate(EndReason::Disconnect).await;
                return Flow::Stop;
            }
        }

        let Some(verdict) = self.judge.as_mut().and_then(ScoringJudge::expire) else {
            return Flow::Continue;
        };
        tracing::debug!(lobby_id = %self.lobby_id, question = self.index, ?verdict, "question timed out");
        self.score(verdict).await
    }

    /// Scoring: apply the verdict, announce it, move to the next question.
    async fn score(&mut self, verdict: Verdict) -> Flow {
        match verdict {
            Verdict::Win { winner } => {
                if let Some(seat) = self.players.iter().position(|p| p == &winner) {
                    self.scores[seat] += self.config.points_per_question;
                }
            }
            Verdict::Draw => {}
            Verdict::Timeout => {
                self.terminate(EndReason::Inactivity).await;
                return Flow::Stop;
            }
        }

        self.index += 1;
        let next = if self.index < self.questions.len() {
            NextStep::Question(self.index)
        } else {
            NextStep::Finished
        };
        self.hub
            .broadcast_to_session(
                &self.players,
                ServerEvent::ScoreUpdate {
                    lobby_id: self.lobby_id,
                    scores: self.score_view(),
                    next,
                },
            )
            .await;

        self.enter_question().await
    }

    /// Finished: pick the winner, commit, close the lobby.
    ///
    /// The lobby is marked ended before anything is committed, so an
    /// `end_lobby` racing with the last answer either wins outright (no
    /// commit, its reason is reported) or finds the lobby already ended.
    async fn finish(&mut self) {
        self.clock.disarm();

        if let Some(reason) = self.claim_completion().await {
            self.terminate(reason).await;
            return;
        }

        let outcome = match self.scores[0].cmp(&self.scores[1]) {
            Ordering::Greater => Outcome::Winner {
                username: self.players[0].clone(),
            },
            Ordering::Less => Outcome::Winner {
                username: self.players[1].clone(),
            },
            Ordering::Equal => Outcome::Draw,
        };
        let bonus = match outcome {
            Outcome::Winner { .. } => self.config.win_bonus,
            Outcome::Draw => 0,
        };
        let result = FinalResult {
            outcome,
            scores: self.score_view(),
            bonus,
        };

        let failures = self.committer.commit(self.lobby_id, &result).await;
        if !failures.is_empty() {
            tracing::warn!(
                lobby_id = %self.lobby_id,
                failed = failures.len(),
                "session finished with uncommitted scores"
            );
        }

        self.hub.unwatch(self.lobby_id, &self.players).await;
        tracing::info!(lobby_id = %self.lobby_id, outcome = ?result.outcome, "session finished");
        self.hub
            .broadcast_to_session(
                &self.players,
                ServerEvent::SessionEnded {
                    lobby_id: self.lobby_id,
                    reason: EndReason::Completed,
                    final_result: Some(result),
                },
            )
            .await;
    }

    /// Ends the session early. No scores are committed.
    async fn terminate(&mut self, reason: EndReason) {
        self.clock.disarm();
        self.release().await;
        tracing::info!(lobby_id = %self.lobby_id, %reason, question = self.index, "session terminated");
        self.hub
            .broadcast_to_session(
                &self.players,
                ServerEvent::SessionEnded {
                    lobby_id: self.lobby_id,
                    reason,
                    final_result: None,
                },
            )
            .await;
    }

    /// Ends the lobby on behalf of a completed session. Returns the
    /// reason instead if `end_lobby` got there first.
    async fn claim_completion(&mut self) -> Option<EndReason> {
        let mut slot = self.slot.lock().await;
        if let Some(reason) = slot.ended_by {
            return Some(reason);
        }
        slot.lobby.end();
        slot.session = None;
        None
    }

    /// Marks the lobby ended, detaches the session from it, and stops
    /// watching the players.
    async fn release(&mut self) {
        {
            let mut slot = self.slot.lock().await;
            slot.lobby.end();
            slot.session = None;
        }
        self.hub.unwatch(self.lobby_id, &self.players).await;
    }

    fn score_view(&self) -> Vec<PlayerScore> {
        self.players
            .iter()
            .zip(self.scores)
            .map(|(username, score)| PlayerScore {
                username: username.clone(),
                score,
            })
            .collect()
    }
}

/// Spawns a session for `players` (host first) and returns its handle.
///
/// The session subscribes to both players' departures before revealing
/// anything, so a player who is already gone ends it right away.
pub(crate) fn spawn_session<S: AccountStore>(
    lobby_id: LobbyId,
    players: [Username; 2],
    questions: Arc<[Question]>,
    slot: Arc<Mutex<LobbySlot>>,
    hub: Arc<ConnectionHub>,
    committer: ScoreCommitter<S>,
    config: LobbyConfig,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(config.command_buffer);
    let (departure_tx, departure_rx) = mpsc::unbounded_channel();

    let session = GameSession {
        lobby_id,
        players,
        questions,
        config,
        index: 0,
        scores: [0; 2],
        judge: None,
        clock: SessionClock::new(),
        clock_tx: tx.downgrade(),
        hub,
        committer,
        slot,
    };

    tokio::spawn(async move {
        for player in &session.players {
            session
                .hub
                .watch(player, lobby_id, departure_tx.clone())
                .await;
        }
        drop(departure_tx);
        session.run(rx, departure_rx).await;
    });

    SessionHandle {
        lobby_id,
        sender: tx,
    }
}
