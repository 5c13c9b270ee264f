//! Per-question timer for QuizDuel sessions.
//!
//! A [`SessionClock`] holds at most one armed timer. Arming spawns a task
//! that sleeps for the given duration and then runs the expiry callback,
//! which for a game session just enqueues a message on the session's own
//! command queue. The clock never touches session state itself.
//!
//! # Generations
//!
//! Every `arm` bumps a generation counter and stamps the resulting
//! [`Expiry`] with it. A timer can fire and enqueue its message in the
//! same instant the session cancels it or arms the next one, so the
//! session checks [`SessionClock::is_current`] before acting on an expiry
//! and drops stale ones.
//!
//! # Integration
//!
//! ```ignore
//! let tx = cmd_tx.clone();
//! clock.arm(config.question_timeout, move |expiry| async move {
//!     let _ = tx.send(Command::ClockExpired(expiry)).await;
//! });
//!
//! // later, in the actor loop:
//! Command::ClockExpired(expiry) if clock.is_current(&expiry) => { /* timeout */ }
//! Command::ClockExpired(_) => { /* stale, ignore */ }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// The default inactivity window for one question.
pub const QUESTION_TIMEOUT: Duration = Duration::from_secs(60);

// Timer task state. Exactly one of `cancel` and the task moves it off
// PENDING; the loser backs off.
const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Passed to the expiry callback. Identifies which arming fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub generation: u64,
}

/// Returned by [`SessionClock::arm`]; pass it to [`SessionClock::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    generation: u64,
}

impl TimerHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct ArmedTimer {
    generation: u64,
    state: Arc<AtomicU8>,
    task: JoinHandle<()>,
}

/// A single-slot timer owned by one game session.
///
/// Dropping the clock cancels whatever is armed.
#[derive(Default)]
pub struct SessionClock {
    generation: u64,
    armed: Option<ArmedTimer>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms a timer that calls `on_expire` after `duration`.
    ///
    /// Any timer armed earlier is cancelled first.
    pub fn arm<F, Fut>(&mut self, duration: Duration, on_expire: F) -> TimerHandle
    where
        F: FnOnce(Expiry) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm();

        self.generation += 1;
        let generation = self.generation;
        let state = Arc::new(AtomicU8::new(PENDING));

        let task_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            if task_state
                .compare_exchange(PENDING, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
            trace!(generation, "session clock fired");
            on_expire(Expiry { generation }).await;
        });

        debug!(generation, timeout_ms = duration.as_millis() as u64, "session clock armed");
        self.armed = Some(ArmedTimer {
            generation,
            state,
            task,
        });
        TimerHandle { generation }
    }

    /// Cancels the timer identified by `handle`.
    ///
    /// Returns `true` if the timer was stopped before firing. If it
    /// already fired, or `handle` is from an earlier arming, nothing
    /// happens: a fired callback still runs to completion exactly once.
    /// Either way `handle`'s generation stops being current.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        match &self.armed {
            Some(armed) if armed.generation == handle.generation => self.disarm(),
            _ => false,
        }
    }

    /// Cancels whatever is armed. Same semantics as [`Self::cancel`].
    pub fn disarm(&mut self) -> bool {
        let Some(armed) = self.armed.take() else {
            return false;
        };
        // Bumping the generation makes an expiry that already got queued
        // look stale to `is_current`.
        self.generation += 1;

        let stopped = armed
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if stopped {
            armed.task.abort();
            trace!(generation = armed.generation, "session clock cancelled");
        }
        stopped
    }

    /// Whether `expiry` comes from the timer that is armed right now.
    pub fn is_current(&self, expiry: &Expiry) -> bool {
        self.armed
            .as_ref()
            .is_some_and(|armed| armed.generation == expiry.generation)
    }

    /// Whether a timer is armed (it may have fired already).
    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for SessionClock {
    fn drop(&mut self) {
        self.disarm();
    }
}
