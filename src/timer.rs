use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::database::connection::QuizStore;
use crate::engine::{QuizEngine, TickOutcome};

/// Cancellable countdown bound to exactly one session instance.
///
/// The task wakes once per second and pushes the tick through the engine's
/// session lock, so a tick can never interleave with an answer on the same
/// session. It carries the session id it was started for and stops by itself
/// as soon as that session is gone or terminal, which makes `cancel` safe to
/// call on an already-fired handle.
pub(crate) struct SessionTimer {
    handle: JoinHandle<()>,
}

impl SessionTimer {
    pub(crate) fn spawn<S>(engine: Arc<QuizEngine<S>>, user_id: i64, session_id: Uuid) -> Self
    where
        S: QuizStore + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;

                match engine.timer_tick(user_id, session_id) {
                    TickOutcome::Running => {}
                    TickOutcome::Expired { chat_id, result, summary } => {
                        tracing::info!(user_id, session_id = %session_id, "quiz timer expired");
                        engine.persist_attempt(summary).await;
                        engine.notify_timed_out(chat_id, result);
                        break;
                    }
                    TickOutcome::Detached => break,
                }
            }
        });

        Self { handle }
    }

    /// Idempotent. After this returns, the task can no longer decrement the
    /// session or fire the timeout: it is either aborted mid-sleep, or it
    /// observes a terminal/replaced session on its next tick and stops.
    pub(crate) fn cancel(&self) {
        self.handle.abort();
    }
}
