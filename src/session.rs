use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::catalog::quiz::QuestionRecord;
use crate::timer::SessionTimer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    InProgress,
    Completed,
    Abandoned,
}

/// One user's run through a selected quiz. Owned exclusively by the engine's
/// session store; every mutation happens under the store lock.
pub(crate) struct SessionState {
    pub(crate) id: Uuid,
    pub(crate) chat_id: i64,
    pub(crate) db_user_id: i64,
    pub(crate) quiz_name: String,
    pub(crate) category: String,
    pub(crate) questions: Vec<QuestionRecord>,
    pub(crate) current_index: usize,
    pub(crate) correct_count: u32,
    pub(crate) remaining_seconds: Option<u64>,
    pub(crate) timer: Option<SessionTimer>,
    pub(crate) status: SessionStatus,
    /// True while the current question is on screen and unanswered. Cleared
    /// when an answer is accepted, so a duplicate submit is a no-op error.
    pub(crate) presented: bool,
    pub(crate) started_at: DateTime<Utc>,
}

impl SessionState {
    pub(crate) fn current_question(&self) -> &QuestionRecord {
        &self.questions[self.current_index]
    }

    pub(crate) fn is_last_question(&self) -> bool {
        self.current_index + 1 == self.questions.len()
    }

    pub(crate) fn total_questions(&self) -> usize {
        self.questions.len()
    }

    /// Cancels the live timer, if any. Must be called before flipping
    /// `status` on every terminal transition.
    pub(crate) fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}
