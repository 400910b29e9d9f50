use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::catalog::quiz::{extract_key, OptionRecord};
use crate::catalog::source::QuestionSource;
use crate::database::connection::{AttemptSummary, QuizStore, SettingsPatch, UserSettings};
use crate::error::QuizError;
use crate::session::{SessionState, SessionStatus};
use crate::timer::SessionTimer;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Success-rate threshold in percent; an attempt passes when its rate is
    /// greater than or equal to this value.
    pub success_rate: u32,
}

/// Everything the engine needs to know to start a session.
#[derive(Debug, Clone)]
pub struct StartQuiz {
    pub user_id: i64,
    pub chat_id: i64,
    pub db_user_id: i64,
    pub quiz_name: String,
    pub category: String,
}

/// The question currently on screen, ready for rendering.
#[derive(Debug, Clone)]
pub struct QuestionView {
    pub index: usize,
    pub total: usize,
    pub prompt: String,
    pub options: Vec<OptionRecord>,
    pub remaining_seconds: Option<u64>,
}

/// What happened to the answer the user just gave.
#[derive(Debug, Clone)]
pub struct AnswerReview {
    pub prompt: String,
    pub options: Vec<OptionRecord>,
    pub selected_key: String,
    pub correct_key: String,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FinishedQuiz {
    pub quiz_name: String,
    pub correct_count: u32,
    pub total_questions: u32,
    pub success_rate: f64,
    pub passed: bool,
    pub timed_out: bool,
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Next {
        review: AnswerReview,
        next_index: usize,
        total: usize,
        remaining_seconds: Option<u64>,
    },
    Finished {
        review: AnswerReview,
        result: FinishedQuiz,
    },
}

/// Out-of-band events the engine raises without an incoming update to reply
/// to. Consumed by a forwarder task that renders them via the bot.
#[derive(Debug)]
pub enum QuizNotice {
    TimedOut { chat_id: i64, result: FinishedQuiz },
}

/// Result of one timer tick, resolved under the session lock.
pub(crate) enum TickOutcome {
    Running,
    Expired {
        chat_id: i64,
        result: FinishedQuiz,
        summary: AttemptSummary,
    },
    /// The session is gone, replaced, or terminal; the timer stops itself.
    Detached,
}

/// Quiz session controller: owns every active session and serializes all
/// transitions on one lock per store, so a timer tick and an answer for the
/// same user can never interleave.
pub struct QuizEngine<S> {
    catalog: QuestionSource,
    store: Arc<S>,
    config: EngineConfig,
    sessions: Mutex<HashMap<i64, SessionState>>,
    notices: mpsc::UnboundedSender<QuizNotice>,
}

impl<S> QuizEngine<S>
where
    S: QuizStore + 'static,
{
    pub fn new(
        catalog: QuestionSource,
        store: Arc<S>,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<QuizNotice>) {
        let (notices, rx) = mpsc::unbounded_channel();
        let engine = Self {
            catalog,
            store,
            config,
            sessions: Mutex::new(HashMap::new()),
            notices,
        };
        (engine, rx)
    }

    pub fn catalog(&self) -> &QuestionSource {
        &self.catalog
    }

    /// Starts a fresh session for the user: loads the selection according to
    /// the user's settings, replaces any unfinished session, starts the
    /// countdown when the timer is enabled, and returns the first question.
    ///
    /// No session is created when the selection cannot be loaded.
    pub async fn start_quiz(self: Arc<Self>, req: StartQuiz) -> Result<QuestionView, QuizError> {
        let settings = match self.store.user_settings(req.db_user_id).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(user_id = req.user_id, "settings unavailable, using defaults: {e}");
                UserSettings::default()
            }
        };

        let questions = self.catalog.load_selection(
            &req.quiz_name,
            &req.category,
            settings.questions_count as usize,
            settings.questions_random_enabled,
        )?;

        let timer_seconds = settings
            .timer_enabled
            .then(|| u64::from(settings.timer_limit) * 60);

        let view = {
            let mut sessions = self.sessions.lock().expect("session store lock poisoned");

            if let Some(mut old) = sessions.remove(&req.user_id) {
                old.cancel_timer();
                old.status = SessionStatus::Abandoned;
                tracing::warn!(
                    user_id = req.user_id,
                    quiz = %old.quiz_name,
                    "discarding unfinished session, no attempt recorded"
                );
            }

            let mut session = SessionState {
                id: Uuid::new_v4(),
                chat_id: req.chat_id,
                db_user_id: req.db_user_id,
                quiz_name: req.quiz_name.clone(),
                category: req.category.clone(),
                questions,
                current_index: 0,
                correct_count: 0,
                remaining_seconds: timer_seconds,
                timer: None,
                status: SessionStatus::InProgress,
                presented: true,
                started_at: Utc::now(),
            };

            if timer_seconds.is_some() {
                session.timer = Some(SessionTimer::spawn(
                    Arc::clone(&self),
                    req.user_id,
                    session.id,
                ));
            }

            tracing::info!(
                user_id = req.user_id,
                quiz = %session.quiz_name,
                category = %session.category,
                questions = session.total_questions(),
                timed = timer_seconds.is_some(),
                "quiz session started"
            );

            let view = question_view(&session);
            sessions.insert(req.user_id, session);
            view
        };

        // Memo for "restart last quiz"; a write failure must not block play.
        let memo = SettingsPatch {
            last_quiz: Some(req.quiz_name),
            last_category: Some(req.category),
            ..SettingsPatch::default()
        };
        if let Err(e) = self.store.update_settings(req.db_user_id, memo).await {
            tracing::warn!(user_id = req.user_id, "failed to persist last-quiz memo: {e}");
        }

        Ok(view)
    }

    /// Scores the answer for the question currently on screen. Advances to
    /// the next question, or finishes the session when this was the last one.
    /// A duplicate submit for a question that is no longer on screen fails
    /// with `AlreadyAnswered` and changes nothing.
    pub async fn submit_answer(
        &self,
        user_id: i64,
        selected: &str,
    ) -> Result<SubmitOutcome, QuizError> {
        // All session access happens under the lock, which is confined to
        // this block so the guard is released before the awaited attempt
        // write below. A non-terminal answer returns from here directly; the
        // terminal case hands the finished result out to be persisted.
        let (review, result, summary) = {
            let mut sessions = self.sessions.lock().expect("session store lock poisoned");

            // First borrow: validate, score, and advance if this was not the
            // last question.
            let (review, advanced) = {
                let session = sessions.get_mut(&user_id).ok_or(QuizError::NoActiveSession)?;

                if session.status != SessionStatus::InProgress {
                    return Err(QuizError::NoActiveSession);
                }
                if !session.presented {
                    return Err(QuizError::AlreadyAnswered);
                }

                let selected_key = extract_key(selected).to_owned();
                let question = session.current_question();
                let is_correct = question.correct_key() == selected_key;
                let review = AnswerReview {
                    prompt: question.prompt().to_owned(),
                    options: question.options().to_vec(),
                    selected_key,
                    correct_key: question.correct_key().to_owned(),
                    is_correct,
                    explanation: question.explanation().map(str::to_owned),
                };

                if is_correct {
                    session.correct_count += 1;
                }
                session.presented = false;

                let advanced = if session.is_last_question() {
                    None
                } else {
                    session.current_index += 1;
                    Some((
                        session.current_index,
                        session.total_questions(),
                        session.remaining_seconds,
                    ))
                };
                (review, advanced)
            };

            if let Some((next_index, total, remaining_seconds)) = advanced {
                return Ok(SubmitOutcome::Next {
                    review,
                    next_index,
                    total,
                    remaining_seconds,
                });
            }

            // Last question answered: terminal transition. Cancel the timer
            // before flipping the status, still under the lock.
            let mut session = sessions.remove(&user_id).expect("session present");
            session.cancel_timer();
            session.status = SessionStatus::Completed;
            let (result, summary) = finish_summary(&session, false, self.config.success_rate);
            (review, result, summary)
        };

        self.persist_attempt(summary).await;
        Ok(SubmitOutcome::Finished { review, result })
    }

    /// Re-emits the question at the current index, marking it as presented
    /// so the next answer is accepted.
    pub fn next_question(&self, user_id: i64) -> Result<QuestionView, QuizError> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let session = sessions.get_mut(&user_id).ok_or(QuizError::NoActiveSession)?;

        if session.status != SessionStatus::InProgress {
            return Err(QuizError::NoActiveSession);
        }

        session.presented = true;
        Ok(question_view(session))
    }

    /// Drops the user's session without recording an attempt. Used when the
    /// user navigates away mid-quiz. Returns whether a session existed.
    pub fn abandon(&self, user_id: i64) -> bool {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        match sessions.remove(&user_id) {
            Some(mut session) => {
                session.cancel_timer();
                session.status = SessionStatus::Abandoned;
                tracing::info!(user_id, quiz = %session.quiz_name, "quiz session abandoned");
                true
            }
            None => false,
        }
    }

    /// One countdown step, called by the session's timer task. Decrements
    /// the remaining time and performs the timeout transition when it hits
    /// zero. A tick arriving after the session completed, was abandoned, or
    /// was replaced detaches the timer without any effect.
    pub(crate) fn timer_tick(&self, user_id: i64, session_id: Uuid) -> TickOutcome {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");

        let expired = match sessions.get_mut(&user_id) {
            Some(session)
                if session.id == session_id && session.status == SessionStatus::InProgress =>
            {
                match session.remaining_seconds.as_mut() {
                    Some(remaining) => {
                        *remaining = remaining.saturating_sub(1);
                        *remaining == 0
                    }
                    None => return TickOutcome::Detached,
                }
            }
            _ => return TickOutcome::Detached,
        };

        if !expired {
            return TickOutcome::Running;
        }

        let mut session = sessions.remove(&user_id).expect("session present");
        // This tick runs on the timer task itself; dropping the handle is
        // enough, the task stops right after delivering the expiry.
        session.timer = None;
        session.status = SessionStatus::Completed;
        let (result, summary) = finish_summary(&session, true, self.config.success_rate);

        TickOutcome::Expired {
            chat_id: session.chat_id,
            result,
            summary,
        }
    }

    /// Hands a finished-session summary to the attempt store. Failures are
    /// logged and swallowed: the user already saw their result.
    pub(crate) async fn persist_attempt(&self, summary: AttemptSummary) {
        if let Err(e) = self.store.record_attempt(&summary).await {
            tracing::error!(
                user_id = summary.user_id,
                quiz = %summary.quiz_name,
                "failed to record quiz attempt: {e}"
            );
        }
    }

    pub(crate) fn notify_timed_out(&self, chat_id: i64, result: FinishedQuiz) {
        if self
            .notices
            .send(QuizNotice::TimedOut { chat_id, result })
            .is_err()
        {
            tracing::warn!(chat_id, "timeout notice dropped, receiver closed");
        }
    }
}

fn question_view(session: &SessionState) -> QuestionView {
    let question = session.current_question();
    QuestionView {
        index: session.current_index,
        total: session.total_questions(),
        prompt: question.prompt().to_owned(),
        options: question.options().to_vec(),
        remaining_seconds: session.remaining_seconds,
    }
}

fn finish_summary(
    session: &SessionState,
    timed_out: bool,
    threshold: u32,
) -> (FinishedQuiz, AttemptSummary) {
    let total = session.total_questions() as u32;
    let success_rate = if total > 0 {
        f64::from(session.correct_count) / f64::from(total) * 100.0
    } else {
        0.0
    };
    let passed = success_rate >= f64::from(threshold);
    let finished_at = Utc::now();

    let result = FinishedQuiz {
        quiz_name: session.quiz_name.clone(),
        correct_count: session.correct_count,
        total_questions: total,
        success_rate,
        passed,
        timed_out,
    };

    let summary = AttemptSummary {
        user_id: session.db_user_id,
        category: session.category.clone(),
        quiz_name: session.quiz_name.clone(),
        total_questions: total,
        correct_count: session.correct_count,
        success_rate,
        passed,
        started_at: session.started_at,
        finished_at,
        duration_seconds: (finished_at - session.started_at).num_seconds().max(0),
    };

    (result, summary)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::catalog::quiz::QuestionRecord;
    use crate::database::connection::{
        AttemptStore, SettingsStore, StoreError, TelegramProfile, UserStats, UserStore,
    };

    struct NullStore;

    #[async_trait]
    impl UserStore for NullStore {
        async fn get_or_create_user(&self, _profile: &TelegramProfile) -> Result<i64, StoreError> {
            Ok(1)
        }
    }

    #[async_trait]
    impl SettingsStore for NullStore {
        async fn user_settings(&self, _user_id: i64) -> Result<UserSettings, StoreError> {
            Ok(UserSettings::default())
        }

        async fn update_settings(
            &self,
            _user_id: i64,
            _patch: SettingsPatch,
        ) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[async_trait]
    impl AttemptStore for NullStore {
        async fn record_attempt(&self, _summary: &AttemptSummary) -> Result<(), StoreError> {
            Ok(())
        }

        async fn user_stats(&self, _user_id: i64) -> Result<UserStats, StoreError> {
            Ok(UserStats::default())
        }
    }

    fn engine() -> Arc<QuizEngine<NullStore>> {
        let (engine, _rx) = QuizEngine::new(
            QuestionSource::new("unused"),
            Arc::new(NullStore),
            EngineConfig { success_rate: 80 },
        );
        Arc::new(engine)
    }

    fn question(prompt: &str, correct: &str) -> QuestionRecord {
        let raw = serde_json::from_value(serde_json::json!({
            "question": prompt,
            "answers": ["A: yes", "B: no"],
            "correct_answer": correct,
        }))
        .unwrap();
        QuestionRecord::from_raw(raw).unwrap()
    }

    fn seed_session(engine: &QuizEngine<NullStore>, user_id: i64, questions: Vec<QuestionRecord>) {
        let session = SessionState {
            id: Uuid::new_v4(),
            chat_id: user_id,
            db_user_id: 1,
            quiz_name: "sample".into(),
            category: "general".into(),
            questions,
            current_index: 0,
            correct_count: 0,
            remaining_seconds: None,
            timer: None,
            status: SessionStatus::InProgress,
            presented: true,
            started_at: Utc::now(),
        };
        engine
            .sessions
            .lock()
            .unwrap()
            .insert(user_id, session);
    }

    #[tokio::test]
    async fn duplicate_submit_is_a_no_op_error() {
        let engine = engine();
        seed_session(
            &engine,
            7,
            vec![question("Q1", "A: yes"), question("Q2", "A: yes")],
        );

        let first = engine.submit_answer(7, "A").await.unwrap();
        assert!(matches!(first, SubmitOutcome::Next { .. }));

        // The next question has not been presented yet; a second submit must
        // not score anything.
        let err = engine.submit_answer(7, "A").await.unwrap_err();
        assert!(matches!(err, QuizError::AlreadyAnswered));

        let sessions = engine.sessions.lock().unwrap();
        assert_eq!(sessions.get(&7).unwrap().correct_count, 1);
    }

    #[tokio::test]
    async fn single_question_quiz_finishes_on_first_answer() {
        let engine = engine();
        seed_session(&engine, 7, vec![question("Q1", "A: yes")]);

        let outcome = engine.submit_answer(7, "A").await.unwrap();
        match outcome {
            SubmitOutcome::Finished { result, .. } => {
                assert_eq!(result.correct_count, 1);
                assert_eq!(result.total_questions, 1);
                assert!(result.passed);
                assert!(!result.timed_out);
            }
            other => panic!("expected Finished, got {other:?}"),
        }

        assert!(matches!(
            engine.submit_answer(7, "A").await.unwrap_err(),
            QuizError::NoActiveSession
        ));
    }

    #[test]
    fn summary_math_matches_two_of_three() {
        let engine = engine();
        seed_session(
            &engine,
            7,
            vec![
                question("Q1", "A: yes"),
                question("Q2", "A: yes"),
                question("Q3", "A: yes"),
            ],
        );

        let mut sessions = engine.sessions.lock().unwrap();
        let session = sessions.get_mut(&7).unwrap();
        session.correct_count = 2;
        session.current_index = 2;

        let (result, summary) = finish_summary(session, false, 80);
        assert_eq!(result.correct_count, 2);
        assert!((result.success_rate - 66.66666666666667).abs() < 1e-9);
        assert!(!result.passed);
        assert_eq!(summary.total_questions, 3);
        assert_eq!(summary.correct_count, 2);

        let (result, _) = finish_summary(session, false, 60);
        assert!(result.passed);
    }
}
