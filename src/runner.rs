use std::sync::Arc;

use teloxide::{
    dispatching::dialogue::GetChatId,
    payloads::SendMessageSetters,
    prelude::Requester,
    types::{CallbackQuery, ChatId},
    Bot,
};
use tokio::sync::mpsc;
use tracing::instrument;

use crate::database::connection::QuizStore;
use crate::engine::{
    AnswerReview, FinishedQuiz, QuestionView, QuizEngine, QuizNotice, StartQuiz, SubmitOutcome,
};
use crate::error::QuizError;
use crate::keyboard::{answers_keyboard, next_question_keyboard, results_keyboard};
use crate::menus::{self, edit_or_send, profile_from_user};
use crate::HandlerResult;

const SESSION_ENDED: &str = "This quiz session has ended. Pick a quiz to start a new one.";

/// Starts a quiz for the user behind the callback and shows the first
/// question. Shared by quiz selection and "restart last quiz".
#[instrument(level = "info", skip(bot, q, engine, store))]
pub(crate) async fn begin_quiz<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    engine: &Arc<QuizEngine<S>>,
    store: &Arc<S>,
    category: &str,
    quiz_name: &str,
) -> HandlerResult {
    let profile = profile_from_user(&q.from);
    let db_user_id = store.get_or_create_user(&profile).await?;
    let chat_id = q.chat_id().map_or(profile.telegram_id, |c| c.0);

    let request = StartQuiz {
        user_id: profile.telegram_id,
        chat_id,
        db_user_id,
        quiz_name: quiz_name.to_owned(),
        category: category.to_owned(),
    };

    match Arc::clone(engine).start_quiz(request).await {
        Ok(view) => {
            edit_or_send(
                bot,
                q,
                &render_question(&view),
                Some(answers_keyboard(&view.options)),
            )
            .await
        }
        Err(QuizError::QuizNotFound(_) | QuizError::CategoryNotFound(_)) => {
            edit_or_send(bot, q, &format!("Quiz '{quiz_name}' not found."), None).await
        }
        Err(e @ QuizError::MalformedQuiz { .. }) => {
            tracing::error!("refusing to start quiz: {e}");
            edit_or_send(bot, q, "This quiz file looks broken. Try another one.", None).await
        }
        Err(e) => {
            tracing::error!("failed to start quiz '{quiz_name}': {e}");
            edit_or_send(bot, q, "Something went wrong. Please try again.", None).await
        }
    }
}

#[instrument(level = "info", skip(bot, q, engine))]
pub(crate) async fn answer_given<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    engine: &Arc<QuizEngine<S>>,
    selected_key: &str,
) -> HandlerResult {
    let user_id = q.from.id.0 as i64;

    match engine.submit_answer(user_id, selected_key).await {
        Ok(SubmitOutcome::Next {
            review,
            next_index,
            total,
            ..
        }) => {
            edit_or_send(
                bot,
                q,
                &render_review(&review),
                Some(next_question_keyboard(next_index, total)),
            )
            .await
        }
        Ok(SubmitOutcome::Finished { review, result }) => {
            edit_or_send(bot, q, &render_review(&review), None).await?;
            if let Some(chat_id) = q.chat_id() {
                bot.send_message(chat_id, render_result(&result))
                    .reply_markup(results_keyboard())
                    .await?;
            }
            Ok(())
        }
        // A duplicate tap on a button that is already gone; nothing to redo.
        Err(QuizError::AlreadyAnswered) => Ok(()),
        Err(QuizError::NoActiveSession) => edit_or_send(bot, q, SESSION_ENDED, None).await,
        Err(e) => {
            tracing::error!(user_id, "failed to process answer: {e}");
            edit_or_send(bot, q, "Something went wrong. Please try again.", None).await
        }
    }
}

pub(crate) async fn next_question<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    engine: &Arc<QuizEngine<S>>,
) -> HandlerResult {
    let user_id = q.from.id.0 as i64;

    match engine.next_question(user_id) {
        Ok(view) => {
            edit_or_send(
                bot,
                q,
                &render_question(&view),
                Some(answers_keyboard(&view.options)),
            )
            .await
        }
        Err(QuizError::NoActiveSession) => edit_or_send(bot, q, SESSION_ENDED, None).await,
        Err(e) => {
            tracing::error!(user_id, "failed to advance quiz: {e}");
            edit_or_send(bot, q, "Something went wrong. Please try again.", None).await
        }
    }
}

/// "Restart" on the result screen: an explicit fresh start with the
/// memoized quiz and category.
#[instrument(level = "info", skip(bot, q, engine, store))]
pub(crate) async fn restart<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    engine: &Arc<QuizEngine<S>>,
    store: &Arc<S>,
) -> HandlerResult {
    let profile = profile_from_user(&q.from);
    let db_user_id = store.get_or_create_user(&profile).await?;
    let settings = store.user_settings(db_user_id).await?;

    match (settings.last_quiz, settings.last_category) {
        (Some(quiz_name), Some(category)) => {
            begin_quiz(bot, q, engine, store, &category, &quiz_name).await
        }
        _ => edit_or_send(bot, q, "Nothing to restart yet. Pick a quiz first.", None).await,
    }
}

/// "Back to tests" abandons any running session before showing the list.
pub(crate) async fn list_tests<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    engine: &Arc<QuizEngine<S>>,
) -> HandlerResult {
    engine.abandon(q.from.id.0 as i64);
    menus::tests_menu(bot, q, engine.catalog()).await
}

pub(crate) async fn to_main_menu<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    engine: &Arc<QuizEngine<S>>,
) -> HandlerResult {
    engine.abandon(q.from.id.0 as i64);
    menus::main_menu(bot, q).await
}

/// Delivers engine notices that have no incoming update to reply to, i.e.
/// "time's up" results raised by session timers.
pub async fn notice_loop(bot: Bot, mut notices: mpsc::UnboundedReceiver<QuizNotice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            QuizNotice::TimedOut { chat_id, result } => {
                if let Err(e) = bot
                    .send_message(ChatId(chat_id), render_result(&result))
                    .reply_markup(results_keyboard())
                    .await
                {
                    tracing::error!(chat_id, "failed to deliver time's-up message: {e}");
                }
            }
        }
    }
}

pub(crate) fn split_remaining(seconds: u64) -> (u64, u64) {
    (seconds / 60, seconds % 60)
}

fn remaining_line(remaining_seconds: Option<u64>) -> String {
    match remaining_seconds {
        Some(seconds) => {
            let (minutes, seconds) = split_remaining(seconds);
            format!("⏱ Time remaining: {minutes}:{seconds:02}\n\n")
        }
        None => String::new(),
    }
}

pub(crate) fn render_question(view: &QuestionView) -> String {
    let mut text = remaining_line(view.remaining_seconds);
    text.push_str(&format!("📝 Q{}. {}\n\n", view.index + 1, view.prompt));
    for option in &view.options {
        text.push_str(&format!("{option}\n\n"));
    }
    text.trim_end().to_owned()
}

pub(crate) fn render_review(review: &AnswerReview) -> String {
    let mut text = format!("📝 {}\n\n", review.prompt);
    for option in &review.options {
        let mark = if option.key() == review.correct_key {
            " ✅"
        } else if option.key() == review.selected_key {
            " ❌"
        } else {
            ""
        };
        text.push_str(&format!("{option}{mark}\n\n"));
    }

    if let Some(explanation) = &review.explanation {
        text.push_str(explanation);
    }

    text.trim_end().to_owned()
}

pub(crate) fn render_result(result: &FinishedQuiz) -> String {
    let mut text = String::new();
    if result.timed_out {
        text.push_str("⏰ Time's up!\n");
    }
    text.push_str(&format!(
        "You answered {} of {} questions correctly.\n",
        result.correct_count, result.total_questions
    ));
    text.push_str(&format!("Success rate: {:.2}%\n", result.success_rate));
    text.push_str(if result.passed {
        "🎉 You passed!"
    } else {
        "❌ You failed. Try again!"
    });
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::quiz::OptionRecord;

    #[test]
    fn splits_remaining_into_minutes_and_seconds() {
        assert_eq!(split_remaining(299), (4, 59));
        assert_eq!(split_remaining(60), (1, 0));
        assert_eq!(split_remaining(7), (0, 7));
        assert_eq!(split_remaining(0), (0, 0));
    }

    #[test]
    fn question_shows_timer_and_numbering() {
        let view = QuestionView {
            index: 1,
            total: 5,
            prompt: "Capital of France?".into(),
            options: vec![OptionRecord::parse("A: Paris"), OptionRecord::parse("B: London")],
            remaining_seconds: Some(125),
        };

        let text = render_question(&view);
        assert!(text.starts_with("⏱ Time remaining: 2:05"));
        assert!(text.contains("Q2. Capital of France?"));
        assert!(text.contains("A: Paris"));
        assert!(text.contains("B: London"));
    }

    #[test]
    fn question_without_timer_has_no_remaining_line() {
        let view = QuestionView {
            index: 0,
            total: 1,
            prompt: "Q?".into(),
            options: vec![OptionRecord::parse("A: yes")],
            remaining_seconds: None,
        };
        assert!(render_question(&view).starts_with("📝 Q1. Q?"));
    }

    #[test]
    fn review_marks_correct_and_wrong_picks() {
        let review = AnswerReview {
            prompt: "Capital of France?".into(),
            options: vec![OptionRecord::parse("A: Paris"), OptionRecord::parse("B: London")],
            selected_key: "B".into(),
            correct_key: "A".into(),
            is_correct: false,
            explanation: Some("Paris is the capital.".into()),
        };

        let text = render_review(&review);
        assert!(text.contains("A: Paris ✅"));
        assert!(text.contains("B: London ❌"));
        assert!(text.ends_with("Paris is the capital."));
    }

    #[test]
    fn correct_pick_is_marked_once() {
        let review = AnswerReview {
            prompt: "Q".into(),
            options: vec![OptionRecord::parse("A: yes"), OptionRecord::parse("B: no")],
            selected_key: "A".into(),
            correct_key: "A".into(),
            is_correct: true,
            explanation: None,
        };

        let text = render_review(&review);
        assert!(text.contains("A: yes ✅"));
        assert!(!text.contains("❌"));
    }

    #[test]
    fn result_formats_rate_to_two_decimals() {
        let result = FinishedQuiz {
            quiz_name: "sample".into(),
            correct_count: 2,
            total_questions: 3,
            success_rate: 2.0 / 3.0 * 100.0,
            passed: false,
            timed_out: false,
        };

        let text = render_result(&result);
        assert!(text.contains("You answered 2 of 3 questions correctly."));
        assert!(text.contains("Success rate: 66.67%"));
        assert!(text.contains("You failed"));
    }

    #[test]
    fn timed_out_result_is_prefixed() {
        let result = FinishedQuiz {
            quiz_name: "sample".into(),
            correct_count: 0,
            total_questions: 5,
            success_rate: 0.0,
            passed: false,
            timed_out: true,
        };
        assert!(render_result(&result).starts_with("⏰ Time's up!"));
    }
}
