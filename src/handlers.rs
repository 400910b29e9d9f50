use std::sync::Arc;

use teloxide::{prelude::Requester, types::CallbackQuery, Bot};
use tracing::instrument;

use crate::database::connection::QuizStore;
use crate::engine::QuizEngine;
use crate::{menus, runner, HandlerResult};

/// Routes every callback query by its data prefix: menu navigation,
/// settings selections, quiz selection, and in-quiz answers.
#[instrument(level = "debug", skip(bot, q, engine, store), fields(data = ?q.data))]
pub async fn dispatch_callback<S: QuizStore + 'static>(
    bot: Bot,
    q: CallbackQuery,
    engine: Arc<QuizEngine<S>>,
    store: Arc<S>,
) -> HandlerResult {
    bot.answer_callback_query(&q.id).await?;

    let Some(data) = q.data.clone() else {
        return Ok(());
    };

    match data.as_str() {
        "main_menu" => runner::to_main_menu(&bot, &q, &engine).await,
        "tests" | "list_tests" => runner::list_tests(&bot, &q, &engine).await,
        "settings" => menus::settings_menu(&bot, &q, &store).await,
        "stats" => menus::stats_menu(&bot, &q, &store).await,
        "help" => menus::help_screen(&bot, &q).await,
        "restart" => runner::restart(&bot, &q, &engine, &store).await,
        "next" => runner::next_question(&bot, &q, &engine).await,
        "questions_count" => menus::questions_count_menu(&bot, &q).await,
        "timer_status" => menus::timer_menu(&bot, &q).await,
        "timer_limit" => menus::timer_limit_menu(&bot, &q).await,
        "questions_random" => menus::random_menu(&bot, &q).await,
        other => {
            if let Some(category) = other.strip_prefix("cat:") {
                menus::category_menu(&bot, &q, engine.catalog(), category).await
            } else if let Some(rest) = other.strip_prefix("quiz:") {
                match rest.split_once(':') {
                    Some((category, quiz_name)) => {
                        runner::begin_quiz(&bot, &q, &engine, &store, category, quiz_name).await
                    }
                    None => Ok(()),
                }
            } else if let Some(selection) = other.strip_prefix("set:") {
                menus::apply_setting(&bot, &q, &store, selection).await
            } else if let Some(key) = other.strip_prefix("ans:") {
                runner::answer_given(&bot, &q, &engine, key).await
            } else {
                tracing::warn!("unhandled callback data: {other}");
                Ok(())
            }
        }
    }
}
