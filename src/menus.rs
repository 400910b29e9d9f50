use std::sync::Arc;

use teloxide::{
    dispatching::dialogue::GetChatId,
    payloads::{EditMessageTextSetters, SendMessageSetters},
    prelude::Requester,
    types::{CallbackQuery, InlineKeyboardMarkup, User},
    utils::command::BotCommands,
    Bot,
};
use tracing::instrument;

use crate::catalog::source::QuestionSource;
use crate::commands::Command;
use crate::database::connection::{QuizStore, SettingsPatch, TelegramProfile, UserSettings};
use crate::error::QuizError;
use crate::keyboard::{
    categories_keyboard, main_menu_keyboard, questions_count_keyboard, quizzes_keyboard,
    random_keyboard, settings_keyboard, timer_keyboard, timer_limit_keyboard,
};
use crate::HandlerResult;

pub(crate) fn profile_from_user(user: &User) -> TelegramProfile {
    TelegramProfile {
        telegram_id: user.id.0 as i64,
        username: user.username.clone(),
        first_name: Some(user.first_name.clone()),
        last_name: user.last_name.clone(),
    }
}

/// Edits the message behind the callback query, falling back to a fresh
/// message when the original is inaccessible.
pub(crate) async fn edit_or_send(
    bot: &Bot,
    q: &CallbackQuery,
    text: &str,
    markup: Option<InlineKeyboardMarkup>,
) -> HandlerResult {
    let Some(chat_id) = q.chat_id() else {
        return Ok(());
    };

    if let Some(message) = &q.message {
        let edit = bot.edit_message_text(chat_id, message.id(), text);
        match markup {
            Some(markup) => edit.reply_markup(markup).await?,
            None => edit.await?,
        };
    } else {
        let send = bot.send_message(chat_id, text);
        match markup {
            Some(markup) => send.reply_markup(markup).await?,
            None => send.await?,
        };
    }

    Ok(())
}

pub(crate) async fn main_menu(bot: &Bot, q: &CallbackQuery) -> HandlerResult {
    edit_or_send(bot, q, "What do you want to do?", Some(main_menu_keyboard())).await
}

pub(crate) async fn help_screen(bot: &Bot, q: &CallbackQuery) -> HandlerResult {
    edit_or_send(bot, q, &Command::descriptions().to_string(), None).await
}

#[instrument(level = "info", skip(bot, q, source))]
pub(crate) async fn tests_menu(bot: &Bot, q: &CallbackQuery, source: &QuestionSource) -> HandlerResult {
    let categories = match source.list_categories() {
        Ok(categories) => categories,
        Err(e) => {
            tracing::error!("failed to enumerate categories: {e}");
            Vec::new()
        }
    };

    if categories.is_empty() {
        edit_or_send(bot, q, "No quiz categories available yet.", None).await
    } else {
        edit_or_send(
            bot,
            q,
            "Choose a category:",
            Some(categories_keyboard(&categories)),
        )
        .await
    }
}

#[instrument(level = "info", skip(bot, q, source))]
pub(crate) async fn category_menu(
    bot: &Bot,
    q: &CallbackQuery,
    source: &QuestionSource,
    category: &str,
) -> HandlerResult {
    match source.list_quizzes(category) {
        Ok(quizzes) if !quizzes.is_empty() => {
            edit_or_send(
                bot,
                q,
                "Choose a quiz:",
                Some(quizzes_keyboard(category, &quizzes)),
            )
            .await
        }
        Ok(_) => {
            edit_or_send(
                bot,
                q,
                &format!("Category '{category}' has no quizzes yet."),
                None,
            )
            .await
        }
        Err(QuizError::CategoryNotFound(_)) => {
            edit_or_send(bot, q, &format!("Category '{category}' not found."), None).await
        }
        Err(e) => {
            tracing::error!(category, "failed to list quizzes: {e}");
            edit_or_send(bot, q, "Something went wrong. Please try again.", None).await
        }
    }
}

#[instrument(level = "info", skip(bot, q, store))]
pub(crate) async fn settings_menu<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    store: &Arc<S>,
) -> HandlerResult {
    let settings = current_settings(store, q).await;
    edit_or_send(bot, q, "Settings:", Some(settings_keyboard(&settings))).await
}

pub(crate) async fn questions_count_menu(bot: &Bot, q: &CallbackQuery) -> HandlerResult {
    edit_or_send(
        bot,
        q,
        "How many questions per quiz?",
        Some(questions_count_keyboard()),
    )
    .await
}

pub(crate) async fn timer_menu(bot: &Bot, q: &CallbackQuery) -> HandlerResult {
    edit_or_send(bot, q, "Quiz timer:", Some(timer_keyboard())).await
}

pub(crate) async fn timer_limit_menu(bot: &Bot, q: &CallbackQuery) -> HandlerResult {
    edit_or_send(bot, q, "Timer limit (minutes):", Some(timer_limit_keyboard())).await
}

pub(crate) async fn random_menu(bot: &Bot, q: &CallbackQuery) -> HandlerResult {
    edit_or_send(bot, q, "Shuffle questions:", Some(random_keyboard())).await
}

/// Applies one `set:<field>:<value>` selection, writing it through to the
/// settings store, and returns to the settings screen with a confirmation.
#[instrument(level = "info", skip(bot, q, store))]
pub(crate) async fn apply_setting<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    store: &Arc<S>,
    selection: &str,
) -> HandlerResult {
    let (patch, confirmation) = match selection.split_once(':') {
        Some(("qcount", value)) => match value.parse::<u32>() {
            Ok(count) => (
                SettingsPatch {
                    questions_count: Some(count),
                    ..SettingsPatch::default()
                },
                format!("Questions per quiz set to {count}."),
            ),
            Err(_) => return Ok(()),
        },
        Some(("timer", value)) => {
            let enabled = value == "on";
            (
                SettingsPatch {
                    timer_enabled: Some(enabled),
                    ..SettingsPatch::default()
                },
                format!("Timer {}.", if enabled { "enabled" } else { "disabled" }),
            )
        }
        Some(("limit", value)) => match value.parse::<u32>() {
            Ok(limit) => (
                SettingsPatch {
                    timer_limit: Some(limit),
                    ..SettingsPatch::default()
                },
                format!("Timer limit set to {limit} minutes."),
            ),
            Err(_) => return Ok(()),
        },
        Some(("random", value)) => {
            let enabled = value == "on";
            (
                SettingsPatch {
                    questions_random_enabled: Some(enabled),
                    ..SettingsPatch::default()
                },
                format!(
                    "Question shuffling {}.",
                    if enabled { "enabled" } else { "disabled" }
                ),
            )
        }
        _ => {
            tracing::warn!(selection, "unhandled settings selection");
            return Ok(());
        }
    };

    let profile = profile_from_user(&q.from);
    let user_id = store.get_or_create_user(&profile).await?;

    // Write-through; a failed write must not break the menu flow.
    if let Err(e) = store.update_settings(user_id, patch).await {
        tracing::warn!(user_id, "failed to persist settings change: {e}");
    }

    let settings = current_settings(store, q).await;
    edit_or_send(bot, q, &confirmation, Some(settings_keyboard(&settings))).await
}

#[instrument(level = "info", skip(bot, q, store))]
pub(crate) async fn stats_menu<S: QuizStore + 'static>(
    bot: &Bot,
    q: &CallbackQuery,
    store: &Arc<S>,
) -> HandlerResult {
    let profile = profile_from_user(&q.from);
    let user_id = store.get_or_create_user(&profile).await?;
    let stats = store.user_stats(user_id).await?;

    edit_or_send(
        bot,
        q,
        &format!(
            "📊 Your stats\nAttempts: {}\nPassed: {}\nAverage success rate: {:.2}%",
            stats.total_attempts, stats.passed_count, stats.avg_success_rate
        ),
        Some(main_menu_keyboard()),
    )
    .await
}

async fn current_settings<S: QuizStore + 'static>(store: &Arc<S>, q: &CallbackQuery) -> UserSettings {
    let profile = profile_from_user(&q.from);
    match store.get_or_create_user(&profile).await {
        Ok(user_id) => match store.user_settings(user_id).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(user_id, "settings unavailable, showing defaults: {e}");
                UserSettings::default()
            }
        },
        Err(e) => {
            tracing::warn!("user lookup failed, showing default settings: {e}");
            UserSettings::default()
        }
    }
}
