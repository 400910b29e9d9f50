use std::sync::Arc;

use teloxide::{
    payloads::SendMessageSetters, prelude::Requester, types::Message, utils::command::BotCommands,
    Bot,
};
use tracing::instrument;

use crate::database::connection::{QuizStore, TelegramProfile};
use crate::engine::QuizEngine;
use crate::keyboard::main_menu_keyboard;
use crate::HandlerResult;

#[derive(Debug, Clone, BotCommands)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "show the main menu.")]
    Start,
    #[command(description = "display help.")]
    Help,
    #[command(description = "abandon the current quiz.")]
    Cancel,
    #[command(description = "show your quiz statistics.")]
    Stats,
}

/// Builds the persistence profile from the private chat behind a command.
pub(crate) fn profile_from_chat(msg: &Message) -> TelegramProfile {
    TelegramProfile {
        telegram_id: msg.chat.id.0,
        username: msg.chat.username().map(str::to_owned),
        first_name: msg.chat.first_name().map(str::to_owned),
        last_name: msg.chat.last_name().map(str::to_owned),
    }
}

pub async fn help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, engine, store))]
pub async fn start<S: QuizStore + 'static>(
    bot: Bot,
    msg: Message,
    engine: Arc<QuizEngine<S>>,
    store: Arc<S>,
) -> HandlerResult {
    let profile = profile_from_chat(&msg);
    store.get_or_create_user(&profile).await?;
    engine.abandon(msg.chat.id.0);

    tracing::info!(user_id = msg.chat.id.0, "started bot");
    bot.send_message(msg.chat.id, "Welcome! What do you want to do?")
        .reply_markup(main_menu_keyboard())
        .await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, engine))]
pub async fn cancel<S: QuizStore + 'static>(
    bot: Bot,
    msg: Message,
    engine: Arc<QuizEngine<S>>,
) -> HandlerResult {
    let text = if engine.abandon(msg.chat.id.0) {
        "Quiz abandoned."
    } else {
        "Nothing to cancel."
    };
    bot.send_message(msg.chat.id, text)
        .reply_markup(main_menu_keyboard())
        .await?;
    Ok(())
}

#[instrument(level = "info", skip(bot, store))]
pub async fn stats<S: QuizStore + 'static>(
    bot: Bot,
    msg: Message,
    store: Arc<S>,
) -> HandlerResult {
    let profile = profile_from_chat(&msg);
    let user_id = store.get_or_create_user(&profile).await?;
    let stats = store.user_stats(user_id).await?;

    bot.send_message(
        msg.chat.id,
        format!(
            "📊 Your stats\nAttempts: {}\nPassed: {}\nAverage success rate: {:.2}%",
            stats.total_attempts, stats.passed_count, stats.avg_success_rate
        ),
    )
    .await?;
    Ok(())
}
