use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateHandler;
use teloxide::error_handlers::IgnoringErrorHandlerSafe;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks::{self, Options};
use tracing::level_filters;
use tracing_subscriber::fmt::format::FmtSpan;
use url::Url;

use quizhostbot::catalog::source::QuestionSource;
use quizhostbot::commands::{self, Command};
use quizhostbot::database::connection::{Connection, UserSettings};
use quizhostbot::engine::{EngineConfig, QuizEngine};
use quizhostbot::{handlers, runner, HandlerResult};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL").unwrap_or("info".into());
    tracing_subscriber::fmt()
        .with_max_level(level_filters::LevelFilter::from_level(
            log_level.parse().expect("LOG_LEVEL can't be parsed."),
        ))
        .json()
        .with_span_events(FmtSpan::ENTER)
        .log_internal_errors(true)
        .with_ansi(true)
        .with_line_number(true)
        .with_target(false)
        .init();

    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/quizhost.db?mode=rwc".into());
    if let Some(path) = database_url.strip_prefix("sqlite:") {
        let path = path.split('?').next().unwrap_or(path);
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).expect("Failed to create database directory.");
            }
        }
    }

    let connection = Arc::new(
        Connection::connect(&database_url, UserSettings::default())
            .await
            .expect("Failed to connect to database."),
    );
    connection
        .run_migrations()
        .await
        .expect("Database migrations failed.");

    let questions_dir = std::env::var("QUESTIONS_DIR").unwrap_or_else(|_| "data/questions".into());
    let success_rate = std::env::var("SUCCESS_RATE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(80);

    let (engine, notices) = QuizEngine::new(
        QuestionSource::new(questions_dir),
        Arc::clone(&connection),
        EngineConfig { success_rate },
    );
    let engine = Arc::new(engine);

    let teloxide_token = std::env::var("TELOXIDE_TOKEN").expect("TELOXIDE_TOKEN should be set.");
    let bot = Bot::new(teloxide_token);
    tracing::info!("Starting bot...");

    tokio::spawn(runner::notice_loop(bot.clone(), notices));

    let webhook_url = std::env::var("WEBHOOK_URL")
        .map(|d| d.parse::<Url>().expect("WEBHOOK_URL can't be parsed."))
        .ok();
    let webhook_addr = std::env::var("WEBHOOK_ADDR")
        .map(|d| d.parse::<SocketAddr>().expect("WEBHOOK_ADDR can't be parsed."))
        .ok();

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![engine, connection])
        .enable_ctrlc_handler()
        .build();

    if let (Some(webhook_url), Some(webhook_addr)) = (webhook_url, webhook_addr) {
        let listener = webhooks::axum(bot, Options::new(webhook_addr, webhook_url))
            .await
            .expect("Failed to build a listener.");
        dispatcher
            .dispatch_with_listener(listener, Arc::new(IgnoringErrorHandlerSafe))
            .await
    } else {
        dispatcher.dispatch().await
    }
}

fn schema() -> UpdateHandler<Box<dyn Error + Send + Sync + 'static>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Help].endpoint(commands::help))
        .branch(case![Command::Start].endpoint(commands::start::<Connection>))
        .branch(case![Command::Cancel].endpoint(commands::cancel::<Connection>))
        .branch(case![Command::Stats].endpoint(commands::stats::<Connection>));

    let message_handler = Update::filter_message()
        .branch(command_handler)
        .endpoint(invalid_input);

    let callback_handler =
        Update::filter_callback_query().endpoint(handlers::dispatch_callback::<Connection>);

    dptree::entry()
        .branch(message_handler)
        .branch(callback_handler)
}

async fn invalid_input(bot: Bot, msg: Message) -> HandlerResult {
    tracing::info!(chat_id = msg.chat.id.0, "invalid input {:?}", msg.text());
    bot.send_message(
        msg.chat.id,
        "I only understand the menu buttons. Enter /start to open the menu.",
    )
    .await?;
    Ok(())
}

