use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

use crate::catalog::quiz::OptionRecord;
use crate::database::connection::UserSettings;

/// Telegram rejects callback data longer than 64 bytes.
const MAX_CALLBACK_LENGTH: usize = 64;

pub(crate) const QUESTION_COUNT_OPTIONS: [u32; 4] = [5, 10, 15, 20];
pub(crate) const TIMER_LIMIT_OPTIONS: [u32; 4] = [1, 5, 10, 15];

fn button(label: impl Into<String>, data: impl Into<String>) -> InlineKeyboardButton {
    let mut data: String = data.into();
    if data.len() > MAX_CALLBACK_LENGTH {
        let mut cut = MAX_CALLBACK_LENGTH;
        while !data.is_char_boundary(cut) {
            cut -= 1;
        }
        data.truncate(cut);
    }
    InlineKeyboardButton::callback(label, data)
}

fn back_row(target: &str) -> Vec<InlineKeyboardButton> {
    vec![button("⬅️ Back", target)]
}

pub(crate) fn main_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("📝 Tests", "tests")],
        vec![button("⚙️ Settings", "settings")],
        vec![button("📊 My stats", "stats")],
        vec![button("ℹ️ Help", "help")],
    ])
}

pub(crate) fn categories_keyboard(categories: &[String]) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = categories
        .iter()
        .map(|category| vec![button(format!("📝 {category}"), format!("cat:{category}"))])
        .collect();
    keyboard.push(back_row("main_menu"));

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn quizzes_keyboard(category: &str, quizzes: &[(String, usize)]) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = quizzes
        .iter()
        .map(|(name, count)| {
            vec![button(
                format!("📝 {name} ({count} questions)"),
                format!("quiz:{category}:{name}"),
            )]
        })
        .collect();
    keyboard.push(back_row("tests"));

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn answers_keyboard(options: &[OptionRecord]) -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = options
        .iter()
        .map(|option| vec![button(option.key(), format!("ans:{}", option.key()))])
        .collect();
    keyboard.push(back_row("list_tests"));

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn next_question_keyboard(next_index: usize, total: usize) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button(
            format!("➡️ Next question ({}/{total})", next_index + 1),
            "next",
        )],
        back_row("list_tests"),
    ])
}

pub(crate) fn results_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("🔁 Restart", "restart")],
        vec![button("⬅️ Back to tests", "list_tests")],
    ])
}

pub(crate) fn settings_keyboard(settings: &UserSettings) -> InlineKeyboardMarkup {
    let on_off = |enabled: bool| if enabled { "enabled" } else { "disabled" };

    InlineKeyboardMarkup::new(vec![
        vec![button(
            format!("🔢 Questions per quiz: {}", settings.questions_count),
            "questions_count",
        )],
        vec![button(
            format!("⏱ Timer: {}", on_off(settings.timer_enabled)),
            "timer_status",
        )],
        vec![button(
            format!("⏳ Timer limit: {} min", settings.timer_limit),
            "timer_limit",
        )],
        vec![button(
            format!("🔀 Shuffle questions: {}", on_off(settings.questions_random_enabled)),
            "questions_random",
        )],
        back_row("main_menu"),
    ])
}

pub(crate) fn questions_count_keyboard() -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = QUESTION_COUNT_OPTIONS
        .iter()
        .map(|count| vec![button(format!("🔢 {count} questions"), format!("set:qcount:{count}"))])
        .collect();
    keyboard.push(back_row("settings"));

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn timer_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("✅ Enable timer", "set:timer:on")],
        vec![button("🚫 Disable timer", "set:timer:off")],
        back_row("settings"),
    ])
}

pub(crate) fn timer_limit_keyboard() -> InlineKeyboardMarkup {
    let mut keyboard: Vec<Vec<InlineKeyboardButton>> = TIMER_LIMIT_OPTIONS
        .iter()
        .map(|limit| vec![button(format!("⏳ {limit} minutes"), format!("set:limit:{limit}"))])
        .collect();
    keyboard.push(back_row("settings"));

    InlineKeyboardMarkup::new(keyboard)
}

pub(crate) fn random_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("✅ Enable shuffling", "set:random:on")],
        vec![button("🚫 Disable shuffling", "set:random:off")],
        back_row("settings"),
    ])
}
