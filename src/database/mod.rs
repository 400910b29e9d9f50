pub mod connection;

pub use connection::{
    AttemptStore, AttemptSummary, Connection, QuizStore, SettingsPatch, SettingsStore, StoreError,
    TelegramProfile, UserSettings, UserStats, UserStore,
};
