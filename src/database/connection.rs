use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("row not found")]
    NotFound,

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound,
            other => Self::Database(other.to_string()),
        }
    }
}

/// Identity fields of the Telegram account behind an update.
#[derive(Debug, Clone)]
pub struct TelegramProfile {
    pub telegram_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// Per-user quiz preferences plus the last-quiz memo used for restarts.
#[derive(Debug, Clone)]
pub struct UserSettings {
    pub questions_count: u32,
    pub timer_enabled: bool,
    pub timer_limit: u32,
    pub questions_random_enabled: bool,
    pub last_quiz: Option<String>,
    pub last_category: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            questions_count: 5,
            timer_enabled: true,
            timer_limit: 5,
            questions_random_enabled: true,
            last_quiz: None,
            last_category: None,
        }
    }
}

/// Partial settings update; only the present fields are written.
#[derive(Debug, Clone, Default)]
pub struct SettingsPatch {
    pub questions_count: Option<u32>,
    pub timer_enabled: Option<bool>,
    pub timer_limit: Option<u32>,
    pub questions_random_enabled: Option<bool>,
    pub last_quiz: Option<String>,
    pub last_category: Option<String>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.questions_count.is_none()
            && self.timer_enabled.is_none()
            && self.timer_limit.is_none()
            && self.questions_random_enabled.is_none()
            && self.last_quiz.is_none()
            && self.last_category.is_none()
    }
}

/// A finalized session, as recorded for statistics. Produced exactly once
/// per completed or timed-out session, never for abandoned ones.
#[derive(Debug, Clone)]
pub struct AttemptSummary {
    pub user_id: i64,
    pub category: String,
    pub quiz_name: String,
    pub total_questions: u32,
    pub correct_count: u32,
    pub success_rate: f64,
    pub passed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, Default)]
pub struct UserStats {
    pub total_attempts: i64,
    pub passed_count: i64,
    pub avg_success_rate: f64,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns the internal user id for the Telegram account, creating the
    /// user (with default settings) on first contact.
    async fn get_or_create_user(&self, profile: &TelegramProfile) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn user_settings(&self, user_id: i64) -> Result<UserSettings, StoreError>;

    async fn update_settings(&self, user_id: i64, patch: SettingsPatch) -> Result<(), StoreError>;
}

#[async_trait]
pub trait AttemptStore: Send + Sync {
    async fn record_attempt(&self, summary: &AttemptSummary) -> Result<(), StoreError>;

    async fn user_stats(&self, user_id: i64) -> Result<UserStats, StoreError>;
}

/// Everything the engine and handlers need from persistence.
pub trait QuizStore: UserStore + SettingsStore + AttemptStore {}

impl<T: UserStore + SettingsStore + AttemptStore> QuizStore for T {}

pub struct Connection {
    pool: SqlitePool,
    defaults: UserSettings,
}

impl Connection {
    pub async fn connect(database_url: &str, defaults: UserSettings) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(5))
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    sqlx::query("PRAGMA foreign_keys = ON;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA journal_mode = WAL;")
                        .execute(&mut *conn)
                        .await?;
                    sqlx::query("PRAGMA busy_timeout = 5000;")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        Ok(Self { pool, defaults })
    }

    /// Applies pending schema migrations, tracked in `schema_migrations`.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        if !self.is_applied(1).await? {
            self.migration_001_init().await?;
            sqlx::query("INSERT INTO schema_migrations (version) VALUES (1)")
                .execute(&self.pool)
                .await?;
            tracing::info!("applied database migration 1");
        }

        Ok(())
    }

    async fn is_applied(&self, version: i64) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn migration_001_init(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                telegram_id INTEGER UNIQUE NOT NULL,
                username TEXT,
                first_name TEXT,
                last_name TEXT,
                is_active INTEGER DEFAULT 1,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                last_seen_at TIMESTAMP
            )
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS user_settings (
                user_id INTEGER PRIMARY KEY,
                questions_count INTEGER,
                timer_enabled INTEGER,
                timer_limit INTEGER,
                questions_random_enabled INTEGER,
                last_quiz TEXT,
                last_category TEXT,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS quiz_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                category TEXT,
                quiz_name TEXT,
                total_questions INTEGER,
                correct_count INTEGER,
                success_rate REAL,
                passed INTEGER,
                started_at TIMESTAMP,
                finished_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                duration_seconds INTEGER,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_users_telegram_id ON users(telegram_id)")
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS ix_quiz_attempts_user ON quiz_attempts(user_id, finished_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for Connection {
    async fn get_or_create_user(&self, profile: &TelegramProfile) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id FROM users WHERE telegram_id = ?1")
            .bind(profile.telegram_id)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(row) = existing {
            let user_id: i64 = row.try_get("id")?;
            sqlx::query(
                "UPDATE users SET updated_at = CURRENT_TIMESTAMP, last_seen_at = ?1 WHERE id = ?2",
            )
            .bind(Utc::now())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(user_id);
        }

        let user_id = sqlx::query(
            r"
            INSERT INTO users (telegram_id, username, first_name, last_name, last_seen_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(profile.telegram_id)
        .bind(&profile.username)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            r"
            INSERT INTO user_settings (user_id, questions_count, timer_enabled, timer_limit, questions_random_enabled)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
        )
        .bind(user_id)
        .bind(i64::from(self.defaults.questions_count))
        .bind(self.defaults.timer_enabled)
        .bind(i64::from(self.defaults.timer_limit))
        .bind(self.defaults.questions_random_enabled)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::info!(telegram_id = profile.telegram_id, user_id, "registered new user");
        Ok(user_id)
    }
}

#[async_trait]
impl SettingsStore for Connection {
    async fn user_settings(&self, user_id: i64) -> Result<UserSettings, StoreError> {
        let row = sqlx::query(
            r"
            SELECT questions_count, timer_enabled, timer_limit, questions_random_enabled,
                   last_quiz, last_category
            FROM user_settings WHERE user_id = ?1
            ",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(self.defaults.clone());
        };

        let questions_count: Option<i64> = row.try_get("questions_count")?;
        let timer_enabled: Option<bool> = row.try_get("timer_enabled")?;
        let timer_limit: Option<i64> = row.try_get("timer_limit")?;
        let random_enabled: Option<bool> = row.try_get("questions_random_enabled")?;

        Ok(UserSettings {
            questions_count: questions_count
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(self.defaults.questions_count),
            timer_enabled: timer_enabled.unwrap_or(self.defaults.timer_enabled),
            timer_limit: timer_limit
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(self.defaults.timer_limit),
            questions_random_enabled: random_enabled
                .unwrap_or(self.defaults.questions_random_enabled),
            last_quiz: row.try_get("last_quiz")?,
            last_category: row.try_get("last_category")?,
        })
    }

    async fn update_settings(&self, user_id: i64, patch: SettingsPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE user_settings SET ");
        {
            let mut parts = builder.separated(", ");
            if let Some(v) = patch.questions_count {
                parts.push("questions_count = ");
                parts.push_bind_unseparated(i64::from(v));
            }
            if let Some(v) = patch.timer_enabled {
                parts.push("timer_enabled = ");
                parts.push_bind_unseparated(v);
            }
            if let Some(v) = patch.timer_limit {
                parts.push("timer_limit = ");
                parts.push_bind_unseparated(i64::from(v));
            }
            if let Some(v) = patch.questions_random_enabled {
                parts.push("questions_random_enabled = ");
                parts.push_bind_unseparated(v);
            }
            if let Some(v) = patch.last_quiz {
                parts.push("last_quiz = ");
                parts.push_bind_unseparated(v);
            }
            if let Some(v) = patch.last_category {
                parts.push("last_category = ");
                parts.push_bind_unseparated(v);
            }
            parts.push("updated_at = CURRENT_TIMESTAMP");
        }
        builder.push(" WHERE user_id = ").push_bind(user_id);

        builder.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for Connection {
    async fn record_attempt(&self, summary: &AttemptSummary) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO quiz_attempts (
                user_id, category, quiz_name, total_questions, correct_count,
                success_rate, passed, started_at, finished_at, duration_seconds
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
        )
        .bind(summary.user_id)
        .bind(&summary.category)
        .bind(&summary.quiz_name)
        .bind(i64::from(summary.total_questions))
        .bind(i64::from(summary.correct_count))
        .bind(summary.success_rate)
        .bind(summary.passed)
        .bind(summary.started_at)
        .bind(summary.finished_at)
        .bind(summary.duration_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn user_stats(&self, user_id: i64) -> Result<UserStats, StoreError> {
        let row = sqlx::query(
            r"
            SELECT
                COUNT(*) AS total_attempts,
                COALESCE(SUM(CASE WHEN passed THEN 1 ELSE 0 END), 0) AS passed_count,
                COALESCE(AVG(success_rate), 0.0) AS avg_success_rate
            FROM quiz_attempts WHERE user_id = ?1
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let avg: f64 = row.try_get("avg_success_rate")?;
        Ok(UserStats {
            total_attempts: row.try_get("total_attempts")?,
            passed_count: row.try_get("passed_count")?,
            avg_success_rate: (avg * 100.0).round() / 100.0,
        })
    }
}
