use thiserror::Error;

/// Errors surfaced by the quiz catalog and the session engine.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuizError {
    #[error("category '{0}' not found")]
    CategoryNotFound(String),

    #[error("quiz '{0}' not found")]
    QuizNotFound(String),

    #[error("quiz '{name}' is malformed: {reason}")]
    MalformedQuiz { name: String, reason: String },

    #[error("no active quiz session")]
    NoActiveSession,

    #[error("current question was already answered")]
    AlreadyAnswered,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
