pub mod quiz;
pub mod source;

pub use quiz::{extract_key, OptionRecord, QuestionRecord, QuizDefinition};
pub use source::QuestionSource;
