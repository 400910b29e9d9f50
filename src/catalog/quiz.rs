use std::fmt;

use serde::Deserialize;

/// A single multiple-choice option: a short key ("A") and its label text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionRecord {
    key: String,
    label: String,
}

#[derive(Debug, Clone)]
pub struct QuestionRecord {
    prompt: String,
    options: Vec<OptionRecord>,
    correct_key: String,
    explanation: Option<String>,
}

/// A quiz as stored on disk: the full question set, before any selection.
#[derive(Debug, Clone)]
pub struct QuizDefinition {
    name: String,
    category: String,
    questions: Vec<QuestionRecord>,
}

/// On-disk shape of one question inside a quiz file.
#[derive(Debug, Deserialize)]
pub(crate) struct RawQuestion {
    question: String,
    answers: Vec<String>,
    correct_answer: String,
    #[serde(default)]
    explanation: Option<String>,
}

/// Extracts the option key from a raw option string: the part before the
/// first `:`, else before the first `.`, else the whole trimmed string.
pub fn extract_key(option: &str) -> &str {
    if let Some((key, _)) = option.split_once(':') {
        key.trim()
    } else if let Some((key, _)) = option.split_once('.') {
        key.trim()
    } else {
        option.trim()
    }
}

impl OptionRecord {
    pub(crate) fn parse(raw: &str) -> Self {
        let (key, label) = match raw.split_once(':') {
            Some((key, label)) => (key.trim(), label.trim()),
            None => match raw.split_once('.') {
                Some((key, label)) => (key.trim(), label.trim()),
                None => (raw.trim(), raw.trim()),
            },
        };

        Self {
            key: key.to_owned(),
            label: label.to_owned(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Display for OptionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.key == self.label {
            write!(f, "{}", self.label)
        } else {
            write!(f, "{}: {}", self.key, self.label)
        }
    }
}

impl QuestionRecord {
    /// Validates a raw question into a record. Duplicate option keys, a
    /// correct answer matching no option, or an empty option list are data
    /// errors reported as a reason string, never a panic.
    pub(crate) fn from_raw(raw: RawQuestion) -> Result<Self, String> {
        if raw.answers.is_empty() {
            return Err(format!("question '{}' has no answer options", raw.question));
        }

        let options: Vec<OptionRecord> = raw.answers.iter().map(|a| OptionRecord::parse(a)).collect();

        for (i, option) in options.iter().enumerate() {
            if options[..i].iter().any(|other| other.key() == option.key()) {
                return Err(format!(
                    "question '{}' has duplicate option key '{}'",
                    raw.question,
                    option.key()
                ));
            }
        }

        let correct_key = extract_key(&raw.correct_answer).to_owned();
        if !options.iter().any(|o| o.key() == correct_key) {
            return Err(format!(
                "correct answer '{}' of question '{}' does not match any option",
                correct_key, raw.question
            ));
        }

        let explanation = raw
            .explanation
            .map(|e| e.trim().to_owned())
            .filter(|e| !e.is_empty());

        Ok(Self {
            prompt: raw.question,
            options,
            correct_key,
            explanation,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn options(&self) -> &[OptionRecord] {
        &self.options
    }

    pub fn correct_key(&self) -> &str {
        &self.correct_key
    }

    pub fn explanation(&self) -> Option<&str> {
        self.explanation.as_deref()
    }
}

/// Parses the contents of a quiz file into validated question records.
pub(crate) fn parse_questions(data: &str) -> Result<Vec<QuestionRecord>, String> {
    let raw: Vec<RawQuestion> = serde_json::from_str(data).map_err(|e| e.to_string())?;

    if raw.is_empty() {
        return Err("quiz has no questions".to_owned());
    }

    raw.into_iter().map(QuestionRecord::from_raw).collect()
}

impl QuizDefinition {
    pub(crate) fn new(name: String, category: String, questions: Vec<QuestionRecord>) -> Self {
        Self {
            name,
            category,
            questions,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn questions(&self) -> &[QuestionRecord] {
        &self.questions
    }

    pub(crate) fn into_questions(self) -> Vec<QuestionRecord> {
        self.questions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_key_before_colon() {
        assert_eq!(extract_key("A: Paris"), "A");
        assert_eq!(extract_key(" B :  London"), "B");
    }

    #[test]
    fn extracts_key_before_dot_when_no_colon() {
        assert_eq!(extract_key("C. Madrid"), "C");
    }

    #[test]
    fn whole_string_is_key_without_delimiter() {
        assert_eq!(extract_key("  Paris "), "Paris");
    }

    #[test]
    fn key_survives_format_round_trip() {
        let option = OptionRecord::parse("A: Paris");
        assert_eq!(extract_key(&option.to_string()), option.key());
        assert_eq!(option.key(), "A");
        assert_eq!(option.label(), "Paris");
    }

    #[test]
    fn fallback_option_uses_whole_string_as_key_and_label() {
        let option = OptionRecord::parse("Paris");
        assert_eq!(option.key(), "Paris");
        assert_eq!(option.label(), "Paris");
        assert_eq!(option.to_string(), "Paris");
    }

    #[test]
    fn parses_a_valid_quiz_file() {
        let data = r#"[
            {
                "question": "Capital of France?",
                "answers": ["A: Paris", "B: London"],
                "correct_answer": "A: Paris",
                "explanation": "Paris has been the capital since 508."
            }
        ]"#;

        let questions = parse_questions(data).unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].prompt(), "Capital of France?");
        assert_eq!(questions[0].correct_key(), "A");
        assert_eq!(questions[0].options().len(), 2);
        assert!(questions[0].explanation().is_some());
    }

    #[test]
    fn rejects_duplicate_option_keys() {
        let raw = RawQuestion {
            question: "Q".into(),
            answers: vec!["A: one".into(), "A: two".into()],
            correct_answer: "A: one".into(),
            explanation: None,
        };
        let err = QuestionRecord::from_raw(raw).unwrap_err();
        assert!(err.contains("duplicate option key"));
    }

    #[test]
    fn rejects_correct_answer_matching_no_option() {
        let raw = RawQuestion {
            question: "Q".into(),
            answers: vec!["A: one".into(), "B: two".into()],
            correct_answer: "C: three".into(),
            explanation: None,
        };
        let err = QuestionRecord::from_raw(raw).unwrap_err();
        assert!(err.contains("does not match any option"));
    }

    #[test]
    fn rejects_empty_question_set() {
        assert!(parse_questions("[]").is_err());
    }

    #[test]
    fn rejects_unparsable_json() {
        assert!(parse_questions("not json").is_err());
    }

    #[test]
    fn blank_explanation_is_dropped() {
        let raw = RawQuestion {
            question: "Q".into(),
            answers: vec!["A: one".into(), "B: two".into()],
            correct_answer: "A".into(),
            explanation: Some("   ".into()),
        };
        let question = QuestionRecord::from_raw(raw).unwrap();
        assert_eq!(question.explanation(), None);
    }
}
