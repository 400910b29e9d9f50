use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::index::sample;
use rand::thread_rng;

use super::quiz::{parse_questions, QuestionRecord, QuizDefinition};
use crate::error::QuizError;

/// Read-only question source: one directory per category, one JSON file per
/// quiz inside it.
#[derive(Debug, Clone)]
pub struct QuestionSource {
    root: PathBuf,
}

impl QuestionSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Enumerates category directories, sorted by name.
    pub fn list_categories(&self) -> Result<Vec<String>, QuizError> {
        let mut categories = Vec::new();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                categories.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        categories.sort();
        Ok(categories)
    }

    /// Enumerates quiz files of a category as `(quiz name, question count)`.
    /// Files that fail to parse are skipped with a warning so one broken
    /// quiz does not hide the rest of the category.
    pub fn list_quizzes(&self, category: &str) -> Result<Vec<(String, usize)>, QuizError> {
        let dir = self.root.join(category);
        if !dir.is_dir() {
            return Err(QuizError::CategoryNotFound(category.to_owned()));
        }

        let mut quizzes = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match fs::read_to_string(&path).map_err(QuizError::from).and_then(|data| {
                parse_questions(&data).map_err(|reason| QuizError::MalformedQuiz {
                    name: name.to_owned(),
                    reason,
                })
            }) {
                Ok(questions) => quizzes.push((name.to_owned(), questions.len())),
                Err(e) => tracing::warn!("skipping unreadable quiz file {}: {e}", path.display()),
            }
        }

        quizzes.sort();
        Ok(quizzes)
    }

    /// Loads a quiz's full question set.
    pub fn load_quiz(&self, quiz_name: &str, category: &str) -> Result<QuizDefinition, QuizError> {
        let dir = self.root.join(category);
        if !dir.is_dir() {
            return Err(QuizError::CategoryNotFound(category.to_owned()));
        }

        let path = dir.join(format!("{quiz_name}.json"));
        if !path.is_file() {
            return Err(QuizError::QuizNotFound(quiz_name.to_owned()));
        }

        let data = fs::read_to_string(&path)?;
        let questions = parse_questions(&data).map_err(|reason| QuizError::MalformedQuiz {
            name: quiz_name.to_owned(),
            reason,
        })?;

        Ok(QuizDefinition::new(
            quiz_name.to_owned(),
            category.to_owned(),
            questions,
        ))
    }

    /// Loads the questions actually presented in a session: the first
    /// `requested_count` in file order, or a random draw of that size without
    /// replacement, kept in draw order.
    pub fn load_selection(
        &self,
        quiz_name: &str,
        category: &str,
        requested_count: usize,
        random_enabled: bool,
    ) -> Result<Vec<QuestionRecord>, QuizError> {
        let definition = self.load_quiz(quiz_name, category)?;
        let total = definition.questions().len();
        let count = requested_count.max(1).min(total);

        if random_enabled {
            let questions = definition.questions();
            let picked = sample(&mut thread_rng(), total, count)
                .into_iter()
                .map(|i| questions[i].clone())
                .collect();
            Ok(picked)
        } else {
            let mut questions = definition.into_questions();
            questions.truncate(count);
            Ok(questions)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;

    fn scratch_root(tag: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        std::env::temp_dir().join(format!(
            "quizhost-source-{tag}-{}-{nanos}",
            std::process::id()
        ))
    }

    fn write_quiz(root: &Path, category: &str, name: &str, questions: usize) {
        let dir = root.join(category);
        fs::create_dir_all(&dir).unwrap();

        let body: Vec<String> = (0..questions)
            .map(|i| {
                format!(
                    r#"{{"question": "Q{i}?", "answers": ["A: yes", "B: no"], "correct_answer": "A: yes"}}"#
                )
            })
            .collect();
        fs::write(
            dir.join(format!("{name}.json")),
            format!("[{}]", body.join(",")),
        )
        .unwrap();
    }

    #[test]
    fn lists_quizzes_with_question_counts() {
        let root = scratch_root("list");
        write_quiz(&root, "networking", "subnets", 3);
        write_quiz(&root, "networking", "routing", 5);

        let source = QuestionSource::new(&root);
        let quizzes = source.list_quizzes("networking").unwrap();
        assert_eq!(
            quizzes,
            vec![("routing".to_owned(), 5), ("subnets".to_owned(), 3)]
        );

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_category_is_not_found() {
        let root = scratch_root("missing");
        fs::create_dir_all(&root).unwrap();

        let source = QuestionSource::new(&root);
        assert!(matches!(
            source.list_quizzes("ghosts"),
            Err(QuizError::CategoryNotFound(_))
        ));
        assert!(matches!(
            source.load_quiz("any", "ghosts"),
            Err(QuizError::CategoryNotFound(_))
        ));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn missing_quiz_is_not_found() {
        let root = scratch_root("noquiz");
        write_quiz(&root, "networking", "subnets", 2);

        let source = QuestionSource::new(&root);
        assert!(matches!(
            source.load_quiz("absent", "networking"),
            Err(QuizError::QuizNotFound(_))
        ));

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn malformed_quiz_is_reported_not_panicked() {
        let root = scratch_root("malformed");
        let dir = root.join("networking");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("broken.json"), "{ not json").unwrap();

        let source = QuestionSource::new(&root);
        assert!(matches!(
            source.load_quiz("broken", "networking"),
            Err(QuizError::MalformedQuiz { .. })
        ));
        // Listing skips the broken file instead of failing the category.
        assert!(source.list_quizzes("networking").unwrap().is_empty());

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn sequential_selection_takes_first_k_in_file_order() {
        let root = scratch_root("seq");
        write_quiz(&root, "networking", "subnets", 10);

        let source = QuestionSource::new(&root);
        let selection = source.load_selection("subnets", "networking", 4, false).unwrap();
        let prompts: Vec<&str> = selection.iter().map(|q| q.prompt()).collect();
        assert_eq!(prompts, vec!["Q0?", "Q1?", "Q2?", "Q3?"]);

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn random_selection_has_exact_size_and_no_duplicates() {
        let root = scratch_root("rand");
        write_quiz(&root, "networking", "subnets", 10);

        let source = QuestionSource::new(&root);
        for _ in 0..20 {
            let selection = source.load_selection("subnets", "networking", 4, true).unwrap();
            assert_eq!(selection.len(), 4);
            let unique: HashSet<&str> = selection.iter().map(|q| q.prompt()).collect();
            assert_eq!(unique.len(), 4);
        }

        fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn requested_count_is_capped_at_quiz_size() {
        let root = scratch_root("cap");
        write_quiz(&root, "networking", "subnets", 3);

        let source = QuestionSource::new(&root);
        assert_eq!(
            source.load_selection("subnets", "networking", 50, false).unwrap().len(),
            3
        );
        assert_eq!(
            source.load_selection("subnets", "networking", 50, true).unwrap().len(),
            3
        );

        fs::remove_dir_all(&root).unwrap();
    }
}
