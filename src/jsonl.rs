use crate::models::{JudgmentPair, JudgmentSingle, Question, QuestionId};
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a judgment line was quarantined
#[derive(Debug, Error)]
pub enum JudgmentError {
    #[error("malformed record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid record: {0}")]
    Invalid(String),
}

/// A judgment kind that can be checked after parsing
pub trait JudgmentRecord: DeserializeOwned {
    fn validate(&self) -> Result<(), JudgmentError>;
}

impl JudgmentRecord for JudgmentSingle {
    fn validate(&self) -> Result<(), JudgmentError> {
        if !self.score.is_finite() {
            return Err(JudgmentError::Invalid(format!(
                "score {} is not a finite number",
                self.score
            )));
        }
        if self.turn == 0 {
            return Err(JudgmentError::Invalid("turn numbers start at 1".to_string()));
        }
        Ok(())
    }
}

impl JudgmentRecord for JudgmentPair {
    fn validate(&self) -> Result<(), JudgmentError> {
        if self.model_1 == self.model_2 {
            return Err(JudgmentError::Invalid(format!(
                "model {} compared against itself",
                self.model_1
            )));
        }
        Ok(())
    }
}

/// Parsed judgments plus the count of lines that were set aside
#[derive(Debug)]
pub struct Ingested<T> {
    pub records: Vec<T>,
    pub rejected: usize,
}

/// Load questions, keeping the `[begin, end)` slice and folding statements into the first turn
pub fn load_questions(path: &Path, begin: Option<usize>, end: Option<usize>) -> Result<Vec<Question>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read question file: {}", path.display()))?;

    let mut questions = Vec::new();
    for (line_index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let question: Question = serde_json::from_str(line).with_context(|| {
            format!("Failed to parse question on line {} of {}", line_index + 1, path.display())
        })?;
        questions.push(question);
    }

    let end = end.unwrap_or(questions.len()).min(questions.len());
    let begin = begin.unwrap_or(0).min(end);
    let mut questions: Vec<Question> = questions.drain(begin..end).collect();

    for question in &mut questions {
        if let (Some(statement), Some(first_turn)) = (&question.statement, question.turns.first_mut()) {
            *first_turn = format!("{}\n{}", statement, first_turn);
        }
    }

    Ok(questions)
}

/// Append one record as a single JSON line, creating parent directories.
///
/// The whole line is handed to one blocking `write_all` on an `O_APPEND`
/// handle, so concurrent writers never interleave partial lines.
pub async fn append_record<T: Serialize>(path: &Path, record: &T) -> Result<()> {
    let mut line = serde_json::to_vec(record).context("Failed to serialize record")?;
    line.push(b'\n');

    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || append_line(&path, &line))
        .await
        .context("Append task panicked")?
}

fn append_line(path: &Path, line: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open answer file: {}", path.display()))?;
    file.write_all(line)
        .with_context(|| format!("Failed to append to: {}", path.display()))?;

    Ok(())
}

#[derive(serde::Deserialize)]
struct IdOnly {
    question_id: QuestionId,
}

/// Deduplicate an answer file by question id (last write wins) and sort it
pub fn reorg_answer_file(path: &Path) -> Result<usize> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read answer file: {}", path.display()))?;

    let mut answers: BTreeMap<QuestionId, &str> = BTreeMap::new();
    for (line_index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: IdOnly = serde_json::from_str(line).with_context(|| {
            format!("Failed to parse answer on line {} of {}", line_index + 1, path.display())
        })?;
        answers.insert(record.question_id, line);
    }

    let mut output = String::with_capacity(content.len());
    for line in answers.values() {
        output.push_str(line);
        output.push('\n');
    }

    std::fs::write(path, output)
        .with_context(|| format!("Failed to write answer file: {}", path.display()))?;
    debug!(path = %path.display(), answers = answers.len(), "answer file reorganized");

    Ok(answers.len())
}

/// Load typed judgments, quarantining lines that fail to parse or validate
pub fn load_judgments<T: JudgmentRecord>(path: &Path) -> Result<Ingested<T>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read judgment file: {}", path.display()))?;
    Ok(parse_judgments(&content))
}

pub fn parse_judgments<T: JudgmentRecord>(content: &str) -> Ingested<T> {
    let mut records = Vec::new();
    let mut rejected = 0;

    for (line_index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let parsed = serde_json::from_str::<T>(line)
            .map_err(JudgmentError::from)
            .and_then(|record| record.validate().map(|_| record));
        match parsed {
            Ok(record) => records.push(record),
            Err(err) => {
                rejected += 1;
                warn!(line = line_index + 1, error = %err, "skipping judgment");
            }
        }
    }

    Ingested { records, rejected }
}
