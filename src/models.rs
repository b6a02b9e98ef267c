use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Question identifier as it appears in the question and answer files.
///
/// Benchmarks use either integers (`81`) or structured strings
/// (`exam1_q_1`). Integers sort numerically and come before strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuestionId {
    Int(i64),
    Str(String),
}

impl Ord for QuestionId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (QuestionId::Int(a), QuestionId::Int(b)) => a.cmp(b),
            (QuestionId::Str(a), QuestionId::Str(b)) => a.cmp(b),
            (QuestionId::Int(_), QuestionId::Str(_)) => Ordering::Less,
            (QuestionId::Str(_), QuestionId::Int(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for QuestionId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionId::Int(id) => write!(f, "{}", id),
            QuestionId::Str(id) => f.write_str(id),
        }
    }
}

impl From<&str> for QuestionId {
    fn from(id: &str) -> Self {
        QuestionId::Str(id.to_string())
    }
}

impl From<i64> for QuestionId {
    fn from(id: i64) -> Self {
        QuestionId::Int(id)
    }
}

/// A benchmark question with one prompt per turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub question_id: QuestionId,
    pub category: String,
    pub turns: Vec<String>,
    /// Sampling temperature the question insists on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_temperature: Option<f64>,
    /// Shared context (e.g. an exam statement) placed before the first turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
}

/// One independent sample over all turns of a question
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub index: usize,
    pub turns: Vec<String>,
}

/// Generated answer record, one line in the answer file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: QuestionId,
    pub answer_id: String,
    pub model_id: String,
    pub choices: Vec<Choice>,
    /// Generation time in fractional UNIX seconds
    pub tstamp: f64,
}

/// Score value judges write when grading failed
pub const INVALID_SCORE: f64 = -1.0;

/// Single-answer grading result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentSingle {
    pub question_id: QuestionId,
    pub model: String,
    pub score: f64,
    pub turn: u32,
}

impl JudgmentSingle {
    /// Whether the judge produced a usable score
    pub fn is_valid_score(&self) -> bool {
        self.score != INVALID_SCORE
    }
}

/// Verdict of one pairwise judgment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    #[serde(rename = "model_1")]
    Model1,
    #[serde(rename = "model_2")]
    Model2,
    Tie,
    Error,
}

/// Pairwise grading result.
///
/// `g1_winner` comes from the original order, `g2_winner` from the swapped
/// order and is already expressed in the original labelling, so both name
/// the same physical model when the judge is consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentPair {
    pub question_id: QuestionId,
    pub model_1: String,
    pub model_2: String,
    pub g1_winner: Winner,
    pub g2_winner: Winner,
}

impl JudgmentPair {
    pub fn has_error(&self) -> bool {
        self.g1_winner == Winner::Error || self.g2_winner == Winner::Error
    }

    pub fn involves(&self, model: &str) -> bool {
        self.model_1 == model || self.model_2 == model
    }
}
