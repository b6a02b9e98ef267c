use crate::models::{JudgmentSingle, QuestionId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Minimum exam total (out of 10) for a model to pass an exam
pub const PASS_SCORE: f64 = 6.0;

/// Restricts aggregation to a set of models
#[derive(Debug, Clone, Default)]
pub struct ScoreFilter {
    pub model_list: Option<Vec<String>>,
}

impl ScoreFilter {
    pub fn allows(&self, model: &str) -> bool {
        match &self.model_list {
            Some(models) => models.iter().any(|m| m == model),
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelScore {
    pub model: String,
    pub score: f64,
}

/// Mean scores per model, highest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SingleSummary {
    pub turn1: Vec<ModelScore>,
    pub turn2: Option<Vec<ModelScore>>,
    pub average: Option<Vec<ModelScore>>,
}

fn usable<'a>(
    judgments: &'a [JudgmentSingle],
    filter: &'a ScoreFilter,
) -> impl Iterator<Item = &'a JudgmentSingle> + 'a {
    judgments
        .iter()
        .filter(move |j| j.is_valid_score() && filter.allows(&j.model))
}

fn rank(mut scores: Vec<ModelScore>) -> Vec<ModelScore> {
    scores.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.model.cmp(&b.model)));
    scores
}

fn mean_by_model<'a>(judgments: impl Iterator<Item = &'a JudgmentSingle>) -> Vec<ModelScore> {
    let mut totals: HashMap<&str, (f64, usize)> = HashMap::new();
    for judgment in judgments {
        let entry = totals.entry(judgment.model.as_str()).or_insert((0.0, 0));
        entry.0 += judgment.score;
        entry.1 += 1;
    }

    rank(
        totals
            .into_iter()
            .map(|(model, (sum, count))| ModelScore {
                model: model.to_string(),
                score: sum / count as f64,
            })
            .collect(),
    )
}

/// Average scores per model for turn 1 and, on two-turn benchmarks, turn 2 and overall
pub fn summarize_single(
    judgments: &[JudgmentSingle],
    filter: &ScoreFilter,
    two_turn: bool,
) -> SingleSummary {
    let turn1 = mean_by_model(usable(judgments, filter).filter(|j| j.turn == 1));
    if !two_turn {
        return SingleSummary {
            turn1,
            turn2: None,
            average: None,
        };
    }

    SingleSummary {
        turn1,
        turn2: Some(mean_by_model(usable(judgments, filter).filter(|j| j.turn == 2))),
        average: Some(mean_by_model(usable(judgments, filter))),
    }
}

/// Exam a sub-question belongs to: every `_` segment but the last two
pub fn exam_id(question_id: &QuestionId) -> String {
    let id = question_id.to_string();
    let segments: Vec<&str> = id.split('_').collect();
    if segments.len() <= 2 {
        return String::new();
    }
    segments[..segments.len() - 2].join("_")
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamRow {
    pub model: String,
    /// One score per entry of [`ExamTable::questions`]
    pub scores: Vec<f64>,
    pub total: f64,
    pub approved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamTable {
    pub exam: String,
    pub questions: Vec<QuestionId>,
    /// Sorted by total, highest first
    pub rows: Vec<ExamRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approvals {
    pub model: String,
    pub approved: usize,
    pub total_exams: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExamSummary {
    pub exams: Vec<ExamTable>,
    pub approvals: Vec<Approvals>,
    /// Sum over every sub-question of every exam
    pub overall: Vec<ModelScore>,
}

/// Sum sub-question scores into exam totals and count passed exams per model.
///
/// A model without a usable judgment for a sub-question gets 0 for it, so
/// every model is ranked on every exam.
pub fn summarize_exams(judgments: &[JudgmentSingle], filter: &ScoreFilter) -> ExamSummary {
    let mut sums: HashMap<(&QuestionId, &str), f64> = HashMap::new();
    let mut models: BTreeSet<&str> = BTreeSet::new();
    let mut questions: BTreeSet<&QuestionId> = BTreeSet::new();

    for judgment in usable(judgments, filter) {
        *sums
            .entry((&judgment.question_id, judgment.model.as_str()))
            .or_insert(0.0) += judgment.score;
        models.insert(judgment.model.as_str());
        questions.insert(&judgment.question_id);
    }

    let mut by_exam: BTreeMap<String, Vec<&QuestionId>> = BTreeMap::new();
    for question_id in questions {
        by_exam.entry(exam_id(question_id)).or_default().push(question_id);
    }

    let score_of = |question_id: &QuestionId, model: &str| -> f64 {
        sums.get(&(question_id, model)).copied().unwrap_or(0.0)
    };

    let mut approved_counts: BTreeMap<&str, usize> = models.iter().map(|m| (*m, 0)).collect();
    let mut exams = Vec::with_capacity(by_exam.len());

    for (exam, exam_questions) in &by_exam {
        let mut rows: Vec<ExamRow> = models
            .iter()
            .map(|model| {
                let scores: Vec<f64> = exam_questions.iter().map(|q| score_of(q, model)).collect();
                let total: f64 = scores.iter().sum();
                ExamRow {
                    model: model.to_string(),
                    scores,
                    total,
                    approved: total >= PASS_SCORE,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.total.total_cmp(&a.total).then_with(|| a.model.cmp(&b.model)));

        for row in rows.iter().filter(|row| row.approved) {
            if let Some(count) = approved_counts.get_mut(row.model.as_str()) {
                *count += 1;
            }
        }

        exams.push(ExamTable {
            exam: exam.clone(),
            questions: exam_questions.iter().map(|q| (*q).clone()).collect(),
            rows,
        });
    }

    let total_exams = by_exam.len();
    let mut approvals: Vec<Approvals> = approved_counts
        .into_iter()
        .map(|(model, approved)| Approvals {
            model: model.to_string(),
            approved,
            total_exams,
        })
        .collect();
    approvals.sort_by(|a, b| b.approved.cmp(&a.approved).then_with(|| a.model.cmp(&b.model)));

    let overall = rank(
        models
            .iter()
            .map(|model| ModelScore {
                model: model.to_string(),
                score: sums
                    .iter()
                    .filter(|((_, m), _)| m == model)
                    .map(|(_, score)| score)
                    .sum(),
            })
            .collect(),
    );

    ExamSummary {
        exams,
        approvals,
        overall,
    }
}
