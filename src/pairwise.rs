use crate::models::{JudgmentPair, Winner};
use serde::Serialize;
use std::collections::HashMap;

/// Which pairwise judgments take part in the ranking
#[derive(Debug, Clone, Default)]
pub struct PairwiseFilter {
    /// Keep only pairs whose `model_1` is listed
    pub model_list: Option<Vec<String>>,
    /// Keep only pairs involving this model and drop it from the table
    pub baseline: Option<String>,
}

impl PairwiseFilter {
    fn keeps(&self, pair: &JudgmentPair) -> bool {
        if pair.has_error() {
            return false;
        }
        if let Some(models) = &self.model_list {
            if !models.contains(&pair.model_1) {
                return false;
            }
        }
        match &self.baseline {
            Some(baseline) => pair.involves(baseline),
            None => true,
        }
    }
}

/// Result of one retained pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<'a> {
    Tie,
    Decided { winner: &'a str, loser: &'a str },
}

impl<'a> Outcome<'a> {
    /// A forward tie or a verdict that flips when the order is swapped counts as a tie
    pub fn of(pair: &'a JudgmentPair) -> Self {
        if pair.g1_winner == Winner::Tie || pair.g1_winner != pair.g2_winner {
            return Outcome::Tie;
        }
        match pair.g1_winner {
            Winner::Model1 => Outcome::Decided {
                winner: &pair.model_1,
                loser: &pair.model_2,
            },
            Winner::Model2 => Outcome::Decided {
                winner: &pair.model_2,
                loser: &pair.model_1,
            },
            Winner::Tie | Winner::Error => Outcome::Tie,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseRow {
    pub model: String,
    pub win: u32,
    pub loss: u32,
    pub tie: u32,
    pub win_rate: f64,
    pub loss_rate: f64,
    /// Win rate with each tie counted as half a win
    pub win_rate_adjusted: f64,
}

#[derive(Default)]
struct Tally {
    win: u32,
    loss: u32,
    tie: u32,
}

/// Tally wins, losses and ties per model and rank by adjusted win rate
pub fn summarize_pairwise(pairs: &[JudgmentPair], filter: &PairwiseFilter) -> Vec<PairwiseRow> {
    let mut tallies: HashMap<&str, Tally> = HashMap::new();

    for pair in pairs.iter().filter(|pair| filter.keeps(pair)) {
        match Outcome::of(pair) {
            Outcome::Tie => {
                tallies.entry(&pair.model_1).or_default().tie += 1;
                tallies.entry(&pair.model_2).or_default().tie += 1;
            }
            Outcome::Decided { winner, loser } => {
                tallies.entry(winner).or_default().win += 1;
                tallies.entry(loser).or_default().loss += 1;
            }
        }
    }

    if let Some(baseline) = &filter.baseline {
        tallies.remove(baseline.as_str());
    }

    let mut rows: Vec<PairwiseRow> = tallies
        .into_iter()
        .map(|(model, tally)| {
            let total = f64::from(tally.win + tally.loss + tally.tie);
            PairwiseRow {
                model: model.to_string(),
                win: tally.win,
                loss: tally.loss,
                tie: tally.tie,
                win_rate: f64::from(tally.win) / total,
                loss_rate: f64::from(tally.loss) / total,
                win_rate_adjusted: (f64::from(tally.win) + 0.5 * f64::from(tally.tie)) / total,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.win_rate_adjusted
            .total_cmp(&a.win_rate_adjusted)
            .then_with(|| a.model.cmp(&b.model))
    });
    rows
}
