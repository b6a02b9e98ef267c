use crate::models::{Question, QuestionId};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Temperature used when neither the question nor its category sets one
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Errors detected before any generation work starts
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "question {question_id} requires temperature {required} but a forced temperature of {forced} was given"
    )]
    ConflictingTemperature {
        question_id: QuestionId,
        forced: f64,
        required: f64,
    },

    #[error("environment variable {0} not found")]
    MissingCredential(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Category to sampling temperature lookup
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TemperatureTable {
    /// Fallback for categories missing from the table
    #[serde(default = "default_temperature")]
    pub default: f64,
    #[serde(default)]
    pub categories: HashMap<String, f64>,
}

fn default_temperature() -> f64 {
    DEFAULT_TEMPERATURE
}

impl Default for TemperatureTable {
    fn default() -> Self {
        let categories = [
            ("writing", 0.7),
            ("roleplay", 0.7),
            ("extraction", 0.0),
            ("math", 0.0),
            ("coding", 0.0),
            ("reasoning", 0.0),
            ("stem", 0.1),
            ("humanities", 0.1),
            ("arena-hard-200", 0.0),
        ]
        .into_iter()
        .map(|(category, temperature)| (category.to_string(), temperature))
        .collect();

        Self {
            default: DEFAULT_TEMPERATURE,
            categories,
        }
    }
}

impl TemperatureTable {
    /// Load a table from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read temperature config: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML temperature config: {}", path.display()))
    }

    /// Pick the sampling temperature for a question.
    ///
    /// Precedence: forced override, then the question's required
    /// temperature, then the category table, then the default. A forced
    /// override together with a required temperature is an error.
    pub fn resolve(&self, forced: Option<f64>, question: &Question) -> Result<f64, ConfigError> {
        match (forced, question.required_temperature) {
            (Some(forced), Some(required)) => Err(ConfigError::ConflictingTemperature {
                question_id: question.question_id.clone(),
                forced,
                required,
            }),
            (Some(forced), None) => Ok(forced),
            (None, Some(required)) => Ok(required),
            (None, None) => Ok(self
                .categories
                .get(&question.category)
                .copied()
                .unwrap_or(self.default)),
        }
    }
}

/// Settings shared by every generation task of a run
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,
    pub num_choices: usize,
    pub max_tokens: u32,
    pub force_temperature: Option<f64>,
    /// Number of questions generated concurrently
    pub parallel: usize,
    pub temperatures: TemperatureTable,
}

impl GenerationConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            num_choices: 1,
            max_tokens: 1024,
            force_temperature: None,
            parallel: 1,
            temperatures: TemperatureTable::default(),
        }
    }

    /// Check the settings against the loaded questions before any request is sent
    pub fn validate(&self, questions: &[Question]) -> Result<(), ConfigError> {
        if self.num_choices == 0 {
            return Err(ConfigError::InvalidValue {
                field: "num_choices",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.parallel == 0 {
            return Err(ConfigError::InvalidValue {
                field: "parallel",
                reason: "must be at least 1".to_string(),
            });
        }
        for question in questions {
            self.temperature_for(question)?;
        }
        Ok(())
    }

    pub fn temperature_for(&self, question: &Question) -> Result<f64, ConfigError> {
        self.temperatures.resolve(self.force_temperature, question)
    }
}

/// Benchmark-specific aggregation behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchmarkProfile {
    /// Questions have a second turn worth reporting separately
    pub two_turn: bool,
    /// Question ids group sub-questions into exams
    pub exam: bool,
}

impl BenchmarkProfile {
    pub fn for_bench(bench_name: &str) -> Self {
        Self {
            two_turn: bench_name == "mt_bench",
            exam: bench_name == "oab_bench",
        }
    }
}

/// Well-known file locations under the data directory
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn question_file(&self, bench_name: &str) -> PathBuf {
        self.root.join(bench_name).join("question.jsonl")
    }

    /// Answer file named after the last path segment of the model id
    pub fn answer_file(&self, bench_name: &str, model: &str) -> PathBuf {
        let model_name = model.rsplit('/').next().unwrap_or(model);
        self.root
            .join(bench_name)
            .join("model_answer")
            .join(format!("{}.jsonl", model_name))
    }

    pub fn single_judgment_file(&self, bench_name: &str, judge_model: &str) -> PathBuf {
        self.root
            .join(bench_name)
            .join("model_judgment")
            .join(format!("{}_single.jsonl", judge_model))
    }

    pub fn pair_judgment_file(&self, bench_name: &str, judge_model: &str) -> PathBuf {
        self.root
            .join(bench_name)
            .join("model_judgment")
            .join(format!("{}_pair.jsonl", judge_model))
    }
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new("data")
    }
}
