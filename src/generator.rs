use crate::completion::{CompletionClient, CompletionRequest};
use crate::config::GenerationConfig;
use crate::conversation::Conversation;
use crate::jsonl::{append_record, reorg_answer_file};
use crate::models::{Answer, Choice, Question};
use anyhow::{Context, Result};
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Outcome of a generation run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub completed: usize,
    /// Records left in the answer file after reorganization
    pub canonical_answers: usize,
}

/// Generates answers for benchmark questions and appends them to an answer file
pub struct AnswerGenerator<C> {
    client: Arc<C>,
    config: Arc<GenerationConfig>,
    progress: ProgressBar,
}

impl<C> Clone for AnswerGenerator<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            config: Arc::clone(&self.config),
            progress: self.progress.clone(),
        }
    }
}

impl<C: CompletionClient + 'static> AnswerGenerator<C> {
    pub fn new(client: C, config: GenerationConfig) -> Self {
        Self {
            client: Arc::new(client),
            config: Arc::new(config),
            progress: ProgressBar::hidden(),
        }
    }

    /// Draw a progress bar on stderr while `run` drains the pool
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        if show_progress {
            let progress = ProgressBar::new(0);
            if let Ok(style) =
                ProgressStyle::with_template("{bar:40} {pos}/{len} [{elapsed_precise}<{eta_precise}]")
            {
                progress.set_style(style);
            }
            self.progress = progress;
        }
        self
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Generate every choice for one question.
    ///
    /// Turns inside a choice run in order because each prompt carries the
    /// earlier replies. Any failed call fails the whole answer.
    pub async fn generate_answer(&self, question: &Question) -> Result<Answer> {
        let temperature = self.config.temperature_for(question)?;
        let mut choices = Vec::with_capacity(self.config.num_choices);

        for index in 0..self.config.num_choices {
            let mut conversation = Conversation::default();
            let mut turns = Vec::with_capacity(question.turns.len());

            for (turn_index, prompt) in question.turns.iter().enumerate() {
                conversation = conversation.with_user_turn(prompt.as_str()).with_pending_reply();

                let request = CompletionRequest {
                    model: &self.config.model,
                    conversation: &conversation,
                    temperature,
                    max_tokens: self.config.max_tokens,
                };
                let output = self.client.complete(&request).await.with_context(|| {
                    format!(
                        "Failed to generate turn {} of choice {} for question {}",
                        turn_index + 1,
                        index,
                        question.question_id
                    )
                })?;

                conversation = conversation.with_reply(output.as_str());
                turns.push(output);
            }

            choices.push(Choice { index, turns });
        }

        Ok(Answer {
            question_id: question.question_id.clone(),
            answer_id: Uuid::new_v4().simple().to_string(),
            model_id: self.config.model.clone(),
            choices,
            tstamp: Utc::now().timestamp_micros() as f64 / 1_000_000.0,
        })
    }

    /// Generate an answer and append it; nothing is written when generation fails
    pub async fn answer_question(&self, question: &Question, answer_file: &Path) -> Result<()> {
        let answer = self.generate_answer(question).await?;
        append_record(answer_file, &answer).await?;
        debug!(question_id = %question.question_id, "answer written");
        Ok(())
    }

    /// Answer all questions with at most `parallel` in flight, then canonicalize the file.
    ///
    /// Failed questions do not stop the others. They are reported together
    /// once every task has finished.
    pub async fn run(&self, questions: Vec<Question>, answer_file: &Path) -> Result<RunSummary> {
        self.config.validate(&questions)?;

        let total = questions.len();
        let semaphore = Arc::new(Semaphore::new(self.config.parallel));
        let mut join_set = JoinSet::new();
        let mut pending = HashMap::with_capacity(total);
        self.progress.set_length(total as u64);
        self.progress.set_position(0);

        info!(
            model = %self.config.model,
            questions = total,
            parallel = self.config.parallel,
            "starting answer generation"
        );

        // Tasks take their permit inside, so finished results drain while others wait
        for question in questions {
            let semaphore = Arc::clone(&semaphore);
            let generator = self.clone();
            let answer_file: PathBuf = answer_file.to_path_buf();
            let question_id = question.question_id.clone();
            let handle = join_set.spawn(async move {
                match semaphore.acquire_owned().await {
                    Ok(_permit) => generator.answer_question(&question, &answer_file).await,
                    Err(err) => Err(anyhow::Error::new(err).context("Worker pool closed")),
                }
            });
            pending.insert(handle.id(), question_id);
        }

        let mut completed = 0;
        let mut failed = Vec::new();
        while let Some(joined) = join_set.join_next_with_id().await {
            self.progress.inc(1);
            let (task_id, result) = match joined {
                Ok((task_id, result)) => (task_id, result),
                Err(join_error) => (
                    join_error.id(),
                    Err(anyhow::anyhow!("generation task aborted: {}", join_error)),
                ),
            };
            let question_id = match pending.remove(&task_id) {
                Some(question_id) => question_id.to_string(),
                None => format!("<task {}>", task_id),
            };
            match result {
                Ok(()) => completed += 1,
                Err(err) => {
                    error!(question_id = %question_id, error = %format!("{:#}", err), "question failed");
                    failed.push(question_id);
                }
            }
        }
        self.progress.finish_and_clear();

        let canonical_answers = if answer_file.exists() {
            reorg_answer_file(answer_file)?
        } else {
            0
        };

        if !failed.is_empty() {
            failed.sort();
            anyhow::bail!(
                "{} of {} questions failed: {}",
                failed.len(),
                total,
                failed.join(", ")
            );
        }

        info!(completed, canonical_answers, "answer generation finished");
        Ok(RunSummary {
            completed,
            canonical_answers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::Role;
    use crate::models::QuestionId;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Replies with the last prompt and the number of messages seen
    struct EchoClient {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        temperatures: Mutex<Vec<f64>>,
        conversations: Mutex<Vec<Conversation>>,
        fail_on: Option<String>,
        panic_on: Option<String>,
        /// Calls for this prompt wait until the gate hands out a permit
        hold_on: Option<(String, Arc<Semaphore>)>,
    }

    impl EchoClient {
        fn new() -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                temperatures: Mutex::new(Vec::new()),
                conversations: Mutex::new(Vec::new()),
                fail_on: None,
                panic_on: None,
                hold_on: None,
            }
        }

        fn failing_on(prompt: &str) -> Self {
            Self {
                fail_on: Some(prompt.to_string()),
                ..Self::new()
            }
        }
    }

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(&self, request: &CompletionRequest<'_>) -> Result<String> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            self.temperatures.lock().unwrap().push(request.temperature);
            self.conversations
                .lock()
                .unwrap()
                .push(request.conversation.clone());

            let messages = request.conversation.messages();
            let last_prompt = messages
                .iter()
                .rev()
                .find(|m| m.role == Role::User)
                .and_then(|m| m.content.clone())
                .unwrap_or_default();

            if let Some((prompt, gate)) = &self.hold_on {
                if *prompt == last_prompt {
                    let _released = gate.acquire().await?;
                }
            }
            if self.panic_on.as_deref() == Some(last_prompt.as_str()) {
                panic!("client crashed");
            }
            if self.fail_on.as_deref() == Some(last_prompt.as_str()) {
                anyhow::bail!("upstream error");
            }
            Ok(format!("{}#{}", last_prompt, messages.len()))
        }
    }

    fn question(id: &str, turns: &[&str]) -> Question {
        Question {
            question_id: QuestionId::from(id),
            category: "writing".to_string(),
            turns: turns.iter().map(|t| t.to_string()).collect(),
            required_temperature: None,
            statement: None,
        }
    }

    fn sorted_ids(questions: &[Question]) -> Vec<QuestionId> {
        let mut ids: Vec<QuestionId> = questions.iter().map(|q| q.question_id.clone()).collect();
        ids.sort();
        ids
    }

    fn read_answers(path: &Path) -> Vec<Answer> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_turns_carry_previous_replies() {
        let mut config = GenerationConfig::new("test-model");
        config.num_choices = 2;
        let generator = AnswerGenerator::new(EchoClient::new(), config);

        let answer = generator
            .generate_answer(&question("q1", &["First", "Second"]))
            .await
            .unwrap();

        assert_eq!(answer.model_id, "test-model");
        assert_eq!(answer.choices.len(), 2);
        assert_eq!(answer.choices[1].index, 1);
        assert_eq!(answer.choices[0].turns, vec!["First#2", "Second#4"]);

        let conversations = generator.client.conversations.lock().unwrap();
        let second_turn = &conversations[1];
        assert_eq!(second_turn.messages()[1].content.as_deref(), Some("First#2"));
        assert_eq!(second_turn.messages()[3].content, None);
        // Each choice starts from a fresh conversation
        assert_eq!(conversations[2].messages().len(), 2);
    }

    #[tokio::test]
    async fn test_temperature_resolution_per_question() {
        let generator = AnswerGenerator::new(EchoClient::new(), GenerationConfig::new("m"));

        let mut math = question("q1", &["1+1"]);
        math.category = "math".to_string();
        let mut required = question("q2", &["hi"]);
        required.required_temperature = Some(0.42);

        generator.generate_answer(&math).await.unwrap();
        generator.generate_answer(&required).await.unwrap();
        generator.generate_answer(&question("q3", &["x"])).await.unwrap();

        let temperatures = generator.client.temperatures.lock().unwrap().clone();
        assert_eq!(temperatures, vec![0.0, 0.42, 0.7]);
    }

    #[tokio::test]
    async fn test_failed_answer_is_not_written() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("answers.jsonl");
        let generator = AnswerGenerator::new(EchoClient::failing_on("Second"), GenerationConfig::new("m"));

        let result = generator
            .answer_question(&question("q1", &["First", "Second"]), &path)
            .await;

        assert!(result.is_err());
        assert!(format!("{:#}", result.unwrap_err()).contains("turn 2"));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_run_is_independent_of_parallelism() {
        let questions: Vec<Question> = (0..8)
            .map(|i| question(&format!("q_{}", i), &["a", "b"]))
            .collect();
        let temp_dir = tempdir().unwrap();

        let mut outputs = Vec::new();
        for parallel in [1, 4, questions.len()] {
            let path = temp_dir.path().join(format!("answers_{}.jsonl", parallel));
            let mut config = GenerationConfig::new("m");
            config.parallel = parallel;
            let generator = AnswerGenerator::new(EchoClient::new(), config);

            let summary = generator.run(questions.clone(), &path).await.unwrap();
            assert_eq!(summary.completed, 8);
            assert_eq!(summary.canonical_answers, 8);
            let max_in_flight = generator.client.max_in_flight.load(Ordering::SeqCst);
            assert!(max_in_flight <= parallel);
            if parallel > 1 {
                assert!(max_in_flight > 1);
            }

            let answers = read_answers(&path);
            let ids: Vec<QuestionId> = answers.iter().map(|a| a.question_id.clone()).collect();
            assert_eq!(ids, sorted_ids(&questions));
            outputs.push(
                answers
                    .into_iter()
                    .map(|a| (a.question_id, a.choices))
                    .collect::<Vec<_>>(),
            );
        }

        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
    }

    #[tokio::test]
    async fn test_run_reports_failures_after_draining() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("answers.jsonl");
        let mut config = GenerationConfig::new("m");
        config.parallel = 2;
        let generator = AnswerGenerator::new(EchoClient::failing_on("boom"), config);

        let questions = vec![
            question("q_1", &["ok"]),
            question("q_2", &["boom"]),
            question("q_3", &["ok"]),
        ];
        let err = generator.run(questions, &path).await.unwrap_err();

        assert!(err.to_string().contains("1 of 3 questions failed: q_2"));
        let answers = read_answers(&path);
        assert_eq!(answers.len(), 2);
    }

    #[tokio::test]
    async fn test_panicked_task_is_reported_by_question() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("answers.jsonl");
        let client = EchoClient {
            panic_on: Some("crash".to_string()),
            ..EchoClient::new()
        };
        let generator = AnswerGenerator::new(client, GenerationConfig::new("m"));

        let questions = vec![question("q_1", &["ok"]), question("q_2", &["crash"])];
        let err = generator.run(questions, &path).await.unwrap_err();

        assert!(err.to_string().contains("1 of 2 questions failed: q_2"));
        assert_eq!(read_answers(&path).len(), 1);
    }

    #[tokio::test]
    async fn test_results_drain_while_questions_wait_for_workers() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("answers.jsonl");
        let gate = Arc::new(Semaphore::new(0));
        let client = EchoClient {
            hold_on: Some(("slow".to_string(), Arc::clone(&gate))),
            ..EchoClient::new()
        };
        let mut config = GenerationConfig::new("m");
        config.parallel = 2;
        let generator = AnswerGenerator::new(client, config);

        // Both workers end up blocked on slow questions while q_4 still waits
        let questions = vec![
            question("q_1", &["slow"]),
            question("q_2", &["fast"]),
            question("q_3", &["slow"]),
            question("q_4", &["fast"]),
        ];
        let runner = generator.clone();
        let run = tokio::spawn(async move { runner.run(questions, &path).await });

        tokio::time::timeout(Duration::from_secs(5), async {
            while generator.progress.position() < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("finished question was not drained while others were blocked");

        gate.add_permits(2);
        let summary = run.await.unwrap().unwrap();
        assert_eq!(summary.completed, 4);
        assert_eq!(generator.progress.position(), 4);
    }

    #[tokio::test]
    async fn test_run_rejects_conflicting_temperature_before_work() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("answers.jsonl");
        let mut config = GenerationConfig::new("m");
        config.force_temperature = Some(0.0);
        let generator = AnswerGenerator::new(EchoClient::new(), config);

        let mut conflicting = question("q_1", &["a"]);
        conflicting.required_temperature = Some(1.0);
        let result = generator.run(vec![question("q_0", &["a"]), conflicting], &path).await;

        assert!(result.is_err());
        assert!(generator.client.conversations.lock().unwrap().is_empty());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_rerun_keeps_latest_answer() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("answers.jsonl");
        let generator = AnswerGenerator::new(EchoClient::new(), GenerationConfig::new("m"));

        generator.run(vec![question("q_1", &["a"])], &path).await.unwrap();
        let first = read_answers(&path).remove(0);
        generator.run(vec![question("q_1", &["a"])], &path).await.unwrap();
        let answers = read_answers(&path);

        assert_eq!(answers.len(), 1);
        assert_ne!(answers[0].answer_id, first.answer_id);
        assert!(answers[0].tstamp >= first.tstamp);
    }
}
