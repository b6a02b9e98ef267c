use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod completion;
mod config;
mod conversation;
mod generator;
mod jsonl;
mod models;
mod output;
mod pairwise;
mod scoring;

use crate::completion::{OpenAiClient, RetryConfig, RetryingClient};
use crate::config::{BenchmarkProfile, DataLayout, GenerationConfig, TemperatureTable};
use crate::generator::AnswerGenerator;
use crate::jsonl::{Ingested, JudgmentRecord, load_judgments, load_questions};
use crate::models::{JudgmentPair, JudgmentSingle};
use crate::output::{OutputFormat, Report};
use crate::pairwise::{PairwiseFilter, summarize_pairwise};
use crate::scoring::{ScoreFilter, summarize_exams, summarize_single};

/// Generate benchmark answers with a chat model and rank models from judge scores
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output - log every request and file operation
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate answers for a benchmark question set
    GenAnswer(GenAnswerArgs),
    /// Aggregate judgments into ranked tables
    ShowResult(ShowResultArgs),
}

#[derive(clap::Args, Debug)]
struct GenAnswerArgs {
    /// The name of the benchmark question set
    #[arg(long, default_value = "mt_bench")]
    bench_name: String,

    /// The output answer file
    #[arg(long)]
    answer_file: Option<PathBuf>,

    #[arg(long, default_value = "gpt-3.5-turbo")]
    model: String,

    /// How many completion choices to generate
    #[arg(long, default_value_t = 1)]
    num_choices: usize,

    /// Forcibly set a sampling temperature
    #[arg(long)]
    force_temperature: Option<f64>,

    /// The maximum number of new generated tokens
    #[arg(long, default_value_t = 1024)]
    max_tokens: u32,

    /// The begin index of questions
    #[arg(long)]
    question_begin: Option<usize>,

    /// The end index of questions (exclusive)
    #[arg(long)]
    question_end: Option<usize>,

    /// The number of questions answered concurrently
    #[arg(long, default_value_t = 1)]
    parallel: usize,

    #[arg(long)]
    openai_api_base: Option<String>,

    /// Environment variable holding the API key
    #[arg(long)]
    openai_key_env: Option<String>,

    /// Retries per completion call before the question fails
    #[arg(long, default_value_t = 0)]
    max_retries: u32,

    /// Initial delay between retries in seconds
    #[arg(long, default_value_t = 10)]
    retry_delay_secs: u64,

    /// TOML file with the category temperature table
    #[arg(long)]
    temperature_config: Option<PathBuf>,

    /// Root directory of benchmark data
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Single answer grading
    Single,
    /// Pairwise comparison against a baseline
    PairwiseBaseline,
    /// Pairwise comparison between all pairs
    PairwiseAll,
}

#[derive(clap::Args, Debug)]
struct ShowResultArgs {
    #[arg(long, default_value = "oab_bench")]
    bench_name: String,

    #[arg(long)]
    input_file: Option<PathBuf>,

    #[arg(long, default_value = "o1-2024-12-17")]
    judge_model: String,

    #[arg(long, default_value = "gpt-3.5-turbo")]
    baseline_model: String,

    /// A list of models to be evaluated
    #[arg(long, num_args = 1..)]
    model_list: Option<Vec<String>>,

    #[arg(long, value_enum, default_value = "single")]
    mode: Mode,

    /// Sum sub-question scores into exams regardless of benchmark name
    #[arg(long)]
    exam: bool,

    /// Report second turn and average tables regardless of benchmark name
    #[arg(long)]
    two_turn: bool,

    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// Output format: plain or json
    #[arg(short, long, value_enum, default_value = "plain")]
    output: OutputFormat,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::GenAnswer(args) => gen_answer(args).await,
        Command::ShowResult(args) => show_result(args),
    }
}

async fn gen_answer(args: GenAnswerArgs) -> Result<()> {
    let layout = DataLayout::new(&args.data_dir);
    let question_file = layout.question_file(&args.bench_name);
    let questions = load_questions(&question_file, args.question_begin, args.question_end)?;

    let answer_file = args
        .answer_file
        .clone()
        .unwrap_or_else(|| layout.answer_file(&args.bench_name, &args.model));
    println!("Output to {}", answer_file.display());

    let temperatures = match &args.temperature_config {
        Some(path) => TemperatureTable::from_file(path)?,
        None => TemperatureTable::default(),
    };
    let config = GenerationConfig {
        model: args.model.clone(),
        num_choices: args.num_choices,
        max_tokens: args.max_tokens,
        force_temperature: args.force_temperature,
        parallel: args.parallel,
        temperatures,
    };
    config.validate(&questions)?;

    let client = OpenAiClient::new(args.openai_api_base.as_deref(), args.openai_key_env.as_deref())?;
    let retry = RetryConfig::new(args.max_retries, Duration::from_secs(args.retry_delay_secs));
    let generator = AnswerGenerator::new(RetryingClient::new(client, retry), config).with_progress(true);

    info!(
        questions = questions.len(),
        question_file = %question_file.display(),
        num_choices = generator.config().num_choices,
        "loaded questions"
    );
    let summary = generator.run(questions, &answer_file).await?;
    info!(
        completed = summary.completed,
        canonical_answers = summary.canonical_answers,
        "done"
    );

    Ok(())
}

fn load_reported<T: JudgmentRecord>(path: &Path) -> Result<Vec<T>> {
    let Ingested { records, rejected } = load_judgments::<T>(path)?;
    if rejected > 0 {
        warn!(rejected, path = %path.display(), "skipped malformed judgments");
    }
    Ok(records)
}

fn show_result(args: ShowResultArgs) -> Result<()> {
    let layout = DataLayout::new(&args.data_dir);
    let plain = matches!(args.output, OutputFormat::Plain);
    if plain {
        println!("Mode: {}", mode_name(args.mode));
    }

    let report = match args.mode {
        Mode::Single => {
            let input_file = args
                .input_file
                .clone()
                .unwrap_or_else(|| layout.single_judgment_file(&args.bench_name, &args.judge_model));
            if plain {
                println!("Input file: {}", input_file.display());
            }
            let judgments: Vec<JudgmentSingle> = load_reported(&input_file)?;

            let profile = BenchmarkProfile::for_bench(&args.bench_name);
            let filter = ScoreFilter {
                model_list: args.model_list.clone(),
            };
            if args.exam || profile.exam {
                Report::Exam(summarize_exams(&judgments, &filter))
            } else {
                Report::Single(summarize_single(
                    &judgments,
                    &filter,
                    args.two_turn || profile.two_turn,
                ))
            }
        }
        Mode::PairwiseBaseline | Mode::PairwiseAll => {
            let input_file = args
                .input_file
                .clone()
                .unwrap_or_else(|| layout.pair_judgment_file(&args.bench_name, &args.judge_model));
            if plain {
                println!("Input file: {}", input_file.display());
            }
            let pairs: Vec<JudgmentPair> = load_reported(&input_file)?;

            let filter = PairwiseFilter {
                model_list: args.model_list.clone(),
                baseline: match args.mode {
                    Mode::PairwiseBaseline => Some(args.baseline_model.clone()),
                    _ => None,
                },
            };
            Report::Pairwise {
                rows: summarize_pairwise(&pairs, &filter),
            }
        }
    };

    output::print_report(&report, args.output);
    Ok(())
}

fn mode_name(mode: Mode) -> &'static str {
    match mode {
        Mode::Single => "single",
        Mode::PairwiseBaseline => "pairwise-baseline",
        Mode::PairwiseAll => "pairwise-all",
    }
}
