use crate::pairwise::PairwiseRow;
use crate::scoring::{ExamSummary, ExamTable, ModelScore, PASS_SCORE, SingleSummary};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write};

/// Output format options
#[derive(Debug, Clone, Copy, ValueEnum, Serialize, Deserialize)]
pub enum OutputFormat {
    Plain,
    Json,
}

/// Ranked tables produced by `show-result`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Report {
    Single(SingleSummary),
    Exam(ExamSummary),
    Pairwise { rows: Vec<PairwiseRow> },
}

/// Print a report in the specified format
pub fn print_report(report: &Report, format: OutputFormat) {
    match format {
        OutputFormat::Plain => match render_plain(report) {
            Ok(text) => print!("{}", text),
            Err(e) => eprintln!("Error formatting results: {}", e),
        },
        OutputFormat::Json => print_json(report),
    }
}

fn print_json(report: &Report) {
    match serde_json::to_string_pretty(report) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing results to JSON: {}", e),
    }
}

pub fn render_plain(report: &Report) -> Result<String, fmt::Error> {
    let mut out = String::new();
    match report {
        Report::Single(summary) => render_single(&mut out, summary)?,
        Report::Exam(summary) => render_exams(&mut out, summary)?,
        Report::Pairwise { rows } => render_pairwise(&mut out, rows)?,
    }
    Ok(out)
}

fn model_width<'a>(models: impl Iterator<Item = &'a str>) -> usize {
    models.map(str::len).max().unwrap_or(0).max(15) + 2
}

fn render_scores(out: &mut impl Write, title: &str, scores: &[ModelScore]) -> fmt::Result {
    writeln!(out, "\n########## {} ##########", title)?;
    if scores.is_empty() {
        return writeln!(out, "No results.");
    }

    let width = model_width(scores.iter().map(|s| s.model.as_str()));
    writeln!(out, "{:<width$} {:>8}", "model", "score")?;
    for score in scores {
        writeln!(out, "{:<width$} {:>8.4}", score.model, score.score)?;
    }
    Ok(())
}

fn render_single(out: &mut impl Write, summary: &SingleSummary) -> fmt::Result {
    render_scores(out, "First turn", &summary.turn1)?;
    if let Some(turn2) = &summary.turn2 {
        render_scores(out, "Second turn", turn2)?;
    }
    if let Some(average) = &summary.average {
        render_scores(out, "Average", average)?;
    }
    Ok(())
}

fn question_label(table: &ExamTable, index: usize) -> String {
    let id = table.questions[index].to_string();
    match id.rsplit('_').next() {
        Some(last) => format!("q{}", last),
        None => id,
    }
}

fn render_exam_table(out: &mut impl Write, table: &ExamTable) -> fmt::Result {
    writeln!(out, "\n--- {} ---", table.exam)?;
    let width = model_width(table.rows.iter().map(|r| r.model.as_str()));

    write!(out, "{:<width$}", "model")?;
    for index in 0..table.questions.len() {
        write!(out, " {:>8}", question_label(table, index))?;
    }
    writeln!(out, " {:>8}", "total")?;

    for row in &table.rows {
        write!(out, "{:<width$}", row.model)?;
        for score in &row.scores {
            write!(out, " {:>8.4}", score)?;
        }
        writeln!(out, " {:>8.4}", row.total)?;
    }
    Ok(())
}

fn render_exams(out: &mut impl Write, summary: &ExamSummary) -> fmt::Result {
    writeln!(out, "\n=== Scores by Exam ===")?;
    if summary.exams.is_empty() {
        writeln!(out, "No results.")?;
    }
    for table in &summary.exams {
        render_exam_table(out, table)?;
    }

    writeln!(
        out,
        "\n=== Number of Approved Exams per Model (score >= {:.1}) ===",
        PASS_SCORE
    )?;
    for approvals in &summary.approvals {
        writeln!(
            out,
            "{}: {}/{} exams",
            approvals.model, approvals.approved, approvals.total_exams
        )?;
    }

    render_scores(out, "Overall", &summary.overall)
}

fn render_pairwise(out: &mut impl Write, rows: &[PairwiseRow]) -> fmt::Result {
    if rows.is_empty() {
        return writeln!(out, "No results.");
    }

    let width = model_width(rows.iter().map(|r| r.model.as_str()));
    writeln!(
        out,
        "{:<width$} {:>5} {:>5} {:>5} {:>9} {:>9} {:>17}",
        "model", "win", "loss", "tie", "win_rate", "loss_rate", "win_rate_adjusted"
    )?;
    for row in rows {
        writeln!(
            out,
            "{:<width$} {:>5} {:>5} {:>5} {:>9.6} {:>9.6} {:>17.6}",
            row.model, row.win, row.loss, row.tie, row.win_rate, row.loss_rate, row.win_rate_adjusted
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuestionId;
    use crate::scoring::{Approvals, ExamRow};

    fn score(model: &str, score: f64) -> ModelScore {
        ModelScore {
            model: model.to_string(),
            score,
        }
    }

    #[test]
    fn test_single_plain_output() {
        let report = Report::Single(SingleSummary {
            turn1: vec![score("gpt-4", 8.9), score("vicuna-13b", 6.5)],
            turn2: Some(vec![]),
            average: None,
        });

        let text = render_plain(&report).unwrap();
        assert!(text.contains("########## First turn ##########"));
        assert!(text.contains("gpt-4"));
        assert!(text.contains("8.9000"));
        assert!(text.find("gpt-4").unwrap() < text.find("vicuna-13b").unwrap());
        assert!(text.contains("########## Second turn ##########\nNo results."));
        assert!(!text.contains("Average"));
    }

    #[test]
    fn test_exam_plain_output() {
        let report = Report::Exam(ExamSummary {
            exams: vec![ExamTable {
                exam: "exam1".to_string(),
                questions: vec![QuestionId::from("exam1_q_1"), QuestionId::from("exam1_q_2")],
                rows: vec![ExamRow {
                    model: "A".to_string(),
                    scores: vec![5.0, 2.0],
                    total: 7.0,
                    approved: true,
                }],
            }],
            approvals: vec![Approvals {
                model: "A".to_string(),
                approved: 1,
                total_exams: 1,
            }],
            overall: vec![score("A", 7.0)],
        });

        let text = render_plain(&report).unwrap();
        assert!(text.contains("--- exam1 ---"));
        assert!(text.contains("q1"));
        assert!(text.contains("q2"));
        assert!(text.contains("A: 1/1 exams"));
        assert!(text.contains("score >= 6.0"));
    }

    #[test]
    fn test_pairwise_plain_output() {
        let report = Report::Pairwise {
            rows: vec![PairwiseRow {
                model: "A".to_string(),
                win: 3,
                loss: 1,
                tie: 2,
                win_rate: 0.5,
                loss_rate: 1.0 / 6.0,
                win_rate_adjusted: 4.0 / 6.0,
            }],
        };

        let text = render_plain(&report).unwrap();
        assert!(text.contains("win_rate_adjusted"));
        assert!(text.contains("0.666667"));

        let empty = render_plain(&Report::Pairwise { rows: vec![] }).unwrap();
        assert_eq!(empty, "No results.\n");
    }

    #[test]
    fn test_json_report_is_tagged() {
        let report = Report::Pairwise { rows: vec![] };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "pairwise");
        assert!(json["rows"].as_array().unwrap().is_empty());

        let single = Report::Single(SingleSummary {
            turn1: vec![score("A", 1.0)],
            turn2: None,
            average: None,
        });
        let json = serde_json::to_value(&single).unwrap();
        assert_eq!(json["mode"], "single");
        assert_eq!(json["turn1"][0]["model"], "A");
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write_str(&mut self, _s: &str) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    #[test]
    fn test_write_errors_propagate() {
        assert!(render_scores(&mut FailingWriter, "First turn", &[score("A", 1.0)]).is_err());
        assert!(render_pairwise(&mut FailingWriter, &[]).is_err());
    }

    #[test]
    fn test_print_report_formats() {
        let report = Report::Single(SingleSummary {
            turn1: vec![],
            turn2: None,
            average: None,
        });
        print_report(&report, OutputFormat::Plain);
        print_report(&report, OutputFormat::Json);
    }
}
