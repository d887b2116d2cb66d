use std::io::{self, Write};

use serde::Serialize;

use crate::pipeline::RunReport;
use crate::sample_set::SampleSet;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_report(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_check(check: &CheckResult) -> io::Result<()> {
        Self::print_json(check)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub samples: Vec<CheckSample>,
    pub stages: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckSample {
    pub sample: String,
    pub inputs: Vec<String>,
}

impl CheckResult {
    pub fn new(sample_set: &SampleSet, stages: Vec<String>) -> Self {
        Self {
            samples: sample_set
                .samples()
                .iter()
                .map(|sample| CheckSample {
                    sample: sample.id.to_string(),
                    inputs: sample.inputs.iter().map(|p| p.to_string()).collect(),
                })
                .collect(),
            stages,
        }
    }
}

/// Human-facing run summary for interactive mode.
pub fn print_run_summary(report: &RunReport) {
    println!(
        "ampliflow: {} of {} samples complete",
        report.completed,
        report.completed + report.failed
    );
    for summary in &report.retention.summaries {
        match summary.retention_fraction {
            Some(fraction) => println!(
                "  {}: {} records retained ({:.1}%)",
                summary.stage,
                summary.total_retained,
                fraction * 100.0
            ),
            None => println!(
                "  {}: {} records retained",
                summary.stage, summary.total_retained
            ),
        }
    }
    for warning in &report.retention.monotonicity_warnings {
        println!("  warning: {warning}");
    }
}
