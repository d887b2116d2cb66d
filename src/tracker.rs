use std::collections::BTreeMap;

use serde::Serialize;
use tracing::warn;

use crate::domain::{FailureReason, SampleId, SampleState};

/// Accumulates retained record counts per sample and per stage. The retention
/// table is the principal correctness signal of the pipeline and is produced
/// even when samples fail partway.
#[derive(Debug, Default)]
pub struct ReadTracker {
    stages: Vec<String>,
    counts: BTreeMap<SampleId, Vec<Option<u64>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionRow {
    pub sample: String,
    /// One entry per stage in stage order; `None` marks stages a failed
    /// sample never completed.
    pub counts: Vec<Option<u64>>,
    pub status: SampleState,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: String,
    pub total_retained: u64,
    /// Fraction of the previous stage's total that survived this stage.
    pub retention_fraction: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionReport {
    pub stages: Vec<String>,
    pub rows: Vec<RetentionRow>,
    pub summaries: Vec<StageSummary>,
    /// Samples whose counts increased across a filtering stage, which signals
    /// a misconfigured stage rather than a hard error.
    pub monotonicity_warnings: Vec<String>,
}

impl ReadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the next stage; counts recorded afterwards belong to it.
    pub fn begin_stage(&mut self, stage: &str) {
        self.stages.push(stage.to_string());
        for counts in self.counts.values_mut() {
            counts.push(None);
        }
    }

    pub fn register_sample(&mut self, sample: &SampleId) {
        self.counts
            .entry(sample.clone())
            .or_insert_with(|| vec![None; self.stages.len()]);
    }

    pub fn record(&mut self, sample: &SampleId, count: u64) {
        let slot = self
            .counts
            .entry(sample.clone())
            .or_insert_with(|| vec![None; self.stages.len()]);
        if let Some(last) = slot.last_mut() {
            *last = Some(count);
        }
    }

    pub fn report(&self, states: &BTreeMap<SampleId, SampleState>) -> RetentionReport {
        let mut rows = Vec::with_capacity(self.counts.len());
        let mut warnings = Vec::new();

        for (sample, counts) in &self.counts {
            let mut previous: Option<u64> = None;
            for (idx, count) in counts.iter().enumerate() {
                if let (Some(prev), Some(current)) = (previous, *count)
                    && current > prev
                {
                    let message = format!(
                        "sample {sample}: stage {} retained {current} records, more than {prev} from the previous stage",
                        self.stages[idx]
                    );
                    warn!("{message}");
                    warnings.push(message);
                }
                if count.is_some() {
                    previous = *count;
                }
            }

            let status = states
                .get(sample)
                .cloned()
                .unwrap_or(SampleState::Discovered);
            rows.push(RetentionRow {
                sample: sample.to_string(),
                counts: counts.clone(),
                status,
            });
        }

        let mut summaries = Vec::with_capacity(self.stages.len());
        let mut previous_total: Option<u64> = None;
        for (idx, stage) in self.stages.iter().enumerate() {
            let total: u64 = self
                .counts
                .values()
                .filter_map(|counts| counts.get(idx).copied().flatten())
                .sum();
            let retention_fraction = previous_total
                .filter(|prev| *prev > 0)
                .map(|prev| total as f64 / prev as f64);
            summaries.push(StageSummary {
                stage: stage.clone(),
                total_retained: total,
                retention_fraction,
            });
            previous_total = Some(total);
        }

        RetentionReport {
            stages: self.stages.clone(),
            rows,
            summaries,
            monotonicity_warnings: warnings,
        }
    }
}

impl RetentionReport {
    /// Tab-delimited export, one row per sample, `-` for stages a failed
    /// sample never reached.
    pub fn to_tsv(&self) -> String {
        let mut out = String::from("sample");
        for stage in &self.stages {
            out.push('\t');
            out.push_str(stage);
        }
        out.push_str("\tstatus\n");

        for row in &self.rows {
            out.push_str(&row.sample);
            for count in &row.counts {
                out.push('\t');
                match count {
                    Some(count) => out.push_str(&count.to_string()),
                    None => out.push('-'),
                }
            }
            out.push('\t');
            match &row.status {
                SampleState::Discovered => out.push_str("discovered"),
                SampleState::Complete => out.push_str("complete"),
                SampleState::Failed { stage, reason } => {
                    let reason = match reason {
                        FailureReason::Error => "failed",
                        FailureReason::Timeout => "timeout",
                    };
                    out.push_str(&format!("{reason}({stage})"));
                }
            }
            out.push('\n');
        }
        out
    }

    pub fn completed(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.status == SampleState::Complete)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> SampleId {
        name.parse().unwrap()
    }

    fn states(entries: &[(&str, SampleState)]) -> BTreeMap<SampleId, SampleState> {
        entries
            .iter()
            .map(|(name, state)| (id(name), state.clone()))
            .collect()
    }

    #[test]
    fn retention_table_with_failed_sample() {
        let mut tracker = ReadTracker::new();
        tracker.register_sample(&id("a"));
        tracker.register_sample(&id("b"));

        tracker.begin_stage("filter");
        tracker.record(&id("a"), 100);
        tracker.record(&id("b"), 80);

        tracker.begin_stage("denoise");
        tracker.record(&id("a"), 90);
        // b failed at denoise, no count recorded.

        let report = tracker.report(&states(&[
            ("a", SampleState::Complete),
            (
                "b",
                SampleState::Failed {
                    stage: "denoise".to_string(),
                    reason: FailureReason::Error,
                },
            ),
        ]));

        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[0].counts, vec![Some(100), Some(90)]);
        assert_eq!(report.rows[1].counts, vec![Some(80), None]);
        assert_eq!(report.completed(), 1);
        assert!(report.monotonicity_warnings.is_empty());

        let tsv = report.to_tsv();
        assert!(tsv.contains("sample\tfilter\tdenoise\tstatus"));
        assert!(tsv.contains("a\t100\t90\tcomplete"));
        assert!(tsv.contains("b\t80\t-\tfailed(denoise)"));
    }

    #[test]
    fn increasing_counts_are_flagged_not_rejected() {
        let mut tracker = ReadTracker::new();
        tracker.register_sample(&id("a"));
        tracker.begin_stage("filter");
        tracker.record(&id("a"), 10);
        tracker.begin_stage("denoise");
        tracker.record(&id("a"), 25);

        let report = tracker.report(&states(&[("a", SampleState::Complete)]));
        assert_eq!(report.monotonicity_warnings.len(), 1);
        assert!(report.monotonicity_warnings[0].contains("denoise"));
        assert_eq!(report.rows[0].counts, vec![Some(10), Some(25)]);
    }

    #[test]
    fn stage_summaries_track_retention_fractions() {
        let mut tracker = ReadTracker::new();
        tracker.register_sample(&id("a"));
        tracker.register_sample(&id("b"));
        tracker.begin_stage("filter");
        tracker.record(&id("a"), 60);
        tracker.record(&id("b"), 40);
        tracker.begin_stage("denoise");
        tracker.record(&id("a"), 30);
        tracker.record(&id("b"), 20);

        let report = tracker.report(&states(&[
            ("a", SampleState::Complete),
            ("b", SampleState::Complete),
        ]));

        assert_eq!(report.summaries[0].total_retained, 100);
        assert_eq!(report.summaries[0].retention_fraction, None);
        assert_eq!(report.summaries[1].total_retained, 50);
        assert_eq!(report.summaries[1].retention_fraction, Some(0.5));
    }
}
