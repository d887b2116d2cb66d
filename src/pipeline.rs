use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::domain::{FailureReason, SampleId, SampleState};
use crate::error::AmpliflowError;
use crate::runner::{SampleOutcome, StageRunner};
use crate::sample_set::SampleSet;
use crate::stage::{CheckpointAction, Stage, StageInput};
use crate::stages::{ChimeraStage, DenoiseStage, FilterStage, MergeStage};
use crate::tracker::{ReadTracker, RetentionReport};
use crate::workspace::Workspace;

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointNote {
    pub stage: String,
    pub action: CheckpointAction,
}

#[derive(Debug, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: String,
    pub stages: Vec<String>,
    pub retention: RetentionReport,
    pub checkpoints: Vec<CheckpointNote>,
    pub completed: usize,
    pub failed: usize,
}

/// Orders the stages and wires sample discovery, the per-stage fan-out, the
/// read tracker, and the checkpoint store. Samples advance independently; a
/// failed sample stops advancing while the rest of the batch proceeds. The
/// run itself fails only when zero samples complete.
pub struct Pipeline {
    config: PipelineConfig,
    workspace: Workspace,
    store: CheckpointStore,
    stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// Builds the standard stage sequence and fail-fasts on any parameter a
    /// stage declares out of domain, before any sample is read.
    pub fn new(
        config: PipelineConfig,
        workspace: Workspace,
        paired: bool,
    ) -> Result<Self, AmpliflowError> {
        let mut stages: Vec<Arc<dyn Stage>> = vec![Arc::new(FilterStage)];
        if paired {
            stages.push(Arc::new(MergeStage));
        }
        stages.push(Arc::new(DenoiseStage));
        stages.push(Arc::new(ChimeraStage));

        for stage in &stages {
            stage.validate(&config)?;
        }

        let store = CheckpointStore::new(workspace.checkpoint_root());
        Ok(Self {
            config,
            workspace,
            store,
            stages,
        })
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn run(&self, sample_set: &SampleSet) -> Result<RunReport, AmpliflowError> {
        let started_at = chrono::Utc::now().to_rfc3339();
        let total = sample_set.len();

        let mut tracker = ReadTracker::new();
        let mut states = BTreeMap::<SampleId, SampleState>::new();
        for sample in sample_set.samples() {
            tracker.register_sample(&sample.id);
            states.insert(sample.id.clone(), SampleState::Discovered);
        }

        let mut current: Vec<StageInput> = sample_set
            .samples()
            .iter()
            .map(|sample| StageInput {
                id: sample.id.clone(),
                files: sample.inputs.clone(),
            })
            .collect();

        let runner = StageRunner::new(self.config.concurrency);
        let mut checkpoints = Vec::new();
        let mut last_stage = "";

        for stage in &self.stages {
            if current.is_empty() {
                break;
            }
            last_stage = stage.name();
            tracker.begin_stage(stage.name());
            info!(stage = stage.name(), samples = current.len(), "stage started");

            let prep = stage.prepare(&current, &self.config, &self.store)?;
            if let Some(action) = prep.checkpoint {
                checkpoints.push(CheckpointNote {
                    stage: stage.name().to_string(),
                    action,
                });
            }

            let outcomes = runner.run(
                stage.clone(),
                std::mem::take(&mut current),
                prep.context,
                &self.workspace,
                &self.config,
            )?;

            for outcome in outcomes {
                match outcome {
                    SampleOutcome::Retained(result) => {
                        tracker.record(&result.id, result.count);
                        current.push(StageInput {
                            id: result.id,
                            files: result.outputs.into_iter().map(|o| o.dest).collect(),
                        });
                    }
                    SampleOutcome::Failed { id, error, count } => {
                        // A measured zero still goes into the retention table;
                        // only unreached stages show the sentinel.
                        if let Some(count) = count {
                            tracker.record(&id, count);
                        }
                        let reason = match error {
                            AmpliflowError::Timeout { .. } => FailureReason::Timeout,
                            _ => FailureReason::Error,
                        };
                        states.insert(
                            id,
                            SampleState::Failed {
                                stage: stage.name().to_string(),
                                reason,
                            },
                        );
                    }
                }
            }
            info!(
                stage = stage.name(),
                advancing = current.len(),
                "stage finished"
            );
        }

        for input in &current {
            states.insert(input.id.clone(), SampleState::Complete);
        }

        let retention = tracker.report(&states);
        Workspace::write_bytes_atomic(
            &self.workspace.retention_path(),
            retention.to_tsv().as_bytes(),
        )?;

        let completed = retention.completed();
        if completed == 0 {
            return Err(AmpliflowError::SystemicFailure {
                stage: last_stage.to_string(),
                failed: total,
                total,
            });
        }

        let report = RunReport {
            started_at,
            finished_at: chrono::Utc::now().to_rfc3339(),
            stages: self.stage_names().iter().map(|s| s.to_string()).collect(),
            retention,
            checkpoints,
            completed,
            failed: total - completed,
        };
        let report_bytes = serde_json::to_vec_pretty(&report)
            .map_err(|err| AmpliflowError::Filesystem(err.to_string()))?;
        Workspace::write_bytes_atomic(&self.workspace.report_path(), &report_bytes)?;

        Ok(report)
    }
}
