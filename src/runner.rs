use std::sync::Arc;
use std::thread;

use crossbeam::channel::{RecvTimeoutError, bounded, unbounded};
use tracing::warn;

use crate::config::PipelineConfig;
use crate::domain::SampleId;
use crate::error::AmpliflowError;
use crate::stage::{Stage, StageInput, StageResult};
use crate::workspace::Workspace;

/// Per-sample outcome of one stage. Failures carry the error that stopped the
/// sample; the batch itself never aborts here. `count` is the retained-record
/// count observed before the failure, when one was observed at all.
#[derive(Debug)]
pub enum SampleOutcome {
    Retained(StageResult),
    Failed {
        id: SampleId,
        error: AmpliflowError,
        count: Option<u64>,
    },
}

impl SampleOutcome {
    fn id(&self) -> &SampleId {
        match self {
            SampleOutcome::Retained(result) => &result.id,
            SampleOutcome::Failed { id, .. } => id,
        }
    }
}

/// Fans one stage out across the batch on a bounded worker pool. Samples are
/// independent; no ordering is guaranteed between them within a stage, so the
/// collected outcomes are re-sorted by sample id.
pub struct StageRunner {
    concurrency: usize,
}

impl StageRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn run(
        &self,
        stage: Arc<dyn Stage>,
        inputs: Vec<StageInput>,
        context: Option<Vec<u8>>,
        workspace: &Workspace,
        config: &PipelineConfig,
    ) -> Result<Vec<SampleOutcome>, AmpliflowError> {
        workspace.ensure_stage_dir(stage.name())?;
        workspace.ensure_scratch_dir()?;

        let total = inputs.len();
        let context: Arc<Option<Vec<u8>>> = Arc::new(context);
        let workspace = Arc::new(workspace.clone());
        let config = Arc::new(config.clone());

        let (job_tx, job_rx) = unbounded::<StageInput>();
        let (out_tx, out_rx) = unbounded::<SampleOutcome>();
        for input in inputs {
            job_tx.send(input).expect("job channel closed early");
        }
        drop(job_tx);

        let mut workers = Vec::with_capacity(self.concurrency.min(total.max(1)));
        for _ in 0..self.concurrency.min(total.max(1)) {
            let job_rx = job_rx.clone();
            let out_tx = out_tx.clone();
            let stage = stage.clone();
            let context = context.clone();
            let workspace = workspace.clone();
            let config = config.clone();

            workers.push(thread::spawn(move || {
                while let Ok(input) = job_rx.recv() {
                    let outcome =
                        run_one(stage.clone(), input, &context, &workspace, &config);
                    if out_tx.send(outcome).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(out_tx);

        let mut outcomes: Vec<SampleOutcome> = out_rx.iter().collect();
        for worker in workers {
            worker
                .join()
                .map_err(|_| AmpliflowError::Internal("stage worker panicked".to_string()))?;
        }

        outcomes.sort_by(|a, b| a.id().cmp(b.id()));
        debug_assert_eq!(outcomes.len(), total);
        Ok(outcomes)
    }
}

/// Runs one sample on its own thread so the invocation can be bounded by the
/// configured timeout. A timed-out thread is abandoned; publication happens
/// here, after the invocation is accepted, so an abandoned invocation's files
/// stay in the scratch directory and never reach the stage output.
fn run_one(
    stage: Arc<dyn Stage>,
    input: StageInput,
    context: &Arc<Option<Vec<u8>>>,
    workspace: &Arc<Workspace>,
    config: &Arc<PipelineConfig>,
) -> SampleOutcome {
    let id = input.id.clone();
    let stage_name = stage.name().to_string();
    let timeout = config.timeout();

    let (done_tx, done_rx) = bounded::<Result<StageResult, AmpliflowError>>(1);
    {
        let context = context.clone();
        let workspace = workspace.clone();
        let config = config.clone();
        thread::spawn(move || {
            let result =
                stage.run_sample(&input, (*context).as_deref(), &workspace, &config);
            let _ = done_tx.send(result);
        });
    }

    match done_rx.recv_timeout(timeout) {
        Ok(Ok(result)) if result.count == 0 => {
            warn!(sample = %id, stage = %stage_name, "no records retained");
            SampleOutcome::Failed {
                error: AmpliflowError::StageFailure {
                    stage: stage_name,
                    sample: id.to_string(),
                    message: "no records retained".to_string(),
                },
                id,
                count: Some(0),
            }
        }
        Ok(Ok(result)) => match publish_outputs(&result) {
            Ok(()) => SampleOutcome::Retained(result),
            Err(error) => {
                warn!(sample = %id, stage = %stage_name, %error, "publish failed");
                SampleOutcome::Failed {
                    error: AmpliflowError::StageFailure {
                        stage: stage_name,
                        sample: id.to_string(),
                        message: error.to_string(),
                    },
                    id,
                    count: None,
                }
            }
        },
        Ok(Err(error)) => {
            warn!(sample = %id, stage = %stage_name, %error, "sample failed");
            let error = AmpliflowError::StageFailure {
                stage: stage_name,
                sample: id.to_string(),
                message: error.to_string(),
            };
            SampleOutcome::Failed {
                id,
                error,
                count: None,
            }
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(sample = %id, stage = %stage_name, "sample timed out");
            SampleOutcome::Failed {
                error: AmpliflowError::Timeout {
                    stage: stage_name,
                    sample: id.to_string(),
                    seconds: timeout.as_secs(),
                },
                id,
                count: None,
            }
        }
        Err(RecvTimeoutError::Disconnected) => SampleOutcome::Failed {
            error: AmpliflowError::StageFailure {
                stage: stage_name,
                sample: id.to_string(),
                message: "stage invocation panicked".to_string(),
            },
            id,
            count: None,
        },
    }
}

fn publish_outputs(result: &StageResult) -> Result<(), AmpliflowError> {
    for output in &result.outputs {
        Workspace::publish(&output.scratch, &output.dest)?;
    }
    Ok(())
}
