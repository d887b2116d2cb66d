use camino::Utf8PathBuf;
use serde::Serialize;

use crate::checkpoint::CheckpointStore;
use crate::config::PipelineConfig;
use crate::domain::SampleId;
use crate::error::AmpliflowError;
use crate::workspace::Workspace;

/// One sample's current files entering a stage: the original inputs for the
/// first stage, the previous stage's outputs after that.
#[derive(Debug, Clone)]
pub struct StageInput {
    pub id: SampleId,
    pub files: Vec<Utf8PathBuf>,
}

/// One file produced by a stage invocation. Stages only ever write under
/// `scratch`; the runner renames to `dest` once the invocation is accepted.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub scratch: Utf8PathBuf,
    pub dest: Utf8PathBuf,
}

/// One sample's outcome for one stage: the outputs awaiting publication and
/// how many records survived.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub id: SampleId,
    pub outputs: Vec<StageOutput>,
    pub count: u64,
}

/// Batch-level preparation result, produced once per stage before fan-out.
#[derive(Debug, Default)]
pub struct StagePrep {
    /// Opaque serialized state shared read-only by every sample invocation.
    pub context: Option<Vec<u8>>,
    pub checkpoint: Option<CheckpointAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointAction {
    /// No usable entry existed; the state was fitted and persisted.
    Fit,
    /// A matching entry was reused.
    Cached,
    /// An entry existed but its fingerprint no longer matched; refitted.
    Refit,
}

/// A named pipeline step applied uniformly across the batch. Implementations
/// never mutate their inputs and never write outside the workspace scratch
/// directory; publication into the stage directory is the runner's job.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks the stage's required parameters before any sample is touched.
    fn validate(&self, config: &PipelineConfig) -> Result<(), AmpliflowError>;

    /// Batch-level work ahead of the per-sample fan-out, e.g. fitting state
    /// that the checkpoint store persists across runs.
    fn prepare(
        &self,
        _inputs: &[StageInput],
        _config: &PipelineConfig,
        _store: &CheckpointStore,
    ) -> Result<StagePrep, AmpliflowError> {
        Ok(StagePrep::default())
    }

    fn run_sample(
        &self,
        input: &StageInput,
        context: Option<&[u8]>,
        workspace: &Workspace,
        config: &PipelineConfig,
    ) -> Result<StageResult, AmpliflowError>;
}
