use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum AmpliflowError {
    #[error("no input files matching the suffix rule in {0}")]
    NoInputsFound(Utf8PathBuf),

    #[error("asymmetric paired-end inputs, unmatched files: {}", .0.join(", "))]
    AsymmetricPairing(Vec<String>),

    #[error("invalid sample identifier: {0}")]
    InvalidSampleId(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("missing config file ampliflow.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("stage {stage} failed for sample {sample}: {message}")]
    StageFailure {
        stage: String,
        sample: String,
        message: String,
    },

    #[error("stage {stage} timed out for sample {sample} after {seconds}s")]
    Timeout {
        stage: String,
        sample: String,
        seconds: u64,
    },

    #[error(
        "checkpoint for stage {stage} does not match current inputs (expected {expected}, found {found})"
    )]
    CheckpointMismatch {
        stage: String,
        expected: String,
        found: String,
    },

    #[error("no samples completed the pipeline, {failed} of {total} failed at stage {stage}")]
    SystemicFailure {
        stage: String,
        failed: usize,
        total: usize,
    },

    #[error("malformed record in {path}: {message}")]
    MalformedRecord { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("internal error: {0}")]
    Internal(String),
}
