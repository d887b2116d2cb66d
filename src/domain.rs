use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::AmpliflowError;

/// Sample identifier derived from an input filename, with the read-direction
/// suffix stripped. Restricted to a filesystem-safe alphabet so stage output
/// paths can embed it directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SampleId {
    type Err = AmpliflowError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
        if !is_valid {
            return Err(AmpliflowError::InvalidSampleId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// One discovered sample: one input file for single-end data, two for
/// paired-end (forward first). Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub id: SampleId,
    pub inputs: Vec<Utf8PathBuf>,
}

impl Sample {
    pub fn is_paired(&self) -> bool {
        self.inputs.len() == 2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolingMode {
    None,
    Pseudo,
    Full,
}

impl fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolingMode::None => write!(f, "none"),
            PoolingMode::Pseudo => write!(f, "pseudo"),
            PoolingMode::Full => write!(f, "full"),
        }
    }
}

impl PoolingMode {
    /// Pooled modes judge low-abundance sequences against batch-wide counts.
    pub fn is_pooled(&self) -> bool {
        matches!(self, PoolingMode::Pseudo | PoolingMode::Full)
    }
}

/// Per-sample progress through the stage sequence. Samples advance
/// independently; `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SampleState {
    Discovered,
    Complete,
    Failed { stage: String, reason: FailureReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureReason {
    Error,
    Timeout,
}
