use std::fs;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::PoolingMode;
use crate::error::AmpliflowError;

/// Raw file schema. Every field is optional; documented defaults are applied
/// during resolution.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub truncation_length: Option<TruncationLength>,
    #[serde(default)]
    pub max_expected_errors: Option<f64>,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min_overlap: Option<usize>,
    #[serde(default)]
    pub max_mismatch: Option<usize>,
    #[serde(default)]
    pub min_abundance: Option<u64>,
    #[serde(default)]
    pub pooling_mode: Option<PoolingMode>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TruncationLength {
    pub forward: usize,
    #[serde(default)]
    pub reverse: Option<usize>,
}

/// Validated configuration passed through every stage call. No process-wide
/// state; a pipeline owns exactly one of these.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub truncation_forward: usize,
    pub truncation_reverse: usize,
    pub max_expected_errors: f64,
    pub min_length: usize,
    pub max_length: usize,
    pub min_overlap: usize,
    pub max_mismatch: usize,
    pub min_abundance: u64,
    pub pooling_mode: PoolingMode,
    pub concurrency: usize,
    pub timeout_secs: u64,
}

impl PipelineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<PipelineConfig, AmpliflowError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from("ampliflow.json"),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Err(AmpliflowError::MissingConfig);
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| AmpliflowError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| AmpliflowError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<PipelineConfig, AmpliflowError> {
        let (truncation_forward, truncation_reverse) = match config.truncation_length {
            Some(trunc) => (trunc.forward, trunc.reverse.unwrap_or(trunc.forward)),
            None => (0, 0),
        };

        let resolved = PipelineConfig {
            truncation_forward,
            truncation_reverse,
            max_expected_errors: config.max_expected_errors.unwrap_or(2.0),
            min_length: config.min_length.unwrap_or(50),
            max_length: config.max_length.unwrap_or(600),
            min_overlap: config.min_overlap.unwrap_or(12),
            max_mismatch: config.max_mismatch.unwrap_or(0),
            min_abundance: config.min_abundance.unwrap_or(2),
            pooling_mode: config.pooling_mode.unwrap_or(PoolingMode::None),
            concurrency: config.concurrency.unwrap_or(4),
            timeout_secs: config.timeout_secs.unwrap_or(600),
        };

        Self::validate(&resolved)?;
        Ok(resolved)
    }

    /// Domain checks run before any sample is read. A truncation length of
    /// zero disables truncation for that direction, so zero is in-domain there.
    fn validate(config: &PipelineConfig) -> Result<(), AmpliflowError> {
        if !config.max_expected_errors.is_finite() || config.max_expected_errors < 0.0 {
            return Err(AmpliflowError::InvalidParameter(format!(
                "max_expected_errors must be a non-negative finite number, got {}",
                config.max_expected_errors
            )));
        }
        if config.min_length == 0 {
            return Err(AmpliflowError::InvalidParameter(
                "min_length must be at least 1".to_string(),
            ));
        }
        if config.min_length > config.max_length {
            return Err(AmpliflowError::InvalidParameter(format!(
                "min_length {} exceeds max_length {}",
                config.min_length, config.max_length
            )));
        }
        if config.min_overlap == 0 {
            return Err(AmpliflowError::InvalidParameter(
                "min_overlap must be at least 1".to_string(),
            ));
        }
        if config.min_abundance == 0 {
            return Err(AmpliflowError::InvalidParameter(
                "min_abundance must be at least 1".to_string(),
            ));
        }
        if config.concurrency == 0 {
            return Err(AmpliflowError::InvalidParameter(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if config.timeout_secs == 0 {
            return Err(AmpliflowError::InvalidParameter(
                "timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
