use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{Sample, SampleId};
use crate::error::AmpliflowError;

/// Filename-matching rule for discovery. A file belongs to a sample when its
/// name ends with the direction suffix; the sample id is the remainder.
/// `reverse_suffix = None` selects single-end discovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRule {
    pub forward_suffix: String,
    #[serde(default)]
    pub reverse_suffix: Option<String>,
}

impl DiscoveryRule {
    pub fn paired(forward_suffix: &str, reverse_suffix: &str) -> Self {
        Self {
            forward_suffix: forward_suffix.to_string(),
            reverse_suffix: Some(reverse_suffix.to_string()),
        }
    }

    pub fn single(forward_suffix: &str) -> Self {
        Self {
            forward_suffix: forward_suffix.to_string(),
            reverse_suffix: None,
        }
    }

    pub fn is_paired(&self) -> bool {
        self.reverse_suffix.is_some()
    }
}

/// The discovered batch, sorted by sample id. Identical directory contents
/// always yield the identical, identically-ordered list.
#[derive(Debug, Clone)]
pub struct SampleSet {
    samples: Vec<Sample>,
}

impl SampleSet {
    pub fn discover(input_dir: &Utf8Path, rule: &DiscoveryRule) -> Result<Self, AmpliflowError> {
        let entries = fs::read_dir(input_dir.as_std_path())
            .map_err(|err| AmpliflowError::Filesystem(format!("read {input_dir}: {err}")))?;

        let mut forward = BTreeMap::<SampleId, Utf8PathBuf>::new();
        let mut reverse = BTreeMap::<SampleId, Utf8PathBuf>::new();

        for entry in entries {
            let entry =
                entry.map_err(|err| AmpliflowError::Filesystem(format!("read dir: {err}")))?;
            if !entry.path().is_file() {
                continue;
            }
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else {
                continue;
            };
            let Some(name) = path.file_name() else {
                continue;
            };

            if let Some(stem) = name.strip_suffix(rule.forward_suffix.as_str()) {
                forward.insert(stem.parse()?, path);
            } else if let Some(rev_suffix) = &rule.reverse_suffix
                && let Some(stem) = name.strip_suffix(rev_suffix.as_str())
            {
                reverse.insert(stem.parse()?, path);
            }
        }

        if forward.is_empty() && reverse.is_empty() {
            return Err(AmpliflowError::NoInputsFound(input_dir.to_path_buf()));
        }

        let samples = if rule.is_paired() {
            Self::pair(forward, reverse)?
        } else {
            forward
                .into_iter()
                .map(|(id, path)| Sample {
                    id,
                    inputs: vec![path],
                })
                .collect()
        };

        info!(
            count = samples.len(),
            paired = rule.is_paired(),
            "samples discovered"
        );
        Ok(Self { samples })
    }

    fn pair(
        forward: BTreeMap<SampleId, Utf8PathBuf>,
        mut reverse: BTreeMap<SampleId, Utf8PathBuf>,
    ) -> Result<Vec<Sample>, AmpliflowError> {
        let mut unmatched = Vec::new();
        let mut samples = Vec::with_capacity(forward.len());

        for (id, fwd_path) in forward {
            match reverse.remove(&id) {
                Some(rev_path) => samples.push(Sample {
                    id,
                    inputs: vec![fwd_path, rev_path],
                }),
                None => unmatched.push(fwd_path.to_string()),
            }
        }
        unmatched.extend(reverse.into_values().map(|path| path.to_string()));

        if !unmatched.is_empty() {
            unmatched.sort();
            return Err(AmpliflowError::AsymmetricPairing(unmatched));
        }
        Ok(samples)
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
