use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointKey, CheckpointStore, FingerprintBuilder};
use crate::config::PipelineConfig;
use crate::error::AmpliflowError;
use crate::fastq::{FastaWriter, FastqReader};
use crate::stage::{CheckpointAction, Stage, StageInput, StageOutput, StagePrep, StageResult};
use crate::workspace::Workspace;

/// Batch profile fitted over every sample's reads before the per-sample
/// fan-out. Fitting rescans the whole batch, so the result is persisted
/// through the checkpoint store and reused while the fingerprint holds.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DenoiseProfile {
    /// Batch-wide abundance per unique sequence, the pool used to rescue
    /// low-abundance sequences under pseudo/full pooling.
    pub pooled: HashMap<String, u64>,
    /// Mean Phred quality per cycle across the batch, recorded for
    /// diagnostics alongside the pool.
    pub cycle_quality: Vec<f64>,
}

impl DenoiseProfile {
    fn fit(inputs: &[StageInput]) -> Result<Self, AmpliflowError> {
        let mut pooled = HashMap::new();
        let mut quality_sums: Vec<(f64, u64)> = Vec::new();

        for input in inputs {
            for path in &input.files {
                let mut reader = FastqReader::open(path)?;
                while let Some(record) = reader.next_record()? {
                    *pooled.entry(record.seq.clone()).or_insert(0u64) += 1;
                    if quality_sums.len() < record.qual.len() {
                        quality_sums.resize(record.qual.len(), (0.0, 0));
                    }
                    for (cycle, q) in record.qual.bytes().enumerate() {
                        let slot = &mut quality_sums[cycle];
                        slot.0 += q.saturating_sub(33) as f64;
                        slot.1 += 1;
                    }
                }
            }
        }

        let cycle_quality = quality_sums
            .into_iter()
            .map(|(sum, n)| if n == 0 { 0.0 } else { sum / n as f64 })
            .collect();
        Ok(Self {
            pooled,
            cycle_quality,
        })
    }
}

/// Dereplicates each sample into unique sequences and drops those below the
/// abundance threshold. Pooled modes consult the batch profile so a sequence
/// supported elsewhere in the batch survives a per-sample singleton count.
pub struct DenoiseStage;

impl Stage for DenoiseStage {
    fn name(&self) -> &'static str {
        "denoise"
    }

    fn validate(&self, _config: &PipelineConfig) -> Result<(), AmpliflowError> {
        // min_abundance and pooling_mode domains are enforced at config
        // resolution; nothing stage-specific remains.
        Ok(())
    }

    fn prepare(
        &self,
        inputs: &[StageInput],
        config: &PipelineConfig,
        store: &CheckpointStore,
    ) -> Result<StagePrep, AmpliflowError> {
        let mut builder = FingerprintBuilder::new(self.name())
            .field("min_abundance", config.min_abundance)
            .field("pooling_mode", config.pooling_mode);
        for input in inputs {
            for path in &input.files {
                builder = builder.input_file(path)?;
            }
        }
        let key = CheckpointKey {
            stage: self.name().to_string(),
            fingerprint: builder.finish(),
        };

        let (blob, action) = match store.get(&key) {
            Ok(Some(blob)) => {
                info!(stage = self.name(), "reusing checkpointed profile");
                (blob, CheckpointAction::Cached)
            }
            Ok(None) => {
                let profile = DenoiseProfile::fit(inputs)?;
                let blob = serde_json::to_vec(&profile)
                    .map_err(|err| AmpliflowError::Filesystem(err.to_string()))?;
                store.put(&key, &blob)?;
                (blob, CheckpointAction::Fit)
            }
            Err(AmpliflowError::CheckpointMismatch {
                expected, found, ..
            }) => {
                warn!(
                    stage = self.name(),
                    expected, found, "checkpoint fingerprint mismatch, refitting"
                );
                let profile = DenoiseProfile::fit(inputs)?;
                let blob = serde_json::to_vec(&profile)
                    .map_err(|err| AmpliflowError::Filesystem(err.to_string()))?;
                store.put(&key, &blob)?;
                (blob, CheckpointAction::Refit)
            }
            Err(err) => return Err(err),
        };

        Ok(StagePrep {
            context: Some(blob),
            checkpoint: Some(action),
        })
    }

    fn run_sample(
        &self,
        input: &StageInput,
        context: Option<&[u8]>,
        workspace: &Workspace,
        config: &PipelineConfig,
    ) -> Result<StageResult, AmpliflowError> {
        let profile: DenoiseProfile = match context {
            Some(blob) => serde_json::from_slice(blob)
                .map_err(|err| AmpliflowError::Filesystem(format!("decode profile: {err}")))?,
            None => DenoiseProfile::default(),
        };

        let mut abundance = HashMap::<String, u64>::new();
        for path in &input.files {
            let mut reader = FastqReader::open(path)?;
            while let Some(record) = reader.next_record()? {
                *abundance.entry(record.seq).or_insert(0) += 1;
            }
        }

        let mut retained: Vec<(String, u64)> = abundance
            .into_iter()
            .filter(|(seq, count)| {
                if *count >= config.min_abundance {
                    return true;
                }
                config.pooling_mode.is_pooled()
                    && profile.pooled.get(seq).copied().unwrap_or(0) >= config.min_abundance
            })
            .collect();
        // Abundance-descending, sequence as tiebreak: deterministic output.
        retained.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let file_name = format!("{}.fasta", input.id);
        let output = StageOutput {
            scratch: workspace.scratch_file(self.name(), &input.id, &file_name),
            dest: workspace.stage_file(self.name(), &file_name),
        };
        let mut writer = FastaWriter::create(&output.scratch)?;
        let mut reads = 0u64;
        for (rank, (seq, count)) in retained.iter().enumerate() {
            writer.write_sequence(&format!("{}_asv{}", input.id, rank + 1), *count, seq)?;
            reads += count;
        }
        writer.finish()?;

        Ok(StageResult {
            id: input.id.clone(),
            outputs: vec![output],
            count: reads,
        })
    }
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;
    use crate::config::{Config, ConfigLoader};
    use crate::domain::PoolingMode;
    use crate::fastq::read_fasta_abundances;

    fn write_reads(path: &Utf8PathBuf, seqs: &[&str]) {
        let mut body = String::new();
        for (idx, seq) in seqs.iter().enumerate() {
            body.push_str(&format!("@r{idx}\n{seq}\n+\n{}\n", "I".repeat(seq.len())));
        }
        std::fs::write(path.as_std_path(), body).unwrap();
    }

    fn setup(dir: &tempfile::TempDir) -> (Workspace, Utf8PathBuf) {
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let workspace = Workspace::new(root.join("out"));
        workspace.ensure_scratch_dir().unwrap();
        workspace.ensure_stage_dir("denoise").unwrap();
        (workspace, root)
    }

    #[test]
    fn singletons_dropped_without_pooling() {
        let dir = tempfile::tempdir().unwrap();
        let (workspace, root) = setup(&dir);
        let reads = root.join("S1.fastq");
        write_reads(&reads, &["ACGT", "ACGT", "TTTT"]);

        let config = ConfigLoader::resolve_config(Config::default()).unwrap();
        let input = StageInput {
            id: "S1".parse().unwrap(),
            files: vec![reads],
        };
        let result = DenoiseStage
            .run_sample(&input, None, &workspace, &config)
            .unwrap();

        assert_eq!(result.count, 2);
        let entries = read_fasta_abundances(&result.outputs[0].scratch).unwrap();
        assert_eq!(entries, vec![("ACGT".to_string(), 2)]);
    }

    #[test]
    fn pooled_mode_rescues_batch_supported_singleton() {
        let dir = tempfile::tempdir().unwrap();
        let (workspace, root) = setup(&dir);
        let reads = root.join("S1.fastq");
        write_reads(&reads, &["ACGT", "ACGT", "TTTT"]);

        let config = ConfigLoader::resolve_config(Config {
            pooling_mode: Some(PoolingMode::Pseudo),
            ..Config::default()
        })
        .unwrap();
        let profile = DenoiseProfile {
            pooled: HashMap::from([("TTTT".to_string(), 5)]),
            cycle_quality: Vec::new(),
        };
        let blob = serde_json::to_vec(&profile).unwrap();

        let input = StageInput {
            id: "S1".parse().unwrap(),
            files: vec![reads],
        };
        let result = DenoiseStage
            .run_sample(&input, Some(&blob), &workspace, &config)
            .unwrap();

        assert_eq!(result.count, 3);
    }

    #[test]
    fn prepare_fits_then_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (_, root) = setup(&dir);
        let reads = root.join("S1.fastq");
        write_reads(&reads, &["ACGT", "ACGT"]);

        let store = CheckpointStore::new(root.join("checkpoints"));
        let config = ConfigLoader::resolve_config(Config::default()).unwrap();
        let inputs = vec![StageInput {
            id: "S1".parse().unwrap(),
            files: vec![reads],
        }];

        let first = DenoiseStage.prepare(&inputs, &config, &store).unwrap();
        assert_eq!(first.checkpoint, Some(CheckpointAction::Fit));

        let second = DenoiseStage.prepare(&inputs, &config, &store).unwrap();
        assert_eq!(second.checkpoint, Some(CheckpointAction::Cached));
        assert_eq!(first.context, second.context);
    }

    #[test]
    fn prepare_refits_on_config_change() {
        let dir = tempfile::tempdir().unwrap();
        let (_, root) = setup(&dir);
        let reads = root.join("S1.fastq");
        write_reads(&reads, &["ACGT", "ACGT"]);

        let store = CheckpointStore::new(root.join("checkpoints"));
        let inputs = vec![StageInput {
            id: "S1".parse().unwrap(),
            files: vec![reads],
        }];

        let config = ConfigLoader::resolve_config(Config::default()).unwrap();
        DenoiseStage.prepare(&inputs, &config, &store).unwrap();

        let changed = ConfigLoader::resolve_config(Config {
            min_abundance: Some(3),
            ..Config::default()
        })
        .unwrap();
        let prep = DenoiseStage.prepare(&inputs, &changed, &store).unwrap();
        assert_eq!(prep.checkpoint, Some(CheckpointAction::Refit));
    }

    #[test]
    fn fitted_profile_pools_across_samples() {
        let dir = tempfile::tempdir().unwrap();
        let (_, root) = setup(&dir);
        let a = root.join("A.fastq");
        let b = root.join("B.fastq");
        write_reads(&a, &["ACGT"]);
        write_reads(&b, &["ACGT", "ACGT"]);

        let inputs = vec![
            StageInput {
                id: "A".parse().unwrap(),
                files: vec![a],
            },
            StageInput {
                id: "B".parse().unwrap(),
                files: vec![b],
            },
        ];
        let profile = DenoiseProfile::fit(&inputs).unwrap();
        assert_eq!(profile.pooled.get("ACGT"), Some(&3));
        assert_eq!(profile.cycle_quality.len(), 4);
        assert!((profile.cycle_quality[0] - 40.0).abs() < 1e-9);
    }
}
