use crate::config::PipelineConfig;
use crate::error::AmpliflowError;
use crate::fastq::{FastaWriter, read_fasta_abundances};
use crate::stage::{Stage, StageInput, StageOutput, StageResult};
use crate::workspace::Workspace;

/// Parents must carry at least this multiple of the candidate's abundance,
/// the usual two-fold bimera criterion.
const PARENT_FOLD: u64 = 2;

/// Removes bimeras: sequences reconstructable as a prefix of one more
/// abundant sequence joined to the suffix of another.
pub struct ChimeraStage;

impl ChimeraStage {
    fn is_bimera(candidate: &str, abundance: u64, parents: &[(String, u64)]) -> bool {
        let eligible: Vec<&str> = parents
            .iter()
            .filter(|(seq, count)| *count >= abundance * PARENT_FOLD && seq.as_str() != candidate)
            .map(|(seq, _)| seq.as_str())
            .collect();
        if eligible.len() < 2 {
            return false;
        }

        for split in 1..candidate.len() {
            let (left, right) = candidate.split_at(split);
            let lefts: Vec<usize> = eligible
                .iter()
                .enumerate()
                .filter(|(_, parent)| parent.starts_with(left))
                .map(|(idx, _)| idx)
                .collect();
            if lefts.is_empty() {
                // Longer prefixes only shrink the matching parent set.
                return false;
            }
            let bimera = eligible.iter().enumerate().any(|(idx, parent)| {
                parent.ends_with(right) && lefts.iter().any(|&other| other != idx)
            });
            if bimera {
                return true;
            }
        }
        false
    }
}

impl Stage for ChimeraStage {
    fn name(&self) -> &'static str {
        "chimera"
    }

    fn validate(&self, _config: &PipelineConfig) -> Result<(), AmpliflowError> {
        Ok(())
    }

    fn run_sample(
        &self,
        input: &StageInput,
        _context: Option<&[u8]>,
        workspace: &Workspace,
        _config: &PipelineConfig,
    ) -> Result<StageResult, AmpliflowError> {
        let [fasta_path] = input.files.as_slice() else {
            return Err(AmpliflowError::StageFailure {
                stage: self.name().to_string(),
                sample: input.id.to_string(),
                message: format!("expected 1 input file, got {}", input.files.len()),
            });
        };

        let entries = read_fasta_abundances(fasta_path)?;

        let file_name = format!("{}.fasta", input.id);
        let output = StageOutput {
            scratch: workspace.scratch_file(self.name(), &input.id, &file_name),
            dest: workspace.stage_file(self.name(), &file_name),
        };
        let mut writer = FastaWriter::create(&output.scratch)?;

        let mut reads = 0u64;
        let mut rank = 0usize;
        for (seq, abundance) in &entries {
            if Self::is_bimera(seq, *abundance, &entries) {
                continue;
            }
            rank += 1;
            writer.write_sequence(&format!("{}_asv{}", input.id, rank), *abundance, seq)?;
            reads += abundance;
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
    use super::*;

    fn parents(entries: &[(&str, u64)]) -> Vec<(String, u64)> {
        entries
            .iter()
            .map(|(seq, count)| (seq.to_string(), *count))
            .collect()
    }

    #[test]
    fn detects_two_parent_bimera() {
        // AAAATTTT splits into the prefix of parent one and suffix of
        // parent two.
        let pool = parents(&[("AAAACCCC", 10), ("GGGGTTTT", 10), ("AAAATTTT", 2)]);
        assert!(ChimeraStage::is_bimera("AAAATTTT", 2, &pool));
    }

    #[test]
    fn abundant_sequence_is_not_a_bimera() {
        let pool = parents(&[("AAAACCCC", 10), ("GGGGTTTT", 10), ("AAAATTTT", 9)]);
        // Parents are not 2x the candidate's abundance.
        assert!(!ChimeraStage::is_bimera("AAAATTTT", 9, &pool));
    }

    #[test]
    fn unrelated_sequence_is_kept() {
        let pool = parents(&[("AAAACCCC", 10), ("GGGGTTTT", 10), ("CGCGCGCG", 1)]);
        assert!(!ChimeraStage::is_bimera("CGCGCGCG", 1, &pool));
    }

    #[test]
    fn run_sample_drops_flagged_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let workspace = Workspace::new(root.join("out"));
        workspace.ensure_scratch_dir().unwrap();
        workspace.ensure_stage_dir("chimera").unwrap();

        let fasta = root.join("S1.fasta");
        std::fs::write(
            fasta.as_std_path(),
            ">a;size=10\nAAAACCCC\n>b;size=10\nGGGGTTTT\n>c;size=2\nAAAATTTT\n",
        )
        .unwrap();

        let input = StageInput {
            id: "S1".parse().unwrap(),
            files: vec![fasta],
        };
        let config = crate::config::ConfigLoader::resolve_config(crate::config::Config::default())
            .unwrap();
        let result = ChimeraStage
            .run_sample(&input, None, &workspace, &config)
            .unwrap();

        assert_eq!(result.count, 20);
        let entries = crate::fastq::read_fasta_abundances(&result.outputs[0].scratch).unwrap();
        assert_eq!(entries.len(), 2);
    }
}
