use crate::config::PipelineConfig;
use crate::error::AmpliflowError;
use crate::fastq::{FastqReader, FastqRecord, FastqWriter};
use crate::stage::{Stage, StageInput, StageOutput, StageResult};
use crate::workspace::Workspace;

/// Overlap-merges forward reads with reverse-complemented reverse reads.
/// Pairs with no acceptable overlap are dropped; merged reads must fall inside
/// the configured length bounds.
pub struct MergeStage;

impl MergeStage {
    /// Longest overlap wins; mismatches within the overlap are tolerated up
    /// to `max_mismatch` and resolved in favor of the higher-quality base.
    fn merge_pair(
        fwd: &FastqRecord,
        rev: &FastqRecord,
        config: &PipelineConfig,
    ) -> Option<FastqRecord> {
        let rc = rev.reverse_complement();
        let fwd_bytes = fwd.seq.as_bytes();
        let rc_bytes = rc.seq.as_bytes();
        let max_overlap = fwd_bytes.len().min(rc_bytes.len());

        for overlap in (config.min_overlap..=max_overlap).rev() {
            let fwd_tail = &fwd_bytes[fwd_bytes.len() - overlap..];
            let rc_head = &rc_bytes[..overlap];
            let mismatches = fwd_tail
                .iter()
                .zip(rc_head)
                .filter(|(a, b)| a != b)
                .count();
            if mismatches > config.max_mismatch {
                continue;
            }

            let offset = fwd_bytes.len() - overlap;
            let mut seq = String::with_capacity(offset + rc.seq.len());
            let mut qual = String::with_capacity(offset + rc.seq.len());
            seq.push_str(&fwd.seq[..offset]);
            qual.push_str(&fwd.qual[..offset]);
            for idx in 0..overlap {
                let fwd_q = fwd.qual.as_bytes()[offset + idx];
                let rc_q = rc.qual.as_bytes()[idx];
                if fwd_q >= rc_q {
                    seq.push(fwd.seq.as_bytes()[offset + idx] as char);
                    qual.push(fwd_q as char);
                } else {
                    seq.push(rc_bytes[idx] as char);
                    qual.push(rc_q as char);
                }
            }
            seq.push_str(&rc.seq[overlap..]);
            qual.push_str(&rc.qual[overlap..]);

            return Some(FastqRecord {
                name: fwd.name.clone(),
                seq,
                qual,
            });
        }
        None
    }
}

impl Stage for MergeStage {
    fn name(&self) -> &'static str {
        "merge"
    }

    fn validate(&self, config: &PipelineConfig) -> Result<(), AmpliflowError> {
        if config.max_mismatch >= config.min_overlap {
            return Err(AmpliflowError::InvalidParameter(format!(
                "max_mismatch {} must be below min_overlap {}",
                config.max_mismatch, config.min_overlap
            )));
        }
        Ok(())
    }

    fn run_sample(
        &self,
        input: &StageInput,
        _context: Option<&[u8]>,
        workspace: &Workspace,
        config: &PipelineConfig,
    ) -> Result<StageResult, AmpliflowError> {
        let [fwd_path, rev_path] = input.files.as_slice() else {
            return Err(AmpliflowError::StageFailure {
                stage: self.name().to_string(),
                sample: input.id.to_string(),
                message: format!("expected 2 input files, got {}", input.files.len()),
            });
        };

        let mut fwd_reader = FastqReader::open(fwd_path)?;
        let mut rev_reader = FastqReader::open(rev_path)?;

        let file_name = format!("{}.fastq.gz", input.id);
        let output = StageOutput {
            scratch: workspace.scratch_file(self.name(), &input.id, &file_name),
            dest: workspace.stage_file(self.name(), &file_name),
        };
        let mut writer = FastqWriter::create(&output.scratch)?;

        let mut merged = 0u64;
        while let (Some(fwd), Some(rev)) =
            (fwd_reader.next_record()?, rev_reader.next_record()?)
        {
            if let Some(record) = Self::merge_pair(&fwd, &rev, config)
                && record.seq.len() >= config.min_length
                && record.seq.len() <= config.max_length
            {
                writer.write_record(&record)?;
                merged += 1;
            }
        }
        writer.finish()?;

        Ok(StageResult {
            id: input.id.clone(),
            outputs: vec![output],
            count: merged,
        })
    }
}
